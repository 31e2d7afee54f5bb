//! Content Path Protection
//!
//! Tracks which DMA channels currently carry secure content and asks the secure
//! monitor to flip protection only for channels whose state changed since the
//! last frame. Calls are best effort: a failing channel is logged and recorded
//! in the [`ProtectionReport`] but neither stops the remaining channels nor
//! rolls back the stored mask.

use bitflags::bitflags;
use tracing::{debug, error, warn};

use crate::error::ProtectionError;
use crate::window::{FrameConfig, OutputType};

/// DMA channel used by the write-back output (ODMA)
pub const WRITEBACK_CHANNEL: usize = 6;

/// Secure id passed to the monitor when a channel has no mapping
pub const FALLBACK_SECURE_ID: u32 = 0;

/// Widest channel index representable in a [`ProtectionMask`]
pub const MAX_MASK_CHANNELS: usize = u32::BITS as usize;

bitflags! {
    /// One bit per DMA channel.
    ///
    /// Used both for the protected channels and for the channels a frame fed.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct ProtectionMask: u32 {
        const GF0   = 1 << 0;
        const GF1   = 1 << 1;
        const VG    = 1 << 2;
        const VGS   = 1 << 3;
        const VGF   = 1 << 4;
        const VGRFS = 1 << 5;
        const WB    = 1 << 6;
    }
}

impl ProtectionMask {
    /// Mask with only `channel` set, empty when the channel does not fit
    pub fn channel(channel: usize) -> Self {
        if channel < MAX_MASK_CHANNELS {
            Self::from_bits_retain(1 << channel)
        } else {
            Self::empty()
        }
    }

    /// Mask of every listed channel that fits
    pub fn from_channels<I: IntoIterator<Item = usize>>(channels: I) -> Self {
        channels
            .into_iter()
            .fold(Self::empty(), |mask, ch| mask | Self::channel(ch))
    }

    pub fn has_channel(&self, channel: usize) -> bool {
        channel < MAX_MASK_CHANNELS && self.bits() & (1 << channel) != 0
    }
}

/// Secure monitor identifiers for the DMA channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum SecureChannel {
    L0 = 3,
    L1 = 4,
    L2 = 5,
    L3 = 6,
    L4 = 7,
    L5 = 8,
    Wb1 = 9,
}

impl SecureChannel {
    /// Lookup table indexed by DMA channel
    const DMA_MAP: [SecureChannel; 7] = [
        SecureChannel::L0,  // GF0
        SecureChannel::L1,  // GF1
        SecureChannel::L2,  // VG
        SecureChannel::L3,  // VGS
        SecureChannel::L4,  // VGF
        SecureChannel::L5,  // VGRFS
        SecureChannel::Wb1, // WB
    ];

    pub fn from_dma(channel: usize) -> Option<Self> {
        Self::DMA_MAP.get(channel).copied()
    }

    pub fn id(self) -> u32 {
        self as u32
    }
}

impl TryFrom<usize> for SecureChannel {
    type Error = ProtectionError;

    fn try_from(channel: usize) -> Result<Self, Self::Error> {
        Self::from_dma(channel).ok_or(ProtectionError::UnmappedChannel(channel))
    }
}

/// Privileged call that changes protection of one DMA path
pub trait SecureMonitor {
    /// Returns the monitor status code, `0` on success
    fn set_protection(&mut self, secure_id: u32, enable: bool) -> i32;
}

impl<F> SecureMonitor for F
where
    F: FnMut(u32, bool) -> i32,
{
    fn set_protection(&mut self, secure_id: u32, enable: bool) -> i32 {
        self(secure_id, enable)
    }
}

/// Channel layout of the DECON the engine runs for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelLayout {
    /// Window slots to scan
    pub max_win: usize,
    /// DMA channels to reconcile
    pub channel_count: usize,
    pub out_type: OutputType,
    /// Window slot carrying the write-back buffer
    pub wb_win: usize,
}

/// One secure monitor call issued for a changed channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub channel: usize,
    pub enable: bool,
    /// `None` when the channel had no mapping and the fallback id was used
    pub secure_channel: Option<SecureChannel>,
    pub outcome: Result<(), ProtectionError>,
}

impl Transition {
    pub fn secure_id(&self) -> u32 {
        self.secure_channel
            .map(SecureChannel::id)
            .unwrap_or(FALLBACK_SECURE_ID)
    }
}

/// Result of reconciling one frame
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtectionReport {
    pub previous: ProtectionMask,
    pub current: ProtectionMask,
    pub transitions: Vec<Transition>,
}

impl ProtectionReport {
    /// Nothing changed, no call was issued
    pub fn is_unchanged(&self) -> bool {
        self.previous == self.current
    }

    pub fn calls(&self) -> usize {
        self.transitions.len()
    }

    /// Every mapping or monitor failure, in channel order
    pub fn errors(&self) -> Vec<ProtectionError> {
        let mut errors = Vec::new();
        for t in &self.transitions {
            if t.secure_channel.is_none() {
                errors.push(ProtectionError::UnmappedChannel(t.channel));
            }
            if let Err(e) = t.outcome {
                errors.push(e);
            }
        }
        errors
    }

    pub fn is_clean(&self) -> bool {
        self.errors().is_empty()
    }
}

/// Protection mask requested by a frame
///
/// A missing batch means no register data for this frame and yields an empty
/// mask, which turns protection off everywhere it is on.
pub fn requested_mask(frame: Option<&FrameConfig>, layout: &ChannelLayout) -> ProtectionMask {
    let Some(frame) = frame else {
        return ProtectionMask::empty();
    };

    let mut mask = ProtectionMask::empty();
    for (slot, win) in frame.enabled(layout.max_win) {
        let Some(channel) = win.channel else { continue };
        if channel >= MAX_MASK_CHANNELS {
            warn!("win{}: DMA channel {} does not fit the protection mask", slot, channel);
            continue;
        }
        if win.protected {
            mask |= ProtectionMask::channel(channel);
        }
    }

    if layout.out_type == OutputType::Writeback {
        if let Some(wb) = frame.window(layout.wb_win) {
            if wb.protected {
                mask |= ProtectionMask::channel(WRITEBACK_CHANNEL);
            }
        }
    }

    mask
}

/// Per-display protection bookkeeping
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtectionState {
    previous: ProtectionMask,
}

impl ProtectionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last mask issued to the secure monitor
    pub fn previous(&self) -> ProtectionMask {
        self.previous
    }

    /// Forget everything, as after a display reset
    pub fn reset(&mut self) {
        self.previous = ProtectionMask::empty();
    }

    /// Reconcile the secure monitor with the frame's requested protection.
    ///
    /// The stored mask is replaced by the requested one even when calls fail;
    /// a failed channel is only retried once its requested state changes again.
    pub fn apply(
        &mut self,
        frame: Option<&FrameConfig>,
        layout: &ChannelLayout,
        monitor: &mut dyn SecureMonitor,
    ) -> ProtectionReport {
        let current = requested_mask(frame, layout);
        let previous = self.previous;
        let mut report = ProtectionReport {
            previous,
            current,
            transitions: Vec::new(),
        };

        if current != previous {
            let changed = current ^ previous;
            for channel in 0..layout.channel_count.min(MAX_MASK_CHANNELS) {
                if !changed.has_channel(channel) {
                    continue;
                }
                let enable = current.has_channel(channel);
                report
                    .transitions
                    .push(control_protection(monitor, channel, enable));
            }
        }

        self.previous = current;
        report
    }
}

fn control_protection(monitor: &mut dyn SecureMonitor, channel: usize, enable: bool) -> Transition {
    let secure_channel = match SecureChannel::try_from(channel) {
        Ok(sc) => Some(sc),
        Err(e) => {
            error!("{}", e);
            None
        }
    };
    let secure_id = secure_channel
        .map(SecureChannel::id)
        .unwrap_or(FALLBACK_SECURE_ID);

    let code = monitor.set_protection(secure_id, enable);
    let outcome = if code != 0 {
        let e = ProtectionError::MonitorFailed {
            channel,
            enable,
            code,
        };
        error!("{}", e);
        Err(e)
    } else {
        debug!(
            "DMA CH{} protection {}",
            channel,
            if enable { "enabled" } else { "disabled" }
        );
        Ok(())
    };

    Transition {
        channel,
        enable,
        secure_channel,
        outcome,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::{WinArea, WindowConfig};

    const LAYOUT: ChannelLayout = ChannelLayout {
        max_win: 6,
        channel_count: 7,
        out_type: OutputType::Dsi,
        wb_win: 5,
    };

    fn layer(channel: usize, protected: bool) -> WindowConfig {
        let area = WinArea::new(0, 0, 64, 64);
        WindowConfig {
            src: area,
            dst: area,
            channel: Some(channel),
            protected,
        }
    }

    /// Monitor that records calls and fails for the listed ids
    #[derive(Default)]
    struct Recorder {
        calls: Vec<(u32, bool)>,
        failing: Vec<u32>,
    }

    impl SecureMonitor for Recorder {
        fn set_protection(&mut self, secure_id: u32, enable: bool) -> i32 {
            self.calls.push((secure_id, enable));
            if self.failing.contains(&secure_id) { -1 } else { 0 }
        }
    }

    #[test]
    fn test_single_channel_enable() {
        let mut state = ProtectionState::new();
        let mut monitor = Recorder::default();
        let frame = FrameConfig::new(vec![layer(0, true)]);

        let report = state.apply(Some(&frame), &LAYOUT, &mut monitor);

        assert_eq!(monitor.calls, vec![(SecureChannel::L0.id(), true)]);
        assert_eq!(state.previous().bits(), 0b001);
        assert_eq!(report.calls(), 1);
        assert!(report.is_clean());
    }

    #[test]
    fn test_same_frame_twice_is_idempotent() {
        let mut state = ProtectionState::new();
        let mut monitor = Recorder::default();
        let frame = FrameConfig::new(vec![layer(0, true), layer(3, true)]);

        state.apply(Some(&frame), &LAYOUT, &mut monitor);
        assert_eq!(monitor.calls.len(), 2);

        let report = state.apply(Some(&frame), &LAYOUT, &mut monitor);
        assert!(report.is_unchanged());
        assert_eq!(report.calls(), 0);
        assert_eq!(monitor.calls.len(), 2);
    }

    #[test]
    fn test_only_changed_channels_are_called() {
        let mut state = ProtectionState::new();
        let mut monitor = Recorder::default();

        let first = FrameConfig::new(vec![layer(0, true), layer(1, true)]);
        state.apply(Some(&first), &LAYOUT, &mut monitor);
        monitor.calls.clear();

        let second = FrameConfig::new(vec![layer(0, true), layer(1, false), layer(2, true)]);
        state.apply(Some(&second), &LAYOUT, &mut monitor);

        assert_eq!(
            monitor.calls,
            vec![(SecureChannel::L1.id(), false), (SecureChannel::L2.id(), true)]
        );
        assert_eq!(state.previous(), ProtectionMask::GF0 | ProtectionMask::VG);
    }

    #[test]
    fn test_partial_failure_keeps_going() {
        let mut state = ProtectionState::new();
        let mut monitor = Recorder {
            failing: vec![SecureChannel::L1.id()],
            ..Default::default()
        };
        let frame = FrameConfig::new(vec![layer(1, true), layer(2, true)]);

        let report = state.apply(Some(&frame), &LAYOUT, &mut monitor);

        assert_eq!(
            monitor.calls,
            vec![(SecureChannel::L1.id(), true), (SecureChannel::L2.id(), true)]
        );
        assert_eq!(state.previous(), ProtectionMask::GF1 | ProtectionMask::VG);
        assert_eq!(
            report.errors(),
            vec![ProtectionError::MonitorFailed {
                channel: 1,
                enable: true,
                code: -1
            }]
        );
        assert!(report.transitions[1].outcome.is_ok());
    }

    #[test]
    fn test_failed_channel_is_not_retried() {
        let mut state = ProtectionState::new();
        let mut monitor = Recorder {
            failing: vec![SecureChannel::L0.id()],
            ..Default::default()
        };
        let frame = FrameConfig::new(vec![layer(0, true)]);

        state.apply(Some(&frame), &LAYOUT, &mut monitor);
        let report = state.apply(Some(&frame), &LAYOUT, &mut monitor);

        assert_eq!(report.calls(), 0);
        assert_eq!(monitor.calls.len(), 1);
    }

    #[test]
    fn test_writeback_window_sets_odma_bit() {
        let layout = ChannelLayout {
            out_type: OutputType::Writeback,
            ..LAYOUT
        };
        let mut windows = vec![WindowConfig::default(); 6];
        windows[5].protected = true;
        let frame = FrameConfig::new(windows);

        assert_eq!(requested_mask(Some(&frame), &layout), ProtectionMask::WB);
        assert_eq!(requested_mask(Some(&frame), &LAYOUT), ProtectionMask::empty());

        let mut state = ProtectionState::new();
        let mut monitor = Recorder::default();
        state.apply(Some(&frame), &layout, &mut monitor);
        assert_eq!(monitor.calls, vec![(SecureChannel::Wb1.id(), true)]);
    }

    #[test]
    fn test_missing_frame_disables_everything() {
        let mut state = ProtectionState::new();
        let mut monitor = Recorder::default();
        let frame = FrameConfig::new(vec![layer(4, true)]);
        state.apply(Some(&frame), &LAYOUT, &mut monitor);

        let report = state.apply(None, &LAYOUT, &mut monitor);
        assert_eq!(report.current, ProtectionMask::empty());
        assert_eq!(monitor.calls.last(), Some(&(SecureChannel::L4.id(), false)));
    }

    #[test]
    fn test_unmapped_channel_uses_fallback_id() {
        let layout = ChannelLayout {
            channel_count: 9,
            ..LAYOUT
        };
        let mut state = ProtectionState::new();
        let mut monitor = Recorder::default();
        let frame = FrameConfig::new(vec![layer(8, true)]);

        let report = state.apply(Some(&frame), &layout, &mut monitor);

        assert_eq!(monitor.calls, vec![(FALLBACK_SECURE_ID, true)]);
        assert_eq!(report.errors(), vec![ProtectionError::UnmappedChannel(8)]);
        assert_eq!(report.transitions[0].secure_id(), FALLBACK_SECURE_ID);
    }

    #[test]
    fn test_channels_beyond_count_are_stored_but_not_called() {
        let layout = ChannelLayout {
            channel_count: 4,
            ..LAYOUT
        };
        let mut state = ProtectionState::new();
        let mut monitor = Recorder::default();
        let frame = FrameConfig::new(vec![layer(5, true)]);

        let report = state.apply(Some(&frame), &layout, &mut monitor);
        assert_eq!(report.calls(), 0);
        assert_eq!(state.previous(), ProtectionMask::VGRFS);
    }

    #[test]
    fn test_channels_past_mask_width_are_skipped() {
        let frame = FrameConfig::new(vec![layer(40, true), layer(32, true)]);
        assert_eq!(requested_mask(Some(&frame), &LAYOUT), ProtectionMask::empty());

        let mixed = FrameConfig::new(vec![layer(40, true), layer(1, true)]);
        assert_eq!(requested_mask(Some(&mixed), &LAYOUT), ProtectionMask::GF1);
    }

    #[test]
    fn test_mask_from_channels() {
        assert_eq!(
            ProtectionMask::from_channels([0, 4, 40]),
            ProtectionMask::GF0 | ProtectionMask::VGF
        );
        assert!(ProtectionMask::channel(usize::MAX).is_empty());
        assert!(!ProtectionMask::all().has_channel(64));
    }

    #[test]
    fn test_slots_past_max_win_are_ignored() {
        let layout = ChannelLayout {
            max_win: 1,
            ..LAYOUT
        };
        let frame = FrameConfig::new(vec![layer(0, false), layer(1, true)]);
        assert_eq!(requested_mask(Some(&frame), &layout), ProtectionMask::empty());
    }

    #[test]
    fn test_reset_clears_previous() {
        let mut state = ProtectionState::new();
        let mut monitor = |_: u32, _: bool| 0;
        let frame = FrameConfig::new(vec![layer(2, true)]);
        state.apply(Some(&frame), &LAYOUT, &mut monitor);
        assert!(!state.previous().is_empty());

        state.reset();
        assert!(state.previous().is_empty());
    }

    #[test]
    fn test_channel_map() {
        assert_eq!(SecureChannel::from_dma(0), Some(SecureChannel::L0));
        assert_eq!(SecureChannel::from_dma(WRITEBACK_CHANNEL), Some(SecureChannel::Wb1));
        assert_eq!(SecureChannel::from_dma(7), None);
        assert_eq!(
            SecureChannel::try_from(42),
            Err(ProtectionError::UnmappedChannel(42))
        );
    }
}
