//! Frame replay
//!
//! Feeds a recorded sequence of window batches through a DECON the way the
//! commit path would: plan the update region, reconcile content protection,
//! and keep the buffer counters honest. Frames are paced at the panel refresh
//! rate, which follows FPS change notifications.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use anyhow::Result;
use dpu_core::debug::AttachReport;
use dpu_core::notifier::{FpsChange, LcdStatus, LcdStatusNotifier};
use dpu_core::window::{FrameConfig, PanelInfo, WindowConfig};
use dpu_core::{DeconDevice, Rect};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::monitor::SimulatedMonitor;

/// Recorded frames to replay
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FrameScript {
    pub frames: Vec<ScriptFrame>,
}

/// One recorded frame plus the events that arrived with it
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ScriptFrame {
    /// Window batch, absent when the frame carries no register data
    pub windows: Option<Vec<WindowConfig>>,
    pub fps: Option<u32>,
    pub lcd: Option<LcdStatus>,
    pub reset: bool,
    /// Buffers attached while preparing this frame
    pub buf_attach: u32,
    /// Buffers released while retiring earlier frames
    pub buf_detach: u32,
}

/// Area DECON has to refresh for a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "rect", rename_all = "snake_case")]
pub enum UpdateRegion {
    Skip,
    Full,
    Partial(Rect),
}

/// What happened to one replayed frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrameSummary {
    pub index: usize,
    pub region: UpdateRegion,
    /// Pairs of enabled windows whose destinations overlap
    pub overlaps: usize,
    pub protection_calls: usize,
    pub protection_errors: usize,
}

impl FrameSummary {
    fn skipped(index: usize) -> Self {
        Self {
            index,
            region: UpdateRegion::Skip,
            overlaps: 0,
            protection_calls: 0,
            protection_errors: 0,
        }
    }
}

/// Decide the update region for a frame.
///
/// Scaled windows read outside their destination, so any scaling forces a
/// full update.
pub fn plan_update(frame: &FrameConfig, panel: &PanelInfo, max_win: usize) -> UpdateRegion {
    let screen = Rect::full(panel);
    let Some(bbox) = frame.damage_bbox(max_win) else {
        return UpdateRegion::Skip;
    };
    if !bbox.intersects(&screen) {
        return UpdateRegion::Skip;
    }

    let region = bbox.intersect(&screen);
    if region.is_full_screen(panel) || frame.enabled(max_win).any(|(_, w)| w.is_scaling()) {
        UpdateRegion::Full
    } else {
        UpdateRegion::Partial(region)
    }
}

/// Count overlapping destination pairs among enabled windows
pub fn count_overlaps(frame: &FrameConfig, max_win: usize) -> usize {
    let rects: Vec<Rect> = frame.enabled(max_win).map(|(_, w)| w.dst.rect()).collect();
    let mut overlaps = 0;
    for (i, a) in rects.iter().enumerate() {
        for b in &rects[i + 1..] {
            if a.intersects(b) {
                let common = a.intersect(b);
                debug!("overlap {:?} & {:?} -> {:?}", a, b, common);
                overlaps += 1;
            }
        }
    }
    overlaps
}

fn frame_period(fps: u32) -> Duration {
    Duration::from_secs(1) / fps.max(1)
}

pub struct Replayer {
    decon: DeconDevice,
    lcd: LcdStatusNotifier,
    monitor: SimulatedMonitor,
    fps: Arc<AtomicU32>,
    lcd_on: Arc<AtomicBool>,
    paced: bool,
    leak_is_fatal: bool,
    remaining_frames: u32,
    readback_diff: u32,
}

impl Replayer {
    pub fn new(config: &Config) -> Self {
        let decon = DeconDevice::new(0, config.decon.clone(), config.panel);
        let lcd = LcdStatusNotifier::new();

        let fps = Arc::new(AtomicU32::new(config.panel.fps));
        let sink = Arc::clone(&fps);
        decon.register_fps_change(move |FpsChange(rate)| sink.store(*rate, Ordering::Relaxed));

        let lcd_on = Arc::new(AtomicBool::new(true));
        let sink = Arc::clone(&lcd_on);
        lcd.register(move |status| sink.store(*status == LcdStatus::On, Ordering::Relaxed));

        Self {
            decon,
            lcd,
            monitor: SimulatedMonitor::new(&config.protection),
            fps,
            lcd_on,
            paced: config.replay.paced,
            leak_is_fatal: config.debug.leak_is_fatal,
            remaining_frames: config.debug.remaining_frames,
            readback_diff: config.debug.readback_diff,
        }
    }

    pub fn set_paced(&mut self, paced: bool) {
        self.paced = paced;
    }

    /// Replay every frame, stopping early on Ctrl-C
    pub async fn run(&mut self, script: &FrameScript) -> Result<Vec<FrameSummary>> {
        let mut fps = self.fps.load(Ordering::Relaxed);
        let mut ticker = tokio::time::interval(frame_period(fps));
        let mut summaries = Vec::with_capacity(script.frames.len());

        for (index, frame) in script.frames.iter().enumerate() {
            if self.paced {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = tokio::signal::ctrl_c() => {
                        info!("Interrupted after {} frames", index);
                        break;
                    }
                }
            }

            summaries.push(self.step(index, frame)?);

            let current = self.fps.load(Ordering::Relaxed);
            if current != fps {
                info!("Frame rate {} -> {} fps", fps, current);
                fps = current;
                ticker = tokio::time::interval(frame_period(fps));
            }
        }

        info!(
            "Replayed {} frames, {} secure calls ({} failed)",
            summaries.len(),
            self.monitor.calls,
            self.monitor.failures
        );
        Ok(summaries)
    }

    /// Process one frame
    pub fn step(&mut self, index: usize, frame: &ScriptFrame) -> Result<FrameSummary> {
        if frame.reset {
            self.decon.reset();
        }
        if let Some(status) = frame.lcd {
            self.lcd.notify(status);
        }
        if let Some(rate) = frame.fps {
            self.decon.notify_fps_change(rate);
        }

        if !self.lcd_on.load(Ordering::Relaxed) {
            debug!("frame {}: LCD off, skipping", index);
            return Ok(FrameSummary::skipped(index));
        }

        let max_win = self.decon.dt.max_win;
        let batch = frame.windows.clone().map(FrameConfig::new);
        let (region, overlaps) = match &batch {
            Some(b) => (
                plan_update(b, &self.decon.lcd_info, max_win),
                count_overlaps(b, max_win),
            ),
            None => (UpdateRegion::Skip, 0),
        };

        let report = self
            .decon
            .set_protected_content(batch.as_ref(), &mut self.monitor);
        let errors = report.errors();
        for e in &errors {
            warn!("frame {}: {}", index, e);
        }

        self.decon.frame_cnt = self.decon.frame_cnt.wrapping_add(1);
        self.track_buffers(frame)?;

        debug!("frame {}: {:?}, {} overlaps", index, region, overlaps);
        Ok(FrameSummary {
            index,
            region,
            overlaps,
            protection_calls: report.calls(),
            protection_errors: errors.len(),
        })
    }

    fn track_buffers(&mut self, frame: &ScriptFrame) -> Result<()> {
        let counters = &mut self.decon.counters;
        counters
            .buf_cnt
            .record_buffers(frame.buf_attach, frame.buf_detach);

        if counters.buf_cnt.check_balance(self.remaining_frames).is_ok() {
            return Ok(());
        }

        let frame_cnt = self.decon.frame_cnt;
        let result = self.decon.counters.show_dma_attach_info(
            "replay",
            AttachReport::Event,
            self.remaining_frames,
            frame_cnt,
            self.readback_diff,
        );
        match result {
            Err(e) if self.leak_is_fatal => Err(e.into()),
            Err(e) => {
                warn!("{}", e);
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    pub fn decon(&self) -> &DeconDevice {
        &self.decon
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dpu_core::window::WinArea;

    const PANEL: PanelInfo = PanelInfo {
        xres: 1080,
        yres: 2340,
        fps: 60,
    };

    fn layer(dst: WinArea, channel: usize, protected: bool) -> WindowConfig {
        WindowConfig {
            src: WinArea::new(0, 0, dst.w, dst.h),
            dst,
            channel: Some(channel),
            protected,
        }
    }

    fn replayer() -> Replayer {
        let mut config = Config::default();
        config.panel = PANEL;
        config.replay.paced = false;
        Replayer::new(&config)
    }

    #[test]
    fn test_plan_full_screen() {
        let frame = FrameConfig::new(vec![layer(WinArea::new(0, 0, 1080, 2340), 0, false)]);
        assert_eq!(plan_update(&frame, &PANEL, 6), UpdateRegion::Full);
    }

    #[test]
    fn test_plan_partial_is_clipped() {
        let frame = FrameConfig::new(vec![
            layer(WinArea::new(0, 0, 1080, 100), 0, false),
            layer(WinArea::new(1000, 1000, 200, 200), 1, false),
        ]);
        assert_eq!(
            plan_update(&frame, &PANEL, 6),
            UpdateRegion::Partial(Rect::new(0, 0, 1079, 1199))
        );

        let small = FrameConfig::new(vec![layer(WinArea::new(10, 10, 100, 100), 0, false)]);
        assert_eq!(
            plan_update(&small, &PANEL, 6),
            UpdateRegion::Partial(Rect::new(10, 10, 109, 109))
        );
    }

    #[test]
    fn test_plan_scaling_forces_full() {
        let mut win = layer(WinArea::new(10, 10, 100, 100), 0, false);
        win.src = WinArea::new(0, 0, 200, 200);
        let frame = FrameConfig::new(vec![win]);
        assert_eq!(plan_update(&frame, &PANEL, 6), UpdateRegion::Full);
    }

    #[test]
    fn test_plan_offscreen_or_empty_skips() {
        let frame = FrameConfig::new(vec![layer(WinArea::new(2000, 3000, 10, 10), 0, false)]);
        assert_eq!(plan_update(&frame, &PANEL, 6), UpdateRegion::Skip);
        assert_eq!(plan_update(&FrameConfig::default(), &PANEL, 6), UpdateRegion::Skip);
    }

    #[test]
    fn test_plan_far_offscreen_window_skips() {
        let far = layer(WinArea::new(i32::MAX - 4, 0, 16, 16), 0, false);
        let frame = FrameConfig::new(vec![far, far]);
        assert_eq!(plan_update(&frame, &PANEL, 6), UpdateRegion::Skip);
        assert_eq!(count_overlaps(&frame, 6), 1);

        let mut r = replayer();
        let script_frame = ScriptFrame {
            windows: Some(vec![far]),
            ..Default::default()
        };
        assert_eq!(r.step(0, &script_frame).unwrap().region, UpdateRegion::Skip);
    }

    #[test]
    fn test_count_overlaps() {
        let frame = FrameConfig::new(vec![
            layer(WinArea::new(0, 0, 100, 100), 0, false),
            layer(WinArea::new(99, 99, 100, 100), 1, false),
            layer(WinArea::new(500, 500, 10, 10), 2, false),
        ]);
        assert_eq!(count_overlaps(&frame, 6), 1);
    }

    #[test]
    fn test_step_protection_and_lcd_off() {
        let mut r = replayer();
        let secure = ScriptFrame {
            windows: Some(vec![layer(WinArea::new(0, 0, 1080, 608), 4, true)]),
            ..Default::default()
        };

        let s = r.step(0, &secure).unwrap();
        assert_eq!(s.protection_calls, 1);
        assert_eq!(s.protection_errors, 0);

        let s = r.step(1, &secure).unwrap();
        assert_eq!(s.protection_calls, 0);

        let off = ScriptFrame {
            lcd: Some(LcdStatus::Off),
            ..secure.clone()
        };
        assert_eq!(r.step(2, &off).unwrap(), FrameSummary::skipped(2));
    }

    #[test]
    fn test_step_follows_fps_change() {
        let mut r = replayer();
        let frame = ScriptFrame {
            fps: Some(120),
            ..Default::default()
        };
        r.step(0, &frame).unwrap();
        assert_eq!(r.fps.load(Ordering::Relaxed), 120);
    }

    #[test]
    fn test_leak_stops_replay() {
        let mut r = replayer();
        let leaky = ScriptFrame {
            buf_attach: 25,
            ..Default::default()
        };
        // One queued frame allows 20 outstanding buffers
        assert!(r.step(0, &leaky).is_err());
    }

    #[test]
    fn test_huge_buffer_counts_do_not_overflow() {
        let mut config = Config::default();
        config.panel = PANEL;
        config.debug.remaining_frames = 500_000_000;
        let mut r = Replayer::new(&config);
        let frame = ScriptFrame {
            buf_attach: u32::MAX,
            buf_detach: u32::MAX,
            ..Default::default()
        };

        r.step(0, &frame).unwrap();
        r.step(1, &frame).unwrap();
        let cnt = &r.decon().counters.buf_cnt;
        assert_eq!(cnt.buf_attach_cnt, u32::MAX);
        assert_eq!(cnt.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_run_unpaced() {
        let mut r = replayer();
        let script: FrameScript = serde_json::from_str(
            r#"{ "frames": [
                { "windows": [ { "src": { "x": 0, "y": 0, "w": 1080, "h": 2340 },
                                 "dst": { "x": 0, "y": 0, "w": 1080, "h": 2340 },
                                 "channel": 0, "protected": true } ] },
                { },
                { "reset": true }
            ] }"#,
        )
        .unwrap();

        let summaries = r.run(&script).await.unwrap();
        assert_eq!(summaries.len(), 3);
        assert_eq!(summaries[0].region, UpdateRegion::Full);
        assert_eq!(summaries[0].protection_calls, 1);
        // No register data: protection comes off
        assert_eq!(summaries[1].protection_calls, 1);
        assert_eq!(summaries[2].protection_calls, 0);
        assert!(r.decon().protection().previous().is_empty());
    }
}
