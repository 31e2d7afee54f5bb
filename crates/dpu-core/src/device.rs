//! DECON device state
//!
//! A DECON owns the sub-devices feeding it (DPP planes, DSIM links, the
//! DisplayPort block and the panel), the protection mask issued to the secure
//! monitor and its diagnostic counters.

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::debug::{AfbcBuffer, DebugCounters};
use crate::error::DpuError;
use crate::notifier::{FpsChange, NotifierChain, NotifierHandle};
use crate::protection::{
    ChannelLayout, ProtectionMask, ProtectionReport, ProtectionState, SecureMonitor,
};
use crate::window::{
    DsiMode, FrameConfig, MAX_DECON_WIN, OutputType, PanelInfo, PsrMode, TriggerMode,
};

/// DPP planes a DECON can bind
pub const MAX_DPP_SUBDEV: usize = 7;

/// DSIM links a DECON can bind
pub const MAX_DSIM_CNT: usize = 2;

/// Kinds of sibling device a DECON binds to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubDeviceKind {
    Dpp,
    Dsim,
    DisplayPort,
    Panel,
}

impl SubDeviceKind {
    pub const ALL: [SubDeviceKind; 4] = [
        SubDeviceKind::Dpp,
        SubDeviceKind::Dsim,
        SubDeviceKind::DisplayPort,
        SubDeviceKind::Panel,
    ];

    pub fn driver_name(self) -> &'static str {
        match self {
            SubDeviceKind::Dpp => "exynos-dpp",
            SubDeviceKind::Dsim => "exynos-dsim",
            SubDeviceKind::DisplayPort => "exynos-displayport",
            SubDeviceKind::Panel => "panel-drv",
        }
    }

    pub fn from_driver_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.driver_name() == name)
    }
}

/// Driver data of a bound sibling device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubDevice {
    pub kind: SubDeviceKind,
    pub id: usize,
    pub name: String,
    /// Capability bits (DPP only)
    #[serde(default)]
    pub attr: u64,
    /// Panel has a display profiler ready to register
    #[serde(default)]
    pub profiler_ready: bool,
}

impl SubDevice {
    pub fn new(kind: SubDeviceKind, id: usize) -> Self {
        let name = match kind {
            SubDeviceKind::Dpp => format!("dpp-sd{}", id),
            SubDeviceKind::Dsim => format!("dsim-sd{}", id),
            SubDeviceKind::DisplayPort => "displayport-sd".to_string(),
            SubDeviceKind::Panel => "panel-sd".to_string(),
        };
        Self {
            kind,
            id,
            name,
            attr: 0,
            profiler_ready: false,
        }
    }
}

/// A device found on the platform bus
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusDevice {
    pub driver_name: String,
    /// Missing when the driver never finished probing
    pub data: Option<SubDevice>,
}

/// Static description of a DECON instance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeconDt {
    pub max_win: usize,
    pub dpp_cnt: usize,
    pub decon_cnt: usize,
    pub out_type: OutputType,
    pub wb_win: usize,
    pub psr_mode: PsrMode,
    pub trig_mode: TriggerMode,
    pub dsi_mode: DsiMode,
    /// Register the panel's display profiler on DECON 0
    pub profiler: bool,
}

impl Default for DeconDt {
    fn default() -> Self {
        Self {
            max_win: MAX_DECON_WIN,
            dpp_cnt: MAX_DPP_SUBDEV,
            decon_cnt: 3,
            out_type: OutputType::Dsi,
            wb_win: MAX_DECON_WIN - 1,
            psr_mode: PsrMode::Command,
            trig_mode: TriggerMode::Hardware,
            dsi_mode: DsiMode::Single,
            profiler: false,
        }
    }
}

/// Output mode handed to the register layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeInfo {
    pub psr_mode: PsrMode,
    pub trig_mode: TriggerMode,
    pub dsi_mode: DsiMode,
    pub out_type: OutputType,
}

/// Parameters for initializing DECON registers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitParam {
    pub lcd_info: PanelInfo,
    pub psr: ModeInfo,
    pub nr_windows: usize,
}

/// One display controller instance
#[derive(Debug)]
pub struct DeconDevice {
    pub id: usize,
    pub dt: DeconDt,
    pub lcd_info: PanelInfo,
    dpp_sd: Vec<Option<SubDevice>>,
    dsim_sd: Vec<Option<SubDevice>>,
    displayport_sd: Option<SubDevice>,
    panel_sd: Option<SubDevice>,
    profile_sd: Option<SubDevice>,
    protection: ProtectionState,
    pub counters: DebugCounters,
    fps_change: NotifierChain<FpsChange>,
    /// DPP channels fed by the last frame
    pub prev_used_dpp: ProtectionMask,
    pub frame_cnt: u32,
    /// Compressed buffers of the frame before the current one, by DMA channel
    pub prev_afbc: Vec<Option<AfbcBuffer>>,
    /// Compressed buffers of the current frame, by DMA channel
    pub cur_afbc: Vec<Option<AfbcBuffer>>,
}

impl DeconDevice {
    pub fn new(id: usize, dt: DeconDt, lcd_info: PanelInfo) -> Self {
        Self {
            id,
            dt,
            lcd_info,
            dpp_sd: vec![None; MAX_DPP_SUBDEV],
            dsim_sd: vec![None; MAX_DSIM_CNT],
            displayport_sd: None,
            panel_sd: None,
            profile_sd: None,
            protection: ProtectionState::new(),
            counters: DebugCounters::default(),
            fps_change: NotifierChain::new("fps_change"),
            prev_used_dpp: ProtectionMask::empty(),
            frame_cnt: 0,
            prev_afbc: vec![None; MAX_DPP_SUBDEV],
            cur_afbc: vec![None; MAX_DPP_SUBDEV],
        }
    }

    /// Attach one bus device to this DECON.
    ///
    /// Devices of an unknown driver are logged and skipped.
    pub fn bind_device(&mut self, dev: &BusDevice) -> Result<(), DpuError> {
        info!("bind: drvname({})", dev.driver_name);

        let Some(kind) = SubDeviceKind::from_driver_name(&dev.driver_name) else {
            error!("failed to find matching sub-device kind: {}", dev.driver_name);
            return Ok(());
        };
        let Some(sd) = dev.data.clone() else {
            error!("failed to get {:?} driver data", kind);
            return Err(DpuError::InvalidDriverData(kind));
        };

        match kind {
            SubDeviceKind::Dpp => {
                let slot = slot_mut(&mut self.dpp_sd, kind, sd.id)?;
                info!("dpp{} sd name({}) attr(0x{:x})", sd.id, sd.name, sd.attr);
                *slot = Some(sd);
            }
            SubDeviceKind::Dsim => {
                let slot = slot_mut(&mut self.dsim_sd, kind, sd.id)?;
                debug!("dsim sd name({})", sd.name);
                *slot = Some(sd);
            }
            SubDeviceKind::DisplayPort => {
                debug!("displayport sd name({})", sd.name);
                self.displayport_sd = Some(sd);
            }
            SubDeviceKind::Panel => {
                info!("panel sd name({})", sd.name);
                if self.dt.profiler && self.id == 0 {
                    if sd.profiler_ready {
                        self.profile_sd = Some(sd.clone());
                    } else {
                        error!("profiler is not initialized");
                    }
                }
                self.panel_sd = Some(sd);
            }
        }
        Ok(())
    }

    /// Bind every bus device handled by `driver_name`, returns how many bound.
    ///
    /// A device that fails to bind is logged and does not stop the others.
    pub fn bind_by_driver_name(
        &mut self,
        driver_name: &str,
        bus: &[BusDevice],
    ) -> Result<usize, DpuError> {
        let devices: Vec<&BusDevice> = bus
            .iter()
            .filter(|d| d.driver_name == driver_name)
            .collect();
        if devices.is_empty() {
            error!("failed to find driver {}", driver_name);
            return Err(DpuError::NoDevice(driver_name.to_string()));
        }

        let mut bound = 0;
        for dev in devices {
            match self.bind_device(dev) {
                Ok(()) => bound += 1,
                Err(e) => error!("decon{}: {}", self.id, e),
            }
        }
        Ok(bound)
    }

    pub fn dpp(&self, id: usize) -> Option<&SubDevice> {
        self.dpp_sd.get(id)?.as_ref()
    }

    pub fn dsim(&self, id: usize) -> Option<&SubDevice> {
        self.dsim_sd.get(id)?.as_ref()
    }

    pub fn displayport(&self) -> Option<&SubDevice> {
        self.displayport_sd.as_ref()
    }

    pub fn panel(&self) -> Option<&SubDevice> {
        self.panel_sd.as_ref()
    }

    pub fn profiler(&self) -> Option<&SubDevice> {
        self.profile_sd.as_ref()
    }

    pub fn mode_info(&self) -> ModeInfo {
        ModeInfo {
            psr_mode: self.dt.psr_mode,
            trig_mode: self.dt.trig_mode,
            dsi_mode: self.dt.dsi_mode,
            out_type: self.dt.out_type,
        }
    }

    pub fn init_param(&self) -> InitParam {
        let p = InitParam {
            lcd_info: self.lcd_info,
            psr: self.mode_info(),
            nr_windows: self.dt.max_win,
        };
        debug!(
            "init param: psr({:?}) trig({:?}) dsi({:?}) out({:?}) wins({}) LCD[{} {}]",
            p.psr.psr_mode,
            p.psr.trig_mode,
            p.psr.dsi_mode,
            p.psr.out_type,
            p.nr_windows,
            p.lcd_info.xres,
            p.lcd_info.yres
        );
        p
    }

    pub fn channel_layout(&self) -> ChannelLayout {
        ChannelLayout {
            max_win: self.dt.max_win,
            channel_count: self.dt.dpp_cnt,
            out_type: self.dt.out_type,
            wb_win: self.dt.wb_win,
        }
    }

    /// Apply the frame's content protection and remember which DPPs it used
    pub fn set_protected_content(
        &mut self,
        frame: Option<&FrameConfig>,
        monitor: &mut dyn SecureMonitor,
    ) -> ProtectionReport {
        let layout = self.channel_layout();
        if let Some(frame) = frame {
            self.prev_used_dpp = ProtectionMask::from_channels(
                frame
                    .enabled(layout.max_win)
                    .filter_map(|(_, win)| win.channel),
            );
        }
        self.protection.apply(frame, &layout, monitor)
    }

    pub fn protection(&self) -> &ProtectionState {
        &self.protection
    }

    pub fn dpp_used(&self, channel: usize) -> bool {
        self.prev_used_dpp.has_channel(channel)
    }

    /// Record the compressed buffer programmed on `channel` for this frame
    pub fn set_afbc(&mut self, channel: usize, buffer: AfbcBuffer) -> Result<(), DpuError> {
        let slot = self
            .cur_afbc
            .get_mut(channel)
            .ok_or(DpuError::InvalidSubDeviceId {
                kind: SubDeviceKind::Dpp,
                id: channel,
                max: MAX_DPP_SUBDEV,
            })?;
        *slot = Some(buffer);
        Ok(())
    }

    /// Start a new frame: the current buffers become the previous set
    pub fn rotate_afbc(&mut self) {
        self.prev_afbc = std::mem::replace(&mut self.cur_afbc, vec![None; MAX_DPP_SUBDEV]);
    }

    /// Display reset: every channel goes back to unprotected
    pub fn reset(&mut self) {
        info!("decon{}: reset", self.id);
        self.protection.reset();
        self.prev_used_dpp = ProtectionMask::empty();
        self.prev_afbc.iter_mut().for_each(|b| *b = None);
        self.cur_afbc.iter_mut().for_each(|b| *b = None);
    }

    pub fn register_fps_change<F>(&self, callback: F) -> NotifierHandle
    where
        F: Fn(&FpsChange) + Send + Sync + 'static,
    {
        self.fps_change.register(callback)
    }

    pub fn unregister_fps_change(&self, handle: NotifierHandle) -> bool {
        self.fps_change.unregister(handle)
    }

    pub fn notify_fps_change(&self, fps: u32) -> usize {
        debug!("decon{}: fps -> {}", self.id, fps);
        self.fps_change.call(&FpsChange(fps))
    }
}

fn slot_mut(
    slots: &mut [Option<SubDevice>],
    kind: SubDeviceKind,
    id: usize,
) -> Result<&mut Option<SubDevice>, DpuError> {
    let max = slots.len();
    slots
        .get_mut(id)
        .ok_or(DpuError::InvalidSubDeviceId { kind, id, max })
}
