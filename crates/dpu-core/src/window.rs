//! Window configuration
//!
//! Per-frame description of the overlay windows the planner hands to DECON,
//! plus the panel and output-mode types shared by the rest of the crate.

use serde::{Deserialize, Serialize};

use crate::rect::Rect;

/// Maximum number of overlay windows per DECON
pub const MAX_DECON_WIN: usize = 6;

/// Source or destination area of a window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WinArea {
    pub x: i32,
    pub y: i32,
    pub w: u32,
    pub h: u32,
    /// Full buffer width
    #[serde(default)]
    pub f_w: u32,
    /// Full buffer height
    #[serde(default)]
    pub f_h: u32,
}

impl WinArea {
    pub fn new(x: i32, y: i32, w: u32, h: u32) -> Self {
        Self {
            x,
            y,
            w,
            h,
            f_w: w,
            f_h: h,
        }
    }

    pub fn rect(&self) -> Rect {
        Rect::from(self)
    }
}

/// One overlay layer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowConfig {
    pub src: WinArea,
    pub dst: WinArea,
    /// DMA channel feeding this window, `None` when the window is off
    #[serde(default)]
    pub channel: Option<usize>,
    /// Buffer is secure content
    #[serde(default)]
    pub protected: bool,
}

impl WindowConfig {
    /// True if the DPP has to scale on either axis
    pub fn is_scaling(&self) -> bool {
        self.dst.w != self.src.w || self.dst.h != self.src.h
    }

    pub fn is_enabled(&self) -> bool {
        self.channel.is_some()
    }
}

/// Window batch for one frame, indexed by window slot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameConfig {
    pub windows: Vec<WindowConfig>,
}

impl FrameConfig {
    pub fn new(windows: Vec<WindowConfig>) -> Self {
        Self { windows }
    }

    pub fn window(&self, slot: usize) -> Option<&WindowConfig> {
        self.windows.get(slot)
    }

    /// Enabled windows in slot order, limited to `max_win` slots
    pub fn enabled(&self, max_win: usize) -> impl Iterator<Item = (usize, &WindowConfig)> {
        self.windows
            .iter()
            .take(max_win)
            .enumerate()
            .filter(|(_, win)| win.is_enabled())
    }

    /// Bounding box of every enabled window's destination
    pub fn damage_bbox(&self, max_win: usize) -> Option<Rect> {
        self.enabled(max_win)
            .map(|(_, win)| win.dst.rect())
            .reduce(|acc, r| acc.union_bbox(&r))
    }
}

/// Panel timing information needed by the helpers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelInfo {
    pub xres: u32,
    pub yres: u32,
    pub fps: u32,
}

impl Default for PanelInfo {
    fn default() -> Self {
        Self {
            xres: 1080,
            yres: 2340,
            fps: 60,
        }
    }
}

/// Where DECON sends the composed frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputType {
    #[default]
    Dsi,
    DisplayPort,
    Writeback,
}

/// Panel self refresh mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PsrMode {
    Video,
    #[default]
    Command,
}

/// Frame start trigger source
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerMode {
    #[default]
    Hardware,
    Software,
}

/// Number of DSI links driven by one DECON
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DsiMode {
    #[default]
    Single,
    Dual,
}
