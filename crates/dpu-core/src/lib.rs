//! DPU helper layer
//!
//! Shared pieces of the display pipeline driver: rectangle algebra used by the
//! partial-update and overlay planner, per-channel content protection,
//! sub-device binding, notifier chains and buffer lifecycle diagnostics.

pub mod debug;
pub mod device;
pub mod error;
pub mod notifier;
pub mod protection;
pub mod rect;
pub mod window;

pub use device::{DeconDevice, SubDevice, SubDeviceKind};
pub use error::{DpuError, ProtectionError};
pub use protection::{ProtectionReport, ProtectionState, SecureChannel, SecureMonitor};
pub use rect::Rect;
pub use window::{FrameConfig, OutputType, PanelInfo, WinArea, WindowConfig};
