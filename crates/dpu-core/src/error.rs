//! Error types for the DPU helper layer

use thiserror::Error;

use crate::device::SubDeviceKind;

/// Errors raised by binding, diagnostics and configuration checks
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DpuError {
    #[error("no driver registered under name {0:?}")]
    NoDevice(String),

    #[error("failed to get {0:?} driver data")]
    InvalidDriverData(SubDeviceKind),

    #[error("{kind:?} id {id} out of range (max {max})")]
    InvalidSubDeviceId {
        kind: SubDeviceKind,
        id: usize,
        max: usize,
    },

    #[error("unknown driver for fault handler: {0:?}")]
    UnknownFaultSource(String),

    #[error("decon{0} is not available")]
    DeconMissing(usize),

    #[error(
        "DMA attach imbalance: attached {attached}, detached {detached}, allowed diff {allowed}"
    )]
    DmaLeak {
        attached: u32,
        detached: u32,
        allowed: u32,
    },
}

/// Per-channel failures reported by the protection engine
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ProtectionError {
    #[error("unknown DMA channel {0}")]
    UnmappedChannel(usize),

    #[error("DMA CH{channel} (en={enable}): secure monitor call failed (err={code})")]
    MonitorFailed {
        channel: usize,
        enable: bool,
        code: i32,
    },
}
