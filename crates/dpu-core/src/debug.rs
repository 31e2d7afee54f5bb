//! Buffer lifecycle diagnostics
//!
//! Counters used to spot DMA buffer leaks, fence snapshots, and the buffer
//! dumps collected when the IOMMU reports a fault.

use std::time::Instant;

use tracing::{error, info};

use crate::device::{DeconDevice, SubDeviceKind};
use crate::error::DpuError;

/// Attach/detach pairs allowed in flight per pending frame.
///
/// YUV layers take two buffers each: 4 YUV layers * 2 + 2 RGB layers.
pub const MAX_DMA_ATTACH_CNT: u32 = 10;

/// Fence driver name buffer size, terminator included
pub const MAX_DPU_FENCE_NAME: usize = 32;

/// Largest dump printed for a faulting buffer
pub const MAX_DUMP_BYTES: usize = 128;

const DUMP_ROW_BYTES: usize = 32;
const DUMP_GROUP_BYTES: usize = 4;

/// Map/unmap bookkeeping for DMA buffers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DmaAttachCounters {
    /// Number of times a report was requested
    pub count: u32,
    pub timestamp: Option<Instant>,
    pub buf_attach_cnt: u32,
    pub map_attach_cnt: u32,
    pub iovmm_map_cnt: u32,
    pub buf_detach_cnt: u32,
    pub unmap_attach_cnt: u32,
    pub iovmm_unmap_cnt: u32,
}

impl DmaAttachCounters {
    pub fn record_event(&mut self) {
        self.count = self.count.saturating_add(1);
        self.timestamp = Some(Instant::now());
    }

    /// Count `attached` new attaches and `detached` detaches
    pub fn record_buffers(&mut self, attached: u32, detached: u32) {
        self.buf_attach_cnt = self.buf_attach_cnt.saturating_add(attached);
        self.map_attach_cnt = self.map_attach_cnt.saturating_add(attached);
        self.buf_detach_cnt = self.buf_detach_cnt.saturating_add(detached);
        self.unmap_attach_cnt = self.unmap_attach_cnt.saturating_add(detached);
    }

    pub fn outstanding(&self) -> u32 {
        self.buf_attach_cnt.saturating_sub(self.buf_detach_cnt)
    }

    /// Fails when more buffers are attached than the pending frames can hold
    pub fn check_balance(&self, remaining_frames: u32) -> Result<(), DpuError> {
        let allowed = MAX_DMA_ATTACH_CNT.saturating_mul(remaining_frames.saturating_add(1));
        if self.outstanding() > allowed {
            return Err(DpuError::DmaLeak {
                attached: self.buf_attach_cnt,
                detached: self.buf_detach_cnt,
                allowed,
            });
        }
        Ok(())
    }
}

/// Readback buffer map/unmap counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadbackCounters {
    pub map_cnt: u32,
    pub unmap_cnt: u32,
}

impl ReadbackCounters {
    pub fn outstanding(&self) -> u32 {
        self.map_cnt.saturating_sub(self.unmap_cnt)
    }

    pub fn exceeds(&self, diff: u32) -> bool {
        self.outstanding() >= diff
    }
}

/// Which counter set a report reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachReport {
    /// Live counters, bumped and checked on every report
    Event,
    /// Snapshot taken when the problem first showed up
    FirstOccurrence,
}

/// Every diagnostic counter a DECON keeps
#[derive(Debug, Clone, Default)]
pub struct DebugCounters {
    pub buf_cnt: DmaAttachCounters,
    pub buf_cnt_bak: DmaAttachCounters,
    pub readback: ReadbackCounters,
}

impl DebugCounters {
    pub fn show_readback_info(&self, diff: u32) {
        if self.readback.exceeds(diff) {
            info!(
                "readback: map_cnt={} unmap_cnt={}",
                self.readback.map_cnt, self.readback.unmap_cnt
            );
        }
    }

    /// Log the attach counters and, for live events, check them for leaks.
    ///
    /// `caller` names the code path that saw the symptom (an IOVM allocation
    /// failure, typically). On a leak the readback counters are logged too
    /// when at least `readback_diff` readback buffers are still mapped.
    pub fn show_dma_attach_info(
        &mut self,
        caller: &str,
        which: AttachReport,
        remaining_frames: u32,
        frame_cnt: u32,
        readback_diff: u32,
    ) -> Result<(), DpuError> {
        let cnt = match which {
            AttachReport::Event => {
                self.buf_cnt.record_event();
                &self.buf_cnt
            }
            AttachReport::FirstOccurrence => &self.buf_cnt_bak,
        };

        info!(
            "{}: occur_cnt:{} remain_frame:{} fr_cnt:{}",
            caller, cnt.count, remaining_frames, frame_cnt
        );
        info!(
            ">> buf_attach:{} map_attach:{} iovmm_map:{}",
            cnt.buf_attach_cnt, cnt.map_attach_cnt, cnt.iovmm_map_cnt
        );
        info!(
            ">> buf_detach:{} unmap_attach:{} iovmm_unmap:{}",
            cnt.buf_detach_cnt, cnt.unmap_attach_cnt, cnt.iovmm_unmap_cnt
        );

        if which == AttachReport::Event {
            if let Err(e) = cnt.check_balance(remaining_frames) {
                self.show_readback_info(readback_diff);
                error!("{}", e);
                return Err(e);
            }
        }
        Ok(())
    }
}

/// Fields read from a fence when it is handed to DPU
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FenceSnapshot {
    pub context: u64,
    pub seqno: u64,
    pub flags: u64,
    pub driver_name: String,
}

/// Fence details kept for debugging after the fence is gone
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FenceInfo {
    pub fd: i32,
    pub context: u64,
    pub seqno: u64,
    pub flags: u64,
    pub name: String,
}

impl FenceInfo {
    pub fn capture(fd: i32, fence: &FenceSnapshot) -> Self {
        Self {
            fd,
            context: fence.context,
            seqno: fence.seqno,
            flags: fence.flags,
            name: truncate_name(&fence.driver_name, MAX_DPU_FENCE_NAME - 1),
        }
    }
}

fn truncate_name(name: &str, max_bytes: usize) -> String {
    if name.len() <= max_bytes {
        return name.to_string();
    }
    let mut end = max_bytes;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name[..end].to_string()
}

/// Bytes to dump from a buffer of `buf_size` bytes
pub fn dump_size(buf_size: usize) -> usize {
    if buf_size > 2048 {
        MAX_DUMP_BYTES
    } else {
        buf_size / 16
    }
}

/// Address-prefixed hex dump, 32 bytes per row in 4-byte little-endian words.
///
/// Falls back to single bytes when the length is not a multiple of 4.
pub fn hex_dump(base: u64, bytes: &[u8]) -> Vec<String> {
    let group = if bytes.len() % DUMP_GROUP_BYTES == 0 {
        DUMP_GROUP_BYTES
    } else {
        1
    };

    bytes
        .chunks(DUMP_ROW_BYTES)
        .enumerate()
        .map(|(row, chunk)| {
            let words: Vec<String> = chunk
                .chunks(group)
                .map(|g| {
                    if group == DUMP_GROUP_BYTES {
                        format!("{:08x}", u32::from_le_bytes([g[0], g[1], g[2], g[3]]))
                    } else {
                        format!("{:02x}", g[0])
                    }
                })
                .collect();
            format!(
                "{:016x}: {}",
                base + (row * DUMP_ROW_BYTES) as u64,
                words.join(" ")
            )
        })
        .collect()
}

/// Compressed (AFBC) buffer last programmed on a DMA channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AfbcBuffer {
    pub dma_addr: u64,
    pub data: Vec<u8>,
}

impl AfbcBuffer {
    pub fn dump(&self) -> Vec<String> {
        let size = dump_size(self.data.len());
        hex_dump(self.dma_addr, &self.data[..size])
    }
}

/// Which frame a compressed buffer belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfbcFrame {
    Previous,
    Current,
}

/// One compressed buffer listed by [`afbc_info`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AfbcChannelInfo {
    pub decon_id: usize,
    pub frame: AfbcFrame,
    pub channel: usize,
    pub dma_addr: u64,
    pub size: usize,
}

/// List the previous and current compressed buffers of a DECON
pub fn afbc_info(decon: &DeconDevice) -> Vec<AfbcChannelInfo> {
    let sets = [
        (AfbcFrame::Previous, &decon.prev_afbc),
        (AfbcFrame::Current, &decon.cur_afbc),
    ];

    let mut infos = Vec::new();
    for (frame, set) in sets {
        info!("decon{}: {:?} AFBC channel information", decon.id, frame);
        for (channel, buf) in set.iter().enumerate().take(decon.dt.max_win) {
            let Some(buf) = buf else { continue };
            info!(
                "\t[DMA{}] base(0x{:x}) size({})",
                channel,
                buf.dma_addr,
                buf.data.len()
            );
            infos.push(AfbcChannelInfo {
                decon_id: decon.id,
                frame,
                channel,
                dma_addr: buf.dma_addr,
                size: buf.data.len(),
            });
        }
    }
    infos
}

/// Collected state for an IOMMU fault
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultReport {
    pub decon_id: usize,
    /// DPP channels used by the last frame
    pub used_dpp: Vec<usize>,
    /// Hex dumps of compressed buffers on those channels
    pub dumps: Vec<(usize, Vec<String>)>,
    /// Previous and current compressed buffers of the DECON
    pub afbc: Vec<AfbcChannelInfo>,
}

/// DECON that owns the faulting master
pub fn fault_target(driver_name: &str) -> Result<usize, DpuError> {
    match SubDeviceKind::from_driver_name(driver_name) {
        Some(SubDeviceKind::Dsim) => Ok(0),
        Some(SubDeviceKind::DisplayPort) => Ok(2),
        _ => Err(DpuError::UnknownFaultSource(driver_name.to_string())),
    }
}

/// Gather the fault report for an IOMMU fault raised by `driver_name`
pub fn handle_sysmmu_fault(
    driver_name: &str,
    decons: &[DeconDevice],
) -> Result<FaultReport, DpuError> {
    let decon_id = fault_target(driver_name).inspect_err(|e| error!("{}", e))?;
    let decon = decons
        .iter()
        .find(|d| d.id == decon_id)
        .ok_or(DpuError::DeconMissing(decon_id))?;

    let used_dpp: Vec<usize> = (0..decon.dt.dpp_cnt)
        .filter(|&ch| decon.dpp_used(ch))
        .collect();

    let dumps = used_dpp
        .iter()
        .filter_map(|&ch| {
            let buf = decon.cur_afbc.get(ch)?.as_ref()?;
            info!(
                "DMA{}: base(0x{:x}) size({})",
                ch,
                buf.dma_addr,
                dump_size(buf.data.len())
            );
            Some((ch, buf.dump()))
        })
        .collect();

    error!(
        "decon{}: sysmmu fault from {}, used dpp {:?}",
        decon_id, driver_name, used_dpp
    );

    Ok(FaultReport {
        decon_id,
        used_dpp,
        dumps,
        afbc: afbc_info(decon),
    })
}
