//! External collaborators (spec §1, §6): the NAND controller, the DMA engine, the data-buffer
//! cache, and the GC victim-selection policy are all outside this core's scope. This module
//! defines the trait boundary the core talks to and nothing else -- no concrete hardware
//! driver lives here. [`crate::sim`] supplies an in-memory implementation of each trait for
//! tests and the demo binary, grounded in `pddb`'s `hosted.rs` `EmuStorage`/`HostedSpinor`
//! emulation pair.

use bitflags::bitflags;

use crate::addr::{Channel, Die, Pba, Way};
use crate::error::Result;

bitflags! {
    /// Compact encoding of a [`NandRequest`]'s mode bits, for trace logging (§9A.1) rather than
    /// wire transport -- the controller boundary here is still the typed fields on `NandRequest`
    /// itself.
    pub struct RequestFlags: u8 {
        const ECC_ON          = 0b0000_0001;
        const ECC_WARNING_ON  = 0b0000_0010;
        const ROW_ADDR_CHECK  = 0b0000_0100;
        const TOTAL_BLOCK_SPACE = 0b0000_1000;
    }
}

/// "main" excludes reserved blocks, "total" includes them (§6, GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockSpace {
    Main,
    Total,
}

/// ECC is disabled entirely only during the bad-block scan (§4.1), since a factory-bad block
/// may return data that ECC cannot correct and would otherwise be reported as a hard failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EccMode {
    On,
    Off,
}

/// Whether a correctable ECC event on this request should be logged (spec §7, "Transient NAND
/// read"). Kept distinct from [`EccMode`] because the BBT scanner wants ECC off entirely, while
/// ordinary reads want ECC on with the warning optionally silenced (SPEC_FULL §9A.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EccWarning {
    On,
    Off,
}

/// The NAND-level opcode a request descriptor carries (§6). `FromPrimitive`/`ToPrimitive` back
/// the wire encoding a concrete controller uses to pack this into a command descriptor register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, num_derive::FromPrimitive, num_derive::ToPrimitive)]
pub enum NandCode {
    Read = 0,
    Write = 1,
    Erase = 2,
}

/// Row-address-dependency checking mode for a NAND request (§4.5.3/§4.5.4). `None` requests
/// (e.g. the BBT's own I/O, run under the boot-time sync barrier) skip the per-block ordering
/// machinery entirely; `Check` requests go through [`crate::scheduler::dispatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowAddrDependencyCheck {
    None,
    Check,
}

/// One physical location a NAND request targets: channel/way pick the die, `block` is a PBA
/// within that die (already remap-resolved by the caller), `page` is the physical page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NandTarget {
    pub ch: Channel,
    pub way: Way,
    pub block: Pba,
    pub page: u32,
}

impl NandTarget {
    pub fn die(&self, geom: &crate::config::Geometry) -> Die {
        crate::addr::die_from_ch_way(geom, self.ch, self.way)
    }
}

/// A NAND-controller request descriptor (§6). `programmed_page_cnt` is only meaningful for
/// `Erase`: it must equal the block's current `permittedProgPage` for the erase to be
/// admitted (§4.5.3).
#[derive(Debug, Clone)]
pub struct NandRequest {
    pub code: NandCode,
    pub target: NandTarget,
    pub block_space: BlockSpace,
    pub ecc: EccMode,
    pub ecc_warning: EccWarning,
    pub row_addr_check: RowAddrDependencyCheck,
    pub programmed_page_cnt: u32,
    /// Bytes to program (ignored for Read/Erase).
    pub write_data: Option<Vec<u8>>,
}

impl NandRequest {
    /// Fold this request's mode fields into a [`RequestFlags`] byte, for a single compact
    /// trace-log field instead of five.
    pub fn flags(&self) -> RequestFlags {
        let mut flags = RequestFlags::empty();
        if self.ecc == EccMode::On {
            flags |= RequestFlags::ECC_ON;
        }
        if self.ecc_warning == EccWarning::On {
            flags |= RequestFlags::ECC_WARNING_ON;
        }
        if self.row_addr_check == RowAddrDependencyCheck::Check {
            flags |= RequestFlags::ROW_ADDR_CHECK;
        }
        if self.block_space == BlockSpace::Total {
            flags |= RequestFlags::TOTAL_BLOCK_SPACE;
        }
        flags
    }
}

/// Correlation handle for an in-flight NAND request, returned by `submit` and echoed back on
/// completion so the scheduler can match replies to the request that caused them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NandTicket(pub u64);

/// Outcome of a completed NAND request. `Ok(None)` for Write/Erase; `Ok(Some(data))` for a
/// successful Read; `Err` for the failure modes in spec §7.
pub type NandOutcome = Result<Option<Vec<u8>>>;

/// The low-level NAND controller: per-channel request queues and completion paths (§1, out of
/// scope to implement here -- this is strictly the call boundary).
pub trait NandController {
    /// Enqueue a request. Does not block; the caller polls [`NandController::poll_completions`]
    /// to learn when it finished.
    fn submit(&mut self, req: NandRequest) -> NandTicket;

    /// Drain whatever has completed since the last poll, in completion order.
    fn poll_completions(&mut self) -> Vec<(NandTicket, NandOutcome)>;

    /// Blocking helper used only by the boot-time BBT recovery path (§4.1, §5's "sync all
    /// low-level requests done" barrier). Implementations submit and spin `poll_completions`
    /// until the ticket appears.
    fn submit_and_wait(&mut self, req: NandRequest) -> NandOutcome {
        let ticket = self.submit(req);
        loop {
            for (t, outcome) in self.poll_completions() {
                if t == ticket {
                    return outcome;
                }
            }
        }
    }
}

/// Correlation handle for an in-flight DMA transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DmaTicket(pub u64);

/// The DMA engine (§6): one call per NVMe block, `(cmdSlotTag, dmaIndex, deviceAddr)`. The
/// core records `(reqTail, overflowCnt)` at issue time against the engine's monotonic tail
/// counter; this trait packages that as an opaque ticket instead, which is equivalent for a
/// library boundary (the tail/overflow bookkeeping is the concrete engine's business).
pub trait DmaEngine {
    /// Host -> device-buffer transfer (an NVMe WRITE's payload landing in the data buffer).
    fn submit_rx(&mut self, cmd_slot_tag: u32, device_addr: u64, host_data: &[u8]) -> DmaTicket;
    /// Device-buffer -> host transfer (an NVMe READ's payload leaving the data buffer).
    fn submit_tx(&mut self, cmd_slot_tag: u32, device_addr: u64, len: usize) -> DmaTicket;
    /// Drain whatever has completed since the last poll.
    fn poll_completions(&mut self) -> Vec<DmaTicket>;
}

/// Handle to a data-buffer cache entry (opaque to this core; owned by the external cache).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufEntryId(pub u32);

/// What happened when [`DataBufferCache::allocate`] needed to make room. Carries the evicted
/// entry's bytes (not just the fact that it was dirty) because the slot is reused in place --
/// once `allocate` returns, the old content is gone, so a caller that needs to write it back
/// has nowhere else to read it from.
pub struct Eviction {
    pub evicted_lsa: crate::addr::Lsa,
    pub dirty: bool,
    pub data: Vec<u8>,
}

/// The data-buffer cache (§1, §4.5.2): lookup/allocate by LSA, with synchronous eviction.
/// Out of scope to implement here -- this is strictly the call boundary the scheduler uses.
pub trait DataBufferCache {
    fn lookup(&mut self, lsa: crate::addr::Lsa) -> Option<BufEntryId>;
    /// Allocate a fresh entry for `lsa`, evicting one entry if the cache is full. Eviction is
    /// synchronous and serialized with all other scheduler actions (§5).
    fn allocate(&mut self, lsa: crate::addr::Lsa) -> (BufEntryId, Option<Eviction>);
    fn mark_dirty(&mut self, id: BufEntryId);
    fn is_dirty(&self, id: BufEntryId) -> bool;
    fn data(&self, id: BufEntryId) -> &[u8];
    fn data_mut(&mut self, id: BufEntryId) -> &mut [u8];
}
