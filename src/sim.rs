//! In-memory stand-ins for the external collaborators in [`crate::hal`], used by this crate's
//! own tests and by the `ftl-sim` demo binary. Grounded in `pddb`'s `hosted.rs`, which backs
//! the PDDB's hardware interface with a `Vec<u8>` filled with `0xFF` and a `patch` method for
//! the hosted (non-hardware) test target; the same idea is used here for NAND, and a couple of
//! straightforward queues stand in for the DMA engine and the data-buffer cache.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::addr::{ch_way_from_die, die_from_ch_way, Channel, Die, Lsa, Pba, Way};
use crate::config::Geometry;
use crate::error::FtlError;
use crate::hal::{
    BlockSpace, BufEntryId, DataBufferCache, DmaEngine, DmaTicket, Eviction, NandCode, NandController,
    NandOutcome, NandRequest, NandTicket,
};

/// An in-memory NAND simulator: one flat byte store per (die, pba, page), filled with `0xFF`
/// at construction the way real erased NAND reads as all-ones. Completions are produced
/// synchronously (the request is executed inside `submit`), which is sufficient for exercising
/// the scheduler's dependency/ordering logic without a real asynchronous controller.
pub struct SimNand {
    geom: Geometry,
    pages: HashMap<(u32, u32, u32), Vec<u8>>,
    factory_bad: HashSet<(u32, u32)>,
    uncorrectable: HashSet<(u32, u32, u32)>,
    fail_program: HashSet<(u32, u32)>,
    fail_erase: HashSet<(u32, u32)>,
    next_ticket: u64,
    pending: VecDeque<(NandTicket, NandOutcome)>,
}

impl SimNand {
    pub fn new(geom: Geometry) -> Self {
        SimNand {
            geom,
            pages: HashMap::new(),
            factory_bad: HashSet::new(),
            uncorrectable: HashSet::new(),
            fail_program: HashSet::new(),
            fail_erase: HashSet::new(),
            next_ticket: 0,
            pending: VecDeque::new(),
        }
    }

    fn page(&mut self, die: u32, pba: u32, page: u32) -> &mut Vec<u8> {
        self.pages
            .entry((die, pba, page))
            .or_insert_with(|| vec![0xFFu8; self.geom.data_bytes_per_page as usize])
    }

    /// Simulate a factory-bad block: the scan reads the first two bytes of the first and last
    /// pages, so stamping a non-`0xFF` byte there is enough to make [`crate::bbt`]'s scanner
    /// see it as bad.
    pub fn inject_factory_bad(&mut self, die: Die, pba: Pba) {
        self.factory_bad.insert((die.0, pba.0));
        let last = self.geom.pages_per_block - 1;
        for page in [0, last] {
            let p = self.page(die.0, pba.0, page);
            p[0] = 0x00;
            p[1] = 0x00;
        }
    }

    /// Force the next read of `(die, pba, page)` to report an uncorrectable ECC failure.
    pub fn inject_uncorrectable(&mut self, die: Die, pba: Pba, page: u32) {
        self.uncorrectable.insert((die.0, pba.0, page));
    }

    /// Force the next program to `(die, pba)` to fail (§7 "Program/erase failure").
    pub fn inject_program_failure(&mut self, die: Die, pba: Pba) {
        self.fail_program.insert((die.0, pba.0));
    }

    /// Force the next erase of `(die, pba)` to fail.
    pub fn inject_erase_failure(&mut self, die: Die, pba: Pba) {
        self.fail_erase.insert((die.0, pba.0));
    }

    fn execute(&mut self, req: NandRequest) -> NandOutcome {
        let die = die_from_ch_way(&self.geom, req.target.ch, req.target.way);
        let pba = req.target.block.0;
        let page = req.target.page;
        match req.code {
            NandCode::Read => {
                if self.uncorrectable.remove(&(die.0, pba, page)) {
                    return Err(FtlError::ProgramFailed { die, pba: Pba(pba) });
                }
                Ok(Some(self.page(die.0, pba, page).clone()))
            }
            NandCode::Write => {
                if self.fail_program.remove(&(die.0, pba)) {
                    return Err(FtlError::ProgramFailed { die, pba: Pba(pba) });
                }
                let data = req.write_data.unwrap_or_default();
                let slot = self.page(die.0, pba, page);
                for (dst, &src) in slot.iter_mut().zip(data.iter()) {
                    *dst = src;
                }
                Ok(None)
            }
            NandCode::Erase => {
                if self.fail_erase.remove(&(die.0, pba)) {
                    return Err(FtlError::EraseFailed { die, pba: Pba(pba) });
                }
                for p in 0..self.geom.pages_per_block {
                    self.pages.remove(&(die.0, pba, p));
                }
                Ok(None)
            }
        }
    }

    /// Direct peek used only by tests/demo code that wants to assert on raw page contents
    /// without going through a request descriptor.
    pub fn peek_page(&self, die: Die, pba: Pba, page: u32) -> Option<&[u8]> {
        self.pages.get(&(die.0, pba.0, page)).map(|v| v.as_slice())
    }
}

impl NandController for SimNand {
    fn submit(&mut self, req: NandRequest) -> NandTicket {
        let ticket = NandTicket(self.next_ticket);
        self.next_ticket += 1;
        let outcome = self.execute(req);
        self.pending.push_back((ticket, outcome));
        ticket
    }

    fn poll_completions(&mut self) -> Vec<(NandTicket, NandOutcome)> {
        self.pending.drain(..).collect()
    }
}

/// Trivial DMA stand-in: every submitted transfer "completes" on the next poll. Good enough to
/// exercise the scheduler's DMA-in-flight bookkeeping (§4.5.4, §4.5.5) without a real engine.
pub struct SimDma {
    next_ticket: u64,
    ready: VecDeque<DmaTicket>,
}

impl SimDma {
    pub fn new() -> Self {
        SimDma { next_ticket: 0, ready: VecDeque::new() }
    }
}

impl Default for SimDma {
    fn default() -> Self {
        Self::new()
    }
}

impl DmaEngine for SimDma {
    fn submit_rx(&mut self, _cmd_slot_tag: u32, _device_addr: u64, _host_data: &[u8]) -> DmaTicket {
        let t = DmaTicket(self.next_ticket);
        self.next_ticket += 1;
        self.ready.push_back(t);
        t
    }

    fn submit_tx(&mut self, _cmd_slot_tag: u32, _device_addr: u64, _len: usize) -> DmaTicket {
        let t = DmaTicket(self.next_ticket);
        self.next_ticket += 1;
        self.ready.push_back(t);
        t
    }

    fn poll_completions(&mut self) -> Vec<DmaTicket> {
        self.ready.drain(..).collect()
    }
}

struct BufSlot {
    lsa: Lsa,
    data: Vec<u8>,
    dirty: bool,
}

/// A tiny fixed-capacity, FIFO-eviction data-buffer cache. Real implementations (out of scope
/// per §1) would use a smarter replacement policy; this one only needs to exercise the
/// eviction/dirty-writeback contract in §4.5.2.
pub struct SimDataBufferCache {
    capacity: usize,
    slots: Vec<Option<BufSlot>>,
    by_lsa: HashMap<Lsa, BufEntryId>,
    fifo: VecDeque<BufEntryId>,
    page_bytes: usize,
}

impl SimDataBufferCache {
    pub fn new(capacity: usize, page_bytes: usize) -> Self {
        SimDataBufferCache {
            capacity,
            slots: (0..capacity).map(|_| None).collect(),
            by_lsa: HashMap::new(),
            fifo: VecDeque::new(),
            page_bytes,
        }
    }
}

impl DataBufferCache for SimDataBufferCache {
    fn lookup(&mut self, lsa: Lsa) -> Option<BufEntryId> {
        self.by_lsa.get(&lsa).copied()
    }

    fn allocate(&mut self, lsa: Lsa) -> (BufEntryId, Option<Eviction>) {
        // prefer a genuinely free slot first
        if let Some(idx) = self.slots.iter().position(|s| s.is_none()) {
            let id = BufEntryId(idx as u32);
            self.slots[idx] = Some(BufSlot { lsa, data: vec![0u8; self.page_bytes], dirty: false });
            self.by_lsa.insert(lsa, id);
            self.fifo.push_back(id);
            return (id, None);
        }
        // otherwise evict the oldest entry
        let victim = self.fifo.pop_front().expect("capacity > 0 implies a victim exists");
        let old = self.slots[victim.0 as usize].take().expect("fifo entries are always occupied");
        self.by_lsa.remove(&old.lsa);
        self.slots[victim.0 as usize] = Some(BufSlot { lsa, data: vec![0u8; self.page_bytes], dirty: false });
        self.by_lsa.insert(lsa, victim);
        self.fifo.push_back(victim);
        (victim, Some(Eviction { evicted_lsa: old.lsa, dirty: old.dirty, data: old.data }))
    }

    fn mark_dirty(&mut self, id: BufEntryId) {
        if let Some(slot) = &mut self.slots[id.0 as usize] {
            slot.dirty = true;
        }
    }

    fn is_dirty(&self, id: BufEntryId) -> bool {
        self.slots[id.0 as usize].as_ref().map(|s| s.dirty).unwrap_or(false)
    }

    fn data(&self, id: BufEntryId) -> &[u8] {
        self.slots[id.0 as usize].as_ref().map(|s| s.data.as_slice()).unwrap_or(&[])
    }

    fn data_mut(&mut self, id: BufEntryId) -> &mut [u8] {
        self.slots[id.0 as usize].as_mut().expect("entry must be allocated before mutation").data.as_mut_slice()
    }
}

/// Convenience for tests/demo code: translate a (die, pba) pair back into (channel, way) using
/// the same geometry the rest of the simulator was built with.
pub fn ch_way(geom: &Geometry, die: Die) -> (Channel, Way) {
    ch_way_from_die(geom, die)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_nand_reads_as_all_ones() {
        let geom = Geometry::minimal();
        let mut nand = SimNand::new(geom);
        let req = NandRequest {
            code: NandCode::Read,
            target: crate::hal::NandTarget { ch: Channel(0), way: Way(0), block: Pba(0), page: 0 },
            block_space: BlockSpace::Main,
            ecc: crate::hal::EccMode::On,
            ecc_warning: crate::hal::EccWarning::On,
            row_addr_check: crate::hal::RowAddrDependencyCheck::None,
            programmed_page_cnt: 0,
            write_data: None,
        };
        let data = nand.submit_and_wait(req).unwrap().unwrap();
        assert!(data.iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn data_buffer_cache_evicts_fifo() {
        let mut cache = SimDataBufferCache::new(2, 16);
        let (a, ev) = cache.allocate(Lsa(0));
        assert!(ev.is_none());
        let (_b, ev) = cache.allocate(Lsa(1));
        assert!(ev.is_none());
        cache.mark_dirty(a);
        let (_c, ev) = cache.allocate(Lsa(2));
        let ev = ev.unwrap();
        assert_eq!(ev.evicted_lsa, Lsa(0));
        assert!(ev.dirty);
    }
}
