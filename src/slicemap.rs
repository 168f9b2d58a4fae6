//! C2: the virtual <-> logical slice indirection tables (§4.2). Two flat arrays, one per
//! direction, so that both `read(lsa)` and the invalidation half of `write`/`invalidateOld` are
//! O(1) -- exactly the shape of `pddb`'s forward/reverse page-table pair in `pagetable.rs`,
//! just addressed by slice instead of by page.

use log::trace;

use crate::addr::{Lsa, Vsa};
use crate::blockmap::VirtualBlockMap;
use crate::config::{AllocMode, Geometry};
use crate::error::{FtlError, Result};

/// `logical_to_virtual[lsa]`: `None` means the LSA has never been written (§4.2 "unwritten
/// LSA reads as all-zero/FAIL", left to the caller to interpret per §7).
pub struct SliceMap {
    geom: Geometry,
    logical_to_virtual: Vec<Option<Vsa>>,
    /// `virtual_to_logical[vsa]`: the reverse pointer used by GC to find which LSA a live VSA
    /// currently belongs to, and to detect stale copies left behind after invalidation.
    virtual_to_logical: Vec<Option<Lsa>>,
}

impl SliceMap {
    pub fn new(geom: Geometry) -> Self {
        let slices = geom.slices_per_ssd() as usize;
        SliceMap {
            geom,
            logical_to_virtual: vec![None; slices],
            virtual_to_logical: vec![None; slices],
        }
    }

    fn check_lsa(&self, lsa: Lsa) -> Result<()> {
        if (lsa.0 as u64) >= self.geom.slices_per_ssd() {
            return Err(FtlError::LsaOutOfRange { lsa });
        }
        Ok(())
    }

    /// §4.2 `read`: the current VSA an LSA maps to, or `None` if it has never been written.
    pub fn read(&self, lsa: Lsa) -> Result<Option<Vsa>> {
        self.check_lsa(lsa)?;
        Ok(self.logical_to_virtual[lsa.0 as usize])
    }

    /// §4.2 `write`: invalidate whatever VSA `lsa` previously pointed to (if any), allocate a
    /// fresh VSA from C3 for `die`, and record the new forward/reverse mapping. Propagates
    /// [`FtlError::FreeBlockExhausted`] from C3 unchanged -- per the Design Notes, recovering
    /// from that by running GC and retrying is the scheduler's job, not this module's.
    pub fn write(&mut self, lsa: Lsa, die: crate::addr::Die, block_map: &mut VirtualBlockMap, mode: AllocMode) -> Result<Vsa> {
        self.check_lsa(lsa)?;
        self.invalidate_old(lsa, block_map)?;
        let vsa = block_map.allocate_write_vsa(die, mode)?;
        self.logical_to_virtual[lsa.0 as usize] = Some(vsa);
        self.virtual_to_logical[vsa.0 as usize] = Some(lsa);
        trace!("lsa {:?} -> vsa {:?}", lsa, vsa);
        Ok(vsa)
    }

    /// §4.2 `invalidateOld`: if `lsa` currently points at a live VSA, clear the reverse
    /// pointer and bump that VSA's block's `invalidSliceCnt` in C3. A no-op on a never-written
    /// LSA. Essential check (line 85): only acts if the back-pointer still agrees this LSA owns
    /// `old_vsa` -- otherwise the slice was already superseded elsewhere and invalidating it
    /// again would double-count it in C3's `invalidSliceCnt`.
    pub fn invalidate_old(&mut self, lsa: Lsa, block_map: &mut VirtualBlockMap) -> Result<()> {
        self.check_lsa(lsa)?;
        if let Some(old_vsa) = self.logical_to_virtual[lsa.0 as usize].take() {
            if self.virtual_to_logical[old_vsa.0 as usize] == Some(lsa) {
                self.virtual_to_logical[old_vsa.0 as usize] = None;
                let (die, vbn, _page) = crate::addr::die_block_page_from_vsa(&self.geom, old_vsa);
                block_map.bump_invalid_count(die, vbn);
            }
        }
        Ok(())
    }

    /// Whichever LSA currently owns `vsa`, if it is still the live (not superseded, not
    /// invalidated) copy. Used by GC (§4.5.6) to decide what must be migrated out of a victim.
    pub fn live_owner(&self, vsa: Vsa) -> Option<Lsa> {
        self.virtual_to_logical[vsa.0 as usize]
    }

    pub fn virtual_backpointer(&self, vsa: Vsa) -> Option<Lsa> {
        self.virtual_to_logical[vsa.0 as usize]
    }

    /// Called by [`VirtualBlockMap::on_erase_complete`] once a block has actually been erased:
    /// every VSA it contained is gone, so its reverse pointer (if any lingered, e.g. a stale
    /// copy already superseded by a later write) must be cleared.
    pub fn clear_virtual_backpointer(&mut self, vsa: Vsa) {
        self.virtual_to_logical[vsa.0 as usize] = None;
    }

    /// Re-point `lsa` at `vsa` directly without going through allocation or invalidation --
    /// used by GC migration (§4.5.6) once the migrated data has actually been written to its
    /// new VSA, and by tests that need to seed a known mapping.
    pub fn force_link(&mut self, lsa: Lsa, vsa: Vsa) {
        if let Some(prev) = self.logical_to_virtual[lsa.0 as usize].take() {
            self.virtual_to_logical[prev.0 as usize] = None;
        }
        self.logical_to_virtual[lsa.0 as usize] = Some(vsa);
        self.virtual_to_logical[vsa.0 as usize] = Some(lsa);
    }
}
