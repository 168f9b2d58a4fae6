//! Device geometry: the named constants that every other module derives its bounds from.
//!
//! `pddb`'s `api.rs` keeps the PDDB's equivalent constants (`PDDB_A_LEN`, `JOURNAL_RAND_RANGE`,
//! ...) as free-standing `const`s with doc comments explaining their derivation rather than
//! scattering literals through the backend. This core serves more than one device geometry
//! (a unit-test geometry and a production geometry, at minimum), so the constants live on a
//! `Geometry` value instead of being baked in at compile time, but the philosophy -- name
//! everything, derive what can be derived, never repeat a magic number -- is the same.

/// Free-block allocation mode, threaded through [`crate::blockmap::VirtualBlockMap::get_free_block`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocMode {
    /// Ordinary host write path. Fails rather than dip into the reserved GC pool.
    Normal,
    /// Garbage-collection migration path. Fails only when the free list is truly empty.
    Gc,
}

/// Device geometry: channels/ways/dies, per-die block and page counts, and the host-visible
/// slice size. Every other address-space quantity is derived from these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub channels: u32,
    pub ways: u32,
    /// Number of user (non-reserved) blocks per die, addressed by VBN.
    pub user_blocks_per_die: u32,
    /// Total physical blocks per die, user + reserved spares, addressed by PBA.
    pub total_blocks_per_die: u32,
    pub luns_per_die: u32,
    pub pages_per_block: u32,
    /// Host blocks (LBAs) that make up one slice / one mapping-table entry.
    pub nvme_blocks_per_slice: u32,
    /// Blocks that may only be drawn from by the GC allocation path.
    pub reserved_free_block_count: u32,
    /// Bytes in the data region of one page, used to size the on-flash BBT layout.
    pub data_bytes_per_page: u32,
}

impl Geometry {
    /// The configuration used throughout §8's worked scenarios (S1-S6) and this crate's
    /// integration tests: CHANNELS=2, WAYS=2, DIES=4, USER_BLOCKS_PER_DIE=4, PAGES_PER_BLOCK=4,
    /// NVME_BLOCKS_PER_SLICE=8, RESERVED_FREE_BLOCK_COUNT=1.
    pub const fn minimal() -> Self {
        Geometry {
            channels: 2,
            ways: 2,
            user_blocks_per_die: 4,
            total_blocks_per_die: 8,
            luns_per_die: 1,
            pages_per_block: 4,
            nvme_blocks_per_slice: 8,
            reserved_free_block_count: 1,
            data_bytes_per_page: 4096,
        }
    }

    /// A larger, still toy-scale geometry representative of a real device's proportions
    /// (more dies, deeper blocks, more spares per LUN) for exercising parallelism and GC
    /// pressure beyond what `minimal()` can show.
    pub const fn reference() -> Self {
        Geometry {
            channels: 8,
            ways: 2,
            user_blocks_per_die: 2048,
            total_blocks_per_die: 2176, // ~6% spare overprovisioning
            luns_per_die: 2,
            pages_per_block: 256,
            nvme_blocks_per_slice: 8,
            reserved_free_block_count: 16,
            data_bytes_per_page: 16384,
        }
    }

    pub const fn dies(&self) -> u32 {
        self.channels * self.ways
    }

    pub const fn slices_per_block(&self) -> u32 {
        self.pages_per_block
    }

    pub const fn slices_per_ssd(&self) -> u64 {
        self.dies() as u64 * self.user_blocks_per_die as u64 * self.slices_per_block() as u64
    }

    pub const fn user_blocks_per_lun(&self) -> u32 {
        self.user_blocks_per_die / self.luns_per_die
    }

    pub const fn total_blocks_per_lun(&self) -> u32 {
        self.total_blocks_per_die / self.luns_per_die
    }

    /// Pages needed to hold one die's BBT, including the blank page-0 scan region and the
    /// LSB-page doubling (see [`crate::addr::vpage_to_lsb_physpage`]).
    pub const fn bbt_pages_per_die(&self) -> u32 {
        let bbt_bytes = self.total_blocks_per_die;
        let data_pages = (bbt_bytes + self.data_bytes_per_page - 1) / self.data_bytes_per_page;
        data_pages + 1
    }

    /// Basic self-consistency checks. Violations are programmer errors (misconfigured
    /// geometry), not runtime conditions, so this panics rather than returning a `Result`.
    pub fn assert_valid(&self) {
        assert!(self.channels > 0 && self.ways > 0, "channels/ways must be nonzero");
        assert!(self.luns_per_die > 0, "luns_per_die must be nonzero");
        assert!(
            self.user_blocks_per_die % self.luns_per_die == 0,
            "user_blocks_per_die must divide evenly across luns_per_die"
        );
        assert!(
            self.total_blocks_per_die % self.luns_per_die == 0,
            "total_blocks_per_die must divide evenly across luns_per_die"
        );
        assert!(
            self.total_blocks_per_die >= self.user_blocks_per_die,
            "total_blocks_per_die must include at least the user blocks"
        );
        assert!(self.pages_per_block > 0, "pages_per_block must be nonzero");
        assert!(self.nvme_blocks_per_slice > 0, "nvme_blocks_per_slice must be nonzero");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_matches_worked_scenarios() {
        let g = Geometry::minimal();
        g.assert_valid();
        assert_eq!(g.dies(), 4);
        assert_eq!(g.slices_per_ssd(), 4 * 4 * 4);
    }

    #[test]
    fn reference_is_internally_consistent() {
        let g = Geometry::reference();
        g.assert_valid();
        assert_eq!(g.user_blocks_per_lun() * g.luns_per_die, g.user_blocks_per_die);
        assert_eq!(g.total_blocks_per_lun() * g.luns_per_die, g.total_blocks_per_die);
    }

    #[test]
    fn bbt_pages_cover_every_block() {
        let g = Geometry::minimal();
        // 8 total blocks per die, 4096B/page => 1 data page + 1 blank page
        assert_eq!(g.bbt_pages_per_die(), 2);
    }
}
