//! C4: the address translator. Five address spaces -- LSA, VSA, VBN, PBA, die/channel/way --
//! are semantically distinct even though all of them are small integers (Design Notes, "Typed
//! tagged addresses"). `pddb`'s `types.rs` wraps its own addresses (`PhysAddr`, `VirtAddr`,
//! `PageAlignedVa`/`PageAlignedPa`) in nominal newtypes rather than passing `u32`/`u64` around
//! bare; the same discipline is applied here, one newtype per address space, with conversions
//! only ever going through the functions below.

use crate::config::Geometry;

macro_rules! addr_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub u32);

        impl $name {
            pub const fn new(v: u32) -> Self {
                $name(v)
            }
            pub const fn get(self) -> u32 {
                self.0
            }
        }

        impl From<u32> for $name {
            fn from(v: u32) -> Self {
                $name(v)
            }
        }
        impl From<$name> for u32 {
            fn from(v: $name) -> Self {
                v.0
            }
        }
    };
}

/// Logical Slice Address: what the host's LBA maps to after grouping by
/// `NVME_BLOCKS_PER_SLICE`. Range `0 .. slices_per_ssd`.
addr_newtype!(Lsa);
/// Virtual Slice Address: striped across dies. Range `0 .. slices_per_ssd`.
addr_newtype!(Vsa);
/// Virtual Block Number: per-die, range `0 .. user_blocks_per_die`.
addr_newtype!(Vbn);
/// Physical Block Address: per-die, range `0 .. total_blocks_per_die` (user + reserved).
addr_newtype!(Pba);
/// Die index: `0 .. dies()`, with `die = ch + way * channels`.
addr_newtype!(Die);
addr_newtype!(Channel);
addr_newtype!(Way);

/// The (channel, way, block, page) quadruple a NAND request descriptor actually addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhysLocation {
    pub ch: Channel,
    pub way: Way,
    pub block: Pba,
    pub page: u32,
}

/// `die = ch + way * CHANNELS`.
pub fn die_from_ch_way(geom: &Geometry, ch: Channel, way: Way) -> Die {
    Die(ch.0 + way.0 * geom.channels)
}

/// Inverse of [`die_from_ch_way`].
pub fn ch_way_from_die(geom: &Geometry, die: Die) -> (Channel, Way) {
    (Channel(die.0 % geom.channels), Way(die.0 / geom.channels))
}

/// `VSA = die + DIES * (block * SLICES_PER_BLOCK + page)`, the channel-interleaved striping
/// described in §3: consecutive VSAs land on different dies.
pub fn vsa_from_die_block_page(geom: &Geometry, die: Die, vbn: Vbn, page: u32) -> Vsa {
    let dies = geom.dies();
    Vsa(die.0 + dies * (vbn.0 * geom.slices_per_block() + page))
}

/// Inverse of [`vsa_from_die_block_page`].
pub fn die_block_page_from_vsa(geom: &Geometry, vsa: Vsa) -> (Die, Vbn, u32) {
    let dies = geom.dies();
    let die = Die(vsa.0 % dies);
    let rest = vsa.0 / dies;
    let spb = geom.slices_per_block();
    let vbn = Vbn(rest / spb);
    let page = rest % spb;
    (die, vbn, page)
}

/// Static, LUN-aware VBN->PBA translation: `PBA = (VBN / USER_BLOCKS_PER_LUN) *
/// TOTAL_BLOCKS_PER_LUN + (VBN % USER_BLOCKS_PER_LUN)`.
pub fn vbn_to_pba(geom: &Geometry, vbn: Vbn) -> Pba {
    let ubpl = geom.user_blocks_per_lun();
    let tbpl = geom.total_blocks_per_lun();
    let lun = vbn.0 / ubpl;
    let offset = vbn.0 % ubpl;
    Pba(lun * tbpl + offset)
}

/// Virtual page -> LSB physical page translation used only by the BBT's pseudo-SLC layout:
/// `physPage = 2*vPage - 1` for `vPage > 0`, and `physPage = 0` for `vPage == 0`.
///
/// This mapping sends both virtual page 0 and virtual page 1 to physical page 0, which would
/// collide if anything were ever stored at virtual page 0. The convention this core preserves
/// is that the BBT itself is never stored at virtual page 0 -- the data region starts at
/// virtual page 1 -- so the collision is never exercised. See [`crate::bbt`] for the
/// page-0-is-blank convention at the call site.
pub fn vpage_to_lsb_physpage(vpage: u32) -> u32 {
    if vpage == 0 { 0 } else { 2 * vpage - 1 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn die_ch_way_roundtrip() {
        let geom = Geometry::minimal();
        for ch in 0..geom.channels {
            for way in 0..geom.ways {
                let die = die_from_ch_way(&geom, Channel(ch), Way(way));
                let (ch2, way2) = ch_way_from_die(&geom, die);
                assert_eq!((ch, way), (ch2.0, way2.0));
            }
        }
    }

    #[test]
    fn vsa_roundtrip_and_striping() {
        let geom = Geometry::minimal();
        for die in 0..geom.dies() {
            for vbn in 0..geom.user_blocks_per_die {
                for page in 0..geom.pages_per_block {
                    let vsa = vsa_from_die_block_page(&geom, Die(die), Vbn(vbn), page);
                    let (d2, v2, p2) = die_block_page_from_vsa(&geom, vsa);
                    assert_eq!((die, vbn, page), (d2.0, v2.0, p2));
                }
            }
        }
        // consecutive VSAs land on different dies
        let a = vsa_from_die_block_page(&geom, Die(0), Vbn(0), 0);
        let b = Vsa(a.0 + 1);
        let (da, _, _) = die_block_page_from_vsa(&geom, a);
        let (db, _, _) = die_block_page_from_vsa(&geom, b);
        assert_ne!(da, db);
    }

    #[test]
    fn vbn_to_pba_is_lun_aware() {
        let mut geom = Geometry::minimal();
        geom.luns_per_die = 2;
        geom.user_blocks_per_die = 4; // 2 per LUN
        geom.total_blocks_per_die = 8; // 4 per LUN
        assert_eq!(vbn_to_pba(&geom, Vbn(0)).0, 0);
        assert_eq!(vbn_to_pba(&geom, Vbn(1)).0, 1);
        // vbn 2 is the first block of LUN 1, which starts at PBA 4 (TOTAL_BLOCKS_PER_LUN)
        assert_eq!(vbn_to_pba(&geom, Vbn(2)).0, 4);
        assert_eq!(vbn_to_pba(&geom, Vbn(3)).0, 5);
    }

    #[test]
    fn lsb_page_translation() {
        assert_eq!(vpage_to_lsb_physpage(0), 0);
        assert_eq!(vpage_to_lsb_physpage(1), 1);
        assert_eq!(vpage_to_lsb_physpage(2), 3);
        assert_eq!(vpage_to_lsb_physpage(3), 5);
    }
}
