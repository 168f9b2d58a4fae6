//! C1: Physical Block Map + Bad-Block Table. See spec §4.1.
//!
//! The on-flash format and recovery protocol are both narrow enough that this module owns the
//! NAND I/O for them directly (through [`crate::hal::NandController::submit_and_wait`], the
//! boot-time synchronous barrier from §5) rather than going through the scheduler -- exactly as
//! `pddb`'s page-table and FSCB recovery runs its own direct flash I/O during mount, before the
//! backend's ordinary request pipeline is live.

use log::{debug, warn};

use crate::addr::{ch_way_from_die, vpage_to_lsb_physpage, Die, Pba};
use crate::config::Geometry;
use crate::error::{FtlError, Result};
use crate::hal::{BlockSpace, EccMode, EccWarning, NandCode, NandController, NandTarget, RowAddrDependencyCheck};

/// Per-(die, PBA) remap record. `remapped_phy_block` defaults to `pba` itself; it only differs
/// once [`BadBlockTable::remap_bad_blocks`] has resolved a bad user block onto a spare.
#[derive(Debug, Clone, Copy)]
pub struct PhyBlockEntry {
    pub bad: bool,
    pub remapped_phy_block: Pba,
}

/// Per-die bookkeeping for the on-flash BBT copy.
#[derive(Debug, Clone, Copy)]
pub struct BbtInfoEntry {
    /// PBA of the block that stores this die's BBT on flash. PBA 0 by default.
    pub phy_block: Pba,
    /// Set when `phy_block[*].bad` has changed since the last successful flash write.
    pub grown_bad_update: bool,
}

pub struct BadBlockTable {
    geom: Geometry,
    /// `phy_blocks[die][pba]`.
    phy_blocks: Vec<Vec<PhyBlockEntry>>,
    bbt_info: Vec<BbtInfoEntry>,
}

impl BadBlockTable {
    pub fn new(geom: Geometry) -> Self {
        let dies = geom.dies() as usize;
        let per_die = geom.total_blocks_per_die as usize;
        let phy_blocks = (0..dies)
            .map(|_| {
                (0..per_die)
                    .map(|pba| PhyBlockEntry { bad: false, remapped_phy_block: Pba(pba as u32) })
                    .collect()
            })
            .collect();
        let bbt_info = (0..dies).map(|_| BbtInfoEntry { phy_block: Pba(0), grown_bad_update: false }).collect();
        BadBlockTable { geom, phy_blocks, bbt_info }
    }

    pub fn is_bad(&self, die: Die, pba: Pba) -> bool {
        self.phy_blocks[die.0 as usize][pba.0 as usize].bad
    }

    /// Resolve a PBA through the remap table: if `pba` is bad, returns its remap target
    /// (invariant 9, §3: a non-bad VBN's PBA must resolve to a non-bad PBA once remapping has
    /// run).
    pub fn resolve(&self, die: Die, pba: Pba) -> Pba {
        self.phy_blocks[die.0 as usize][pba.0 as usize].remapped_phy_block
    }

    pub fn bbt_info(&self, die: Die) -> BbtInfoEntry {
        self.bbt_info[die.0 as usize]
    }

    /// Mark a block reserved by an external collaborator (e.g. an NMC mapping reservation) as
    /// bad, so [`Self::remap_bad_blocks`] treats it like any other unusable block. Must be
    /// called before `remap_bad_blocks`.
    pub fn reserve_external(&mut self, die: Die, pba: Pba) {
        self.phy_blocks[die.0 as usize][pba.0 as usize].bad = true;
    }

    /// Runtime grown-bad-block report (§4.1 "Grown bad blocks"): a program/erase failure on
    /// `(die, pba)` marks it bad and books a BBT flush for that die.
    pub fn mark_grown_bad(&mut self, die: Die, pba: Pba) {
        self.phy_blocks[die.0 as usize][pba.0 as usize].bad = true;
        self.bbt_info[die.0 as usize].grown_bad_update = true;
        debug!("die {:?}: pba {:?} marked grown-bad, BBT flush booked", die, pba);
    }

    /// Boot-time recovery protocol (§4.1): load each die's on-flash BBT if valid, otherwise
    /// scan that die and persist the freshly-built table.
    pub fn recover<N: NandController>(&mut self, nand: &mut N) -> Result<()> {
        let dies = self.geom.dies();
        let mut missing = Vec::new();
        for d in 0..dies {
            let die = Die(d);
            match self.load_bbt_bytes(die, nand) {
                Ok(bytes) if bytes.first().map(|b| *b == 0 || *b == 1).unwrap_or(false) => {
                    for (pba, &b) in bytes.iter().enumerate().take(self.geom.total_blocks_per_die as usize) {
                        self.phy_blocks[d as usize][pba].bad = b == 1;
                    }
                    debug!("die {:?}: BBT loaded from flash", die);
                }
                _ => {
                    warn!("die {:?}: bad-block table unreadable, will rebuild from scan", die);
                    missing.push(die);
                }
            }
        }
        for die in missing {
            self.scan(die, nand)?;
            self.bbt_info[die.0 as usize].grown_bad_update = true;
        }
        self.flush_dirty(nand)
    }

    /// Device-wide forced rebuild, triggered by the boot console's "re-make the bad block
    /// table" prompt (§6): every die is rescanned and its BBT rewritten regardless of whether
    /// the on-flash copy was valid.
    pub fn force_rebuild_all<N: NandController>(&mut self, nand: &mut N) -> Result<()> {
        for d in 0..self.geom.dies() {
            self.scan(Die(d), nand)?;
            self.bbt_info[d as usize].grown_bad_update = true;
        }
        self.flush_dirty(nand)
    }

    /// Bad-block scan (§4.1): a block is good only if the first byte of the data region and
    /// the first byte of the spare region are both `0xFF` on the first page, and (if so) also
    /// on the last page. ECC and row-address checks are disabled for the scan.
    pub fn scan<N: NandController>(&mut self, die: Die, nand: &mut N) -> Result<()> {
        let (ch, way) = ch_way_from_die(&self.geom, die);
        let last_page = self.geom.pages_per_block - 1;
        for pba in 0..self.geom.total_blocks_per_die {
            let first_ok = Self::probe_page_is_blank(nand, ch, way, Pba(pba), 0)?;
            let good = if first_ok { Self::probe_page_is_blank(nand, ch, way, Pba(pba), last_page)? } else { false };
            self.phy_blocks[die.0 as usize][pba as usize].bad = !good;
        }
        debug!("die {:?}: bad-block scan complete", die);
        Ok(())
    }

    fn probe_page_is_blank<N: NandController>(
        nand: &mut N,
        ch: crate::addr::Channel,
        way: crate::addr::Way,
        block: Pba,
        page: u32,
    ) -> Result<bool> {
        // A real controller returns both the data and spare region for a scan read; this
        // boundary models that as one read whose first two bytes are the bytes the scan
        // inspects: data[0] and spare[0].
        let req = crate::hal::NandRequest {
            code: NandCode::Read,
            target: NandTarget { ch, way, block, page },
            block_space: BlockSpace::Total,
            ecc: EccMode::Off,
            ecc_warning: EccWarning::Off,
            row_addr_check: RowAddrDependencyCheck::None,
            programmed_page_cnt: 0,
            write_data: None,
        };
        let data = nand.submit_and_wait(req)?.unwrap_or_default();
        Ok(data.get(0).copied().unwrap_or(0xFF) == 0xFF && data.get(1).copied().unwrap_or(0xFF) == 0xFF)
    }

    /// Remapping pass (§4.1): reserve the BBT's own block, then for each die/LUN walk user
    /// PBAs ascending and assign the first ascending good reserved PBA to each bad one. Returns
    /// the maximum bad-block count seen across dies, used to compute usable capacity (§6).
    pub fn remap_bad_blocks(&mut self) -> u32 {
        let dies = self.geom.dies();
        // the block holding the BBT is itself reserved, and thus remapped like any other bad
        // user block once the loop below runs over it.
        for d in 0..dies {
            let bbt_pba = self.bbt_info[d as usize].phy_block;
            self.phy_blocks[d as usize][bbt_pba.0 as usize].bad = true;
        }

        let ubpl = self.geom.user_blocks_per_lun();
        let tbpl = self.geom.total_blocks_per_lun();
        let luns = self.geom.luns_per_die;

        let mut max_bad = 0u32;
        for d in 0..dies {
            let die = Die(d);
            let mut bad_count = 0u32;
            for lun in 0..luns {
                let lun_base = lun * tbpl;
                let mut next_reserved = ubpl; // first reserved offset within the LUN
                for offset in 0..ubpl {
                    let pba = Pba(lun_base + offset);
                    if !self.phy_blocks[d as usize][pba.0 as usize].bad {
                        continue;
                    }
                    bad_count += 1;
                    let mut assigned = None;
                    while next_reserved < tbpl {
                        let candidate = Pba(lun_base + next_reserved);
                        next_reserved += 1;
                        if !self.phy_blocks[d as usize][candidate.0 as usize].bad {
                            assigned = Some(candidate);
                            break;
                        }
                    }
                    match assigned {
                        Some(reserved) => {
                            self.phy_blocks[d as usize][pba.0 as usize].remapped_phy_block = reserved;
                        }
                        None => {
                            warn!("die {:?} lun {}: no reserved block left to remap pba {:?}", die, lun, pba);
                        }
                    }
                }
            }
            max_bad = max_bad.max(bad_count);
        }
        max_bad
    }

    /// Flush every die whose in-memory BBT has diverged from flash (grown bad blocks, or a
    /// rebuild from `recover`/`force_rebuild_all`).
    pub fn flush_dirty<N: NandController>(&mut self, nand: &mut N) -> Result<()> {
        for d in 0..self.geom.dies() {
            if self.bbt_info[d as usize].grown_bad_update {
                self.save_bbt(Die(d), nand)?;
                self.bbt_info[d as usize].grown_bad_update = false;
            }
        }
        Ok(())
    }

    /// Erase the BBT block and rewrite the byte array at the LSB pages (§4.1, §6). Page 0 is
    /// left blank by construction: the loop below starts at virtual page 1.
    fn save_bbt<N: NandController>(&self, die: Die, nand: &mut N) -> Result<()> {
        let (ch, way) = ch_way_from_die(&self.geom, die);
        let bbt_pba = self.bbt_info[die.0 as usize].phy_block;

        let erase = crate::hal::NandRequest {
            code: NandCode::Erase,
            target: NandTarget { ch, way, block: bbt_pba, page: 0 },
            block_space: BlockSpace::Total,
            ecc: EccMode::Off,
            ecc_warning: EccWarning::Off,
            row_addr_check: RowAddrDependencyCheck::None,
            programmed_page_cnt: 0,
            write_data: None,
        };
        nand.submit_and_wait(erase).map_err(|_| FtlError::EraseFailed { die, pba: bbt_pba })?;

        let bytes: Vec<u8> = self.phy_blocks[die.0 as usize].iter().map(|e| e.bad as u8).collect();
        let page_bytes = self.geom.data_bytes_per_page as usize;
        let used_pages = self.geom.bbt_pages_per_die() - 1; // excludes the blank page-0 region
        for vpage in 1..=used_pages {
            let start = (vpage as usize - 1) * page_bytes;
            let end = (start + page_bytes).min(bytes.len());
            let chunk = if start < bytes.len() { bytes[start..end].to_vec() } else { Vec::new() };
            let physpage = vpage_to_lsb_physpage(vpage);
            let write = crate::hal::NandRequest {
                code: NandCode::Write,
                target: NandTarget { ch, way, block: bbt_pba, page: physpage },
                block_space: BlockSpace::Total,
                ecc: EccMode::Off,
                ecc_warning: EccWarning::Off,
                row_addr_check: RowAddrDependencyCheck::None,
                programmed_page_cnt: 0,
                write_data: Some(chunk),
            };
            // A BBT persistence failure is not retried on a fresh VSA like an ordinary
            // program failure (§4.1): it aborts this flush. The caller is expected to pick a
            // different reserved PBA for `bbt_info[die].phy_block` and retry the whole save.
            nand.submit_and_wait(write).map_err(|_| FtlError::ProgramFailed { die, pba: bbt_pba })?;
        }
        debug!("die {:?}: BBT flushed to pba {:?}", die, bbt_pba);
        Ok(())
    }

    fn load_bbt_bytes<N: NandController>(&self, die: Die, nand: &mut N) -> Result<Vec<u8>> {
        let (ch, way) = ch_way_from_die(&self.geom, die);
        let bbt_pba = self.bbt_info[die.0 as usize].phy_block;
        let page_bytes = self.geom.data_bytes_per_page as usize;
        let used_pages = self.geom.bbt_pages_per_die() - 1;
        let mut out = Vec::with_capacity(page_bytes * used_pages as usize);
        for vpage in 1..=used_pages {
            let physpage = vpage_to_lsb_physpage(vpage);
            let req = crate::hal::NandRequest {
                code: NandCode::Read,
                target: NandTarget { ch, way, block: bbt_pba, page: physpage },
                block_space: BlockSpace::Total,
                ecc: EccMode::Off,
                ecc_warning: EccWarning::Off,
                row_addr_check: RowAddrDependencyCheck::None,
                programmed_page_cnt: 0,
                write_data: None,
            };
            let data = nand.submit_and_wait(req).map_err(|_| FtlError::BbtUnreadable { die })?;
            out.extend(data.unwrap_or_default());
        }
        Ok(out)
    }
}
