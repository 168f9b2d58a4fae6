//! §4.5.6 garbage-collection hook: turns a [`crate::blockmap::GcPlan`] into the ordered list of
//! migration steps the scheduler dispatches. Kept separate from the plan itself (which lives on
//! `VirtualBlockMap`, since selecting a victim is C3's business) and from the imperative
//! request-slab bookkeeping in `mod.rs`.

use crate::addr::{Lsa, Vsa};
use crate::blockmap::GcPlan;

/// One still-live slice that must be copied to a fresh VSA before its block can be erased.
#[derive(Debug, Clone, Copy)]
pub struct MigrationStep {
    pub lsa: Lsa,
    pub old_vsa: Vsa,
}

/// Live slices in ascending page order, so migration reads/writes land on the victim and the
/// fresh block in the same order the pages were originally programmed.
pub fn migration_steps(plan: &GcPlan) -> Vec<MigrationStep> {
    plan.live.iter().map(|(vsa, lsa)| MigrationStep { lsa: *lsa, old_vsa: *vsa }).collect()
}
