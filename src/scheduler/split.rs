//! §4.5.1 command splitting: turn one host command into a sequence of slice requests.

/// Host-visible opcode families the scheduler recognises (§6). `Phy*` opcodes bypass C2 and
/// address a raw VSA (SPEC_FULL §9A.5); this is modeled as the `translate` flag on
/// [`SliceRequest`] rather than as separate opcodes all the way through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostOpcode {
    Read,
    Write,
}

/// One `(opcode, lsa, offset, numBlocks, nvmeCmdSlotTag)` slice request, the unit C5 processes
/// (§4.5.1/§4.5.2). `slice_idx` is an LSA when `translate` is set, otherwise a raw VSA.
#[derive(Debug, Clone, Copy)]
pub struct SliceRequest {
    pub opcode: HostOpcode,
    pub slice_idx: u32,
    pub offset: u32,
    pub num_blocks: u32,
    pub cmd_slot_tag: u32,
    pub translate: bool,
}

/// Splits `[startLba, startLba + nlb + 1)` into head/body/tail slice requests. `nlb` is
/// zero-based per §4.5.1 (actual block count is `nlb + 1`). No special-casing is needed for
/// head/body/tail: walking slice-aligned chunks naturally produces a short first chunk, full
/// body chunks, and a short last chunk only when the range doesn't end on a boundary.
pub fn split_command(
    slice_blocks: u32,
    start_lba: u32,
    nlb: u32,
    opcode: HostOpcode,
    cmd_slot_tag: u32,
    translate: bool,
) -> Vec<SliceRequest> {
    let mut remaining = nlb + 1;
    let mut lba = start_lba;
    let mut out = Vec::new();
    while remaining > 0 {
        let slice_idx = lba / slice_blocks;
        let offset = lba % slice_blocks;
        let num_blocks = (slice_blocks - offset).min(remaining);
        out.push(SliceRequest { opcode, slice_idx, offset, num_blocks, cmd_slot_tag, translate });
        lba += num_blocks;
        remaining -= num_blocks;
    }
    out
}
