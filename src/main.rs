//! `ftl-sim`: a hosted demo/smoke-test binary for the FTL core, backed entirely by the
//! in-memory [`ftl_core::sim`] stand-ins. Grounded in the way `pddb`'s own hosted target boots
//! the backend against `hosted.rs`'s `EmuStorage` and drives it from a `main.rs` rather than
//! from Xous IPC -- this binary plays the same role for this crate: boot, run a representative
//! workload, print the console prompt and capacity export §6 describes, and exit.

use std::io::Read;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use ftl_core::scheduler::HostOpcode;
use ftl_core::sim::{SimDataBufferCache, SimDma, SimNand};
use ftl_core::{Geometry, Scheduler};

/// §6 "Boot console prompt": ask whether to force-rebuild every die's BBT, and wait up to
/// `window` for a single character. Reading stdin happens on a helper thread so a non-'X'
/// (or absent) keypress never blocks boot past the window.
fn prompt_force_rebuild(window: Duration) -> bool {
    println!("Press 'X' to re-make the bad block table.");
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut byte = [0u8; 1];
        if std::io::stdin().read_exact(&mut byte).is_ok() {
            let _ = tx.send(byte[0]);
        }
    });
    match rx.recv_timeout(window) {
        Ok(b) if b.eq_ignore_ascii_case(&b'X') => {
            log::info!("forced BBT rebuild requested");
            true
        }
        _ => false,
    }
}

fn main() {
    env_logger::init();

    let geom = Geometry::minimal();
    let force_rebuild = prompt_force_rebuild(Duration::from_millis(200));

    let nand = SimNand::new(geom);
    let dma = SimDma::new();
    let buf_cache = SimDataBufferCache::new(16, geom.data_bytes_per_page as usize);

    let mut sched = Scheduler::boot(geom, nand, dma, buf_cache, force_rebuild).expect("boot failed");

    let bytes_per_block = geom.pages_per_block as u64 * geom.data_bytes_per_page as u64;
    log::info!(
        "usable capacity: {} MB (max bad blocks/die = {})",
        sched.usable_capacity_mb(bytes_per_block),
        sched.max_bad_block_count()
    );

    // S1: write a full slice, then read it back.
    sched.submit_host_command(HostOpcode::Write, 0, geom.nvme_blocks_per_slice - 1, 1, true).expect("write failed");
    drain(&mut sched);
    sched.submit_host_command(HostOpcode::Read, 0, geom.nvme_blocks_per_slice - 1, 2, true).expect("read failed");
    let completions = drain(&mut sched);
    for c in &completions {
        log::info!("cmd_slot_tag {}: {:?}", c.cmd_slot_tag, c.result);
    }
}

fn drain<N, D, B>(sched: &mut Scheduler<N, D, B>) -> Vec<ftl_core::Completion>
where
    N: ftl_core::hal::NandController,
    D: ftl_core::hal::DmaEngine,
    B: ftl_core::hal::DataBufferCache,
{
    let mut out = Vec::new();
    for _ in 0..64 {
        let c = sched.poll();
        if c.is_empty() && out.is_empty() {
            continue;
        }
        if c.is_empty() {
            break;
        }
        out.extend(c);
    }
    out
}
