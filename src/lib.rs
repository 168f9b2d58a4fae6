//! Flash translation layer core for a NAND SSD: bad-block table persistence (C1), the
//! logical<->virtual slice indirection (C2), per-die free-block allocation (C3), the address
//! translator (C4), and the request scheduler (C5) that ties them together under buffer- and
//! row-address-dependency ordering rules.
//!
//! This crate is the core only -- the NAND controller, DMA engine, data-buffer cache, and GC
//! victim-selection policy are external collaborators reached through the traits in [`hal`].
//! [`sim`] supplies in-memory stand-ins for all of them, used by this crate's own tests and by
//! the `ftl-sim` demo binary.

pub mod addr;
pub mod bbt;
pub mod blockmap;
pub mod config;
pub mod error;
pub mod hal;
pub mod scheduler;
pub mod sim;
pub mod slicemap;

pub use addr::{Die, Lsa, Pba, Vbn, Vsa};
pub use config::{AllocMode, Geometry};
pub use error::{FtlError, Result};
pub use scheduler::{Completion, HostOpcode, Scheduler};
