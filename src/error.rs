//! Crate-wide error taxonomy (see spec §7). Grounded in the same style as other NAND/FTL
//! crates in this ecosystem (e.g. `flashmap`'s `Error<F>` enum): a flat `thiserror` enum
//! rather than `pddb`'s `std::io::Error` (that crate is married to `std::io`'s `ErrorKind`
//! because it exposes a filesystem-like surface; this crate is a hardware-facing library and
//! wants its own vocabulary).

use thiserror::Error;

use crate::addr::{Die, Lsa, Pba};
use crate::config::AllocMode;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FtlError {
    /// A die's on-flash BBT could not be validated (first byte not 0/1, or an uncorrectable
    /// read). Recovered by running the bad-block scanner on that die.
    #[error("die {die:?}: bad-block table unreadable, rebuilding from scan")]
    BbtUnreadable { die: Die },

    /// No reserved block remained to remap a bad user PBA onto. Not fatal: the VBN that would
    /// have targeted it is simply excluded from the free list.
    #[error("die {die:?}: no reserved block available to remap a bad block onto")]
    RemapExhausted { die: Die },

    /// A program operation failed. The PBA is marked bad and a BBT update is booked; callers
    /// retry the write on a fresh VSA.
    #[error("die {die:?} pba {pba:?}: program failed")]
    ProgramFailed { die: Die, pba: Pba },

    /// An erase operation failed. Same bookkeeping as `ProgramFailed`.
    #[error("die {die:?} pba {pba:?}: erase failed")]
    EraseFailed { die: Die, pba: Pba },

    /// `get_free_block` found no usable block under the given allocation mode.
    #[error("die {die:?}: free-block exhaustion under {mode:?} allocation")]
    FreeBlockExhausted { die: Die, mode: AllocMode },

    /// A caller presented an LSA outside `[0, slices_per_ssd)`. A programmer error per §7.
    #[error("lsa {lsa:?} out of range")]
    LsaOutOfRange { lsa: Lsa },

    /// An opcode the scheduler does not recognize. A programmer error per §7.
    #[error("unsupported opcode")]
    UnsupportedOpcode,

    /// A request carried an option combination the scheduler does not support. A programmer
    /// error per §7.
    #[error("unsupported request option: {0}")]
    UnsupportedOption(&'static str),

    /// A condition that halts the main loop: GC-mode free-block exhaustion (device wedged),
    /// or an internal consistency violation in the request slab / dependency queues.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl FtlError {
    /// Whether the main loop should halt on this error (§7 "Propagation"), as opposed to
    /// absorbing and retrying/reporting it via completion status.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FtlError::Fatal(_)
                | FtlError::LsaOutOfRange { .. }
                | FtlError::UnsupportedOpcode
                | FtlError::UnsupportedOption(_)
        )
    }
}

pub type Result<T> = core::result::Result<T, FtlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn programmer_errors_and_fatal_are_fatal() {
        assert!(FtlError::Fatal("wedged".into()).is_fatal());
        assert!(FtlError::LsaOutOfRange { lsa: crate::addr::Lsa(0) }.is_fatal());
        assert!(FtlError::UnsupportedOpcode.is_fatal());
        assert!(FtlError::UnsupportedOption("frobnicate").is_fatal());
    }

    #[test]
    fn recoverable_errors_are_not_fatal() {
        assert!(!FtlError::BbtUnreadable { die: Die(0) }.is_fatal());
        assert!(!FtlError::RemapExhausted { die: Die(0) }.is_fatal());
        assert!(!FtlError::ProgramFailed { die: Die(0), pba: Pba(0) }.is_fatal());
        assert!(!FtlError::EraseFailed { die: Die(0), pba: Pba(0) }.is_fatal());
        assert!(!FtlError::FreeBlockExhausted { die: Die(0), mode: AllocMode::Normal }.is_fatal());
    }
}
