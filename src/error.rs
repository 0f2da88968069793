//! # Errors
//!
//! Recoverable failures reported to callers. Everything else the scheduler
//! can detect (a thread in the wrong state, blocking from interrupt context,
//! releasing a lock one does not hold) is a kernel defect and panics.

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The thread arena is full; no TCB or stack could be allocated.
    NoFreeThreadSlot,
    /// The lock table is full.
    NoFreeLockSlot,
    /// The kernel command line carried an unknown or malformed option.
    InvalidOption,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NoFreeThreadSlot => f.write_str("no free thread slot"),
            Error::NoFreeLockSlot => f.write_str("no free lock slot"),
            Error::InvalidOption => f.write_str("invalid kernel option"),
        }
    }
}

impl core::error::Error for Error {}
