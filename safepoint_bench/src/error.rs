//! Fatal setup errors.
//!
//! The demonstration is meaningless without its trap page and fault
//! handler, so every error here ends the process with `abort()`.

use safepoint_poll::{ControllerError, SafepointError};

/// Anything that stops the harness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BenchError {
    /// Trap page or fault handler could not be set up.
    Setup(ControllerError),
    /// The trap page could not be armed.
    Protection(SafepointError),
}

impl std::fmt::Display for BenchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BenchError::Setup(err) => write!(f, "{}", err),
            BenchError::Protection(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for BenchError {}

impl From<ControllerError> for BenchError {
    fn from(err: ControllerError) -> Self {
        BenchError::Setup(err)
    }
}

impl From<SafepointError> for BenchError {
    fn from(err: SafepointError) -> Self {
        BenchError::Protection(err)
    }
}

/// Print `err` to stderr and abort.
pub fn fatal(err: &BenchError) -> ! {
    eprintln!("{}", err);
    std::process::abort()
}
