//! Trap-page safepoint infrastructure.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       TrapPage                              │
//! │  one OS page (mmap PROT_READ | PROT_WRITE)                  │
//! │  Poll: store / test against the page (no branch)            │
//! │  Arm:  mprotect PROT_NONE → SIGSEGV / SIGBUS                │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ fault
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  handler                                                    │
//! │  - find the owning controller in the lock-free registry     │
//! │  - restore PROT_READ | PROT_WRITE, post the trap token      │
//! │  - return: the faulting access re-executes and succeeds     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ token
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  SafepointController::run_protected                         │
//! │  - loop observes the token at the next cell boundary        │
//! │  - Err(Interrupted) → Resumption::Resumed                   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Costs
//!
//! | Operation            | Cost                              |
//! |----------------------|-----------------------------------|
//! | Poll (not armed)     | one L1 access                     |
//! | Poll (armed)         | fault + handler + two mprotects   |
//! | Flag check           | one load + predictable branch     |

mod controller;
mod handler;
mod page;
mod probe;
mod resumption;
mod stats;

pub use controller::{ControllerError, SafepointController};
pub use handler::{HandlerError, TrapContext, install_handler, is_trap_address};
pub use page::{PageProtection, SafepointError, SafepointState, TrapPage};
pub use probe::{NativeProbe, PollProbe, VolatileProbe};
#[cfg(target_arch = "aarch64")]
pub use probe::LoadProbe;
#[cfg(target_arch = "x86_64")]
pub use probe::TestProbe;
pub use resumption::{Completed, InterruptChannel, Interrupted, Resumption};
pub use stats::SafepointStats;

/// Value stored into the trap page by write polls.
pub const POLL_WRITE_VALUE: u32 = 14;

/// Maximum number of controllers (trap pages) alive at the same time.
///
/// The fault handler cannot allocate or lock, so live pages are kept in a
/// fixed table it can scan.
pub const MAX_TRAP_PAGES: usize = 64;
