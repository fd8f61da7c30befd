//! The interrupt controller handed to every polling loop.
//!
//! A controller owns one trap page and one explicit interrupt flag. The
//! two are independent channels: flag loops only read the flag, trap loops
//! only touch the page.
//!
//! Interruption is scoped to a protected region:
//!
//! ```ignore
//! let controller = SafepointController::new()?;
//! controller.invalidate_poll_page()?;
//! match controller.run_protected(|ctl| variants::write_polling(ctl, &a, &b, &mut c)) {
//!     Resumption::Continued(done) => { /* normal path */ }
//!     Resumption::Resumed(stop) => { /* recovery path */ }
//! }
//! ```
//!
//! Controllers are independent of each other, so several can live on
//! different threads (the test suite relies on this).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use super::handler::{self, HandlerError, TrapContext, TrapTarget, install_handler};
use super::page::{PageProtection, SafepointError, SafepointState, TrapPage};
use super::resumption::{Interrupted, Resumption};
use super::stats::SafepointStats;

// =============================================================================
// ControllerError
// =============================================================================

/// Setup failures. None of these are recoverable for a polling run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerError {
    /// The trap page could not be created.
    Page(SafepointError),
    /// The fault handler could not be installed or the page registered.
    Handler(HandlerError),
}

impl std::fmt::Display for ControllerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControllerError::Page(err) => write!(f, "{}", err),
            ControllerError::Handler(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for ControllerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ControllerError::Page(err) => Some(err),
            ControllerError::Handler(err) => Some(err),
        }
    }
}

impl From<SafepointError> for ControllerError {
    fn from(err: SafepointError) -> Self {
        ControllerError::Page(err)
    }
}

impl From<HandlerError> for ControllerError {
    fn from(err: HandlerError) -> Self {
        ControllerError::Handler(err)
    }
}

// =============================================================================
// SafepointController
// =============================================================================

/// Owns the interrupt state that polling loops observe.
pub struct SafepointController {
    /// Page, trap token and stats; boxed so the handler registry can point at it.
    target: Box<TrapTarget>,

    /// Registry slot of `target`.
    slot: usize,

    /// Explicit interrupt flag (flag polling channel).
    flag: AtomicBool,

    /// Protected regions entered so far.
    epoch: AtomicU64,

    /// A recovery could not make the page read/write again.
    restore_failed: AtomicBool,
}

impl SafepointController {
    /// Map a trap page, install the fault handler and register the page.
    pub fn new() -> Result<Self, ControllerError> {
        let page = TrapPage::new()?;
        install_handler()?;

        let target = Box::new(TrapTarget::new(page));
        let slot = handler::register(&target)?;

        Ok(SafepointController {
            target,
            slot,
            flag: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            restore_failed: AtomicBool::new(false),
        })
    }

    /// Address of the trap page.
    #[inline]
    pub fn poll_address(&self) -> usize {
        self.target.page.poll_address()
    }

    /// The trap page.
    #[inline]
    pub fn page(&self) -> &TrapPage {
        &self.target.page
    }

    /// Current trap page state.
    #[inline]
    pub fn page_state(&self) -> SafepointState {
        self.target.page.state()
    }

    /// Current trap page protection.
    #[inline]
    pub fn protection(&self) -> PageProtection {
        self.target.page.protection()
    }

    /// Whether the trap page is armed.
    #[inline]
    pub fn is_armed(&self) -> bool {
        self.target.page.is_armed()
    }

    /// Statistics for this controller.
    #[inline]
    pub fn stats(&self) -> &SafepointStats {
        &self.target.stats
    }

    /// Number of protected regions entered.
    #[inline]
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    // =========================================================================
    // Flag channel
    // =========================================================================

    /// Ask flag-polling loops to stop at their next check.
    pub fn request_interrupt(&self) {
        self.flag.store(true, Ordering::Release);
        self.target.stats.record_flag_request();
    }

    /// Withdraw a pending flag request.
    pub fn clear_interrupt(&self) {
        self.flag.store(false, Ordering::Release);
    }

    /// The per-iteration check of flag polling.
    #[inline(always)]
    pub fn interrupt_requested(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    // =========================================================================
    // Trap channel
    // =========================================================================

    /// Arm the trap page: the next write or test poll faults.
    ///
    /// If an earlier recovery left the page protected, the restore is
    /// retried first and its `ProtectionFailed` is returned.
    pub fn invalidate_poll_page(&self) -> Result<(), SafepointError> {
        if self.restore_failed.load(Ordering::Acquire) {
            self.target.page.disarm()?;
            self.restore_failed.store(false, Ordering::Release);
        }
        self.target.page.arm()?;
        self.target.stats.record_arm();
        Ok(())
    }

    /// Disarm the trap page without waiting for a trap.
    pub fn restore_poll_page(&self) -> Result<(), SafepointError> {
        self.target.page.disarm()?;
        self.restore_failed.store(false, Ordering::Release);
        Ok(())
    }

    /// Whether the fault handler posted a trap since the region began.
    #[inline(always)]
    pub fn trap_pending(&self) -> bool {
        self.target.trap_pending()
    }

    /// Consume a posted trap.
    pub fn take_trap(&self) -> Option<TrapContext> {
        self.target.take_trap()
    }

    // =========================================================================
    // Protected regions
    // =========================================================================

    /// Run `body` as a protected region.
    ///
    /// Entering the region discards any trap posted before it. An `Err`
    /// from the body resolves the region as [`Resumption::Resumed`] and
    /// consumes the interrupt: the flag is cleared, the trap token dropped
    /// and the page made read/write again, so the next region starts clean.
    pub fn run_protected<T, F>(&self, body: F) -> Resumption<T>
    where
        F: FnOnce(&Self) -> Result<T, Interrupted>,
    {
        self.enter_region();

        match body(self) {
            Ok(value) => Resumption::Continued(value),
            Err(interrupted) => {
                self.recover(&interrupted);
                Resumption::Resumed(interrupted)
            }
        }
    }

    fn enter_region(&self) {
        self.target.clear_trap();
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.target.stats.record_region();
    }

    fn recover(&self, interrupted: &Interrupted) {
        self.flag.store(false, Ordering::Release);
        self.target.clear_trap();

        if self.target.page.state() != SafepointState::Enabled {
            if let Err(err) = self.target.page.disarm() {
                self.restore_failed.store(true, Ordering::Release);
                self.target.stats.record_restore_failure();
                eprintln!("[safepoint] {}", err);
            }
        }

        self.target.stats.record_recovery();

        #[cfg(debug_assertions)]
        eprintln!(
            "[safepoint] region {} resumed at cell ({}, {})",
            self.epoch(),
            interrupted.row,
            interrupted.col
        );
        #[cfg(not(debug_assertions))]
        let _ = interrupted;
    }
}

impl std::fmt::Debug for SafepointController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SafepointController")
            .field("page", &self.target.page)
            .field("slot", &self.slot)
            .field("flag", &self.interrupt_requested())
            .field("epoch", &self.epoch())
            .field("restore_failed", &self.restore_failed.load(Ordering::Relaxed))
            .finish()
    }
}

impl Drop for SafepointController {
    fn drop(&mut self) {
        handler::unregister(self.slot);
    }
}

// =============================================================================
// Tests
// =============================================================================
