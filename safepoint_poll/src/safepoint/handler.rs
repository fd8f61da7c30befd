//! Signal/exception handler for trap-page faults.
//!
//! When a trap page is armed (PROT_NONE), a poll against it raises a memory
//! access violation. The handler restores access, posts the owning
//! controller's trap token and returns, so the faulting instruction simply
//! re-executes. Loops observe the token at their next cell boundary.
//!
//! # Platform Support
//!
//! | Platform | Mechanism |
//! |----------|-----------|
//! | Linux    | SIGSEGV via sigaction |
//! | macOS    | SIGBUS via sigaction |
//! | Windows  | VEH (Vectored Exception Handler) |
//!
//! Faults on addresses that are not a registered trap page go to whatever
//! handler was installed before ours (the Rust runtime's stack-overflow
//! handler, typically), or to the default action.

use std::ptr;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};

use super::MAX_TRAP_PAGES;
use super::page::TrapPage;
use super::stats::SafepointStats;

// =============================================================================
// TrapContext
// =============================================================================

/// Where a trap happened.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrapContext {
    /// Address the poll touched.
    pub fault_addr: usize,
    /// Faulting instruction address, 0 where the platform context is not decoded.
    pub pc: usize,
}

impl TrapContext {
    /// Create a new trap context.
    pub fn new(fault_addr: usize, pc: usize) -> Self {
        TrapContext { fault_addr, pc }
    }
}

// =============================================================================
// HandlerError
// =============================================================================

/// Error types for handler operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// Failed to install the handler.
    InstallFailed(String),
    /// Every registry slot is taken.
    RegistryFull,
    /// Platform not supported.
    UnsupportedPlatform,
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandlerError::InstallFailed(msg) => {
                write!(f, "error setting up protection fault handler: {}", msg)
            }
            HandlerError::RegistryFull => write!(
                f,
                "too many live poll pages (limit {})",
                MAX_TRAP_PAGES
            ),
            HandlerError::UnsupportedPlatform => write!(f, "platform not supported"),
        }
    }
}

impl std::error::Error for HandlerError {}

// =============================================================================
// TrapTarget
// =============================================================================

/// The part of a controller the fault handler is allowed to touch.
///
/// Lives in a `Box` owned by the controller so its address is stable for
/// the registry.
pub(crate) struct TrapTarget {
    pub(crate) page: TrapPage,
    pub(crate) stats: SafepointStats,
    token: AtomicBool,
    fault_addr: AtomicUsize,
    fault_pc: AtomicUsize,
}

impl TrapTarget {
    pub(crate) fn new(page: TrapPage) -> Self {
        TrapTarget {
            page,
            stats: SafepointStats::new(),
            token: AtomicBool::new(false),
            fault_addr: AtomicUsize::new(0),
            fault_pc: AtomicUsize::new(0),
        }
    }

    /// Runs inside the fault handler: atomics and one mprotect only.
    fn on_trap(&self, context: &TrapContext) -> bool {
        if !self.page.restore_after_trap() {
            return false;
        }
        self.fault_addr.store(context.fault_addr, Ordering::Relaxed);
        self.fault_pc.store(context.pc, Ordering::Relaxed);
        self.token.store(true, Ordering::Release);
        self.stats.record_trap();
        true
    }

    #[inline]
    pub(crate) fn trap_pending(&self) -> bool {
        self.token.load(Ordering::Acquire)
    }

    /// Consume the trap token.
    pub(crate) fn take_trap(&self) -> Option<TrapContext> {
        if !self.token.swap(false, Ordering::AcqRel) {
            return None;
        }
        Some(TrapContext::new(
            self.fault_addr.load(Ordering::Relaxed),
            self.fault_pc.load(Ordering::Relaxed),
        ))
    }

    #[inline]
    pub(crate) fn clear_trap(&self) {
        self.token.store(false, Ordering::Release);
    }
}

// =============================================================================
// Registry
// =============================================================================

/// One live trap page. `base == 0` means the slot is not routable.
struct RegistrySlot {
    base: AtomicUsize,
    len: AtomicUsize,
    target: AtomicPtr<TrapTarget>,
}

impl RegistrySlot {
    const fn new() -> Self {
        RegistrySlot {
            base: AtomicUsize::new(0),
            len: AtomicUsize::new(0),
            target: AtomicPtr::new(ptr::null_mut()),
        }
    }
}

static REGISTRY: [RegistrySlot; MAX_TRAP_PAGES] = [const { RegistrySlot::new() }; MAX_TRAP_PAGES];

/// Make a target's page routable for the fault handler.
///
/// The target must stay at the same address until [`unregister`] is called.
pub(crate) fn register(target: &TrapTarget) -> Result<usize, HandlerError> {
    let raw = target as *const TrapTarget as *mut TrapTarget;
    for (index, slot) in REGISTRY.iter().enumerate() {
        if slot
            .target
            .compare_exchange(ptr::null_mut(), raw, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            slot.len.store(target.page.page_size(), Ordering::Relaxed);
            slot.base
                .store(target.page.poll_address(), Ordering::Release);
            return Ok(index);
        }
    }
    Err(HandlerError::RegistryFull)
}

/// Release a registry slot.
pub(crate) fn unregister(index: usize) {
    let slot = &REGISTRY[index];
    slot.base.store(0, Ordering::Release);
    slot.target.store(ptr::null_mut(), Ordering::Release);
}

/// Find the target whose page contains `addr`.
///
/// Compares addresses before dereferencing anything, so slots owned by
/// other threads are never touched unless the fault is on their page.
fn find_target(addr: usize) -> *const TrapTarget {
    for slot in REGISTRY.iter() {
        let base = slot.base.load(Ordering::Acquire);
        if base == 0 {
            continue;
        }
        let len = slot.len.load(Ordering::Relaxed);
        if addr >= base && addr < base + len {
            return slot.target.load(Ordering::Acquire);
        }
    }
    ptr::null()
}

/// Check if an address is within any live trap page.
#[inline]
pub fn is_trap_address(addr: usize) -> bool {
    !find_target(addr).is_null()
}

/// Route a fault to its controller. Returns `false` if it is not ours.
fn dispatch_trap(context: &TrapContext) -> bool {
    let target = find_target(context.fault_addr);
    if target.is_null() {
        return false;
    }
    // Safety: registered targets outlive their slot.
    unsafe { (*target).on_trap(context) }
}

// =============================================================================
// Installation
// =============================================================================

static INSTALLED: OnceLock<Result<(), HandlerError>> = OnceLock::new();

/// Install the process-wide fault handler.
///
/// Idempotent: the first call installs, later calls return its result.
/// Must succeed before any trap page is armed.
pub fn install_handler() -> Result<(), HandlerError> {
    INSTALLED.get_or_init(install_platform_handler).clone()
}

// =============================================================================
// Unix Signal Handler
// =============================================================================

/// Disposition that was in place before ours.
#[cfg(unix)]
struct PreviousAction {
    handler: AtomicUsize,
    flags: AtomicUsize,
}

#[cfg(unix)]
impl PreviousAction {
    const fn new() -> Self {
        PreviousAction {
            handler: AtomicUsize::new(libc::SIG_DFL),
            flags: AtomicUsize::new(0),
        }
    }
}

#[cfg(unix)]
static PREVIOUS_SEGV: PreviousAction = PreviousAction::new();

#[cfg(unix)]
static PREVIOUS_BUS: PreviousAction = PreviousAction::new();

#[cfg(unix)]
type SigactionFn = extern "C" fn(libc::c_int, *mut libc::siginfo_t, *mut libc::c_void);

#[cfg(unix)]
fn install_platform_handler() -> Result<(), HandlerError> {
    // Linux reports protection faults as SIGSEGV, macOS as SIGBUS.
    for (signal, previous) in [
        (libc::SIGSEGV, &PREVIOUS_SEGV),
        (libc::SIGBUS, &PREVIOUS_BUS),
    ] {
        unsafe {
            let mut old: libc::sigaction = std::mem::zeroed();
            if libc::sigaction(signal, ptr::null(), &mut old) != 0 {
                return Err(HandlerError::InstallFailed(
                    std::io::Error::last_os_error().to_string(),
                ));
            }
            previous.flags.store(old.sa_flags as usize, Ordering::Release);
            previous.handler.store(old.sa_sigaction, Ordering::Release);

            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = trap_signal_handler as SigactionFn as libc::sighandler_t;
            action.sa_flags = libc::SA_SIGINFO | libc::SA_ONSTACK;
            libc::sigemptyset(&mut action.sa_mask);

            if libc::sigaction(signal, &action, ptr::null_mut()) != 0 {
                return Err(HandlerError::InstallFailed(
                    std::io::Error::last_os_error().to_string(),
                ));
            }
        }
    }

    Ok(())
}

#[cfg(unix)]
extern "C" fn trap_signal_handler(
    sig: libc::c_int,
    info: *mut libc::siginfo_t,
    context: *mut libc::c_void,
) {
    let fault_addr = unsafe { (*info).si_addr() as usize };
    let trap = TrapContext::new(fault_addr, unsafe { context_pc(context) });

    if dispatch_trap(&trap) {
        // Returning re-executes the poll against the restored page.
        return;
    }

    unsafe { chain_previous(sig, info, context) };
}

/// Hand a foreign fault to the previous disposition.
#[cfg(unix)]
unsafe fn chain_previous(sig: libc::c_int, info: *mut libc::siginfo_t, context: *mut libc::c_void) {
    let previous = if sig == libc::SIGBUS {
        &PREVIOUS_BUS
    } else {
        &PREVIOUS_SEGV
    };
    let handler = previous.handler.load(Ordering::Acquire);
    let flags = previous.flags.load(Ordering::Acquire) as libc::c_int;

    if handler == libc::SIG_DFL || handler == libc::SIG_IGN {
        // The access faults again under the default action.
        unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = libc::SIG_DFL;
            libc::sigaction(sig, &action, ptr::null_mut());
        }
        return;
    }

    if flags & libc::SA_SIGINFO != 0 {
        let action: SigactionFn = unsafe { std::mem::transmute::<usize, SigactionFn>(handler) };
        action(sig, info, context);
    } else {
        let action: extern "C" fn(libc::c_int) =
            unsafe { std::mem::transmute::<usize, extern "C" fn(libc::c_int)>(handler) };
        action(sig);
    }
}

#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
unsafe fn context_pc(context: *mut libc::c_void) -> usize {
    let uc = context as *const libc::ucontext_t;
    unsafe { (*uc).uc_mcontext.gregs[libc::REG_RIP as usize] as usize }
}

#[cfg(all(target_os = "linux", target_arch = "aarch64"))]
unsafe fn context_pc(context: *mut libc::c_void) -> usize {
    let uc = context as *const libc::ucontext_t;
    unsafe { (*uc).uc_mcontext.pc as usize }
}

#[cfg(all(target_os = "macos", target_arch = "x86_64"))]
unsafe fn context_pc(context: *mut libc::c_void) -> usize {
    let uc = context as *const libc::ucontext_t;
    unsafe { (*(*uc).uc_mcontext).__ss.__rip as usize }
}

#[cfg(all(target_os = "macos", target_arch = "aarch64"))]
unsafe fn context_pc(context: *mut libc::c_void) -> usize {
    let uc = context as *const libc::ucontext_t;
    unsafe { (*(*uc).uc_mcontext).__ss.__pc as usize }
}

#[cfg(all(
    unix,
    not(any(
        all(
            target_os = "linux",
            any(target_arch = "x86_64", target_arch = "aarch64")
        ),
        all(
            target_os = "macos",
            any(target_arch = "x86_64", target_arch = "aarch64")
        ),
    ))
))]
unsafe fn context_pc(_context: *mut libc::c_void) -> usize {
    0
}

// =============================================================================
// Windows Vectored Exception Handler
// =============================================================================

#[cfg(windows)]
#[allow(non_camel_case_types)]
type PVECTORED_EXCEPTION_HANDLER =
    Option<unsafe extern "system" fn(*mut EXCEPTION_POINTERS) -> i32>;

#[cfg(windows)]
#[link(name = "kernel32")]
unsafe extern "system" {
    fn AddVectoredExceptionHandler(
        first: u32,
        handler: PVECTORED_EXCEPTION_HANDLER,
    ) -> *mut std::ffi::c_void;
}

#[cfg(windows)]
#[repr(C)]
#[allow(non_snake_case)]
struct EXCEPTION_POINTERS {
    ExceptionRecord: *mut EXCEPTION_RECORD,
    ContextRecord: *mut std::ffi::c_void,
}

#[cfg(windows)]
#[repr(C)]
#[allow(non_snake_case)]
struct EXCEPTION_RECORD {
    ExceptionCode: i32, // NTSTATUS is signed
    ExceptionFlags: u32,
    ExceptionRecord: *mut EXCEPTION_RECORD,
    ExceptionAddress: *mut std::ffi::c_void,
    NumberParameters: u32,
    ExceptionInformation: [usize; 15],
}

#[cfg(windows)]
fn install_platform_handler() -> Result<(), HandlerError> {
    let handle = unsafe { AddVectoredExceptionHandler(1, Some(vectored_exception_handler)) };
    if handle.is_null() {
        return Err(HandlerError::InstallFailed(
            "AddVectoredExceptionHandler failed".to_string(),
        ));
    }
    Ok(())
}

#[cfg(windows)]
unsafe extern "system" fn vectored_exception_handler(
    exception_info: *mut EXCEPTION_POINTERS,
) -> i32 {
    const EXCEPTION_ACCESS_VIOLATION: i32 = 0xC0000005u32 as i32;
    const EXCEPTION_CONTINUE_EXECUTION: i32 = -1;
    const EXCEPTION_CONTINUE_SEARCH: i32 = 0;

    // SAFETY: exception_info is provided by Windows and is valid
    let record = unsafe { (*exception_info).ExceptionRecord };

    if unsafe { (*record).ExceptionCode } != EXCEPTION_ACCESS_VIOLATION {
        return EXCEPTION_CONTINUE_SEARCH;
    }

    // Second parameter of an access violation is the data address.
    let trap = unsafe {
        TrapContext::new(
            (*record).ExceptionInformation[1],
            (*record).ExceptionAddress as usize,
        )
    };

    if dispatch_trap(&trap) {
        EXCEPTION_CONTINUE_EXECUTION
    } else {
        EXCEPTION_CONTINUE_SEARCH
    }
}

#[cfg(not(any(unix, windows)))]
fn install_platform_handler() -> Result<(), HandlerError> {
    Err(HandlerError::UnsupportedPlatform)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trap_context_creation() {
        let ctx = TrapContext::new(0x1000, 0x2000);
        assert_eq!(ctx.fault_addr, 0x1000);
        assert_eq!(ctx.pc, 0x2000);
    }

    #[test]
    fn test_null_is_not_trap_address() {
        assert!(!is_trap_address(0));
        assert!(!is_trap_address(0x10));
    }

    #[test]
    fn test_register_unregister_routes_page() {
        let target = Box::new(TrapTarget::new(TrapPage::new().expect("page")));
        let base = target.page.poll_address();
        let len = target.page.page_size();

        assert!(!is_trap_address(base));

        let slot = register(&target).expect("register");
        assert!(is_trap_address(base));
        assert!(is_trap_address(base + len - 1));
        assert!(!is_trap_address(base + len));
        assert_eq!(find_target(base), &*target as *const TrapTarget);

        unregister(slot);
        assert!(!is_trap_address(base));
    }

    #[test]
    fn test_dispatch_posts_token() {
        let target = Box::new(TrapTarget::new(TrapPage::new().expect("page")));
        let slot = register(&target).expect("register");
        target.page.arm().expect("arm");

        let addr = target.page.poll_address();
        assert!(dispatch_trap(&TrapContext::new(addr + 8, 0x4242)));

        assert!(target.trap_pending());
        assert!(!target.page.is_armed());
        assert_eq!(target.stats.traps(), 1);
        assert_eq!(target.take_trap(), Some(TrapContext::new(addr + 8, 0x4242)));
        assert!(!target.trap_pending());
        assert_eq!(target.take_trap(), None);

        unregister(slot);
    }

    #[test]
    fn test_dispatch_ignores_foreign_address() {
        assert!(!dispatch_trap(&TrapContext::new(0x8, 0)));
    }

    #[test]
    fn test_install_handler_is_idempotent() {
        assert_eq!(install_handler(), Ok(()));
        assert_eq!(install_handler(), Ok(()));
    }

    #[test]
    fn test_real_fault_is_recovered() {
        install_handler().expect("install");
        let target = Box::new(TrapTarget::new(TrapPage::new().expect("page")));
        let slot = register(&target).expect("register");
        target.page.arm().expect("arm");

        let addr = target.page.poll_address();
        // Faults, the handler restores access, the load re-executes.
        let value = unsafe { std::ptr::read_volatile(addr as *const u8) };
        assert_eq!(value, 0);

        let trap = target.take_trap().expect("trap token");
        assert_eq!(trap.fault_addr, addr);
        assert_eq!(target.stats.traps(), 1);

        unregister(slot);
    }

    #[test]
    fn test_handler_error_display() {
        assert_eq!(
            HandlerError::UnsupportedPlatform.to_string(),
            "platform not supported"
        );
        assert!(
            HandlerError::InstallFailed("EINVAL".to_string())
                .to_string()
                .contains("EINVAL")
        );
        assert!(HandlerError::RegistryFull.to_string().contains("64"));
    }
}
