//! "Touch the trap page without observable side effect".
//!
//! Test polling wants a load-class instruction that reaches memory, keeps
//! no result in a register and needs no branch. The exact instruction is
//! architecture-specific, so it sits behind [`PollProbe`]:
//!
//! | Target   | Probe            | Instruction                    |
//! |----------|------------------|--------------------------------|
//! | x86_64   | `TestProbe`      | `test dword ptr [reg], reg32`  |
//! | aarch64  | `LoadProbe`      | `ldr wzr, [reg]`               |
//! | other    | `VolatileProbe`  | volatile byte read             |

/// A way to touch the trap page.
pub trait PollProbe {
    /// Short name for reports.
    fn name(&self) -> &'static str;

    /// Access `addr` once, discarding whatever was read.
    ///
    /// # Safety
    ///
    /// `addr` must be mapped, or be an armed trap page whose fault the
    /// installed handler resolves.
    unsafe fn touch(&self, addr: *const u8);
}

/// Portable fallback: a volatile byte read whose value is dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct VolatileProbe;

impl PollProbe for VolatileProbe {
    fn name(&self) -> &'static str {
        "volatile-read"
    }

    #[inline(always)]
    unsafe fn touch(&self, addr: *const u8) {
        let _ = unsafe { std::ptr::read_volatile(addr) };
    }
}

/// `test` against the page: sets flags only.
#[cfg(target_arch = "x86_64")]
#[derive(Debug, Clone, Copy, Default)]
pub struct TestProbe;

#[cfg(target_arch = "x86_64")]
impl PollProbe for TestProbe {
    fn name(&self) -> &'static str {
        "test"
    }

    #[inline(always)]
    unsafe fn touch(&self, addr: *const u8) {
        // The address register doubles as the second operand.
        unsafe {
            std::arch::asm!(
                "test dword ptr [{page}], {page:e}",
                page = in(reg) addr,
                options(nostack, readonly),
            );
        }
    }
}

/// Load into the zero register: the value is architecturally discarded.
#[cfg(target_arch = "aarch64")]
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadProbe;

#[cfg(target_arch = "aarch64")]
impl PollProbe for LoadProbe {
    fn name(&self) -> &'static str {
        "ldr-wzr"
    }

    #[inline(always)]
    unsafe fn touch(&self, addr: *const u8) {
        unsafe {
            std::arch::asm!(
                "ldr wzr, [{page}]",
                page = in(reg) addr,
                options(nostack, readonly, preserves_flags),
            );
        }
    }
}

/// The best probe for the build target.
#[cfg(target_arch = "x86_64")]
pub type NativeProbe = TestProbe;

/// The best probe for the build target.
#[cfg(target_arch = "aarch64")]
pub type NativeProbe = LoadProbe;

/// The best probe for the build target.
#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
pub type NativeProbe = VolatileProbe;
