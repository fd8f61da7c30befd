//! Trap page management with mprotect-based arming.
//!
//! The trap page is a single OS page that polling loops store to or test.
//! Arming revokes all access (PROT_NONE), so the next poll faults and the
//! handler gets control.
//!
//! # Usage
//!
//! ```ignore
//! let page = TrapPage::new()?;
//!
//! // Arm (next poll traps)
//! page.arm()?;
//!
//! // ... fault handler restores access ...
//!
//! // Back to normal
//! page.disarm()?;
//! ```

use std::io;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};

#[cfg(unix)]
use libc::{
    MAP_ANONYMOUS, MAP_PRIVATE, PROT_NONE, PROT_READ, PROT_WRITE, c_void, mmap, mprotect, munmap,
};

#[cfg(windows)]
use windows_sys::Win32::System::Memory::{
    MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_NOACCESS, PAGE_READWRITE, VirtualAlloc, VirtualFree,
    VirtualProtect,
};

// =============================================================================
// SafepointState
// =============================================================================

/// State of the trap page.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafepointState {
    /// Normal operation - page is read/write, polls succeed.
    Enabled = 0,
    /// Interrupt requested - page is protected, the next poll traps.
    Armed = 1,
    /// A poll trapped; the handler already restored access.
    Triggered = 2,
}

impl SafepointState {
    /// Convert from raw u32 value.
    #[inline]
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(SafepointState::Enabled),
            1 => Some(SafepointState::Armed),
            2 => Some(SafepointState::Triggered),
            _ => None,
        }
    }
}

/// Protection mode of the trap page as seen by polling code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageProtection {
    /// Loads and stores succeed.
    ReadWrite,
    /// Any access faults.
    NoAccess,
}

// =============================================================================
// SafepointError
// =============================================================================

/// Error types for trap page operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SafepointError {
    /// Failed to map the trap page.
    AllocationFailed(String),
    /// Failed to change page protection.
    ProtectionFailed(String),
    /// Invalid state transition.
    InvalidState(SafepointState, SafepointState),
}

impl std::fmt::Display for SafepointError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SafepointError::AllocationFailed(msg) => {
                write!(f, "error creating poll page: {}", msg)
            }
            SafepointError::ProtectionFailed(msg) => {
                write!(f, "poll page protection change failed: {}", msg)
            }
            SafepointError::InvalidState(from, to) => {
                write!(
                    f,
                    "invalid poll page state transition: {:?} -> {:?}",
                    from, to
                )
            }
        }
    }
}

impl std::error::Error for SafepointError {}

// =============================================================================
// TrapPage
// =============================================================================

/// A single OS page used as the interruption signal for polling loops.
///
/// Only its protection matters; the contents are scratch space for
/// write polls.
pub struct TrapPage {
    /// Page base address.
    base: NonNull<u8>,

    /// Current [`SafepointState`] as raw u32.
    state: AtomicU32,

    /// OS page size (cached, also the mapping length).
    page_size: usize,
}

// Safety: the page is only reached through its address and atomics.
unsafe impl Send for TrapPage {}
unsafe impl Sync for TrapPage {}

impl TrapPage {
    /// Map a fresh read/write trap page.
    pub fn new() -> Result<Self, SafepointError> {
        let page_size = Self::get_page_size();
        let base = Self::allocate_page(page_size)?;

        Ok(TrapPage {
            base,
            state: AtomicU32::new(SafepointState::Enabled as u32),
            page_size,
        })
    }

    /// Address polled by the loops.
    #[inline]
    pub fn poll_address(&self) -> usize {
        self.base.as_ptr() as usize
    }

    /// Raw pointer to the start of the page.
    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    /// Size of the mapping in bytes.
    #[inline]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Get the current state.
    #[inline]
    pub fn state(&self) -> SafepointState {
        let raw = self.state.load(Ordering::Acquire);
        SafepointState::from_u32(raw).unwrap_or(SafepointState::Enabled)
    }

    /// Current protection mode.
    #[inline]
    pub fn protection(&self) -> PageProtection {
        match self.state() {
            SafepointState::Armed => PageProtection::NoAccess,
            SafepointState::Enabled | SafepointState::Triggered => PageProtection::ReadWrite,
        }
    }

    /// Check if the page is currently armed.
    #[inline]
    pub fn is_armed(&self) -> bool {
        self.state.load(Ordering::Acquire) == SafepointState::Armed as u32
    }

    /// Arm the page: revoke all access so the next poll traps.
    pub fn arm(&self) -> Result<(), SafepointError> {
        // Transition: Enabled -> Armed
        if let Err(raw) = self.state.compare_exchange(
            SafepointState::Enabled as u32,
            SafepointState::Armed as u32,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            let current = SafepointState::from_u32(raw).unwrap_or(SafepointState::Enabled);
            return Err(SafepointError::InvalidState(current, SafepointState::Armed));
        }

        if let Err(err) = self.protect_page(false) {
            self.state
                .store(SafepointState::Enabled as u32, Ordering::Release);
            return Err(err);
        }
        Ok(())
    }

    /// Disarm the page: restore read/write access.
    ///
    /// Valid from every state.
    pub fn disarm(&self) -> Result<(), SafepointError> {
        // Access first, then publish the state.
        self.protect_page(true)?;
        self.state
            .store(SafepointState::Enabled as u32, Ordering::Release);
        Ok(())
    }

    /// Restore access from inside the fault handler.
    ///
    /// Async-signal-safe: one syscall and an atomic store, no allocation.
    /// Returns `false` if the protection change failed.
    pub(crate) fn restore_after_trap(&self) -> bool {
        if !self.set_protection_raw(true) {
            return false;
        }
        self.state
            .store(SafepointState::Triggered as u32, Ordering::Release);
        true
    }

    /// Check if an address is within the page.
    #[inline]
    pub fn contains_address(&self, addr: usize) -> bool {
        let base = self.poll_address();
        addr >= base && addr < base + self.page_size
    }

    fn protect_page(&self, accessible: bool) -> Result<(), SafepointError> {
        if self.set_protection_raw(accessible) {
            Ok(())
        } else {
            Err(SafepointError::ProtectionFailed(
                io::Error::last_os_error().to_string(),
            ))
        }
    }

    // =========================================================================
    // Platform-specific implementation
    // =========================================================================

    #[cfg(unix)]
    fn allocate_page(page_size: usize) -> Result<NonNull<u8>, SafepointError> {
        let ptr = unsafe {
            mmap(
                std::ptr::null_mut(),
                page_size,
                PROT_READ | PROT_WRITE,
                MAP_PRIVATE | MAP_ANONYMOUS,
                -1,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            return Err(SafepointError::AllocationFailed(
                io::Error::last_os_error().to_string(),
            ));
        }

        NonNull::new(ptr as *mut u8)
            .ok_or_else(|| SafepointError::AllocationFailed("mmap returned null".to_string()))
    }

    #[cfg(windows)]
    fn allocate_page(page_size: usize) -> Result<NonNull<u8>, SafepointError> {
        let ptr = unsafe {
            VirtualAlloc(
                std::ptr::null(),
                page_size,
                MEM_RESERVE | MEM_COMMIT,
                PAGE_READWRITE,
            )
        };

        if ptr.is_null() {
            return Err(SafepointError::AllocationFailed(
                io::Error::last_os_error().to_string(),
            ));
        }

        NonNull::new(ptr as *mut u8).ok_or_else(|| {
            SafepointError::AllocationFailed("VirtualAlloc returned null".to_string())
        })
    }

    #[cfg(not(any(unix, windows)))]
    fn allocate_page(_page_size: usize) -> Result<NonNull<u8>, SafepointError> {
        Err(SafepointError::AllocationFailed(
            "page protection is not supported on this platform".to_string(),
        ))
    }

    #[cfg(unix)]
    fn set_protection_raw(&self, accessible: bool) -> bool {
        let prot = if accessible {
            PROT_READ | PROT_WRITE
        } else {
            PROT_NONE
        };
        unsafe { mprotect(self.base.as_ptr() as *mut c_void, self.page_size, prot) == 0 }
    }

    #[cfg(windows)]
    fn set_protection_raw(&self, accessible: bool) -> bool {
        let protect = if accessible {
            PAGE_READWRITE
        } else {
            PAGE_NOACCESS
        };
        let mut old_protect = 0;
        unsafe {
            VirtualProtect(
                self.base.as_ptr() as *const _,
                self.page_size,
                protect,
                &mut old_protect,
            ) != 0
        }
    }

    #[cfg(not(any(unix, windows)))]
    fn set_protection_raw(&self, _accessible: bool) -> bool {
        false
    }

    #[cfg(unix)]
    fn get_page_size() -> usize {
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size > 0 { size as usize } else { 4096 }
    }

    #[cfg(windows)]
    fn get_page_size() -> usize {
        use windows_sys::Win32::System::SystemInformation::{GetSystemInfo, SYSTEM_INFO};
        unsafe {
            let mut info: SYSTEM_INFO = std::mem::zeroed();
            GetSystemInfo(&mut info);
            info.dwPageSize as usize
        }
    }

    #[cfg(not(any(unix, windows)))]
    fn get_page_size() -> usize {
        4096
    }
}

impl std::fmt::Debug for TrapPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrapPage")
            .field("base", &format_args!("{:#x}", self.poll_address()))
            .field("state", &self.state())
            .field("page_size", &self.page_size)
            .finish()
    }
}

impl Drop for TrapPage {
    fn drop(&mut self) {
        #[cfg(unix)]
        unsafe {
            munmap(self.base.as_ptr() as *mut c_void, self.page_size);
        }

        #[cfg(windows)]
        unsafe {
            VirtualFree(self.base.as_ptr() as *mut _, 0, MEM_RELEASE);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
