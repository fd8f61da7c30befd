//! Counters for safepoint activity.
//!
//! Every counter is a relaxed atomic so the fault handler can bump
//! `traps` without locking or allocating.

use std::sync::atomic::{AtomicU64, Ordering};

// =============================================================================
// SafepointStats
// =============================================================================

/// Statistics for one controller.
#[derive(Debug)]
pub struct SafepointStats {
    /// Protected regions entered.
    regions_entered: AtomicU64,

    /// Regions that resolved on the recovery path.
    recoveries: AtomicU64,

    /// Explicit flag interrupts requested.
    flag_requests: AtomicU64,

    /// Times the trap page was armed.
    page_arms: AtomicU64,

    /// Protection faults handled on the trap page.
    traps: AtomicU64,

    /// Recoveries that could not make the page read/write again.
    restore_failures: AtomicU64,
}

impl SafepointStats {
    /// Create new zeroed statistics.
    pub const fn new() -> Self {
        SafepointStats {
            regions_entered: AtomicU64::new(0),
            recoveries: AtomicU64::new(0),
            flag_requests: AtomicU64::new(0),
            page_arms: AtomicU64::new(0),
            traps: AtomicU64::new(0),
            restore_failures: AtomicU64::new(0),
        }
    }

    #[inline]
    pub(crate) fn record_region(&self) {
        self.regions_entered.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_recovery(&self) {
        self.recoveries.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_flag_request(&self) {
        self.flag_requests.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_arm(&self) {
        self.page_arms.fetch_add(1, Ordering::Relaxed);
    }

    /// Called from the fault handler.
    #[inline]
    pub(crate) fn record_trap(&self) {
        self.traps.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_restore_failure(&self) {
        self.restore_failures.fetch_add(1, Ordering::Relaxed);
    }

    // =========================================================================
    // Getters
    // =========================================================================

    /// Protected regions entered.
    #[inline]
    pub fn regions_entered(&self) -> u64 {
        self.regions_entered.load(Ordering::Relaxed)
    }

    /// Regions that took the recovery path.
    #[inline]
    pub fn recoveries(&self) -> u64 {
        self.recoveries.load(Ordering::Relaxed)
    }

    /// Explicit flag interrupts requested.
    #[inline]
    pub fn flag_requests(&self) -> u64 {
        self.flag_requests.load(Ordering::Relaxed)
    }

    /// Times the trap page was armed.
    #[inline]
    pub fn page_arms(&self) -> u64 {
        self.page_arms.load(Ordering::Relaxed)
    }

    /// Protection faults handled.
    #[inline]
    pub fn traps(&self) -> u64 {
        self.traps.load(Ordering::Relaxed)
    }

    /// Recoveries that left the page protected.
    #[inline]
    pub fn restore_failures(&self) -> u64 {
        self.restore_failures.load(Ordering::Relaxed)
    }

    /// Reset all counters.
    pub fn reset(&self) {
        self.regions_entered.store(0, Ordering::Relaxed);
        self.recoveries.store(0, Ordering::Relaxed);
        self.flag_requests.store(0, Ordering::Relaxed);
        self.page_arms.store(0, Ordering::Relaxed);
        self.traps.store(0, Ordering::Relaxed);
        self.restore_failures.store(0, Ordering::Relaxed);
    }
}

impl Default for SafepointStats {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for SafepointStats {
    fn clone(&self) -> Self {
        SafepointStats {
            regions_entered: AtomicU64::new(self.regions_entered()),
            recoveries: AtomicU64::new(self.recoveries()),
            flag_requests: AtomicU64::new(self.flag_requests()),
            page_arms: AtomicU64::new(self.page_arms()),
            traps: AtomicU64::new(self.traps()),
            restore_failures: AtomicU64::new(self.restore_failures()),
        }
    }
}

// =============================================================================
// Display Implementation
// =============================================================================

impl std::fmt::Display for SafepointStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Safepoint Statistics:")?;
        writeln!(f, "  Regions Entered: {}", self.regions_entered())?;
        writeln!(f, "  Recoveries:      {}", self.recoveries())?;
        writeln!(f, "  Flag Requests:   {}", self.flag_requests())?;
        writeln!(f, "  Page Arms:       {}", self.page_arms())?;
        writeln!(f, "  Traps Handled:   {}", self.traps())?;
        if self.restore_failures() > 0 {
            writeln!(f, "  Restore Failures: {}", self.restore_failures())?;
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_new() {
        let stats = SafepointStats::new();
        assert_eq!(stats.regions_entered(), 0);
        assert_eq!(stats.recoveries(), 0);
        assert_eq!(stats.flag_requests(), 0);
        assert_eq!(stats.page_arms(), 0);
        assert_eq!(stats.traps(), 0);
        assert_eq!(stats.restore_failures(), 0);
    }

    #[test]
    fn test_stats_counters() {
        let stats = SafepointStats::new();
        stats.record_region();
        stats.record_region();
        stats.record_recovery();
        stats.record_flag_request();
        stats.record_arm();
        stats.record_trap();

        assert_eq!(stats.regions_entered(), 2);
        assert_eq!(stats.recoveries(), 1);
        assert_eq!(stats.flag_requests(), 1);
        assert_eq!(stats.page_arms(), 1);
        assert_eq!(stats.traps(), 1);
    }

    #[test]
    fn test_stats_reset() {
        let stats = SafepointStats::new();
        stats.record_region();
        stats.record_trap();
        stats.reset();

        assert_eq!(stats.regions_entered(), 0);
        assert_eq!(stats.traps(), 0);
    }

    #[test]
    fn test_stats_clone() {
        let stats = SafepointStats::new();
        stats.record_arm();
        stats.record_arm();

        let cloned = stats.clone();
        assert_eq!(cloned.page_arms(), 2);
    }

    #[test]
    fn test_stats_display() {
        let stats = SafepointStats::new();
        stats.record_trap();

        let display = format!("{}", stats);
        assert!(display.contains("Safepoint Statistics"));
        assert!(display.contains("Traps Handled:   1"));
        assert!(!display.contains("Restore Failures"));

        stats.record_restore_failure();
        assert!(format!("{}", stats).contains("Restore Failures: 1"));
    }
}
