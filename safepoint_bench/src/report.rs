//! Diagnostic lines for the demonstration.
//!
//! Everything goes to one sink (stderr in the binary, a buffer in tests).
//! The text is for people; nothing parses it.

use std::io::{self, Write};
use std::time::Duration;

use safepoint_poll::{SafepointStats, Variant};

use crate::harness::BenchReport;

/// Writes the harness's progress lines.
pub struct Reporter<W: Write> {
    out: W,
}

impl Reporter<io::Stderr> {
    /// Reporter on the process's standard error.
    pub fn stderr() -> Self {
        Reporter::new(io::stderr())
    }
}

impl<W: Write> Reporter<W> {
    /// Reporter on an arbitrary sink.
    pub fn new(out: W) -> Self {
        Reporter { out }
    }

    /// Give back the sink.
    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }

    /// Address of the freshly mapped trap page.
    pub fn page_installed(&mut self, addr: usize) {
        self.line(format_args!("poll page installed to {:#x}", addr));
    }

    /// Announce a clean run.
    pub fn phase(&mut self, variant: Variant) {
        self.line(format_args!("{}", variant.name()));
    }

    /// Announce a run that is expected to be interrupted.
    pub fn interrupted_phase(&mut self, variant: Variant) {
        self.line(format_args!("{} interrupted", variant.name()));
    }

    /// Wall time of a clean run.
    pub fn elapsed(&mut self, elapsed: Duration) {
        self.line(format_args!("time: {:.6}s", elapsed.as_secs_f64()));
    }

    /// The trap page is about to be armed.
    pub fn invalidating(&mut self) {
        self.line(format_args!("invalidating poll page"));
    }

    /// Recovery-path notice. Silent for loops without a recovery path.
    pub fn recovered(&mut self, variant: Variant) {
        if let Some(notice) = recovery_notice(variant) {
            self.line(format_args!("{}", notice));
        }
    }

    /// The armed run finished without reaching a poll that stops it.
    pub fn not_interrupted(&mut self, variant: Variant) {
        self.line(format_args!("{} was not interrupted", variant.name()));
    }

    /// Controller statistics block.
    pub fn stats(&mut self, stats: &SafepointStats) {
        let _ = write!(self.out, "{}", stats);
    }

    /// One line per variant: clean time and where the armed run stopped.
    pub fn summary(&mut self, report: &BenchReport) {
        self.line(format_args!(
            "summary: {}x{} operands, poll page {:#x}",
            report.size, report.size, report.page_address
        ));
        for r in &report.variants {
            let clean = match r.clean {
                Some(t) => format!("{:.6}s", t.as_secs_f64()),
                None => "-".to_string(),
            };
            match r.interruption {
                Some(stop) => {
                    let (row, col) = stop.cell();
                    self.line(format_args!(
                        "  {:<32} clean {}  stopped at ({}, {}) after {} cells",
                        r.variant.name(),
                        clean,
                        row,
                        col,
                        stop.completed_cells
                    ))
                }
                None => self.line(format_args!("  {:<32} clean {}", r.variant.name(), clean)),
            }
        }
    }

    fn line(&mut self, args: std::fmt::Arguments<'_>) {
        // Diagnostics only: a closed stderr must not stop the run.
        let _ = writeln!(self.out, "{}", args);
    }
}

/// Text printed when a variant takes the recovery path.
///
/// `None` for the uninterruptible loop, which never polls.
pub fn recovery_notice(variant: Variant) -> Option<&'static str> {
    match variant {
        Variant::Uninterruptible => None,
        Variant::Flag => Some("flag interrupted!"),
        Variant::Write => Some("write protection interrupted!"),
        Variant::Test => Some("test protection interrupted!"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(f: impl FnOnce(&mut Reporter<Vec<u8>>)) -> String {
        let mut reporter = Reporter::new(Vec::new());
        f(&mut reporter);
        String::from_utf8(reporter.into_inner()).expect("utf8")
    }

    #[test]
    fn test_page_installed_line() {
        let out = render(|r| r.page_installed(0x7f00_0000_1000));
        assert_eq!(out, "poll page installed to 0x7f0000001000\n");
    }

    #[test]
    fn test_elapsed_has_six_decimals() {
        let out = render(|r| r.elapsed(Duration::from_millis(1500)));
        assert_eq!(out, "time: 1.500000s\n");
    }

    #[test]
    fn test_phase_lines() {
        let out = render(|r| {
            r.phase(Variant::Write);
            r.invalidating();
            r.interrupted_phase(Variant::Write);
            r.recovered(Variant::Write);
        });
        assert_eq!(
            out,
            "write_matrix_multiply\n\
             invalidating poll page\n\
             write_matrix_multiply interrupted\n\
             write protection interrupted!\n"
        );
    }

    #[test]
    fn test_recovery_notices() {
        assert_eq!(recovery_notice(Variant::Flag), Some("flag interrupted!"));
        assert_eq!(
            recovery_notice(Variant::Test),
            Some("test protection interrupted!")
        );
        for variant in Variant::ALL {
            assert_eq!(recovery_notice(variant).is_some(), variant.is_interruptible());
        }
    }

    #[test]
    fn test_uninterruptible_has_no_recovery_line() {
        let out = render(|r| r.recovered(Variant::Uninterruptible));
        assert!(out.is_empty());
    }

    #[test]
    fn test_summary_lines() {
        use crate::harness::VariantReport;

        let report = BenchReport {
            page_address: 0x1000,
            size: 2,
            variants: vec![VariantReport {
                variant: Variant::Uninterruptible,
                clean: Some(Duration::from_millis(250)),
                interruption: None,
            }],
        };
        let out = render(|r| r.summary(&report));
        let mut lines = out.lines();
        assert_eq!(lines.next(), Some("summary: 2x2 operands, poll page 0x1000"));
        let row = lines.next().expect("variant line");
        assert!(row.contains("uninterruptible_matrix_multiply"));
        assert!(row.ends_with("clean 0.250000s"));
    }

    #[test]
    fn test_stats_block() {
        let stats = SafepointStats::new();
        let out = render(|r| r.stats(&stats));
        assert!(out.starts_with("Safepoint Statistics:"));
    }
}
