//! The demonstration sequence.
//!
//! One uninterruptible baseline, then for every interruptible loop a single
//! protected region holding a clean timed run and an armed run. The armed
//! run is abandoned at its next poll and the region resumes.

use std::io::Write;
use std::time::{Duration, Instant};

use safepoint_poll::variants::{test_polling, uninterruptible};
use safepoint_poll::{
    Completed, Interrupted, Matrix, Resumption, SafepointController, SafepointError, Variant,
    VolatileProbe, multiply,
};

use crate::config::{BenchConfig, ProbeKind};
use crate::error::BenchError;
use crate::report::Reporter;

/// Loops that run inside a protected region, in sequence order.
pub const INTERRUPTIBLE: [Variant; 3] = [Variant::Flag, Variant::Write, Variant::Test];

// =============================================================================
// Reports
// =============================================================================

/// Outcome of one variant.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantReport {
    /// Loop this entry describes.
    pub variant: Variant,
    /// Wall time of the clean run. `None` if it never finished.
    pub clean: Option<Duration>,
    /// Where the armed run stopped. `None` if it ran to completion.
    pub interruption: Option<Interrupted>,
}

/// Outcome of the whole sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct BenchReport {
    /// Address of the controller's trap page.
    pub page_address: usize,
    /// Side length of the operands.
    pub size: usize,
    /// One entry per loop, in run order.
    pub variants: Vec<VariantReport>,
}

impl BenchReport {
    /// Report for `variant`, if it ran.
    pub fn get(&self, variant: Variant) -> Option<&VariantReport> {
        self.variants.iter().find(|r| r.variant == variant)
    }

    /// Every interruptible variant took the recovery path.
    pub fn all_recovered(&self) -> bool {
        INTERRUPTIBLE
            .iter()
            .all(|&v| self.get(v).is_some_and(|r| r.interruption.is_some()))
    }
}

// =============================================================================
// Harness
// =============================================================================

/// Operands, controller and output sink for one demonstration.
pub struct Harness<'c, W: Write> {
    ctl: &'c SafepointController,
    config: BenchConfig,
    a: Matrix,
    b: Matrix,
    c: Matrix,
    reporter: Reporter<W>,
}

impl<'c, W: Write> Harness<'c, W> {
    /// Allocate deterministic operands of `config.size`.
    pub fn new(ctl: &'c SafepointController, config: BenchConfig, reporter: Reporter<W>) -> Self {
        let n = config.size;
        Harness {
            ctl,
            a: Matrix::patterned(n, 1),
            b: Matrix::patterned(n, 2),
            c: Matrix::zeroed(n),
            config,
            reporter,
        }
    }

    /// Output matrix as left by the last run.
    #[cfg(test)]
    pub fn result(&self) -> &Matrix {
        &self.c
    }

    /// The two inputs.
    #[cfg(test)]
    pub fn operands(&self) -> (&Matrix, &Matrix) {
        (&self.a, &self.b)
    }

    /// Give back the reporter and its sink.
    #[cfg(test)]
    pub fn into_reporter(self) -> Reporter<W> {
        self.reporter
    }

    /// Run the full sequence.
    pub fn run(&mut self) -> Result<BenchReport, BenchError> {
        self.reporter.page_installed(self.ctl.poll_address());

        let mut variants = Vec::with_capacity(1 + INTERRUPTIBLE.len());
        variants.push(self.run_baseline());
        for variant in INTERRUPTIBLE {
            variants.push(self.run_interruptible(variant)?);
        }

        let report = BenchReport {
            page_address: self.ctl.poll_address(),
            size: self.config.size,
            variants,
        };

        if self.config.verbose {
            self.reporter.stats(self.ctl.stats());
            self.reporter.summary(&report);
        }

        Ok(report)
    }

    fn run_baseline(&mut self) -> VariantReport {
        self.reporter.phase(Variant::Uninterruptible);
        let start = Instant::now();
        uninterruptible(&self.a, &self.b, &mut self.c);
        let elapsed = start.elapsed();
        self.reporter.elapsed(elapsed);

        VariantReport {
            variant: Variant::Uninterruptible,
            clean: Some(elapsed),
            interruption: None,
        }
    }

    fn run_interruptible(&mut self, variant: Variant) -> Result<VariantReport, BenchError> {
        let Harness {
            ctl,
            config,
            a,
            b,
            c,
            reporter,
        } = self;
        let (a, b) = (&*a, &*b);
        let probe = config.probe;
        let mut clean = None;

        let outcome = ctl.run_protected(|ctl| -> Result<Result<(), SafepointError>, Interrupted> {
            reporter.phase(variant);
            let start = Instant::now();
            run_variant(variant, probe, ctl, a, b, c)?;
            let elapsed = start.elapsed();
            reporter.elapsed(elapsed);
            clean = Some(elapsed);

            if variant.uses_trap_page() {
                reporter.invalidating();
                if let Err(err) = ctl.invalidate_poll_page() {
                    return Ok(Err(err));
                }
            } else {
                ctl.request_interrupt();
            }

            reporter.interrupted_phase(variant);
            run_variant(variant, probe, ctl, a, b, c)?;
            Ok(Ok(()))
        });

        let interruption = match outcome {
            Resumption::Resumed(stop) => {
                reporter.recovered(variant);
                Some(stop)
            }
            Resumption::Continued(armed) => {
                armed?;
                // Nothing polled: withdraw the request so the next loop starts clean.
                reporter.not_interrupted(variant);
                ctl.clear_interrupt();
                ctl.restore_poll_page()?;
                None
            }
        };

        Ok(VariantReport {
            variant,
            clean,
            interruption,
        })
    }
}

/// `multiply`, with the probe for test polling chosen by configuration.
fn run_variant(
    variant: Variant,
    probe: ProbeKind,
    ctl: &SafepointController,
    a: &Matrix,
    b: &Matrix,
    c: &mut Matrix,
) -> Result<Completed, Interrupted> {
    match (variant, probe) {
        (Variant::Test, ProbeKind::Volatile) => test_polling(ctl, &VolatileProbe, a, b, c),
        _ => multiply(variant, ctl, a, b, c),
    }
}

// =============================================================================
// Tests
// =============================================================================
