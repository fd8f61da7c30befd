//! The four polling loops.
//!
//! Every variant computes `C[i][j] = Σ_k A[i][k]·B[k][j]` with the plain
//! triple loop, accumulating in `k` order, so uninterrupted results are
//! bit-identical across variants. They differ only in the extra work the
//! innermost body does:
//!
//! | Variant           | Inner-loop extra work            | Observed at        |
//! |-------------------|----------------------------------|--------------------|
//! | Uninterruptible   | none                             | never              |
//! | Flag              | load flag, branch                | every iteration    |
//! | Write             | volatile store to the trap page  | end of each cell   |
//! | Test              | [`PollProbe::touch`] of the page | end of each cell   |
//!
//! On interruption the partial sum of the current cell is dropped and the
//! loop returns [`Interrupted`]; earlier cells of `C` are final, later
//! ones keep whatever they held before.

mod flag;
mod read;
mod uninterruptible;
mod write;

pub use flag::flag_polling;
pub use read::test_polling;
pub use uninterruptible::uninterruptible;
pub use write::write_polling;

use crate::matrix::Matrix;
use crate::safepoint::{
    Completed, InterruptChannel, Interrupted, NativeProbe, SafepointController,
};

// =============================================================================
// Variant
// =============================================================================

/// Which polling loop to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variant {
    /// No polling at all.
    Uninterruptible,
    /// Check the controller flag every iteration.
    Flag,
    /// Store to the trap page every iteration.
    Write,
    /// Test the trap page every iteration.
    Test,
}

impl Variant {
    /// All variants in demonstration order.
    pub const ALL: [Variant; 4] = [
        Variant::Uninterruptible,
        Variant::Flag,
        Variant::Write,
        Variant::Test,
    ];

    /// Name used in reports.
    pub fn name(self) -> &'static str {
        match self {
            Variant::Uninterruptible => "uninterruptible_matrix_multiply",
            Variant::Flag => "flag_matrix_multiply",
            Variant::Write => "write_matrix_multiply",
            Variant::Test => "test_matrix_multiply",
        }
    }

    /// Whether the loop polls at all.
    #[inline]
    pub fn is_interruptible(self) -> bool {
        !matches!(self, Variant::Uninterruptible)
    }

    /// Whether the loop is interrupted through the trap page.
    #[inline]
    pub fn uses_trap_page(self) -> bool {
        matches!(self, Variant::Write | Variant::Test)
    }
}

impl std::fmt::Display for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Dispatch
// =============================================================================

/// Run `variant` over `a × b`, writing into `c`.
///
/// Test polling uses the target's [`NativeProbe`].
pub fn multiply(
    variant: Variant,
    ctl: &SafepointController,
    a: &Matrix,
    b: &Matrix,
    c: &mut Matrix,
) -> Result<Completed, Interrupted> {
    match variant {
        Variant::Uninterruptible => Ok(uninterruptible(a, b, c)),
        Variant::Flag => flag_polling(ctl, a, b, c),
        Variant::Write => write_polling(ctl, a, b, c),
        Variant::Test => test_polling(ctl, &NativeProbe::default(), a, b, c),
    }
}

/// Common dimension of the three operands.
fn check_operands(a: &Matrix, b: &Matrix, c: &Matrix) -> usize {
    let n = a.dim();
    assert!(
        b.dim() == n && c.dim() == n,
        "operand dimensions differ: a={} b={} c={}",
        n,
        b.dim(),
        c.dim()
    );
    n
}

/// Build the interruption record for a trap observed at cell `(row, col)`.
fn trap_interruption(
    ctl: &SafepointController,
    variant: Variant,
    row: usize,
    col: usize,
    dim: usize,
) -> Interrupted {
    let (fault_addr, pc) = ctl
        .take_trap()
        .map_or((ctl.poll_address(), 0), |trap| (trap.fault_addr, trap.pc));

    Interrupted {
        variant,
        channel: InterruptChannel::Trap { fault_addr, pc },
        row,
        col,
        completed_cells: row * dim + col,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::safepoint::{Resumption, VolatileProbe};

    fn operands() -> (Matrix, Matrix) {
        let a = Matrix::from_fn(4, |i, j| (i * 4 + j + 1) as f64);
        let b = Matrix::from_fn(4, |i, j| (i + j) as f64);
        (a, b)
    }

    fn expected() -> Matrix {
        Matrix::from_rows(
            4,
            &[
                20.0, 30.0, 40.0, 50.0, //
                44.0, 70.0, 96.0, 122.0, //
                68.0, 110.0, 152.0, 194.0, //
                92.0, 150.0, 208.0, 266.0,
            ],
        )
        .expect("4x4")
    }

    #[test]
    fn test_variant_names() {
        assert_eq!(Variant::Flag.name(), "flag_matrix_multiply");
        assert_eq!(Variant::Test.to_string(), "test_matrix_multiply");
        assert_eq!(Variant::ALL.len(), 4);
    }

    #[test]
    fn test_variant_channels() {
        assert!(!Variant::Uninterruptible.is_interruptible());
        assert!(Variant::Flag.is_interruptible());
        assert!(!Variant::Flag.uses_trap_page());
        assert!(Variant::Write.uses_trap_page());
        assert!(Variant::Test.uses_trap_page());
    }

    #[test]
    fn test_every_variant_computes_product() {
        let ctl = SafepointController::new().expect("controller");
        let (a, b) = operands();

        for variant in Variant::ALL {
            let mut c = Matrix::zeroed(4);
            let done = multiply(variant, &ctl, &a, &b, &mut c).expect("uninterrupted");
            assert_eq!(done.cells, 16, "{}", variant);
            assert_eq!(c, expected(), "{}", variant);
        }
    }

    #[test]
    fn test_volatile_probe_computes_product() {
        let ctl = SafepointController::new().expect("controller");
        let (a, b) = operands();
        let mut c = Matrix::zeroed(4);
        test_polling(&ctl, &VolatileProbe, &a, &b, &mut c).expect("uninterrupted");
        assert_eq!(c, expected());
    }

    #[test]
    fn test_uninterruptible_ignores_interrupts() {
        let ctl = SafepointController::new().expect("controller");
        ctl.request_interrupt();
        ctl.invalidate_poll_page().expect("arm");

        let (a, b) = operands();
        let mut c = Matrix::zeroed(4);
        let outcome =
            ctl.run_protected(|ctl| multiply(Variant::Uninterruptible, ctl, &a, &b, &mut c));

        assert_eq!(outcome, Resumption::Continued(Completed { cells: 16 }));
        assert_eq!(c, expected());
        ctl.restore_poll_page().expect("disarm");
    }

    #[test]
    fn test_flag_variant_ignores_armed_page() {
        let ctl = SafepointController::new().expect("controller");
        ctl.invalidate_poll_page().expect("arm");

        let (a, b) = operands();
        let mut c = Matrix::zeroed(4);
        let outcome = ctl.run_protected(|ctl| multiply(Variant::Flag, ctl, &a, &b, &mut c));

        assert!(!outcome.is_resumed());
        assert!(ctl.is_armed());
        ctl.restore_poll_page().expect("disarm");
    }

    #[test]
    fn test_trap_variants_ignore_flag() {
        let ctl = SafepointController::new().expect("controller");
        let (a, b) = operands();

        for variant in [Variant::Write, Variant::Test] {
            ctl.request_interrupt();
            let mut c = Matrix::zeroed(4);
            let outcome = ctl.run_protected(|ctl| multiply(variant, ctl, &a, &b, &mut c));
            assert!(!outcome.is_resumed(), "{}", variant);
            assert_eq!(c, expected(), "{}", variant);
        }
    }

    #[test]
    #[should_panic(expected = "operand dimensions differ")]
    fn test_mismatched_operands_panic() {
        let a = Matrix::zeroed(2);
        let b = Matrix::zeroed(3);
        let mut c = Matrix::zeroed(2);
        uninterruptible(&a, &b, &mut c);
    }
}
