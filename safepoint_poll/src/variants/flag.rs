use super::{Variant, check_operands};
use crate::matrix::Matrix;
use crate::safepoint::{Completed, InterruptChannel, Interrupted, SafepointController};

/// Flag polling: one load and one branch per multiply-accumulate.
///
/// Stops at the first iteration that sees the controller flag set.
pub fn flag_polling(
    ctl: &SafepointController,
    a: &Matrix,
    b: &Matrix,
    c: &mut Matrix,
) -> Result<Completed, Interrupted> {
    let n = check_operands(a, b, c);
    let (a, b) = (a.as_slice(), b.as_slice());
    let c = c.as_mut_slice();

    for i in 0..n {
        for j in 0..n {
            let mut sum = 0.0;
            for k in 0..n {
                if ctl.interrupt_requested() {
                    return Err(Interrupted {
                        variant: Variant::Flag,
                        channel: InterruptChannel::Flag,
                        row: i,
                        col: j,
                        completed_cells: i * n + j,
                    });
                }
                sum += a[i * n + k] * b[k * n + j];
            }
            c[i * n + j] = sum;
        }
    }

    Ok(Completed { cells: n * n })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preset_flag_stops_at_first_check() {
        let ctl = SafepointController::new().expect("controller");
        let a = Matrix::patterned(4, 1);
        let b = Matrix::patterned(4, 2);
        let mut c = Matrix::zeroed(4);
        c.fill(9.0);

        ctl.request_interrupt();
        let stop = flag_polling(&ctl, &a, &b, &mut c).expect_err("interrupted");

        assert_eq!(stop.cell(), (0, 0));
        assert_eq!(stop.completed_cells, 0);
        assert_eq!(stop.channel, InterruptChannel::Flag);
        // Nothing was written.
        assert!(c.as_slice().iter().all(|&x| x == 9.0));
    }

    #[test]
    fn test_empty_matrix_never_polls() {
        let ctl = SafepointController::new().expect("controller");
        ctl.request_interrupt();
        let a = Matrix::zeroed(0);
        let done = flag_polling(&ctl, &a, &a.clone(), &mut a.clone()).expect("nothing to do");
        assert_eq!(done.cells, 0);
    }
}
