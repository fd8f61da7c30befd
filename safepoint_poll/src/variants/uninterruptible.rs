use super::check_operands;
use crate::matrix::Matrix;
use crate::safepoint::Completed;

/// Baseline loop: no polling, cannot be interrupted.
pub fn uninterruptible(a: &Matrix, b: &Matrix, c: &mut Matrix) -> Completed {
    let n = check_operands(a, b, c);
    let (a, b) = (a.as_slice(), b.as_slice());
    let c = c.as_mut_slice();

    for i in 0..n {
        for j in 0..n {
            let mut sum = 0.0;
            for k in 0..n {
                sum += a[i * n + k] * b[k * n + j];
            }
            c[i * n + j] = sum;
        }
    }

    Completed { cells: n * n }
}
