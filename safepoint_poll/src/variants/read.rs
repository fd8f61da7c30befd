use std::sync::atomic::{Ordering, compiler_fence};

use super::{Variant, check_operands, trap_interruption};
use crate::matrix::Matrix;
use crate::safepoint::{Completed, Interrupted, PollProbe, SafepointController};

/// Test polling: one load-class probe of the trap page per
/// multiply-accumulate. No store, no branch, no register kept live.
///
/// Generic over the probe so the instruction can be swapped per target.
pub fn test_polling<P: PollProbe>(
    ctl: &SafepointController,
    probe: &P,
    a: &Matrix,
    b: &Matrix,
    c: &mut Matrix,
) -> Result<Completed, Interrupted> {
    let n = check_operands(a, b, c);
    let (a, b) = (a.as_slice(), b.as_slice());
    let c = c.as_mut_slice();
    let page = ctl.poll_address() as *const u8;

    for i in 0..n {
        for j in 0..n {
            let mut sum = 0.0;
            for k in 0..n {
                // Safety: see write_polling.
                unsafe { probe.touch(page) };
                sum += a[i * n + k] * b[k * n + j];
            }
            compiler_fence(Ordering::SeqCst);
            if ctl.trap_pending() {
                return Err(trap_interruption(ctl, Variant::Test, i, j, n));
            }
            c[i * n + j] = sum;
        }
    }

    Ok(Completed { cells: n * n })
}
