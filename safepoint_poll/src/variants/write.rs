use std::sync::atomic::{Ordering, compiler_fence};

use super::{Variant, check_operands, trap_interruption};
use crate::matrix::Matrix;
use crate::safepoint::{Completed, Interrupted, POLL_WRITE_VALUE, SafepointController};

/// Write polling: one unconditional store to the trap page per
/// multiply-accumulate, no branch in the inner loop.
///
/// A store to the armed page faults; the handler restores the page and
/// posts the trap token, which is checked once per output cell.
pub fn write_polling(
    ctl: &SafepointController,
    a: &Matrix,
    b: &Matrix,
    c: &mut Matrix,
) -> Result<Completed, Interrupted> {
    let n = check_operands(a, b, c);
    let (a, b) = (a.as_slice(), b.as_slice());
    let c = c.as_mut_slice();
    let page = ctl.poll_address() as *mut u32;

    for i in 0..n {
        for j in 0..n {
            let mut sum = 0.0;
            for k in 0..n {
                // Safety: the page stays mapped while `ctl` lives, and a
                // fault on it is resolved by the installed handler.
                unsafe { std::ptr::write_volatile(page, POLL_WRITE_VALUE) };
                sum += a[i * n + k] * b[k * n + j];
            }
            // The token is posted from a signal handler on this thread.
            compiler_fence(Ordering::SeqCst);
            if ctl.trap_pending() {
                return Err(trap_interruption(ctl, Variant::Write, i, j, n));
            }
            c[i * n + j] = sum;
        }
    }

    Ok(Completed { cells: n * n })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::safepoint::{InterruptChannel, SafepointState};

    #[test]
    fn test_polls_store_marker_value() {
        let ctl = SafepointController::new().expect("controller");
        let a = Matrix::identity(2);
        let mut c = Matrix::zeroed(2);
        write_polling(&ctl, &a, &a.clone(), &mut c).expect("uninterrupted");

        let stored = unsafe { std::ptr::read_volatile(ctl.poll_address() as *const u32) };
        assert_eq!(stored, POLL_WRITE_VALUE);
        assert_eq!(c, Matrix::identity(2));
    }

    #[test]
    fn test_armed_page_stops_first_cell() {
        let ctl = SafepointController::new().expect("controller");
        let a = Matrix::patterned(8, 0);
        let b = Matrix::patterned(8, 5);
        let mut c = Matrix::zeroed(8);

        ctl.invalidate_poll_page().expect("arm");
        let stop = write_polling(&ctl, &a, &b, &mut c).expect_err("trapped");

        assert_eq!(stop.variant, Variant::Write);
        assert_eq!(stop.cell(), (0, 0));
        assert_eq!(stop.completed_cells, 0);
        match stop.channel {
            InterruptChannel::Trap { fault_addr, .. } => {
                assert_eq!(fault_addr, ctl.poll_address())
            }
            InterruptChannel::Flag => panic!("expected a trap"),
        }
        assert_eq!(ctl.page_state(), SafepointState::Triggered);
        assert!(c.as_slice().iter().all(|&x| x == 0.0));
    }
}
