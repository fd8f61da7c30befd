//! Safepoint polling for interruptible compute loops.
//!
//! A runtime that wants to stop a hot loop at a bounded point (for a GC, a
//! debugger, a profiler) has to put *something* in the loop body. This crate
//! provides four interchangeable answers to "what", all running the same
//! dense matrix multiply:
//!
//! | Variant           | Per-iteration cost         | How it is interrupted        |
//! |-------------------|----------------------------|------------------------------|
//! | Uninterruptible   | nothing                    | cannot be                    |
//! | Flag              | load + branch              | controller flag              |
//! | Write             | one store to the trap page | page protection fault        |
//! | Test              | one `test` of the trap page| page protection fault        |
//!
//! # Usage
//!
//! ```ignore
//! use safepoint_poll::{Matrix, Resumption, SafepointController, Variant, multiply};
//!
//! let controller = SafepointController::new()?;
//! let a = Matrix::from_fn(64, |i, j| (i + j) as f64);
//! let b = Matrix::identity(64);
//! let mut c = Matrix::zeroed(64);
//!
//! controller.invalidate_poll_page()?;
//! match controller.run_protected(|ctl| multiply(Variant::Write, ctl, &a, &b, &mut c)) {
//!     Resumption::Continued(done) => println!("finished {} cells", done.cells),
//!     Resumption::Resumed(stop) => println!("abandoned at {:?}", stop.cell()),
//! }
//! ```

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

pub mod matrix;
pub mod safepoint;
pub mod variants;

pub use matrix::Matrix;
pub use safepoint::{
    Completed, ControllerError, HandlerError, InterruptChannel, Interrupted, NativeProbe,
    PageProtection, PollProbe, Resumption, SafepointController, SafepointError, SafepointState,
    SafepointStats, TrapContext, TrapPage, VolatileProbe,
};
pub use variants::{Variant, multiply};
