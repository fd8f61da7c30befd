//! Outcomes of a protected region.
//!
//! A polling loop returns `Result<Completed, Interrupted>`; the controller
//! turns that into a [`Resumption`], which tells the caller whether it is on
//! the normal path or the recovery path.

use crate::variants::Variant;

/// A loop ran to its natural end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completed {
    /// Output cells written.
    pub cells: usize,
}

/// How an interruption reached the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptChannel {
    /// The controller's explicit flag was observed set.
    Flag,
    /// A poll faulted on the armed trap page.
    Trap {
        /// Address the poll touched.
        fault_addr: usize,
        /// Faulting instruction, when the platform exposes it (0 otherwise).
        pc: usize,
    },
}

/// A loop abandoned its work at an interruption.
///
/// The partial sum of the cell being computed is discarded; every cell
/// before it in row-major order is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interrupted {
    /// The loop that was interrupted.
    pub variant: Variant,
    /// How the interrupt was delivered.
    pub channel: InterruptChannel,
    /// Row of the abandoned cell.
    pub row: usize,
    /// Column of the abandoned cell.
    pub col: usize,
    /// Cells completed before the abandoned one.
    pub completed_cells: usize,
}

impl Interrupted {
    /// `(row, col)` of the abandoned cell.
    #[inline]
    pub fn cell(&self) -> (usize, usize) {
        (self.row, self.col)
    }

    /// Whole output rows completed before the interruption.
    #[inline]
    pub fn completed_rows(&self, dim: usize) -> usize {
        if dim == 0 {
            0
        } else {
            self.completed_cells / dim
        }
    }

    /// Whether the interrupt came through the trap page.
    #[inline]
    pub fn is_trap(&self) -> bool {
        matches!(self.channel, InterruptChannel::Trap { .. })
    }
}

/// Result of entering a protected region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resumption<T> {
    /// First time through: the body finished normally.
    Continued(T),
    /// Resumed after an interruption: take the recovery path.
    Resumed(Interrupted),
}

impl<T> Resumption<T> {
    /// Whether the region took the recovery path.
    #[inline]
    pub fn is_resumed(&self) -> bool {
        matches!(self, Resumption::Resumed(_))
    }

    /// The body's value, if it completed.
    #[inline]
    pub fn continued(self) -> Option<T> {
        match self {
            Resumption::Continued(value) => Some(value),
            Resumption::Resumed(_) => None,
        }
    }

    /// The interruption, if the region was resumed.
    #[inline]
    pub fn interruption(&self) -> Option<&Interrupted> {
        match self {
            Resumption::Continued(_) => None,
            Resumption::Resumed(interrupted) => Some(interrupted),
        }
    }
}
