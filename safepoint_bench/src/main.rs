//! `safepoint-bench`: runs the polling demonstration once.
//!
//! Sets up the trap page and fault handler, times each loop, interrupts
//! each interruptible loop once and reports the recovery. Setup failures
//! abort the process.

mod config;
mod error;
mod harness;
mod report;

use std::process::ExitCode;

use safepoint_poll::SafepointController;

use config::BenchConfig;
use error::{BenchError, fatal};
use harness::Harness;
use report::Reporter;

fn main() -> ExitCode {
    let config = BenchConfig::from_env();

    let ctl = match SafepointController::new() {
        Ok(ctl) => ctl,
        Err(err) => fatal(&BenchError::from(err)),
    };

    let mut harness = Harness::new(&ctl, config, Reporter::stderr());
    match harness.run() {
        Ok(report) => {
            if !report.all_recovered() {
                eprintln!("warning: not every polling loop was interrupted");
            }
            ExitCode::SUCCESS
        }
        Err(err) => fatal(&err),
    }
}
