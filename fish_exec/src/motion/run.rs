//! Fixed cadence run loop.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::thread;
use std::time::{Duration, Instant};

use log::{error, info, trace, warn};
use serde::Serialize;

use super::{Clock, GenState, MotionGen, RunError, TickError, TickStats};
use crate::act_link::PositionSink;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Options of the run loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// End the run once more than this many writes in a row have failed
    pub max_consecutive_write_errors: Option<u32>,

    /// Period of the status log line, `None` to disable
    pub status_period: Option<Duration>,
}

/// Summary of a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RunReport {
    pub state: GenState,
    pub elapsed_s: f64,
    pub stats: TickStats,
    pub last_position: Option<i32>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl<C: Clock> MotionGen<C> {
    /// Tick at the tick period until stopped.
    ///
    /// A tick which overruns the period is followed immediately by the next one, ticks are delayed
    /// but never skipped. Failed writes are logged and counted, the loop only ends early on a
    /// fatal link error or when the consecutive write error limit is exceeded. The generator is
    /// stopped when this returns.
    pub fn run<S: PositionSink + ?Sized>(
        &mut self,
        sink: &mut S,
        options: &RunOptions,
    ) -> Result<RunReport, RunError> {
        self.start();

        let mut last_status = Instant::now();

        loop {
            if self.is_stop_requested() {
                self.stop();
                break;
            }

            // Get cycle start time
            let cycle_start = Instant::now();

            match self.tick(sink) {
                Ok(r) => trace!("t = {:.3} s, position = {}", r.elapsed_s, r.position),
                Err(TickError::Stopped) => break,
                Err(TickError::Write { source, .. }) if source.is_fatal() => {
                    error!("{}", source);
                    self.stop();
                    return Err(RunError::Link(source));
                }
                Err(e) => {
                    warn!("{}", e);

                    if let Some(limit) = options.max_consecutive_write_errors {
                        let count = self.stats.consecutive_write_errors;
                        if count > limit {
                            error!("Too many consecutive write errors ({})", count);
                            self.stop();
                            return Err(RunError::TooManyWriteErrors { count, limit });
                        }
                    }
                }
            }

            if let Some(period) = options.status_period {
                if last_status.elapsed() >= period {
                    self.log_status();
                    last_status = Instant::now();
                }
            }

            // Get sleep duration
            let cycle_dur = cycle_start.elapsed();
            match self.params().tick_period().checked_sub(cycle_dur) {
                Some(d) => thread::sleep(d),
                None => {
                    self.stats.overruns += 1;
                    warn!(
                        "Tick overran by {:.06} s",
                        (cycle_dur - self.params().tick_period()).as_secs_f64()
                    );
                }
            }
        }

        Ok(self.report())
    }

    pub fn report(&self) -> RunReport {
        RunReport {
            state: self.state(),
            elapsed_s: self.elapsed().as_secs_f64(),
            stats: self.stats(),
            last_position: self.last_position(),
        }
    }

    fn log_status(&self) {
        let stats = self.stats();
        info!(
            "Status: t = {:.1} s, position = {}, ticks = {}, write errors = {}, overruns = {}",
            self.elapsed().as_secs_f64(),
            self.last_position()
                .map(|p| p.to_string())
                .unwrap_or_else(|| String::from("none")),
            stats.ticks,
            stats.write_errors,
            stats.overruns
        );
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
