//! Rip-list analyzer. Turns the completion log into job lifecycle events.
//!
//! Each task keeps an absolute cursor into the log. A scan walks the tick's
//! snapshot from that cursor looking for the record of the task's tracked
//! job:
//!
//! ```text
//! record found, cause = KILLED        → Terminal(KILLED)
//! record found, last_job_started      → Terminal(FINISHED)
//! record found otherwise              → job done, track the next release
//! no record up to the write position  → nothing happened yet
//! ```
//!
//! Positions are absolute sequence numbers, so a wrapped ring can never make
//! an old record look new. A cursor the log has already overwritten is
//! resynchronized to the write position.

use tracing::{debug, warn};

use rqsched_core::{DeathCause, FocId, RipWindow};

use crate::error::OptError;
use crate::task::OptimizationTask;

/// What a scan found for one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobEvent {
    /// No record for the tracked job yet.
    Pending,
    /// This many jobs completed within their period; the task now tracks
    /// the next release.
    Advanced { jobs: u32 },
    /// The task is done and must leave the registry.
    Terminal { foc_id: FocId, cause: DeathCause },
    /// The cursor was lost to wraparound and has been moved to the write
    /// position; completions in the gap are gone.
    Resynced,
}

/// Check that `cursor` still points into the retained part of the log.
pub fn check_cursor(cursor: u64, window: &RipWindow) -> Result<(), OptError> {
    let write_position = window.write_position();
    if cursor < window.start || cursor > write_position {
        return Err(OptError::StaleCursor {
            cursor,
            oldest: window.start,
            write_position,
        });
    }
    Ok(())
}

/// Scan `window` for records of `task`'s tracked job.
///
/// Scanning the same unchanged window twice yields `Pending` the second
/// time: the cursor ends at the write position.
pub fn analyze(task: &mut OptimizationTask, window: &RipWindow) -> JobEvent {
    if let Err(e) = check_cursor(task.cursor, window) {
        warn!(
            task = %task.name(),
            error = %e,
            "rip list overwrote unread records, resynchronizing cursor (completions lost)"
        );
        task.cursor = window.write_position();
        return JobEvent::Resynced;
    }

    let mut jobs = 0;
    for (position, entry) in window.entries_from(task.cursor) {
        task.cursor = position + 1;
        if entry.foc_id != task.newest_job.foc_id {
            continue;
        }

        if entry.cause == DeathCause::Killed {
            return JobEvent::Terminal {
                foc_id: entry.foc_id,
                cause: DeathCause::Killed,
            };
        }
        if task.last_job_started {
            return JobEvent::Terminal {
                foc_id: entry.foc_id,
                cause: DeathCause::Finished,
            };
        }

        debug!(
            task = %task.name(),
            foc_id = entry.foc_id,
            death_ms = entry.death_time.as_millis() as u64,
            "job completed"
        );
        task.complete_job();
        jobs += 1;
    }
    task.cursor = window.write_position();

    if jobs == 0 {
        JobEvent::Pending
    } else {
        JobEvent::Advanced { jobs }
    }
}
