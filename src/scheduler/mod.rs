//! Job dispatch and schedule generation.
//!
//! [`queue`] runs backup and restore jobs on a bounded worker pool and applies
//! the retry policy; [`systemd`] turns per-type schedules into timer units that
//! trigger scheduled backups from outside the process.

pub mod queue;
pub mod systemd;

pub use queue::{JobOutcome, JobQueue, RetryPolicy};
pub use systemd::{on_calendar, ScheduleOutput, SystemdScheduler};
