//! Worker execution for docbuilder.
//!
//! - [`supervisor`] runs a single worker process with an inactivity timeout
//!   and captures its output into a log.
//! - [`scheduler`] fans a batch of [`BuildJob`]s out over a bounded number of
//!   concurrent workers and waits for every one of them before returning.

pub mod scheduler;
pub mod supervisor;

pub use scheduler::{BatchOutcome, BuildJob, CommandLauncher, JobLauncher, JobReport, Scheduler};
pub use supervisor::{
    CancelHandle, CancelSignal, Completion, KillScope, LogSink, SupervisedProcess, cancel_pair, run_with_timeout,
    spawn_supervised,
};
