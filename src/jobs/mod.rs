//! Job orchestration.
//!
//! Core components:
//! - `state`: Job state machine (Pending → Running → Succeeded/Failed, Cancelled)
//! - `job`: Job, BatchJob and the snapshots handed to callers
//! - `ledger`: JobLedger recording every submission, with retention and persistence
//! - `scheduler`: Submission, worker pool, retry/backoff and cancellation
//! - `reporter`: StatusReporter read-only status and history queries

pub mod job;
pub mod ledger;
pub mod reporter;
pub mod scheduler;
pub mod state;

pub use job::{BatchJob, BatchSnapshot, Job, JobKind, LedgerEntry, StatusCounts};
pub use ledger::{JobLedger, LedgerSummary};
pub use reporter::{HistoryFilter, HistoryIter, StatusReporter};
pub use scheduler::{JobEvent, ScrapeTarget, Scheduler};
pub use state::{JobStatus, StateTransition};
