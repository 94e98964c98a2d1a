mod job;
mod retry;
mod state;

pub use job::{ExecutionOutcome, FailureKind, Job};
pub use retry::{BACKOFF_BASE_KEY, MAX_RETRIES_KEY, RetryPolicy};
pub use state::{Finalization, JobState, StateMachine, Transition};
