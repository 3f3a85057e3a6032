//! Job domain model: the entity, its lifecycle status, retry backoff and the
//! submission boundary.

pub mod backoff;
pub mod job;
pub mod status;

pub use backoff::RetryBackoff;
pub use job::{truncate_error, Job, NewJob, DEFAULT_MAX_RETRIES, MAX_ERROR_MESSAGE_LEN};
pub use status::JobStatus;
