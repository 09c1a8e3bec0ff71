use flock_core::pipeline::messages::MessageError;
use flock_core::providers::errors::FetchError;
use flock_core::subjects::SubjectTableError;

/// Failures that stop the worker. Per-item problems never surface here; they end up in the
/// batch report instead.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("could not connect to the database: {0}")]
    Database(#[from] sqlx::Error),

    #[error("could not build the HTTP client: {0}")]
    Http(#[from] FetchError),

    #[error("could not load the subject table: {0}")]
    Subjects(#[from] SubjectTableError),

    #[error("malformed message: {0}")]
    Message(#[from] MessageError),

    #[error("queue {operation} failed: {message}")]
    Queue {
        operation: &'static str,
        message: String,
    },

    #[error("batch aborted: {0}")]
    Aborted(String),
}
