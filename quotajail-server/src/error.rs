use thiserror::Error;

/// Errors surfaced to callers of the admission service
///
/// Store failures are deliberately absent: they are absorbed by the
/// configured [`FailurePolicy`](crate::admission::FailurePolicy).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

pub type Result<T> = std::result::Result<T, AdmissionError>;
