use thiserror::Error;

/// Error taxonomy for the scoring core.
///
/// Only `MalformedRequest` is terminal and surfaced to callers; collaborator
/// failures are absorbed by degrading the affected signal to neutral so a
/// risk decision is always produced.
#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("{collaborator} lookup exceeded {timeout_ms}ms")]
    CollaboratorTimeout {
        collaborator: &'static str,
        timeout_ms: u64,
    },
}

impl ScoringError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        ScoringError::MalformedRequest(msg.into())
    }
}
