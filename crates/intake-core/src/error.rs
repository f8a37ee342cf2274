use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Intake runtime errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IntakeError {
    #[error("Unknown section '{0}'")]
    UnknownSection(String),

    #[error("Gating violation on section '{section}': {reason}")]
    GatingViolation { section: String, reason: String },

    #[error("Workflow store is not hydrated yet")]
    NotReady,

    #[error("Workflow incomplete: frontier at {frontier}, last section is {last}")]
    WorkflowIncomplete { frontier: usize, last: usize },

    #[error("A submission is already in flight (stage '{0}')")]
    SubmissionInFlight(String),

    #[error("Submission already confirmed; reset before submitting again")]
    SubmissionFinalized,

    #[error("Signer rejected the transaction: {0}")]
    SignerRejected(String),

    #[error("Network failure: {0}")]
    Network(String),

    #[error("Confirmation for '{transaction}' timed out after {waited_ms}ms")]
    ConfirmationTimeout { transaction: String, waited_ms: u64 },

    #[error("Ledger rejected transaction: {0}")]
    LedgerRejected(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid section catalog: {0}")]
    InvalidCatalog(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntakeError {
    pub fn locked_section(section: &str, index: usize, frontier: usize) -> Self {
        Self::GatingViolation {
            section: section.to_string(),
            reason: format!(
                "section index {} is locked (frontier is {})",
                index, frontier
            ),
        }
    }

    /// Failure classification for errors raised by the signer or ledger.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::SignerRejected(_) => Some(FailureKind::SignerRejected),
            Self::Network(_) => Some(FailureKind::Network),
            Self::ConfirmationTimeout { .. } => Some(FailureKind::ConfirmationTimeout),
            Self::LedgerRejected(_) => Some(FailureKind::LedgerRejected),
            _ => None,
        }
    }

    /// Submission failures return the submitter to idle and may be retried.
    pub fn is_retryable(&self) -> bool {
        self.failure_kind().is_some()
    }
}

/// Category of a recorded submission failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    SignerRejected,
    Network,
    ConfirmationTimeout,
    LedgerRejected,
}

impl From<serde_json::Error> for IntakeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submission_failures_are_retryable() {
        assert!(IntakeError::SignerRejected("user declined".into()).is_retryable());
        assert!(IntakeError::ConfirmationTimeout {
            transaction: "tx-1".into(),
            waited_ms: 10,
        }
        .is_retryable());
        assert!(!IntakeError::NotReady.is_retryable());
        assert!(!IntakeError::locked_section("consent", 5, 2).is_retryable());
    }

    #[test]
    fn locked_section_message_names_frontier() {
        let err = IntakeError::locked_section("pricing", 6, 3);
        assert!(err.to_string().contains("index 6 is locked (frontier is 3)"));
    }
}
