use crate::error::{FailureKind, IntakeError};
use crate::fingerprint::Fingerprint;
use crate::gating::GateTransition;
use crate::store::FormData;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! reference_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

reference_type!(
    /// What the signed transaction attests to (normally the content fingerprint).
    PayloadReference
);
reference_type!(
    /// Opaque id assigned once the signer authorizes the transaction.
    TransactionReference
);
reference_type!(
    /// Opaque id assigned once the ledger accepts the transaction.
    ConfirmationReference
);

impl From<Fingerprint> for PayloadReference {
    fn from(fingerprint: Fingerprint) -> Self {
        Self(fingerprint.into_string())
    }
}

/// Lifecycle of a single external submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransactionStage {
    Idle,
    AwaitingSignature,
    AwaitingConfirmation,
    Confirmed,
}

impl TransactionStage {
    pub fn name(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::AwaitingSignature => "awaiting-signature",
            Self::AwaitingConfirmation => "awaiting-confirmation",
            Self::Confirmed => "confirmed",
        }
    }

    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::AwaitingSignature | Self::AwaitingConfirmation)
    }
}

/// Error recorded on the transaction state after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionFailure {
    pub kind: FailureKind,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

impl SubmissionFailure {
    pub fn from_error(err: &IntakeError) -> Self {
        Self {
            kind: err.failure_kind().unwrap_or(FailureKind::Network),
            message: err.to_string(),
            occurred_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionState {
    pub stage: TransactionStage,
    pub payload_reference: Option<PayloadReference>,
    pub transaction_reference: Option<TransactionReference>,
    pub confirmation_reference: Option<ConfirmationReference>,
    pub last_error: Option<SubmissionFailure>,
    pub updated_at: DateTime<Utc>,
}

impl TransactionState {
    pub fn idle() -> Self {
        Self {
            stage: TransactionStage::Idle,
            payload_reference: None,
            transaction_reference: None,
            confirmation_reference: None,
            last_error: None,
            updated_at: Utc::now(),
        }
    }
}

impl Default for TransactionState {
    fn default() -> Self {
        Self::idle()
    }
}

/// One poll of the ledger for a signed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum ConfirmationStatus {
    Pending,
    Confirmed(ConfirmationReference),
    Rejected(String),
}

/// Outcome of a `submit_section` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionOutcome {
    pub section_id: String,
    pub index: usize,
    /// False when a resubmission was snap-back-only and the payload was not stored.
    pub merged: bool,
    pub transition: GateTransition,
    pub active_section: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub unlocked: usize,
    pub total: usize,
    pub percent: u8,
}

impl Progress {
    pub fn new(unlocked: usize, total: usize) -> Self {
        let percent = if total == 0 {
            0
        } else {
            ((unlocked.min(total) * 100) / total) as u8
        };
        Self {
            unlocked,
            total,
            percent,
        }
    }
}

/// Gating as seen by the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowView {
    pub ready: bool,
    pub active_index: usize,
    pub active_section: String,
    pub frontier: usize,
    pub reachable: Vec<String>,
    pub unlocked: Vec<bool>,
    pub complete: bool,
    pub progress: Progress,
}

/// Export surface: every payload plus the attested fingerprint and submission status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Overview {
    pub sections: FormData,
    pub fingerprint_sections: Vec<String>,
    pub fingerprint: Fingerprint,
    pub workflow: WorkflowView,
    pub transaction: TransactionState,
}
