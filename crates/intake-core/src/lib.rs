//! Intake core: ordered section gating, persisted form data, content fingerprinting, and the
//! signed confirmation transaction lifecycle.
//!
//! Sections unlock strictly in order, every mutation is snapshotted to local storage, and the
//! final submission attests to a canonical BLAKE3 fingerprint of the collected data.

#![deny(unsafe_code)]

pub mod connectors;
pub mod error;
pub mod events;
pub mod fingerprint;
pub mod gating;
pub mod runtime;
pub mod sections;
pub mod storage;
pub mod store;
pub mod submission;
pub mod types;

pub use connectors::{ConfirmationLedger, TransactionSigner};
pub use error::{FailureKind, IntakeError};
pub use events::{EventBus, WorkflowEvent};
pub use fingerprint::{canonicalize, Fingerprint};
pub use gating::{GateTransition, GatingState};
pub use runtime::{IntakeEngine, IntakeEngineConfig, ResubmitPolicy};
pub use sections::{SectionCatalog, SectionSpec};
pub use storage::{
    FileSnapshotStore, MemorySnapshotStore, SnapshotStorageConfig, SnapshotStore, SnapshotWriter,
    WorkflowSnapshot,
};
pub use store::{FormData, FormStore};
pub use submission::{ConfirmationPolicy, TransactionSubmitter};
pub use types::{
    ConfirmationReference, ConfirmationStatus, Overview, PayloadReference, Progress,
    SectionOutcome, SubmissionFailure, TransactionReference, TransactionStage, TransactionState,
    WorkflowView,
};
