use crate::connectors::{ConfirmationLedger, TransactionSigner};
use crate::error::IntakeError;
use crate::events::{EventBus, WorkflowEvent};
use crate::types::{
    ConfirmationReference, ConfirmationStatus, PayloadReference, SubmissionFailure,
    TransactionReference, TransactionStage, TransactionState,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// How long and how often the ledger is polled for confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmationPolicy {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for ConfirmationPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            timeout: Duration::from_secs(300),
        }
    }
}

/// Drives `idle -> awaiting-signature -> awaiting-confirmation -> confirmed`.
///
/// Exactly one submission may be in flight. Any signer or ledger failure records the error
/// and returns to `idle`. `confirmed` stays until the caller resets. There is no mid-flight
/// cancellation; a pending attempt ends only by resolving, failing, or timing out.
pub struct TransactionSubmitter {
    signer: Arc<dyn TransactionSigner>,
    ledger: Arc<dyn ConfirmationLedger>,
    policy: ConfirmationPolicy,
    state: watch::Sender<TransactionState>,
    events: EventBus,
}

impl TransactionSubmitter {
    pub fn new(
        signer: Arc<dyn TransactionSigner>,
        ledger: Arc<dyn ConfirmationLedger>,
        policy: ConfirmationPolicy,
        events: EventBus,
    ) -> Self {
        let (state, _) = watch::channel(TransactionState::idle());
        Self {
            signer,
            ledger,
            policy,
            state,
            events,
        }
    }

    pub fn policy(&self) -> ConfirmationPolicy {
        self.policy
    }

    pub fn state(&self) -> TransactionState {
        self.state.borrow().clone()
    }

    pub fn stage(&self) -> TransactionStage {
        self.state.borrow().stage
    }

    /// Observe every state change of the current and future attempts.
    pub fn watch(&self) -> watch::Receiver<TransactionState> {
        self.state.subscribe()
    }

    /// Run one full submission attempt. Returns the confirmed state.
    pub async fn submit(&self, payload: PayloadReference) -> Result<TransactionState, IntakeError> {
        self.begin(&payload)?;
        self.run().await
    }

    /// Claim the single submission slot for `payload`: `idle -> awaiting-signature`.
    ///
    /// Fails with `SubmissionInFlight` or `SubmissionFinalized` when the slot is taken. On
    /// success the caller must drive the attempt with [`TransactionSubmitter::run`].
    pub fn begin(&self, payload: &PayloadReference) -> Result<TransactionState, IntakeError> {
        let mut rejection = None;
        self.state.send_if_modified(|state| {
            rejection = stage_rejection(state.stage);
            if rejection.is_some() {
                return false;
            }
            *state = TransactionState {
                stage: TransactionStage::AwaitingSignature,
                payload_reference: Some(payload.clone()),
                ..TransactionState::idle()
            };
            true
        });

        if let Some(err) = rejection {
            debug!(error = %err, "Submission rejected");
            return Err(err);
        }
        self.publish_stage(TransactionStage::AwaitingSignature, None);
        Ok(self.state())
    }

    /// Continue an attempt claimed by [`TransactionSubmitter::begin`] through signing and
    /// confirmation.
    pub async fn run(&self) -> Result<TransactionState, IntakeError> {
        let claimed = self.state();
        let payload = match (claimed.stage, claimed.payload_reference) {
            (TransactionStage::AwaitingSignature, Some(payload)) => payload,
            (stage, _) => {
                return Err(IntakeError::Internal(format!(
                    "no claimed submission to run (stage '{}')",
                    stage.name()
                )))
            }
        };
        info!(
            payload = %payload,
            signer = self.signer.signer_id(),
            "Requesting transaction signature"
        );

        let transaction = match self.signer.request_signature(&payload).await {
            Ok(transaction) => transaction,
            Err(err) => return Err(self.fail(err)),
        };
        self.transition(TransactionStage::AwaitingConfirmation, |state| {
            state.transaction_reference = Some(transaction.clone());
        });
        info!(
            transaction = %transaction,
            ledger = self.ledger.ledger_id(),
            "Transaction signed; awaiting ledger confirmation"
        );

        let confirmation = match self.await_confirmation(&transaction).await {
            Ok(confirmation) => confirmation,
            Err(err) => return Err(self.fail(err)),
        };
        self.transition(TransactionStage::Confirmed, |state| {
            state.confirmation_reference = Some(confirmation.clone());
        });
        info!(
            transaction = %transaction,
            confirmation = %confirmation,
            "Transaction confirmed"
        );

        Ok(self.state())
    }

    /// Poll the ledger until the transaction is confirmed, rejected, or the policy times out.
    pub async fn await_confirmation(
        &self,
        transaction: &TransactionReference,
    ) -> Result<ConfirmationReference, IntakeError> {
        let started = Instant::now();
        match tokio::time::timeout(self.policy.timeout, self.poll_until_settled(transaction)).await
        {
            Ok(result) => result,
            Err(_) => Err(IntakeError::ConfirmationTimeout {
                transaction: transaction.to_string(),
                waited_ms: started.elapsed().as_millis() as u64,
            }),
        }
    }

    /// Return to `idle` from `idle` (clearing the last error) or `confirmed`.
    pub fn reset(&self) -> Result<TransactionState, IntakeError> {
        let stage = self.stage();
        if stage.is_in_flight() {
            return Err(IntakeError::SubmissionInFlight(stage.name().to_string()));
        }
        self.state.send_replace(TransactionState::idle());
        self.publish_stage(TransactionStage::Idle, None);
        Ok(self.state())
    }

    async fn poll_until_settled(
        &self,
        transaction: &TransactionReference,
    ) -> Result<ConfirmationReference, IntakeError> {
        let period = self.policy.poll_interval.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match self.ledger.poll_confirmation(transaction).await? {
                ConfirmationStatus::Pending => {
                    debug!(transaction = %transaction, "Confirmation still pending");
                }
                ConfirmationStatus::Confirmed(reference) => return Ok(reference),
                ConfirmationStatus::Rejected(reason) => {
                    return Err(IntakeError::LedgerRejected(reason))
                }
            }
        }
    }

    fn transition(&self, stage: TransactionStage, apply: impl FnOnce(&mut TransactionState)) {
        self.state.send_modify(|state| {
            state.stage = stage;
            state.updated_at = Utc::now();
            apply(state);
        });
        self.publish_stage(stage, None);
    }

    fn fail(&self, err: IntakeError) -> IntakeError {
        let failure = SubmissionFailure::from_error(&err);
        warn!(
            kind = ?failure.kind,
            error = %err,
            "Submission failed; returning to idle"
        );
        self.state.send_modify(|state| {
            state.stage = TransactionStage::Idle;
            state.updated_at = failure.occurred_at;
            state.last_error = Some(failure.clone());
        });
        self.publish_stage(TransactionStage::Idle, Some(failure.message));
        err
    }

    fn publish_stage(&self, stage: TransactionStage, error: Option<String>) {
        self.events
            .publish(WorkflowEvent::TransactionStage { stage, error });
    }
}

fn stage_rejection(stage: TransactionStage) -> Option<IntakeError> {
    match stage {
        TransactionStage::Idle => None,
        TransactionStage::Confirmed => Some(IntakeError::SubmissionFinalized),
        in_flight => Some(IntakeError::SubmissionInFlight(in_flight.name().to_string())),
    }
}
