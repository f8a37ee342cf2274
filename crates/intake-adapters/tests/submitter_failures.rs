//! Submitter behaviour when the ledger fails after the wallet has signed.

use intake_adapters::{FailingLedger, MockWalletSigner};
use intake_core::{
    ConfirmationPolicy, EventBus, FailureKind, IntakeError, PayloadReference, TransactionStage,
    TransactionSubmitter,
};
use std::sync::Arc;
use std::time::Duration;

fn submitter(ledger: FailingLedger) -> TransactionSubmitter {
    TransactionSubmitter::new(
        Arc::new(MockWalletSigner::default()),
        Arc::new(ledger),
        ConfirmationPolicy {
            poll_interval: Duration::from_millis(5),
            timeout: Duration::from_millis(300),
        },
        EventBus::default(),
    )
}

#[tokio::test]
async fn unreachable_ledger_returns_to_idle_and_keeps_transaction() {
    let submitter = submitter(FailingLedger::Unreachable("rpc down".into()));
    let payload = PayloadReference::new("f00d");

    let err = submitter.submit(payload.clone()).await.unwrap_err();
    assert_eq!(err, IntakeError::Network("rpc down".to_string()));

    let state = submitter.state();
    assert_eq!(state.stage, TransactionStage::Idle);
    assert_eq!(state.last_error.unwrap().kind, FailureKind::Network);
    assert_eq!(
        state.transaction_reference.unwrap().as_str(),
        MockWalletSigner::transaction_hash(&payload)
    );

    let retry = submitter.submit(payload).await.unwrap_err();
    assert_eq!(retry.failure_kind(), Some(FailureKind::Network));
}

#[tokio::test]
async fn reverted_transaction_is_reported_as_ledger_rejection() {
    let submitter = submitter(FailingLedger::Reverted("out of gas".into()));
    let payload = PayloadReference::new("beef");
    let tx = MockWalletSigner::transaction_hash(&payload);

    let err = submitter.submit(payload.clone()).await.unwrap_err();
    assert_eq!(err.failure_kind(), Some(FailureKind::LedgerRejected));
    assert!(err.to_string().contains("out of gas"));

    let state = submitter.state();
    assert_eq!(state.stage, TransactionStage::Idle);
    let failure = state.last_error.unwrap();
    assert_eq!(failure.kind, FailureKind::LedgerRejected);
    assert!(failure.message.contains(&tx));
    assert_eq!(state.transaction_reference.unwrap().as_str(), tx);

    let retried = submitter.begin(&payload).unwrap();
    assert_eq!(retried.stage, TransactionStage::AwaitingSignature);
    assert!(retried.last_error.is_none());
    let retry = submitter.run().await.unwrap_err();
    assert_eq!(retry.failure_kind(), Some(FailureKind::LedgerRejected));
}
