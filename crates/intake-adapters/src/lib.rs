//! Signer and ledger adapters for the intake confirmation transaction.

#![deny(unsafe_code)]

use async_trait::async_trait;
use intake_core::{
    ConfirmationLedger, ConfirmationReference, ConfirmationStatus, IntakeError, PayloadReference,
    TransactionReference, TransactionSigner,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::debug;

/// Mock wallet that signs every payload with a deterministic transaction hash.
#[derive(Debug, Clone, Default)]
pub struct MockWalletSigner {
    latency: Duration,
}

impl MockWalletSigner {
    /// Simulates the wallet prompt by sleeping before returning the signature.
    pub fn with_latency(latency: Duration) -> Self {
        Self { latency }
    }

    pub fn transaction_hash(payload: &PayloadReference) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"intake-tx:");
        hasher.update(payload.as_str().as_bytes());
        format!("0x{}", hasher.finalize().to_hex())
    }
}

#[async_trait]
impl TransactionSigner for MockWalletSigner {
    fn signer_id(&self) -> &'static str {
        "mock-wallet"
    }

    async fn request_signature(
        &self,
        payload: &PayloadReference,
    ) -> Result<TransactionReference, IntakeError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let hash = Self::transaction_hash(payload);
        debug!(payload = %payload, tx = %hash, "Mock wallet signed payload");
        Ok(TransactionReference::new(hash))
    }
}

/// Signer that declines every request, as a user dismissing the wallet prompt would.
#[derive(Debug, Clone)]
pub struct RejectingSigner {
    reason: String,
}

impl RejectingSigner {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl TransactionSigner for RejectingSigner {
    fn signer_id(&self) -> &'static str {
        "rejecting"
    }

    async fn request_signature(
        &self,
        _payload: &PayloadReference,
    ) -> Result<TransactionReference, IntakeError> {
        Err(IntakeError::SignerRejected(self.reason.clone()))
    }
}

/// Mock ledger that reports `Pending` for a fixed number of polls, then confirms.
#[derive(Debug, Default)]
pub struct MockLedger {
    pending_polls: usize,
    polls: AtomicUsize,
}

impl MockLedger {
    pub fn confirming_after(pending_polls: usize) -> Self {
        Self {
            pending_polls,
            polls: AtomicUsize::new(0),
        }
    }

    pub fn poll_count(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConfirmationLedger for MockLedger {
    fn ledger_id(&self) -> &'static str {
        "mock-ledger"
    }

    async fn poll_confirmation(
        &self,
        transaction: &TransactionReference,
    ) -> Result<ConfirmationStatus, IntakeError> {
        let seen = self.polls.fetch_add(1, Ordering::SeqCst);
        if seen < self.pending_polls {
            return Ok(ConfirmationStatus::Pending);
        }
        let receipt = blake3::hash(transaction.as_str().as_bytes()).to_hex();
        Ok(ConfirmationStatus::Confirmed(ConfirmationReference::new(
            format!("block-{}", &receipt[..16]),
        )))
    }
}

/// Ledger that never confirms; every submission ends in a confirmation timeout.
#[derive(Debug, Clone, Default)]
pub struct StalledLedger;

#[async_trait]
impl ConfirmationLedger for StalledLedger {
    fn ledger_id(&self) -> &'static str {
        "stalled"
    }

    async fn poll_confirmation(
        &self,
        _transaction: &TransactionReference,
    ) -> Result<ConfirmationStatus, IntakeError> {
        Ok(ConfirmationStatus::Pending)
    }
}

/// Ledger whose polls fail outright, either at the transport or with an on-chain rejection.
#[derive(Debug, Clone)]
pub enum FailingLedger {
    Unreachable(String),
    Reverted(String),
}

#[async_trait]
impl ConfirmationLedger for FailingLedger {
    fn ledger_id(&self) -> &'static str {
        "failing"
    }

    async fn poll_confirmation(
        &self,
        transaction: &TransactionReference,
    ) -> Result<ConfirmationStatus, IntakeError> {
        match self {
            Self::Unreachable(reason) => Err(IntakeError::Network(reason.clone())),
            Self::Reverted(reason) => Ok(ConfirmationStatus::Rejected(format!(
                "{}: {}",
                transaction, reason
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wallet_signature_is_deterministic() {
        let signer = MockWalletSigner::default();
        let payload = PayloadReference::new("abc123");

        let a = signer.request_signature(&payload).await.unwrap();
        let b = signer.request_signature(&payload).await.unwrap();
        assert_eq!(a, b);
        assert!(a.as_str().starts_with("0x"));
        assert_eq!(a.as_str().len(), 66);

        let other = signer
            .request_signature(&PayloadReference::new("abc124"))
            .await
            .unwrap();
        assert_ne!(a, other);
    }

    #[tokio::test]
    async fn rejecting_signer_reports_signer_rejection() {
        let signer = RejectingSigner::new("user closed wallet");
        let err = signer
            .request_signature(&PayloadReference::new("abc"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            IntakeError::SignerRejected("user closed wallet".to_string())
        );
    }

    #[tokio::test]
    async fn ledger_confirms_after_pending_polls() {
        let ledger = MockLedger::confirming_after(2);
        let tx = TransactionReference::new("0xfeed");

        assert_eq!(
            ledger.poll_confirmation(&tx).await.unwrap(),
            ConfirmationStatus::Pending
        );
        assert_eq!(
            ledger.poll_confirmation(&tx).await.unwrap(),
            ConfirmationStatus::Pending
        );
        match ledger.poll_confirmation(&tx).await.unwrap() {
            ConfirmationStatus::Confirmed(receipt) => {
                assert!(receipt.as_str().starts_with("block-"))
            }
            other => panic!("expected confirmation, got {:?}", other),
        }
        assert_eq!(ledger.poll_count(), 3);
    }

    #[tokio::test]
    async fn stalled_ledger_stays_pending() {
        let ledger = StalledLedger;
        for _ in 0..5 {
            assert_eq!(
                ledger
                    .poll_confirmation(&TransactionReference::new("0x1"))
                    .await
                    .unwrap(),
                ConfirmationStatus::Pending
            );
        }
    }

    #[tokio::test]
    async fn failing_ledger_variants() {
        let tx = TransactionReference::new("0x2");
        let err = FailingLedger::Unreachable("rpc down".into())
            .poll_confirmation(&tx)
            .await
            .unwrap_err();
        assert!(matches!(err, IntakeError::Network(_)));

        let status = FailingLedger::Reverted("out of gas".into())
            .poll_confirmation(&tx)
            .await
            .unwrap();
        assert_eq!(
            status,
            ConfirmationStatus::Rejected("0x2: out of gas".to_string())
        );
    }
}
