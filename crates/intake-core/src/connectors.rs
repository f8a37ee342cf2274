use crate::error::IntakeError;
use crate::types::{ConfirmationStatus, PayloadReference, TransactionReference};
use async_trait::async_trait;

/// External signer (wallet) that authorizes the confirmation transaction.
///
/// Rejections are reported as `IntakeError::SignerRejected`, transport problems as
/// `IntakeError::Network`.
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    fn signer_id(&self) -> &'static str;

    async fn request_signature(
        &self,
        payload: &PayloadReference,
    ) -> Result<TransactionReference, IntakeError>;
}

/// External ledger queried for confirmation of a signed transaction.
#[async_trait]
pub trait ConfirmationLedger: Send + Sync {
    fn ledger_id(&self) -> &'static str;

    async fn poll_confirmation(
        &self,
        transaction: &TransactionReference,
    ) -> Result<ConfirmationStatus, IntakeError>;
}
