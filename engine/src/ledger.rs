use std::future::Future;
use thiserror::Error;
use tracing::info;

/// Failures reported by the wallet ledger collaborator. `Unavailable` credits
/// are retried with the same idempotency key; `Rejected` credits need operator
/// intervention.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
    #[error("ledger rejected credit: {0}")]
    Rejected(String),
}

/// Why a credit is being made to the player's withdrawable balance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CreditReason {
    BonusWinnings,
    VoucherRedemption,
}

impl CreditReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CreditReason::BonusWinnings => "bonus_winnings",
            CreditReason::VoucherRedemption => "voucher_redemption",
        }
    }
}

/// External wallet ledger. Credits must be idempotent on `idempotency_key`:
/// the engine may retry the same credit after a failure or a crash.
pub trait Ledger: Send + Sync + 'static {
    fn credit(
        &self,
        player: &str,
        amount: u64,
        reason: CreditReason,
        idempotency_key: &str,
    ) -> impl Future<Output = Result<(), LedgerError>> + Send;
}

/// Ledger sink that accepts every credit and only logs it. Useful for local
/// runs without a wallet service.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullLedger;

impl Ledger for NullLedger {
    async fn credit(
        &self,
        player: &str,
        amount: u64,
        reason: CreditReason,
        idempotency_key: &str,
    ) -> Result<(), LedgerError> {
        info!(
            player,
            amount,
            reason = reason.as_str(),
            idempotency_key,
            "ledger credit (null backend)"
        );
        Ok(())
    }
}
