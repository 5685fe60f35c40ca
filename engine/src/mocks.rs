//! Test fixtures: controllable clock, recording/failing ledgers, and catalog
//! templates used across the engine test suites.

use crate::clock::Clock;
use crate::engine::RewardEngine;
use crate::ledger::{CreditReason, Ledger, LedgerError};
use crate::store::MemoryStore;
use promolane_types::{RewardCategory, RewardTemplate};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Clock whose time is set explicitly by the test.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn at(now: u64) -> Self {
        let clock = Self::default();
        clock.set(now);
        clock
    }

    pub fn set(&self, now: u64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// One credit observed by the [`RecordingLedger`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreditCall {
    pub player: String,
    pub amount: u64,
    pub reason: &'static str,
    pub idempotency_key: String,
}

/// Ledger that records every credit and can be told to fail.
#[derive(Clone, Default)]
pub struct RecordingLedger {
    calls: Arc<Mutex<Vec<CreditCall>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// All accepted credits so far.
    pub fn credits(&self) -> Vec<CreditCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn total_credited(&self) -> u64 {
        self.credits().iter().map(|c| c.amount).sum()
    }

    /// Make subsequent credits fail with `Unavailable` until cleared.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl Ledger for RecordingLedger {
    async fn credit(
        &self,
        player: &str,
        amount: u64,
        reason: CreditReason,
        idempotency_key: &str,
    ) -> Result<(), LedgerError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("injected outage".to_string()));
        }
        let mut calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
        // Idempotent: a repeated key is acknowledged without double-crediting.
        if calls.iter().any(|c| c.idempotency_key == idempotency_key) {
            return Ok(());
        }
        calls.push(CreditCall {
            player: player.to_string(),
            amount,
            reason: reason.as_str(),
            idempotency_key: idempotency_key.to_string(),
        });
        Ok(())
    }
}

/// Bonus template: principal 5000, multiplier 5 (target 25000), cap 20000.
pub fn bonus_template(id: u64) -> RewardTemplate {
    RewardTemplate {
        id,
        category: RewardCategory::Bonus,
        principal: 5_000,
        wagering_multiplier: 5,
        max_payout: Some(20_000),
        validity_secs: 86_400,
        eligible_games: vec![],
        requires_claim: false,
    }
}

/// Voucher template: principal 1000, multiplier 2 (target 2000), no cap.
pub fn voucher_template(id: u64) -> RewardTemplate {
    RewardTemplate {
        id,
        category: RewardCategory::Voucher,
        principal: 1_000,
        wagering_multiplier: 2,
        max_payout: None,
        validity_secs: 86_400,
        eligible_games: vec![],
        requires_claim: false,
    }
}

/// Jackpot-style bonus that settles only on an explicit claim.
pub fn claim_template(id: u64) -> RewardTemplate {
    RewardTemplate {
        requires_claim: true,
        ..bonus_template(id)
    }
}

/// Engine over a fresh memory store with the standard fixture catalog
/// (template 1 = bonus, 2 = voucher, 3 = claim-requiring bonus).
pub async fn engine_fixture(
    clock: ManualClock,
) -> (RewardEngine<MemoryStore, RecordingLedger>, RecordingLedger) {
    let ledger = RecordingLedger::new();
    let engine = RewardEngine::new(MemoryStore::new(), ledger.clone(), Arc::new(clock))
        .await
        .expect("engine init");
    engine
        .load_catalog(vec![
            bonus_template(1),
            voucher_template(2),
            claim_template(3),
        ])
        .await
        .expect("catalog load");
    (engine, ledger)
}
