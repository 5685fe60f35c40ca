//! Randomized invariant checks over arbitrary operation sequences.
//!
//! A seeded driver issues mints, promotions, forfeitures, stakes, clock jumps,
//! sweeps, and settlement retries against a small set of players, asserting
//! after every step that:
//! - at most one instance per player is active/locked,
//! - queued ranks are dense and unique,
//! - wagering progress is monotone and never exceeds its target,
//! - terminal instances never change their domain fields again.

use crate::mocks::{engine_fixture, ManualClock, RecordingLedger};
use crate::store::{MemoryStore, Store};
use crate::RewardEngine;
use promolane_types::{InstanceStatus, RewardInstance, StakeEvent};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;

const PLAYERS: [&str; 3] = ["alice", "bob", "carol"];
const TEMPLATES: [u64; 3] = [1, 2, 3];
const STEPS: usize = 400;

struct Checker {
    /// Domain snapshot of each instance observed terminal, keyed by id.
    terminal: HashMap<u64, RewardInstance>,
    /// Last observed progress per instance.
    progress: HashMap<u64, u64>,
}

impl Checker {
    fn new() -> Self {
        Self {
            terminal: HashMap::new(),
            progress: HashMap::new(),
        }
    }

    /// Normalize away the settlement marker: it is internal bookkeeping and
    /// the only field allowed to change after completion.
    fn domain_fields(instance: &RewardInstance) -> RewardInstance {
        let mut instance = instance.clone();
        instance.settlement = None;
        instance
    }

    async fn assert_invariants(
        &mut self,
        engine: &RewardEngine<MemoryStore, RecordingLedger>,
        step: usize,
    ) {
        for player in PLAYERS {
            let owned = engine.store().player_instances(player).await.unwrap();

            let wagering = owned.iter().filter(|i| i.status.is_wagering()).count();
            assert!(
                wagering <= 1,
                "step {step}: player {player} has {wagering} active instances"
            );

            let mut ranks: Vec<u64> = owned
                .iter()
                .filter(|i| i.status == InstanceStatus::Queued)
                .map(|i| i.queue_rank.expect("queued instance without rank"))
                .collect();
            ranks.sort_unstable();
            let expected: Vec<u64> = (0..ranks.len() as u64).collect();
            assert_eq!(
                ranks, expected,
                "step {step}: player {player} ranks not dense/unique"
            );

            for instance in &owned {
                assert!(
                    instance.progress.current <= instance.progress.target,
                    "step {step}: instance {} progress beyond target",
                    instance.id
                );
                let last = self.progress.insert(instance.id, instance.progress.current);
                if let Some(last) = last {
                    assert!(
                        instance.progress.current >= last,
                        "step {step}: instance {} progress decreased",
                        instance.id
                    );
                }
                assert!(
                    instance.queue_rank.is_none() || instance.status == InstanceStatus::Queued,
                    "step {step}: instance {} has a rank while {}",
                    instance.id,
                    instance.status
                );

                if instance.status.is_terminal() {
                    let snapshot = self
                        .terminal
                        .entry(instance.id)
                        .or_insert_with(|| Self::domain_fields(instance));
                    assert_eq!(
                        *snapshot,
                        Self::domain_fields(instance),
                        "step {step}: terminal instance {} mutated",
                        instance.id
                    );
                }
            }
        }
    }
}

#[tokio::test]
async fn random_operation_sequences_preserve_invariants() {
    for seed in 0..4u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let clock = ManualClock::at(1_000);
        let (engine, ledger) = engine_fixture(clock.clone()).await;
        let mut checker = Checker::new();
        let mut minted: Vec<(String, u64)> = Vec::new();

        for step in 0..STEPS {
            let player = PLAYERS[rng.gen_range(0..PLAYERS.len())];
            match rng.gen_range(0..100u32) {
                0..=24 => {
                    let template = TEMPLATES[rng.gen_range(0..TEMPLATES.len())];
                    let instance = engine.mint(player, template).await.unwrap();
                    minted.push((player.to_string(), instance.id));
                }
                25..=54 => {
                    let amount = rng.gen_range(1..30_000u64);
                    let win = if rng.gen_bool(0.3) {
                        rng.gen_range(0..5_000)
                    } else {
                        0
                    };
                    engine
                        .apply_stake(
                            player,
                            StakeEvent {
                                amount,
                                game_id: "slotX".to_string(),
                                win_amount: win,
                            },
                        )
                        .await
                        .unwrap();
                }
                55..=69 => {
                    if let Some((owner, id)) = pick(&mut rng, &minted, player) {
                        // May legitimately fail (not queued / terminal).
                        let _ = engine.promote(&owner, id).await;
                    }
                }
                70..=79 => {
                    if let Some((owner, id)) = pick(&mut rng, &minted, player) {
                        let _ = engine.forfeit(&owner, id).await;
                    }
                }
                80..=84 => {
                    if let Some((owner, id)) = pick(&mut rng, &minted, player) {
                        let _ = engine.claim(&owner, id).await;
                    }
                }
                85..=89 => {
                    clock.advance(rng.gen_range(1..50_000));
                    engine.run_expiration_sweep().await.unwrap();
                }
                90..=94 => {
                    ledger.set_failing(rng.gen_bool(0.5));
                }
                _ => {
                    engine.retry_settlements().await.unwrap();
                }
            }
            checker.assert_invariants(&engine, step).await;
        }

        // Drain the outage and confirm every completed payout settles exactly
        // once per instance.
        ledger.set_failing(false);
        engine.retry_settlements().await.unwrap();
        for player in PLAYERS {
            for instance in engine.store().player_instances(player).await.unwrap() {
                assert!(
                    instance.settlement.is_none(),
                    "instance {} still pending credit after retry",
                    instance.id
                );
            }
        }
        let mut keys: Vec<String> = ledger
            .credits()
            .iter()
            .map(|c| c.idempotency_key.clone())
            .collect();
        keys.sort();
        let before = keys.len();
        keys.dedup();
        assert_eq!(keys.len(), before, "duplicate idempotency keys credited");
    }
}

fn pick(rng: &mut StdRng, minted: &[(String, u64)], player: &str) -> Option<(String, u64)> {
    let candidates: Vec<&(String, u64)> = minted.iter().filter(|(p, _)| p == player).collect();
    if candidates.is_empty() {
        return None;
    }
    let (owner, id) = candidates[rng.gen_range(0..candidates.len())];
    Some((owner.clone(), *id))
}

#[tokio::test]
async fn sweep_leaves_no_overdue_instances_behind() {
    let clock = ManualClock::at(1_000);
    let (engine, _) = engine_fixture(clock.clone()).await;

    for player in PLAYERS {
        for template in TEMPLATES {
            engine.mint(player, template).await.unwrap();
        }
    }

    clock.advance(200_000);
    let report = engine.run_expiration_sweep().await.unwrap();
    assert_eq!(report.players_scanned, PLAYERS.len() as u64);

    let now = 201_000;
    for player in PLAYERS {
        for instance in engine.store().player_instances(player).await.unwrap() {
            let overdue_and_live = instance.expires_at <= now
                && matches!(
                    instance.status,
                    InstanceStatus::Queued | InstanceStatus::Active | InstanceStatus::Locked
                );
            assert!(
                !overdue_and_live,
                "instance {} overdue but still {}",
                instance.id, instance.status
            );
        }
    }
}
