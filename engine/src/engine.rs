use crate::clock::Clock;
use crate::ledger::{CreditReason, Ledger};
use crate::lifecycle::{apply_transition, check_transition};
use crate::store::{
    load_instance, load_owner, load_template, write_instance, Key, Store, StoreError, Value,
};
use promolane_types::{
    InstanceStatus, InstanceView, PendingCredit, QueueView, RewardCategory, RewardError,
    RewardEvent, RewardInstance, RewardTemplate, SettlementOutcome, StakeEvent, SweepReport,
    TemplateError,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Capacity of the engine event feed.
const EVENT_CHANNEL_CAPACITY: usize = 1_024;

/// Errors returned by engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Reward(#[from] RewardError),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EngineError {
    /// The validation error, if this is an expected request outcome rather
    /// than an infrastructure failure.
    pub fn as_reward(&self) -> Option<&RewardError> {
        match self {
            EngineError::Reward(err) => Some(err),
            _ => None,
        }
    }
}

/// External eligibility policy consulted at mint time. Eligibility rules are
/// product policy owned outside the engine; the default admits everyone.
pub trait EligibilityPolicy: Send + Sync {
    fn allows(&self, player: &str, template: &RewardTemplate) -> bool;
}

/// Policy that admits every player.
#[derive(Clone, Copy, Debug, Default)]
pub struct AllowAll;

impl EligibilityPolicy for AllowAll {
    fn allows(&self, _player: &str, _template: &RewardTemplate) -> bool {
        true
    }
}

/// The reward lifecycle and queuing engine.
///
/// All mutating operations for one player serialize on that player's lock;
/// operations for different players share nothing but the store, which is
/// re-read under the lock on every operation. At most one instance per player
/// is in `Active`/`Locked` at any observable point.
pub struct RewardEngine<S: Store, L: Ledger> {
    store: S,
    ledger: L,
    clock: Arc<dyn Clock>,
    policy: Arc<dyn EligibilityPolicy>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    next_instance_id: tokio::sync::Mutex<u64>,
    events: broadcast::Sender<RewardEvent>,
}

impl<S: Store, L: Ledger> RewardEngine<S, L> {
    /// Open the engine over a store, resuming the instance id sequence.
    pub async fn new(store: S, ledger: L, clock: Arc<dyn Clock>) -> Result<Self, EngineError> {
        let next_instance_id = match store.get(&Key::Sequence).await? {
            Some(Value::Sequence(last)) => last.saturating_add(1),
            _ => 1,
        };
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            store,
            ledger,
            clock,
            policy: Arc::new(AllowAll),
            locks: Mutex::new(HashMap::new()),
            next_instance_id: tokio::sync::Mutex::new(next_instance_id),
            events,
        })
    }

    /// Replace the eligibility policy.
    pub fn with_policy(mut self, policy: Arc<dyn EligibilityPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Subscribe to the engine event feed.
    pub fn subscribe(&self) -> broadcast::Receiver<RewardEvent> {
        self.events.subscribe()
    }

    /// Direct store access for test assertions.
    #[cfg(any(test, feature = "mocks"))]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Validate and install catalog templates. Existing ids are overwritten;
    /// instances minted earlier keep their denormalized copy.
    pub async fn load_catalog(&self, templates: Vec<RewardTemplate>) -> Result<(), EngineError> {
        for template in templates {
            template.validate()?;
            self.store
                .insert(Key::Template(template.id), Value::Template(template))
                .await?;
        }
        Ok(())
    }

    /// Mint an instance for `player` from `template_id`. The instance starts
    /// queued at the tail, or active immediately when the queue is empty.
    pub async fn mint(&self, player: &str, template_id: u64) -> Result<RewardInstance, EngineError> {
        let template = load_template(&self.store, template_id)
            .await?
            .ok_or(RewardError::TemplateNotFound(template_id))?;
        if !self.policy.allows(player, &template) {
            return Err(RewardError::PlayerIneligible {
                player: player.to_string(),
                template: template_id,
            }
            .into());
        }

        let lock = self.player_lock(player);
        let _guard = lock.lock().await;

        let now = self.clock.now();
        let id = self.allocate_instance_id().await?;
        let mut instance = RewardInstance::mint(id, player, &template, now);
        let mut events = vec![RewardEvent::Minted {
            player: player.to_string(),
            instance: id,
            template: template_id,
        }];

        let owned = self.store.player_instances(player).await?;
        if owned.iter().any(|i| i.status.is_wagering()) {
            let rank = owned
                .iter()
                .filter_map(|i| i.queue_rank)
                .max()
                .map(|r| r.saturating_add(1))
                .unwrap_or(0);
            instance.queue_rank = Some(rank);
        } else {
            check_transition(&instance, InstanceStatus::Active, now)?;
            apply_transition(&mut instance, InstanceStatus::Active);
            events.push(RewardEvent::Activated {
                player: player.to_string(),
                instance: id,
            });
        }

        self.store
            .insert(Key::Owner(id), Value::Owner(player.to_string()))
            .await?;
        write_instance(&self.store, &instance).await?;
        info!(player, instance = id, template = template_id, status = %instance.status, "minted reward instance");
        self.publish(events);
        Ok(instance)
    }

    /// Move a queued instance to the front of the queue (next in line after
    /// the active instance). Idempotent on position.
    pub async fn promote(&self, player: &str, instance_id: u64) -> Result<(), EngineError> {
        self.check_owner(player, instance_id).await?;

        let lock = self.player_lock(player);
        let _guard = lock.lock().await;

        let instance = load_instance(&self.store, player, instance_id)
            .await?
            .ok_or(RewardError::InstanceNotFound(instance_id))?;
        if instance.status != InstanceStatus::Queued {
            return Err(RewardError::NotQueued {
                instance: instance_id,
                status: instance.status,
            }
            .into());
        }

        let mut queued = self.queued_in_order(player).await?;
        if queued.first().map(|i| i.id) == Some(instance_id) {
            // Already next in line; nothing observable changes.
            return Ok(());
        }
        queued.retain(|i| i.id != instance_id);
        queued.insert(0, instance);
        self.write_ranks(queued).await?;

        self.publish(vec![RewardEvent::Promoted {
            player: player.to_string(),
            instance: instance_id,
            rank: 0,
        }]);
        Ok(())
    }

    /// Player-initiated forfeiture. Discards any locked winnings and advances
    /// the queue if the instance was active. Repeating the call against an
    /// already-void instance is a no-op success (client retry tolerance).
    pub async fn forfeit(&self, player: &str, instance_id: u64) -> Result<(), EngineError> {
        self.check_owner(player, instance_id).await?;

        let lock = self.player_lock(player);
        let _guard = lock.lock().await;

        let now = self.clock.now();
        let mut instance = load_instance(&self.store, player, instance_id)
            .await?
            .ok_or(RewardError::InstanceNotFound(instance_id))?;
        match instance.status {
            InstanceStatus::Void => return Ok(()),
            InstanceStatus::Completed | InstanceStatus::Expired => {
                return Err(RewardError::AlreadyTerminal {
                    instance: instance_id,
                    status: instance.status,
                }
                .into());
            }
            _ => {}
        }
        check_transition(&instance, InstanceStatus::Void, now)?;

        let was_wagering = instance.status.is_wagering();
        let was_queued = instance.status == InstanceStatus::Queued;
        if instance.locked_winnings > 0 {
            info!(
                player,
                instance = instance_id,
                discarded = instance.locked_winnings,
                "forfeiture discards locked winnings"
            );
        }
        apply_transition(&mut instance, InstanceStatus::Void);
        write_instance(&self.store, &instance).await?;

        let mut events = vec![RewardEvent::Voided {
            player: player.to_string(),
            instance: instance_id,
        }];
        if was_queued {
            let queued = self.queued_in_order(player).await?;
            self.write_ranks(queued).await?;
        }
        if was_wagering {
            self.advance(player, now, &mut events).await?;
        }
        self.publish(events);
        Ok(())
    }

    /// Settle a claim-requiring instance whose target has been met.
    pub async fn claim(&self, player: &str, instance_id: u64) -> Result<RewardInstance, EngineError> {
        self.check_owner(player, instance_id).await?;

        let lock = self.player_lock(player);
        let _guard = lock.lock().await;

        let mut instance = load_instance(&self.store, player, instance_id)
            .await?
            .ok_or(RewardError::InstanceNotFound(instance_id))?;
        if instance.status != InstanceStatus::PendingClaim {
            return Err(RewardError::NotClaimable {
                instance: instance_id,
                status: instance.status,
            }
            .into());
        }
        check_transition(&instance, InstanceStatus::Completed, self.clock.now())?;

        let mut events = Vec::new();
        self.settle_completion(&mut instance, &mut events).await?;
        self.publish(events);
        Ok(instance)
    }

    /// Apply a stake event to the player's active instance, if any. Silent
    /// no-op when no instance is active or the game is not eligible; the game
    /// session must never observe a failure here.
    pub async fn apply_stake(&self, player: &str, stake: StakeEvent) -> Result<(), EngineError> {
        let lock = self.player_lock(player);
        let _guard = lock.lock().await;

        let now = self.clock.now();
        let owned = self.store.player_instances(player).await?;
        let Some(mut instance) = owned.into_iter().find(|i| i.status.is_wagering()) else {
            return Ok(());
        };
        if !instance.accepts_game(&stake.game_id) {
            return Ok(());
        }

        let mut events = Vec::new();
        instance.progress.accumulate(stake.amount);
        events.push(RewardEvent::Progress {
            player: player.to_string(),
            instance: instance.id,
            current: instance.progress.current,
            target: instance.progress.target,
        });

        if instance.category == RewardCategory::Bonus && stake.win_amount > 0 {
            instance.locked_winnings = instance.locked_winnings.saturating_add(stake.win_amount);
            if instance.status == InstanceStatus::Active {
                check_transition(&instance, InstanceStatus::Locked, now)?;
                apply_transition(&mut instance, InstanceStatus::Locked);
                events.push(RewardEvent::WinningsLocked {
                    player: player.to_string(),
                    instance: instance.id,
                    locked_winnings: instance.locked_winnings,
                });
            }
        }

        if instance.progress.is_met() {
            if instance.requires_claim {
                check_transition(&instance, InstanceStatus::PendingClaim, now)?;
                apply_transition(&mut instance, InstanceStatus::PendingClaim);
                write_instance(&self.store, &instance).await?;
                events.push(RewardEvent::AwaitingClaim {
                    player: player.to_string(),
                    instance: instance.id,
                });
            } else {
                check_transition(&instance, InstanceStatus::Completed, now)?;
                self.settle_completion(&mut instance, &mut events).await?;
            }
            self.advance(player, now, &mut events).await?;
        } else {
            write_instance(&self.store, &instance).await?;
        }

        self.publish(events);
        Ok(())
    }

    /// The player's queue: active instance first, then queued by rank, then
    /// pending-claim instances, then (on request) terminal instances.
    pub async fn list_queue(
        &self,
        player: &str,
        include_terminal: bool,
    ) -> Result<QueueView, EngineError> {
        let lock = self.player_lock(player);
        let _guard = lock.lock().await;

        let owned = self.store.player_instances(player).await?;
        let mut entries: Vec<InstanceView> = Vec::with_capacity(owned.len());
        if let Some(active) = owned.iter().find(|i| i.status.is_wagering()) {
            entries.push(InstanceView::from(active));
        }
        let mut queued: Vec<&RewardInstance> = owned
            .iter()
            .filter(|i| i.status == InstanceStatus::Queued)
            .collect();
        queued.sort_by_key(|i| (i.queue_rank.unwrap_or(u64::MAX), i.id));
        entries.extend(queued.into_iter().map(InstanceView::from));

        let mut pending: Vec<&RewardInstance> = owned
            .iter()
            .filter(|i| i.status == InstanceStatus::PendingClaim)
            .collect();
        pending.sort_by_key(|i| i.id);
        entries.extend(pending.into_iter().map(InstanceView::from));

        if include_terminal {
            let mut terminal: Vec<&RewardInstance> =
                owned.iter().filter(|i| i.status.is_terminal()).collect();
            terminal.sort_by_key(|i| i.id);
            entries.extend(terminal.into_iter().map(InstanceView::from));
        }

        Ok(QueueView {
            player: player.to_string(),
            entries,
        })
    }

    /// Expire every overdue queued/active/locked instance and re-elect each
    /// affected player's active instance. Each player is processed entirely
    /// under that player's lock before the sweep moves on.
    pub async fn run_expiration_sweep(&self) -> Result<SweepReport, EngineError> {
        let mut report = SweepReport::default();
        for player in self.store.players().await? {
            let lock = self.player_lock(&player);
            let _guard = lock.lock().await;

            let now = self.clock.now();
            report.players_scanned += 1;

            let mut events = Vec::new();
            let mut expired_queued = false;
            let mut need_advance = false;
            for mut instance in self.store.player_instances(&player).await? {
                if !matches!(
                    instance.status,
                    InstanceStatus::Queued | InstanceStatus::Active | InstanceStatus::Locked
                ) || !instance.is_overdue(now)
                {
                    continue;
                }
                check_transition(&instance, InstanceStatus::Expired, now)?;
                expired_queued |= instance.status == InstanceStatus::Queued;
                need_advance |= instance.status.is_wagering();
                apply_transition(&mut instance, InstanceStatus::Expired);
                write_instance(&self.store, &instance).await?;
                events.push(RewardEvent::Expired {
                    player: player.clone(),
                    instance: instance.id,
                });
                report.instances_expired += 1;
            }

            if expired_queued {
                let queued = self.queued_in_order(&player).await?;
                self.write_ranks(queued).await?;
            }
            if need_advance {
                self.advance(&player, now, &mut events).await?;
            }
            self.publish(events);
        }
        Ok(report)
    }

    /// Re-attempt pending ledger credits for completed instances. Reports how
    /// many settled on this pass and how many remain pending, so callers can
    /// back off while the ledger stays down.
    pub async fn retry_settlements(&self) -> Result<SettlementOutcome, EngineError> {
        let mut outcome = SettlementOutcome::default();
        for player in self.store.players().await? {
            let lock = self.player_lock(&player);
            let _guard = lock.lock().await;

            for mut instance in self.store.player_instances(&player).await? {
                if instance.settlement.is_none() {
                    continue;
                }
                let mut events = Vec::new();
                self.try_credit(&mut instance, &mut events).await?;
                if instance.settlement.is_none() {
                    outcome.settled += 1;
                } else {
                    outcome.pending += 1;
                }
                self.publish(events);
            }
        }
        Ok(outcome)
    }

    // === internals ===

    fn player_lock(&self, player: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(player.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Hand out the next instance id and persist the high-water mark. Mints
    /// for different players run concurrently, so both the handout and the
    /// sequence write happen under the allocation lock: the persisted record
    /// stays monotone and a restart can never re-issue a live id.
    async fn allocate_instance_id(&self) -> Result<u64, StoreError> {
        let mut next = self.next_instance_id.lock().await;
        let id = *next;
        self.store.insert(Key::Sequence, Value::Sequence(id)).await?;
        *next = id.saturating_add(1);
        Ok(id)
    }

    async fn check_owner(&self, player: &str, instance_id: u64) -> Result<(), EngineError> {
        let owner = load_owner(&self.store, instance_id)
            .await?
            .ok_or(RewardError::InstanceNotFound(instance_id))?;
        if owner != player {
            return Err(RewardError::NotOwner(instance_id).into());
        }
        Ok(())
    }

    /// Queued instances sorted by rank (ties broken by id, which cannot occur
    /// outside a corrupted store).
    async fn queued_in_order(&self, player: &str) -> Result<Vec<RewardInstance>, EngineError> {
        let mut queued: Vec<RewardInstance> = self
            .store
            .player_instances(player)
            .await?
            .into_iter()
            .filter(|i| i.status == InstanceStatus::Queued)
            .collect();
        queued.sort_by_key(|i| (i.queue_rank.unwrap_or(u64::MAX), i.id));
        Ok(queued)
    }

    /// Renumber a queue to dense ranks 0.., writing only changed records. The
    /// whole queue is renumbered in one pass so ranks never duplicate.
    async fn write_ranks(&self, queued: Vec<RewardInstance>) -> Result<(), EngineError> {
        for (position, mut instance) in queued.into_iter().enumerate() {
            let rank = Some(position as u64);
            if instance.queue_rank != rank {
                instance.queue_rank = rank;
                write_instance(&self.store, &instance).await?;
            }
        }
        Ok(())
    }

    /// Elect the queue head as the player's active instance, expiring any
    /// overdue instances encountered before a live head is found. Caller holds
    /// the player lock and guarantees no instance is currently active.
    async fn advance(
        &self,
        player: &str,
        now: u64,
        events: &mut Vec<RewardEvent>,
    ) -> Result<(), EngineError> {
        let owned = self.store.player_instances(player).await?;
        if let Some(active) = owned.iter().find(|i| i.status.is_wagering()) {
            // Sequencing bug: advancing while another instance is active
            // would break the single-active invariant.
            error!(
                player,
                instance = active.id,
                status = %active.status,
                "advance requested while an instance is active"
            );
            return Err(RewardError::InvalidTransition {
                instance: active.id,
                from: active.status,
                to: InstanceStatus::Active,
            }
            .into());
        }

        let mut queued: Vec<RewardInstance> = owned
            .into_iter()
            .filter(|i| i.status == InstanceStatus::Queued)
            .collect();
        queued.sort_by_key(|i| (i.queue_rank.unwrap_or(u64::MAX), i.id));
        let mut iter = queued.into_iter();
        while let Some(mut head) = iter.next() {
            if head.is_overdue(now) {
                check_transition(&head, InstanceStatus::Expired, now)?;
                apply_transition(&mut head, InstanceStatus::Expired);
                write_instance(&self.store, &head).await?;
                events.push(RewardEvent::Expired {
                    player: player.to_string(),
                    instance: head.id,
                });
                continue;
            }

            check_transition(&head, InstanceStatus::Active, now)?;
            apply_transition(&mut head, InstanceStatus::Active);
            let head_id = head.id;
            write_instance(&self.store, &head).await?;
            self.write_ranks(iter.collect()).await?;
            info!(player, instance = head_id, "advanced queue head to active");
            events.push(RewardEvent::Activated {
                player: player.to_string(),
                instance: head_id,
            });
            break;
        }
        Ok(())
    }

    /// Complete an instance: write the terminal record with its pending-credit
    /// marker, then attempt the ledger credit. The transition lands first so a
    /// ledger failure can never re-open the wagering target.
    async fn settle_completion(
        &self,
        instance: &mut RewardInstance,
        events: &mut Vec<RewardEvent>,
    ) -> Result<(), EngineError> {
        let payout = instance.payout_amount();
        apply_transition(instance, InstanceStatus::Completed);
        instance.settlement = if payout > 0 {
            Some(PendingCredit { amount: payout })
        } else {
            None
        };
        write_instance(&self.store, instance).await?;
        events.push(RewardEvent::Completed {
            player: instance.player.clone(),
            instance: instance.id,
            payout,
        });
        if payout > 0 {
            self.try_credit(instance, events).await?;
        }
        Ok(())
    }

    /// Attempt the ledger credit for a completed instance. On failure the
    /// pending-credit marker stays in place for a later retry with the same
    /// idempotency key.
    async fn try_credit(
        &self,
        instance: &mut RewardInstance,
        events: &mut Vec<RewardEvent>,
    ) -> Result<(), EngineError> {
        let Some(pending) = instance.settlement else {
            return Ok(());
        };
        let reason = match instance.category {
            RewardCategory::Bonus => CreditReason::BonusWinnings,
            RewardCategory::Voucher => CreditReason::VoucherRedemption,
        };
        let key = instance.credit_idempotency_key();
        match self
            .ledger
            .credit(&instance.player, pending.amount, reason, &key)
            .await
        {
            Ok(()) => {
                instance.settlement = None;
                write_instance(&self.store, instance).await?;
                events.push(RewardEvent::CreditSettled {
                    player: instance.player.clone(),
                    instance: instance.id,
                    amount: pending.amount,
                });
            }
            Err(err) => {
                warn!(
                    player = %instance.player,
                    instance = instance.id,
                    amount = pending.amount,
                    %err,
                    "ledger credit failed, will retry"
                );
                events.push(RewardEvent::CreditPending {
                    player: instance.player.clone(),
                    instance: instance.id,
                    amount: pending.amount,
                });
            }
        }
        Ok(())
    }

    fn publish(&self, events: Vec<RewardEvent>) {
        for event in events {
            let _ = self.events.send(event);
        }
    }
}
