use crate::catalog::{RewardCategory, RewardTemplate};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a reward instance.
///
/// `Locked` is a bonus-only sub-state of `Active` meaning the instance has
/// accrued winnings; `PendingClaim` is reached by claim-requiring rewards once
/// their target is met. `Completed`, `Expired`, and `Void` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Queued,
    Active,
    Locked,
    PendingClaim,
    Completed,
    Expired,
    Void,
}

impl InstanceStatus {
    /// Terminal statuses are append-only facts: no field changes after entry.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InstanceStatus::Completed | InstanceStatus::Expired | InstanceStatus::Void
        )
    }

    /// Whether the instance currently consumes the player's single active slot.
    pub fn is_wagering(&self) -> bool {
        matches!(self, InstanceStatus::Active | InstanceStatus::Locked)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Queued => "queued",
            InstanceStatus::Active => "active",
            InstanceStatus::Locked => "locked",
            InstanceStatus::PendingClaim => "pending_claim",
            InstanceStatus::Completed => "completed",
            InstanceStatus::Expired => "expired",
            InstanceStatus::Void => "void",
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wagering progress toward an instance's target. `current` never exceeds
/// `target` and never decreases.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WagerProgress {
    pub current: u64,
    pub target: u64,
}

impl WagerProgress {
    pub fn new(target: u64) -> Self {
        Self { current: 0, target }
    }

    /// Add stake toward the target, clamped so `current` never exceeds it.
    /// Returns the amount actually absorbed.
    pub fn accumulate(&mut self, amount: u64) -> u64 {
        let remaining = self.target.saturating_sub(self.current);
        let absorbed = amount.min(remaining);
        self.current = self.current.saturating_add(absorbed);
        absorbed
    }

    pub fn is_met(&self) -> bool {
        self.current >= self.target
    }
}

/// A payout owed to the player but not yet confirmed by the wallet ledger.
///
/// Internal bookkeeping only: the instance is already `Completed`, this marker
/// prevents re-processing the same wagering target while the credit retries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingCredit {
    pub amount: u64,
}

/// A single minted bonus or voucher owned by one player.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardInstance {
    pub id: u64,
    pub player: String,
    pub template_id: u64,
    // Denormalized from the template at mint time.
    pub category: RewardCategory,
    pub principal: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_payout: Option<u64>,
    #[serde(default)]
    pub eligible_games: Vec<String>,
    #[serde(default)]
    pub requires_claim: bool,
    pub status: InstanceStatus,
    pub minted_at: u64,
    /// Fixed at mint time (`minted_at + validity_secs`), never extended.
    pub expires_at: u64,
    pub progress: WagerProgress,
    /// In-play balance generated while wagering (bonus category only).
    pub locked_winnings: u64,
    /// Position among the player's queued instances. Some iff status is Queued.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_rank: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settlement: Option<PendingCredit>,
}

impl RewardInstance {
    /// Mint a fresh instance from a template. Starts `Queued` with no rank;
    /// the queue manager assigns placement.
    pub fn mint(id: u64, player: &str, template: &RewardTemplate, now: u64) -> Self {
        Self {
            id,
            player: player.to_string(),
            template_id: template.id,
            category: template.category,
            principal: template.principal,
            max_payout: template.max_payout,
            eligible_games: template.eligible_games.clone(),
            requires_claim: template.requires_claim,
            status: InstanceStatus::Queued,
            minted_at: now,
            expires_at: now.saturating_add(template.validity_secs),
            progress: WagerProgress::new(template.wagering_target()),
            locked_winnings: 0,
            queue_rank: None,
            settlement: None,
        }
    }

    /// Whether a stake on `game_id` counts toward this instance's target.
    /// An empty eligible-game set admits every game.
    pub fn accepts_game(&self, game_id: &str) -> bool {
        self.eligible_games.is_empty() || self.eligible_games.iter().any(|g| g == game_id)
    }

    pub fn is_overdue(&self, now: u64) -> bool {
        now >= self.expires_at
    }

    /// Amount credited to the withdrawable balance on completion: locked
    /// winnings for a bonus, principal for a voucher, capped at `max_payout`.
    pub fn payout_amount(&self) -> u64 {
        let raw = match self.category {
            RewardCategory::Bonus => self.locked_winnings,
            RewardCategory::Voucher => self.principal,
        };
        match self.max_payout {
            Some(cap) => raw.min(cap),
            None => raw,
        }
    }

    /// Idempotency key used for the ledger credit of this instance.
    pub fn credit_idempotency_key(&self) -> String {
        format!("reward-{}", self.id)
    }
}

/// A stake reported by the game session collaborator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StakeEvent {
    pub amount: u64,
    pub game_id: String,
    /// Winnings generated by this stake, as reported by the game session.
    #[serde(default)]
    pub win_amount: u64,
}
