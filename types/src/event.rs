use serde::Serialize;

/// Observable mutations emitted by the engine.
///
/// Every public operation returns the events it produced; the API service also
/// receives them on a broadcast feed for structured logging.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RewardEvent {
    Minted {
        player: String,
        instance: u64,
        template: u64,
    },
    /// The instance became the player's single active instance.
    Activated { player: String, instance: u64 },
    /// The instance was reordered to be next in line after the active one.
    Promoted {
        player: String,
        instance: u64,
        rank: u64,
    },
    Progress {
        player: String,
        instance: u64,
        current: u64,
        target: u64,
    },
    /// A bonus instance accrued winnings and entered the locked sub-state.
    WinningsLocked {
        player: String,
        instance: u64,
        locked_winnings: u64,
    },
    /// A claim-requiring instance met its target and awaits the player.
    AwaitingClaim { player: String, instance: u64 },
    Completed {
        player: String,
        instance: u64,
        payout: u64,
    },
    /// The ledger confirmed the payout credit.
    CreditSettled {
        player: String,
        instance: u64,
        amount: u64,
    },
    /// The ledger credit failed and will be retried with the same key.
    CreditPending {
        player: String,
        instance: u64,
        amount: u64,
    },
    Voided { player: String, instance: u64 },
    Expired { player: String, instance: u64 },
}

impl RewardEvent {
    pub fn player(&self) -> &str {
        match self {
            RewardEvent::Minted { player, .. }
            | RewardEvent::Activated { player, .. }
            | RewardEvent::Promoted { player, .. }
            | RewardEvent::Progress { player, .. }
            | RewardEvent::WinningsLocked { player, .. }
            | RewardEvent::AwaitingClaim { player, .. }
            | RewardEvent::Completed { player, .. }
            | RewardEvent::CreditSettled { player, .. }
            | RewardEvent::CreditPending { player, .. }
            | RewardEvent::Voided { player, .. }
            | RewardEvent::Expired { player, .. } => player,
        }
    }

    pub fn instance(&self) -> u64 {
        match self {
            RewardEvent::Minted { instance, .. }
            | RewardEvent::Activated { instance, .. }
            | RewardEvent::Promoted { instance, .. }
            | RewardEvent::Progress { instance, .. }
            | RewardEvent::WinningsLocked { instance, .. }
            | RewardEvent::AwaitingClaim { instance, .. }
            | RewardEvent::Completed { instance, .. }
            | RewardEvent::CreditSettled { instance, .. }
            | RewardEvent::CreditPending { instance, .. }
            | RewardEvent::Voided { instance, .. }
            | RewardEvent::Expired { instance, .. } => *instance,
        }
    }
}
