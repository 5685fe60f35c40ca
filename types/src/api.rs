use crate::catalog::RewardCategory;
use crate::instance::{InstanceStatus, RewardInstance};
use serde::{Deserialize, Serialize};

/// Read model of a reward instance as returned by the API.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceView {
    pub id: u64,
    pub template_id: u64,
    pub category: RewardCategory,
    pub status: InstanceStatus,
    pub principal: u64,
    pub wagering_current: u64,
    pub wagering_target: u64,
    pub locked_winnings: u64,
    pub expires_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_rank: Option<u64>,
}

impl From<&RewardInstance> for InstanceView {
    fn from(instance: &RewardInstance) -> Self {
        Self {
            id: instance.id,
            template_id: instance.template_id,
            category: instance.category,
            status: instance.status,
            principal: instance.principal,
            wagering_current: instance.progress.current,
            wagering_target: instance.progress.target,
            locked_winnings: instance.locked_winnings,
            expires_at: instance.expires_at,
            queue_rank: instance.queue_rank,
        }
    }
}

/// A player's queue: the active instance first, then queued instances by rank.
/// Terminal instances are excluded unless explicitly requested.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueView {
    pub player: String,
    pub entries: Vec<InstanceView>,
}

/// Outcome of one expiration sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub players_scanned: u64,
    pub instances_expired: u64,
}

/// Outcome of one settlement retry pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementOutcome {
    pub settled: u64,
    pub pending: u64,
}
