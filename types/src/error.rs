use crate::instance::InstanceStatus;
use thiserror::Error;

/// Domain errors returned to callers of the reward engine.
///
/// All of these are expected request outcomes except `InvalidTransition`,
/// which indicates a sequencing bug in the caller and is logged at high
/// severity by the engine.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum RewardError {
    #[error("template {0} not found")]
    TemplateNotFound(u64),

    #[error("player {player:?} is not eligible for template {template}")]
    PlayerIneligible { player: String, template: u64 },

    #[error("reward instance {0} not found")]
    InstanceNotFound(u64),

    #[error("reward instance {0} belongs to another player")]
    NotOwner(u64),

    #[error("reward instance {instance} is not queued (status {status})")]
    NotQueued {
        instance: u64,
        status: InstanceStatus,
    },

    #[error("reward instance {instance} is already terminal (status {status})")]
    AlreadyTerminal {
        instance: u64,
        status: InstanceStatus,
    },

    #[error("reward instance {instance} is not awaiting claim (status {status})")]
    NotClaimable {
        instance: u64,
        status: InstanceStatus,
    },

    #[error("invalid transition for instance {instance}: {from} -> {to}")]
    InvalidTransition {
        instance: u64,
        from: InstanceStatus,
        to: InstanceStatus,
    },
}

impl RewardError {
    /// Stable machine-readable code for API consumers.
    pub fn code(&self) -> &'static str {
        match self {
            RewardError::TemplateNotFound(_) => "TEMPLATE_NOT_FOUND",
            RewardError::PlayerIneligible { .. } => "PLAYER_INELIGIBLE",
            RewardError::InstanceNotFound(_) => "INSTANCE_NOT_FOUND",
            RewardError::NotOwner(_) => "NOT_OWNER",
            RewardError::NotQueued { .. } => "NOT_QUEUED",
            RewardError::AlreadyTerminal { .. } => "ALREADY_TERMINAL",
            RewardError::NotClaimable { .. } => "NOT_CLAIMABLE",
            RewardError::InvalidTransition { .. } => "INVALID_TRANSITION",
        }
    }
}
