use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum game identifier length accepted in an eligible-game set.
pub const MAX_GAME_ID_LENGTH: usize = 64;

/// Maximum number of entries in a template's eligible-game set.
pub const MAX_ELIGIBLE_GAMES: usize = 128;

/// Reward category. Vouchers are cash coupons that pay out their principal;
/// bonuses pay out the winnings locked up during wagering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RewardCategory {
    Bonus,
    Voucher,
}

impl RewardCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            RewardCategory::Bonus => "bonus",
            RewardCategory::Voucher => "voucher",
        }
    }
}

/// Errors produced when validating a catalog template.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("template {0}: principal must be greater than zero")]
    ZeroPrincipal(u64),
    #[error("template {0}: wagering multiplier must be greater than zero")]
    ZeroMultiplier(u64),
    #[error("template {0}: validity duration must be greater than zero")]
    ZeroValidity(u64),
    #[error("template {0}: vouchers cannot carry a max payout cap")]
    VoucherWithCap(u64),
    #[error("template {0}: game id {1:?} is not a valid identifier")]
    InvalidGameId(u64, String),
    #[error("template {0}: too many eligible games ({1})")]
    TooManyGames(u64, usize),
}

/// Immutable template a reward instance is minted from.
///
/// Templates are created by operator tooling, never mutated, and referenced by
/// id from every instance minted off them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardTemplate {
    pub id: u64,
    pub category: RewardCategory,
    /// Face value of the reward, in minor currency units.
    pub principal: u64,
    /// Wagering target = principal * multiplier.
    pub wagering_multiplier: u32,
    /// Cap applied to the credited payout on completion (bonus only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_payout: Option<u64>,
    /// Seconds from mint until the instance expires.
    pub validity_secs: u64,
    /// Games whose stakes count toward the wagering target. Empty = all games.
    #[serde(default)]
    pub eligible_games: Vec<String>,
    /// Settlement requires an explicit player claim (jackpot-style rewards).
    #[serde(default)]
    pub requires_claim: bool,
}

impl RewardTemplate {
    /// Cumulative stake required before an instance of this template settles.
    pub fn wagering_target(&self) -> u64 {
        self.principal.saturating_mul(self.wagering_multiplier as u64)
    }

    /// Validate invariants that hold for every template in the catalog.
    pub fn validate(&self) -> Result<(), TemplateError> {
        if self.principal == 0 {
            return Err(TemplateError::ZeroPrincipal(self.id));
        }
        if self.wagering_multiplier == 0 {
            return Err(TemplateError::ZeroMultiplier(self.id));
        }
        if self.validity_secs == 0 {
            return Err(TemplateError::ZeroValidity(self.id));
        }
        if self.category == RewardCategory::Voucher && self.max_payout.is_some() {
            return Err(TemplateError::VoucherWithCap(self.id));
        }
        if self.eligible_games.len() > MAX_ELIGIBLE_GAMES {
            return Err(TemplateError::TooManyGames(self.id, self.eligible_games.len()));
        }
        for game in &self.eligible_games {
            if game.is_empty() || game.len() > MAX_GAME_ID_LENGTH {
                return Err(TemplateError::InvalidGameId(self.id, game.clone()));
            }
        }
        Ok(())
    }
}
