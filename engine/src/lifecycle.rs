//! Lifecycle state machine for reward instances.
//!
//! Pure transition validation, separated from storage and queue concerns. The
//! engine asks this module whether a transition is legal before applying it;
//! anything that reaches `apply_transition` has already passed its guards.
//!
//! ```text
//! queued -> active <-> locked
//! active/locked -> pending_claim (claim-requiring templates, target met)
//! active/locked/pending_claim -> completed (target met / claimed)
//! queued/active/locked/pending_claim -> void (forfeiture)
//! queued/active/locked -> expired (validity window elapsed)
//! ```

use promolane_types::{InstanceStatus, RewardError, RewardInstance};

/// Whether the bare `from -> to` edge exists in the transition graph,
/// independent of data guards.
pub fn edge_exists(from: InstanceStatus, to: InstanceStatus) -> bool {
    use InstanceStatus::*;
    matches!(
        (from, to),
        (Queued, Active)
            | (Active, Locked)
            | (Locked, Active)
            | (Active, PendingClaim)
            | (Locked, PendingClaim)
            | (Active, Completed)
            | (Locked, Completed)
            | (PendingClaim, Completed)
            | (Queued, Void)
            | (Active, Void)
            | (Locked, Void)
            | (PendingClaim, Void)
            | (Queued, Expired)
            | (Active, Expired)
            | (Locked, Expired)
    )
}

/// Validate a transition against the graph and the instance's data guards.
pub fn check_transition(
    instance: &RewardInstance,
    to: InstanceStatus,
    now: u64,
) -> Result<(), RewardError> {
    let from = instance.status;
    let invalid = || RewardError::InvalidTransition {
        instance: instance.id,
        from,
        to,
    };

    if from.is_terminal() || !edge_exists(from, to) {
        return Err(invalid());
    }

    match to {
        // Completion is triggered solely by the target being met (or by an
        // explicit claim on an instance that already met it).
        InstanceStatus::Completed | InstanceStatus::PendingClaim => {
            if !instance.progress.is_met() {
                return Err(invalid());
            }
            if to == InstanceStatus::PendingClaim && !instance.requires_claim {
                return Err(invalid());
            }
        }
        InstanceStatus::Expired => {
            if !instance.is_overdue(now) {
                return Err(invalid());
            }
        }
        // An instance whose validity window elapsed while queued must expire,
        // never activate.
        InstanceStatus::Active => {
            if instance.is_overdue(now) {
                return Err(invalid());
            }
        }
        InstanceStatus::Locked => {
            if instance.locked_winnings == 0 {
                return Err(invalid());
            }
        }
        _ => {}
    }

    Ok(())
}

/// Apply a validated transition, maintaining the status/rank coupling.
pub fn apply_transition(instance: &mut RewardInstance, to: InstanceStatus) {
    instance.status = to;
    if to != InstanceStatus::Queued {
        instance.queue_rank = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use promolane_types::{RewardCategory, RewardTemplate};

    fn instance(status: InstanceStatus) -> RewardInstance {
        let template = RewardTemplate {
            id: 1,
            category: RewardCategory::Bonus,
            principal: 100,
            wagering_multiplier: 10,
            max_payout: None,
            validity_secs: 60,
            eligible_games: vec![],
            requires_claim: false,
        };
        let mut instance = RewardInstance::mint(1, "p1", &template, 0);
        instance.status = status;
        instance
    }

    #[test]
    fn terminal_states_reject_everything() {
        for terminal in [
            InstanceStatus::Completed,
            InstanceStatus::Expired,
            InstanceStatus::Void,
        ] {
            for to in [
                InstanceStatus::Queued,
                InstanceStatus::Active,
                InstanceStatus::Locked,
                InstanceStatus::PendingClaim,
                InstanceStatus::Completed,
                InstanceStatus::Expired,
                InstanceStatus::Void,
            ] {
                let result = check_transition(&instance(terminal), to, u64::MAX);
                assert!(
                    matches!(result, Err(RewardError::InvalidTransition { .. })),
                    "{terminal} -> {to} should be rejected"
                );
            }
        }
    }

    #[test]
    fn completion_requires_target_met() {
        let mut active = instance(InstanceStatus::Active);
        assert!(check_transition(&active, InstanceStatus::Completed, 0).is_err());
        active.progress.accumulate(1_000);
        assert!(check_transition(&active, InstanceStatus::Completed, 0).is_ok());
    }

    #[test]
    fn pending_claim_requires_flag_and_target() {
        let mut active = instance(InstanceStatus::Active);
        active.progress.accumulate(1_000);
        assert!(check_transition(&active, InstanceStatus::PendingClaim, 0).is_err());
        active.requires_claim = true;
        assert!(check_transition(&active, InstanceStatus::PendingClaim, 0).is_ok());
    }

    #[test]
    fn expiry_requires_overdue() {
        let queued = instance(InstanceStatus::Queued);
        assert!(check_transition(&queued, InstanceStatus::Expired, 59).is_err());
        assert!(check_transition(&queued, InstanceStatus::Expired, 60).is_ok());
    }

    #[test]
    fn lock_requires_winnings() {
        let mut active = instance(InstanceStatus::Active);
        assert!(check_transition(&active, InstanceStatus::Locked, 0).is_err());
        active.locked_winnings = 50;
        assert!(check_transition(&active, InstanceStatus::Locked, 0).is_ok());
    }

    #[test]
    fn overdue_instance_cannot_activate() {
        let queued = instance(InstanceStatus::Queued);
        assert!(check_transition(&queued, InstanceStatus::Active, 59).is_ok());
        assert!(check_transition(&queued, InstanceStatus::Active, 60).is_err());
    }

    #[test]
    fn queued_cannot_complete_directly() {
        let mut queued = instance(InstanceStatus::Queued);
        queued.progress.accumulate(1_000);
        assert!(check_transition(&queued, InstanceStatus::Completed, 0).is_err());
    }

    #[test]
    fn pending_claim_never_expires() {
        let pending = instance(InstanceStatus::PendingClaim);
        assert!(check_transition(&pending, InstanceStatus::Expired, u64::MAX).is_err());
    }

    #[test]
    fn forfeiture_edges() {
        for from in [
            InstanceStatus::Queued,
            InstanceStatus::Active,
            InstanceStatus::Locked,
            InstanceStatus::PendingClaim,
        ] {
            assert!(
                check_transition(&instance(from), InstanceStatus::Void, 0).is_ok(),
                "{from} -> void should be allowed"
            );
        }
    }

    #[test]
    fn apply_clears_rank_when_leaving_queue() {
        let mut queued = instance(InstanceStatus::Queued);
        queued.queue_rank = Some(2);
        apply_transition(&mut queued, InstanceStatus::Active);
        assert_eq!(queued.status, InstanceStatus::Active);
        assert_eq!(queued.queue_rank, None);
    }
}
