//! Tier gate: the first check every request passes through.
//!
//! Pure functions only. Gating runs before any host lookup or cooldown
//! mutation, so a denied request leaves nothing behind except its record.

use crate::policy::ActionPolicy;
use crate::types::{Denial, Tier};

/// Whether an agent at `agent` may run a playbook requiring `required`.
///
/// Fails closed: an unknown agent tier is never authorized.
pub fn authorize(agent: Option<Tier>, required: Tier) -> bool {
    matches!(agent, Some(tier) if tier >= required)
}

/// Effective floor for a playbook: a playbook may raise its action's policy
/// minimum but never lower it.
pub fn effective_min_tier(playbook_min: Tier, policy: &ActionPolicy) -> Tier {
    playbook_min.max(policy.min_tier)
}

/// Gate a request, returning the denial to record when it is refused.
pub fn check(agent: Option<Tier>, required: Tier) -> Result<(), Denial> {
    if authorize(agent, required) {
        Ok(())
    } else {
        Err(Denial::Tier { agent, required })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::default_policy;
    use crate::types::ActionKind;

    #[test]
    fn authorize_over_all_pairs() {
        for agent in Tier::all() {
            for required in Tier::all() {
                assert_eq!(
                    authorize(Some(*agent), *required),
                    agent >= required,
                    "agent={agent} required={required}"
                );
            }
        }
    }

    #[test]
    fn unknown_tier_is_always_denied() {
        for required in Tier::all() {
            assert!(!authorize(None, *required));
        }
    }

    #[test]
    fn playbook_cannot_lower_policy_floor() {
        let redeploy = default_policy(ActionKind::Redeploy);
        assert_eq!(effective_min_tier(Tier::Tier1, &redeploy), Tier::Tier2);
        assert_eq!(effective_min_tier(Tier::Tier3, &redeploy), Tier::Tier3);
    }

    #[test]
    fn check_reports_agent_and_requirement() {
        let denial = check(Some(Tier::Tier1), Tier::Tier3).unwrap_err();
        assert_eq!(
            denial,
            Denial::Tier {
                agent: Some(Tier::Tier1),
                required: Tier::Tier3
            }
        );
        assert!(check(Some(Tier::Tier3), Tier::Tier3).is_ok());
    }
}
