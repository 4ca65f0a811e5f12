use crate::{
    config::MaxContractsConfig,
    event::AccountEvent,
    rules::{Breach, EnforcementAction, LockoutUntil, RiskRule, RuleId, StateView},
};
use vigil_store::LockoutKind;

/// R1: cap the account-wide contract count.
///
/// A count equal to the limit passes; strictly greater breaches. `count_type`
/// is configurable between `net` and `gross`, which currently alias the same
/// magnitude sum.
#[derive(Debug)]
pub struct MaxContracts {
    config: MaxContractsConfig,
}

impl MaxContracts {
    pub fn new(config: MaxContractsConfig) -> Self {
        Self { config }
    }
}

impl RiskRule for MaxContracts {
    fn id(&self) -> RuleId {
        RuleId::R1
    }

    fn enabled(&self) -> bool {
        self.config.enabled
    }

    fn check(&self, event: &AccountEvent, view: &StateView<'_>) -> Option<Breach> {
        let AccountEvent::Position(_) = event else {
            return None;
        };

        let count = view.state.position_count(view.account);
        if count <= self.config.limit {
            return None;
        }

        let mut actions = if self.config.reduce_to_limit {
            vec![EnforcementAction::ReduceAccountToNet {
                target: self.config.limit,
            }]
        } else {
            vec![EnforcementAction::CloseAllPositions]
        };
        if self.config.lockout_on_breach {
            actions.push(EnforcementAction::ApplyLockout {
                kind: LockoutKind::Hard,
                until: LockoutUntil::NextReset,
                reason: format!("contract limit exceeded ({count} > {})", self.config.limit),
            });
        }

        Some(
            Breach::new(
                RuleId::R1,
                format!(
                    "MaxContracts breach (net={count}, limit={})",
                    self.config.limit
                ),
                actions,
            )
            .with_details(serde_json::json!({
                "count": count,
                "limit": self.config.limit,
                "count_type": self.config.count_type,
            })),
        )
    }
}
