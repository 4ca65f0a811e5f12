use crate::{
    config::AuthLossGuardConfig,
    event::AccountEvent,
    rules::{Breach, EnforcementAction, LockoutUntil, RiskRule, RuleId, StateView},
};
use vigil_store::LockoutKind;

/// R10: the gateway revoked trading authorization.
///
/// Flatten everything and lock the account permanently; only an explicit
/// admin unlock reverses it.
#[derive(Debug)]
pub struct AuthLossGuard {
    config: AuthLossGuardConfig,
}

impl AuthLossGuard {
    pub fn new(config: AuthLossGuardConfig) -> Self {
        Self { config }
    }
}

impl RiskRule for AuthLossGuard {
    fn id(&self) -> RuleId {
        RuleId::R10
    }

    fn enabled(&self) -> bool {
        self.config.enabled
    }

    fn check(&self, event: &AccountEvent, _: &StateView<'_>) -> Option<Breach> {
        let AccountEvent::Account(update) = event else {
            return None;
        };
        if !update.authorization_lost() {
            return None;
        }

        Some(
            Breach::new(
                RuleId::R10,
                "trading authorization lost",
                vec![
                    EnforcementAction::CloseAllPositions,
                    EnforcementAction::CancelAllOrders,
                    EnforcementAction::ApplyLockout {
                        kind: LockoutKind::Permanent,
                        until: LockoutUntil::Permanent,
                        reason: "trading authorization lost".to_string(),
                    },
                ],
            )
            .with_details(serde_json::json!({
                "can_trade": update.can_trade,
            })),
        )
    }
}
