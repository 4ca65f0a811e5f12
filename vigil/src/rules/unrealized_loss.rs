use crate::{
    config::{DailyUnrealizedLossConfig, UnrealizedScope},
    event::AccountEvent,
    rules::{Breach, EnforcementAction, LockoutUntil, RiskRule, RuleId, StateView},
    state::pnl::{account_unrealized, position_unrealized, to_cents},
};
use tracing::warn;
use vigil_store::LockoutKind;

/// R4: unrealized loss limit, per position or account-total by scope.
///
/// Inclusive-exclusive boundary per the catalog: a position sitting exactly
/// at `-loss_limit` does not breach; strictly beyond does. Stale quotes are
/// evaluated anyway (flagged in the breach details) - hiding a loss behind a
/// slow feed is worse than enforcing on an old price.
#[derive(Debug)]
pub struct DailyUnrealizedLoss {
    config: DailyUnrealizedLossConfig,
}

impl DailyUnrealizedLoss {
    pub fn new(config: DailyUnrealizedLossConfig) -> Self {
        Self { config }
    }

    fn lockout_action(&self) -> Option<EnforcementAction> {
        self.config.lockout.then(|| EnforcementAction::ApplyLockout {
            kind: LockoutKind::Hard,
            until: LockoutUntil::NextReset,
            reason: "unrealized loss limit hit".to_string(),
        })
    }
}

impl RiskRule for DailyUnrealizedLoss {
    fn id(&self) -> RuleId {
        RuleId::R4
    }

    fn enabled(&self) -> bool {
        self.config.enabled
    }

    fn check(&self, event: &AccountEvent, view: &StateView<'_>) -> Option<Breach> {
        let AccountEvent::Quote(_) = event else {
            return None;
        };
        let limit = -self.config.loss_limit;

        match self.config.scope {
            UnrealizedScope::PerPosition => {
                let mut actions = Vec::new();
                let mut offenders = Vec::new();
                let mut any_stale = false;

                for position in view.state.positions(view.account) {
                    let Some(unrealized) = position_unrealized(
                        &position,
                        view.quotes,
                        view.contracts,
                        view.quote_stale_after,
                        view.now,
                    ) else {
                        continue;
                    };

                    if to_cents(unrealized.value) < limit {
                        if unrealized.stale {
                            warn!(
                                position = %position.id,
                                "enforcing unrealized loss on a stale quote"
                            );
                            any_stale = true;
                        }
                        offenders.push(serde_json::json!({
                            "position": position.id.0,
                            "unrealized": to_cents(unrealized.value),
                        }));
                        let action = EnforcementAction::CloseContract {
                            contract: position.contract_id.clone(),
                        };
                        if !actions.contains(&action) {
                            actions.push(action);
                        }
                    }
                }

                if actions.is_empty() {
                    return None;
                }
                actions.extend(self.lockout_action());

                Some(
                    Breach::new(
                        RuleId::R4,
                        format!("unrealized loss limit hit (limit={limit})"),
                        actions,
                    )
                    .with_details(serde_json::json!({
                        "scope": "per_position",
                        "offenders": offenders,
                        "stale": any_stale,
                    })),
                )
            }
            UnrealizedScope::Total => {
                let total = account_unrealized(
                    view.account,
                    view.state,
                    view.quotes,
                    view.contracts,
                    view.quote_stale_after,
                    view.now,
                );
                if to_cents(total.value) >= limit {
                    return None;
                }

                let mut actions = vec![EnforcementAction::CloseAllPositions];
                actions.extend(self.lockout_action());

                Some(
                    Breach::new(
                        RuleId::R4,
                        format!(
                            "account unrealized loss limit hit (total={}, limit={limit})",
                            to_cents(total.value)
                        ),
                        actions,
                    )
                    .with_details(serde_json::json!({
                        "scope": "total",
                        "total": to_cents(total.value),
                        "stale": total.stale,
                        "skipped_positions": total.skipped,
                    })),
                )
            }
        }
    }
}
