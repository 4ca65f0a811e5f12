use crate::{
    config::{MaxUnrealizedProfitConfig, ProfitMode},
    event::AccountEvent,
    rules::{Breach, EnforcementAction, RiskRule, RuleId, StateView},
    state::pnl::{position_unrealized, to_cents},
};
use fnv::FnvHashSet;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use vigil_gateway::id::PositionId;

/// R5: per-position profit exit.
///
/// `profit_target` mode closes a position once its unrealized gain reaches
/// the target. `breakeven` mode arms a position after it has traded below
/// minus one tick value, then closes it the first time it recovers to flat
/// or better.
#[derive(Debug)]
pub struct MaxUnrealizedProfit {
    config: MaxUnrealizedProfitConfig,
    /// Positions that have been underwater past one tick (breakeven mode).
    armed: Mutex<FnvHashSet<PositionId>>,
}

impl MaxUnrealizedProfit {
    pub fn new(config: MaxUnrealizedProfitConfig) -> Self {
        Self {
            config,
            armed: Mutex::new(FnvHashSet::default()),
        }
    }
}

impl RiskRule for MaxUnrealizedProfit {
    fn id(&self) -> RuleId {
        RuleId::R5
    }

    fn enabled(&self) -> bool {
        self.config.enabled
    }

    fn check(&self, event: &AccountEvent, view: &StateView<'_>) -> Option<Breach> {
        let AccountEvent::Quote(_) = event else {
            return None;
        };

        let positions = view.state.positions(view.account);

        // Drop armed marks for positions that no longer exist.
        {
            let mut armed = self.armed.lock();
            armed.retain(|id| positions.iter().any(|position| position.id == *id));
        }

        let mut actions = Vec::new();
        let mut closed = Vec::new();

        for position in &positions {
            let Some(unrealized) = position_unrealized(
                position,
                view.quotes,
                view.contracts,
                view.quote_stale_after,
                view.now,
            ) else {
                continue;
            };
            let value = to_cents(unrealized.value);

            let close = match self.config.mode {
                ProfitMode::ProfitTarget => value >= self.config.profit_target,
                ProfitMode::Breakeven => {
                    let tick_value = view
                        .contracts
                        .peek(&position.contract_id)
                        .map(|contract| contract.tick_value)
                        .unwrap_or(Decimal::ZERO);

                    let mut armed = self.armed.lock();
                    if value < -tick_value {
                        armed.insert(position.id);
                        false
                    } else {
                        value >= Decimal::ZERO && armed.contains(&position.id)
                    }
                }
            };

            if close {
                closed.push(serde_json::json!({
                    "position": position.id.0,
                    "unrealized": value,
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

        let reason = match self.config.mode {
            ProfitMode::ProfitTarget => format!(
                "profit target reached (target={})",
                self.config.profit_target
            ),
            ProfitMode::Breakeven => "breakeven recovery exit".to_string(),
        };

        Some(Breach::new(RuleId::R5, reason, actions).with_details(serde_json::json!({
            "mode": self.config.mode,
            "positions": closed,
        })))
    }
}
