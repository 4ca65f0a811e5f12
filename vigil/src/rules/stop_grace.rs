use crate::{
    config::NoStopLossGraceConfig,
    event::AccountEvent,
    rules::{Breach, EnforcementAction, RiskRule, RuleId, StateView},
};
use chrono::TimeDelta;

/// R8: positions must see a qualifying protective stop within the grace
/// period.
///
/// The pending-stop set is maintained by the engine as position/order events
/// flow; this rule fires on the periodic sweep (and re-checks on position
/// events) for entries strictly older than the grace period. Elapsed time
/// exactly equal to the grace period is still within it.
#[derive(Debug)]
pub struct NoStopLossGrace {
    config: NoStopLossGraceConfig,
}

impl NoStopLossGrace {
    pub fn new(config: NoStopLossGraceConfig) -> Self {
        Self { config }
    }
}

impl RiskRule for NoStopLossGrace {
    fn id(&self) -> RuleId {
        RuleId::R8
    }

    fn enabled(&self) -> bool {
        self.config.enabled
    }

    fn check(&self, event: &AccountEvent, view: &StateView<'_>) -> Option<Breach> {
        match event {
            AccountEvent::GraceSweep | AccountEvent::Position(_) | AccountEvent::Order(_) => {}
            _ => return None,
        }

        let grace = TimeDelta::seconds(self.config.grace_period_secs as i64);
        let overdue = view.pending_stops.overdue(view.account, grace, view.now);
        if overdue.is_empty() {
            return None;
        }

        let mut actions = Vec::new();
        let mut positions = Vec::new();
        for entry in &overdue {
            positions.push(serde_json::json!({
                "position": entry.position.0,
                "elapsed_secs": (view.now - entry.opened_at).num_seconds(),
            }));
            let action = EnforcementAction::CloseContract {
                contract: entry.contract.clone(),
            };
            if !actions.contains(&action) {
                actions.push(action);
            }
        }

        Some(
            Breach::new(
                RuleId::R8,
                format!(
                    "no protective stop within {}s grace period",
                    self.config.grace_period_secs
                ),
                actions,
            )
            .with_details(serde_json::json!({
                "grace_period_secs": self.config.grace_period_secs,
                "positions": positions,
            })),
        )
    }
}
