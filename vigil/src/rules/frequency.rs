use crate::{
    config::{FrequencyWindow, TradeFrequencyConfig},
    event::AccountEvent,
    rules::{Breach, EnforcementAction, RiskRule, RuleId, StateView},
};

/// R6: trade frequency limit over a configured window.
///
/// Strictly-greater boundary: hitting `max_trades` exactly is allowed, one
/// more starts the cooldown.
#[derive(Debug)]
pub struct TradeFrequencyLimit {
    config: TradeFrequencyConfig,
}

impl TradeFrequencyLimit {
    pub fn new(config: TradeFrequencyConfig) -> Self {
        Self { config }
    }
}

impl RiskRule for TradeFrequencyLimit {
    fn id(&self) -> RuleId {
        RuleId::R6
    }

    fn enabled(&self) -> bool {
        self.config.enabled
    }

    fn check(&self, event: &AccountEvent, view: &StateView<'_>) -> Option<Breach> {
        let AccountEvent::Trade(_) = event else {
            return None;
        };

        let counts = view.trades.counts(view.account, view.now);
        let count = match self.config.window {
            FrequencyWindow::Minute => counts.minute,
            FrequencyWindow::Hour => counts.hour,
            FrequencyWindow::Session => counts.session,
        };

        if count <= self.config.max_trades {
            return None;
        }

        Some(
            Breach::new(
                RuleId::R6,
                format!(
                    "trade frequency limit hit ({count} trades in {:?} window, limit={})",
                    self.config.window, self.config.max_trades
                ),
                vec![EnforcementAction::StartCooldown {
                    duration_secs: self.config.cooldown_secs,
                    reason: format!(
                        "overtrading: {count} trades exceeds limit of {}",
                        self.config.max_trades
                    ),
                }],
            )
            .with_details(serde_json::json!({
                "count": count,
                "limit": self.config.max_trades,
                "window": self.config.window,
            })),
        )
    }
}
