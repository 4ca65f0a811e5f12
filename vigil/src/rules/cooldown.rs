use crate::{
    config::{CooldownAfterLossConfig, CooldownTier},
    event::AccountEvent,
    rules::{Breach, EnforcementAction, RiskRule, RuleId, StateView},
};

/// R7: cooldown after a losing trade, tiered by loss size.
///
/// The most severe matching tier wins: with tiers at -100/-200/-300, a -350
/// trade takes the -300 tier's duration.
#[derive(Debug)]
pub struct CooldownAfterLoss {
    enabled: bool,
    /// Sorted most-negative first, so the first match is the most severe.
    tiers: Vec<CooldownTier>,
}

impl CooldownAfterLoss {
    pub fn new(config: CooldownAfterLossConfig) -> Self {
        let mut tiers = config.tiers;
        tiers.sort_by(|a, b| a.loss_amount.cmp(&b.loss_amount));
        Self {
            enabled: config.enabled,
            tiers,
        }
    }
}

impl RiskRule for CooldownAfterLoss {
    fn id(&self) -> RuleId {
        RuleId::R7
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn check(&self, event: &AccountEvent, _: &StateView<'_>) -> Option<Breach> {
        let AccountEvent::Trade(trade) = event else {
            return None;
        };
        if trade.voided {
            return None;
        }
        let pnl = trade.profit_and_loss?;
        if pnl >= rust_decimal::Decimal::ZERO {
            return None;
        }

        let tier = self.tiers.iter().find(|tier| pnl <= tier.loss_amount)?;

        Some(
            Breach::new(
                RuleId::R7,
                format!(
                    "loss of {pnl} - cooldown for {}s",
                    tier.cooldown_secs
                ),
                vec![EnforcementAction::StartCooldown {
                    duration_secs: tier.cooldown_secs,
                    reason: format!(
                        "loss of {pnl} - take a break for {}s",
                        tier.cooldown_secs
                    ),
                }],
            )
            .with_details(serde_json::json!({
                "pnl": pnl,
                "tier_loss_amount": tier.loss_amount,
                "cooldown_secs": tier.cooldown_secs,
            })),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::test_support::{Fixture, now, trade};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn rule() -> CooldownAfterLoss {
        // Deliberately unsorted input; the rule orders most-severe first.
        CooldownAfterLoss::new(CooldownAfterLossConfig {
            enabled: true,
            tiers: vec![
                CooldownTier { loss_amount: dec!(-100), cooldown_secs: 300 },
                CooldownTier { loss_amount: dec!(-300), cooldown_secs: 1800 },
                CooldownTier { loss_amount: dec!(-200), cooldown_secs: 900 },
            ],
        })
    }

    fn cooldown_secs(breach: &Breach) -> u64 {
        match breach.actions[0] {
            EnforcementAction::StartCooldown { duration_secs, .. } => duration_secs,
            _ => panic!("expected cooldown action"),
        }
    }

    /// S4: a -350 trade selects the -300 tier (most severe), not -100.
    #[test]
    fn test_most_severe_matching_tier_wins() {
        let fixture = Fixture::new();
        let rule = rule();

        let breach = rule
            .check(&AccountEvent::Trade(trade(1, Some(dec!(-350)))), &fixture.view(now()))
            .unwrap();
        assert_eq!(cooldown_secs(&breach), 1800);

        let breach = rule
            .check(&AccountEvent::Trade(trade(2, Some(dec!(-250)))), &fixture.view(now()))
            .unwrap();
        assert_eq!(cooldown_secs(&breach), 900);

        let breach = rule
            .check(&AccountEvent::Trade(trade(3, Some(dec!(-100)))), &fixture.view(now()))
            .unwrap();
        assert_eq!(cooldown_secs(&breach), 300);
    }

    #[test]
    fn test_small_losses_profits_and_half_turns_pass() {
        let fixture = Fixture::new();
        let rule = rule();

        for pnl in [Some(dec!(-99.99)), Some(dec!(50)), Some(Decimal::ZERO), None] {
            assert!(
                rule.check(&AccountEvent::Trade(trade(1, pnl)), &fixture.view(now()))
                    .is_none()
            );
        }
    }

    #[test]
    fn test_voided_trades_ignored() {
        let fixture = Fixture::new();
        let rule = rule();

        let mut fill = trade(1, Some(dec!(-400)));
        fill.voided = true;
        assert!(
            rule.check(&AccountEvent::Trade(fill), &fixture.view(now()))
                .is_none()
        );
    }
}
