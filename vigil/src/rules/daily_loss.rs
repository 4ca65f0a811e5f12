use crate::{
    config::{DailyRealizedLossConfig, LockoutUntilConfig},
    event::AccountEvent,
    rules::{Breach, EnforcementAction, LockoutUntil, RiskRule, RuleId, StateView},
    state::pnl::to_cents,
};
use vigil_store::LockoutKind;

/// R3: daily realized loss limit.
///
/// Inclusive boundary: realized exactly at `-loss_limit` breaches. Fires on
/// full-turn fills only (half-turns carry no pnl) and flattens the account:
/// close-all, cancel-all, hard lockout until the configured expiry.
#[derive(Debug)]
pub struct DailyRealizedLoss {
    config: DailyRealizedLossConfig,
}

impl DailyRealizedLoss {
    pub fn new(config: DailyRealizedLossConfig) -> Self {
        Self { config }
    }
}

impl RiskRule for DailyRealizedLoss {
    fn id(&self) -> RuleId {
        RuleId::R3
    }

    fn enabled(&self) -> bool {
        self.config.enabled
    }

    fn check(&self, event: &AccountEvent, view: &StateView<'_>) -> Option<Breach> {
        let AccountEvent::Trade(trade) = event else {
            return None;
        };
        if trade.is_half_turn() || trade.voided {
            return None;
        }

        let realized = to_cents(view.pnl.daily_realized(view.account));
        let limit = -self.config.loss_limit;
        if realized > limit {
            return None;
        }

        let until = match self.config.lockout {
            LockoutUntilConfig::DailyReset => LockoutUntil::NextReset,
            LockoutUntilConfig::Hours(hours) => LockoutUntil::After { hours },
        };

        Some(
            Breach::new(
                RuleId::R3,
                format!(
                    "daily realized loss limit hit (realized={realized}, limit={limit})"
                ),
                vec![
                    EnforcementAction::CloseAllPositions,
                    EnforcementAction::CancelAllOrders,
                    EnforcementAction::ApplyLockout {
                        kind: LockoutKind::Hard,
                        until,
                        reason: format!("daily realized loss limit hit ({realized})"),
                    },
                ],
            )
            .with_details(serde_json::json!({
                "realized": realized,
                "loss_limit": self.config.loss_limit,
            })),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::test_support::{Fixture, now, trade};
    use rust_decimal_macros::dec;

    fn rule() -> DailyRealizedLoss {
        DailyRealizedLoss::new(DailyRealizedLossConfig {
            enabled: true,
            loss_limit: dec!(500),
            lockout: LockoutUntilConfig::DailyReset,
        })
    }

    #[test]
    fn test_limit_is_inclusive() {
        let fixture = Fixture::new();
        let rule = rule();

        // -200, -250: total -450, above the limit.
        for (id, pnl) in [(1, dec!(-200)), (2, dec!(-250))] {
            let fill = trade(id, Some(pnl));
            fixture.pnl.apply_trade(&fill).unwrap();
            assert!(
                rule.check(&AccountEvent::Trade(fill), &fixture.view(now()))
                    .is_none()
            );
        }

        // -50 more lands exactly on -500: inclusive breach.
        let fill = trade(3, Some(dec!(-50)));
        fixture.pnl.apply_trade(&fill).unwrap();
        let breach = rule
            .check(&AccountEvent::Trade(fill), &fixture.view(now()))
            .unwrap();

        assert_eq!(breach.rule, RuleId::R3);
        assert_eq!(breach.actions.len(), 3);
        assert!(matches!(breach.actions[0], EnforcementAction::CloseAllPositions));
        assert!(matches!(breach.actions[1], EnforcementAction::CancelAllOrders));
        assert!(matches!(
            breach.actions[2],
            EnforcementAction::ApplyLockout {
                kind: LockoutKind::Hard,
                until: LockoutUntil::NextReset,
                ..
            }
        ));
    }

    #[test]
    fn test_half_turns_never_trigger() {
        let fixture = Fixture::new();
        let rule = rule();

        fixture.pnl.apply_trade(&trade(1, Some(dec!(-600)))).unwrap();

        // A half-turn fill after the threshold does not fire the rule; the
        // next full-turn will.
        let half_turn = trade(2, None);
        assert!(
            rule.check(&AccountEvent::Trade(half_turn), &fixture.view(now()))
                .is_none()
        );
    }
}
