use crate::{
    config::TradeManagementConfig,
    event::AccountEvent,
    rules::{Breach, EnforcementAction, RiskRule, RuleId, StateView},
};
use fnv::FnvHashSet;
use parking_lot::Mutex;
use vigil_gateway::id::PositionId;

/// R12: place a protective stop automatically when a position opens without
/// one.
///
/// The pending-stop set doubles as the "no stop exists" signal. A stop is
/// requested at most once per position; the request mark clears once the
/// position leaves the pending set (stop observed or position closed).
#[derive(Debug)]
pub struct TradeManagement {
    config: TradeManagementConfig,
    requested: Mutex<FnvHashSet<PositionId>>,
}

impl TradeManagement {
    pub fn new(config: TradeManagementConfig) -> Self {
        Self {
            config,
            requested: Mutex::new(FnvHashSet::default()),
        }
    }
}

impl RiskRule for TradeManagement {
    fn id(&self) -> RuleId {
        RuleId::R12
    }

    fn enabled(&self) -> bool {
        self.config.enabled && self.config.auto_stop_loss
    }

    fn check(&self, event: &AccountEvent, view: &StateView<'_>) -> Option<Breach> {
        let AccountEvent::Position(position) = event else {
            return None;
        };
        if position.is_closed() {
            self.requested.lock().remove(&position.id);
            return None;
        }
        if !view.pending_stops.contains(position.id) {
            self.requested.lock().remove(&position.id);
            return None;
        }
        if !self.requested.lock().insert(position.id) {
            // Stop already requested; waiting for its order event.
            return None;
        }

        Some(
            Breach::new(
                RuleId::R12,
                format!(
                    "auto stop-loss {} ticks from entry",
                    self.config.stop_loss_ticks
                ),
                vec![EnforcementAction::PlaceStopLoss {
                    position: position.id,
                    offset_ticks: self.config.stop_loss_ticks,
                }],
            )
            .with_details(serde_json::json!({
                "position": position.id.0,
                "stop_loss_ticks": self.config.stop_loss_ticks,
            })),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::test_support::{Fixture, now, order, position};
    use rust_decimal_macros::dec;
    use vigil_gateway::types::{OrderKind, OrderSide, PositionSide};

    fn rule() -> TradeManagement {
        TradeManagement::new(TradeManagementConfig {
            enabled: true,
            auto_stop_loss: true,
            stop_loss_ticks: 10,
        })
    }

    #[test]
    fn test_unprotected_open_requests_stop_once() {
        let fixture = Fixture::new();
        let mnq = position(1, "CON.F.US.MNQ.U25", PositionSide::Long, 2, dec!(21000));
        fixture.state.update_position(&mnq).unwrap();
        fixture.pending_stops.track_if_unprotected(&mnq, &[], now());

        let rule = rule();
        let breach = rule
            .check(&AccountEvent::Position(mnq.clone()), &fixture.view(now()))
            .unwrap();
        assert_eq!(
            breach.actions,
            vec![EnforcementAction::PlaceStopLoss {
                position: mnq.id,
                offset_ticks: 10,
            }]
        );

        // A second position event while the stop is in flight is silent.
        assert!(
            rule.check(&AccountEvent::Position(mnq), &fixture.view(now()))
                .is_none()
        );
    }

    #[test]
    fn test_protected_position_needs_no_stop() {
        let fixture = Fixture::new();
        let mnq = position(1, "CON.F.US.MNQ.U25", PositionSide::Long, 2, dec!(21000));
        let stop = order(
            9,
            "CON.F.US.MNQ.U25",
            OrderKind::Stop,
            OrderSide::Sell,
            Some(dec!(20950)),
        );
        fixture.state.update_position(&mnq).unwrap();
        fixture
            .pending_stops
            .track_if_unprotected(&mnq, std::slice::from_ref(&stop), now());

        assert!(
            rule()
                .check(&AccountEvent::Position(mnq), &fixture.view(now()))
                .is_none()
        );
    }

    #[test]
    fn test_disabled_via_auto_stop_loss_flag() {
        let rule = TradeManagement::new(TradeManagementConfig {
            enabled: true,
            auto_stop_loss: false,
            stop_loss_ticks: 10,
        });
        assert!(!rule.enabled());
    }
}
