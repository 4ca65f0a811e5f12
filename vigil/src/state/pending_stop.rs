use chrono::{DateTime, TimeDelta, Utc};
use fnv::FnvHashMap;
use parking_lot::RwLock;
use tracing::debug;
use vigil_gateway::{
    id::{AccountId, ContractId, PositionId},
    types::{OrderSide, OrderSnapshot, PositionSide, PositionSnapshot},
};

/// A position that has not yet seen a qualifying protective stop, tagged with
/// its open time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingStop {
    pub position: PositionId,
    pub account: AccountId,
    pub contract: ContractId,
    pub opened_at: DateTime<Utc>,
}

/// The pending-stop set shared by Rule 8 (grace enforcement) and Rule 12
/// (auto stop placement).
///
/// A position enters on open (unless already protected), leaves when any
/// qualifying order is observed or the position closes.
#[derive(Debug, Default)]
pub struct PendingStopTracker {
    inner: RwLock<FnvHashMap<PositionId, PendingStop>>,
}

/// Stop-loss qualification: a protective stop for position `P` is a working
/// stop-kind order on the same contract whose stop price sits on the losing
/// side of the entry price.
pub fn qualifies_as_stop(order: &OrderSnapshot, position: &PositionSnapshot) -> bool {
    if order.contract_id != position.contract_id {
        return false;
    }
    if !order.kind.is_stop_kind() || !order.status.is_working() {
        return false;
    }
    let Some(stop_price) = order.stop_price else {
        return false;
    };

    match position.side {
        PositionSide::Long => {
            order.side == OrderSide::Sell && stop_price < position.average_price
        }
        PositionSide::Short => {
            order.side == OrderSide::Buy && stop_price > position.average_price
        }
    }
}

impl PendingStopTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a newly opened position unless one of `working_orders` already
    /// protects it.
    pub fn track_if_unprotected(
        &self,
        position: &PositionSnapshot,
        working_orders: &[OrderSnapshot],
        opened_at: DateTime<Utc>,
    ) {
        if working_orders
            .iter()
            .any(|order| qualifies_as_stop(order, position))
        {
            return;
        }

        self.inner.write().insert(
            position.id,
            PendingStop {
                position: position.id,
                account: position.account_id,
                contract: position.contract_id.clone(),
                opened_at,
            },
        );
        debug!(position = %position.id, "position awaiting protective stop");
    }

    /// An order event arrived: release every tracked position it protects.
    pub fn observe_order(&self, order: &OrderSnapshot, positions: &[PositionSnapshot]) {
        let protected: Vec<PositionId> = positions
            .iter()
            .filter(|position| qualifies_as_stop(order, position))
            .map(|position| position.id)
            .collect();

        if protected.is_empty() {
            return;
        }

        let mut inner = self.inner.write();
        for id in protected {
            if inner.remove(&id).is_some() {
                debug!(position = %id, order = %order.id, "protective stop observed");
            }
        }
    }

    /// The position closed (or was enforced away).
    pub fn remove(&self, position: PositionId) -> bool {
        self.inner.write().remove(&position).is_some()
    }

    pub fn contains(&self, position: PositionId) -> bool {
        self.inner.read().contains_key(&position)
    }

    pub fn entries_for(&self, account: AccountId) -> Vec<PendingStop> {
        self.inner
            .read()
            .values()
            .filter(|entry| entry.account == account)
            .cloned()
            .collect()
    }

    /// Entries whose grace window has elapsed: `now - opened_at` strictly
    /// greater than `grace`.
    pub fn overdue(&self, account: AccountId, grace: TimeDelta, now: DateTime<Utc>) -> Vec<PendingStop> {
        self.inner
            .read()
            .values()
            .filter(|entry| entry.account == account && now - entry.opened_at > grace)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use vigil_gateway::{
        id::OrderId,
        types::{OrderKind, OrderStatus},
    };

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn long_position() -> PositionSnapshot {
        PositionSnapshot {
            id: PositionId::new(1),
            account_id: AccountId::new(12345),
            contract_id: ContractId::new("CON.F.US.MNQ.U25"),
            side: PositionSide::Long,
            size: 2,
            average_price: dec!(21000),
            creation_timestamp: now(),
        }
    }

    fn stop_order(side: OrderSide, kind: OrderKind, stop_price: rust_decimal::Decimal) -> OrderSnapshot {
        OrderSnapshot {
            id: OrderId::new(9),
            account_id: AccountId::new(12345),
            contract_id: ContractId::new("CON.F.US.MNQ.U25"),
            kind,
            side,
            size: 2,
            limit_price: None,
            stop_price: Some(stop_price),
            status: OrderStatus::Open,
            creation_timestamp: now(),
        }
    }

    #[test]
    fn test_long_qualification_requires_sell_below_entry() {
        let position = long_position();

        assert!(qualifies_as_stop(
            &stop_order(OrderSide::Sell, OrderKind::Stop, dec!(20950)),
            &position
        ));
        // Sell stop above entry is not protective.
        assert!(!qualifies_as_stop(
            &stop_order(OrderSide::Sell, OrderKind::Stop, dec!(21050)),
            &position
        ));
        // Buy side never protects a long.
        assert!(!qualifies_as_stop(
            &stop_order(OrderSide::Buy, OrderKind::Stop, dec!(20950)),
            &position
        ));
        // Non-stop kinds never qualify.
        assert!(!qualifies_as_stop(
            &stop_order(OrderSide::Sell, OrderKind::Limit, dec!(20950)),
            &position
        ));
    }

    #[test]
    fn test_short_qualification_requires_buy_above_entry() {
        let mut position = long_position();
        position.side = PositionSide::Short;

        assert!(qualifies_as_stop(
            &stop_order(OrderSide::Buy, OrderKind::TrailingStop, dec!(21050)),
            &position
        ));
        assert!(!qualifies_as_stop(
            &stop_order(OrderSide::Buy, OrderKind::Stop, dec!(20950)),
            &position
        ));
    }

    #[test]
    fn test_lifecycle_open_protect_release() {
        let tracker = PendingStopTracker::new();
        let position = long_position();

        tracker.track_if_unprotected(&position, &[], now());
        assert!(tracker.contains(position.id));

        let stop = stop_order(OrderSide::Sell, OrderKind::Stop, dec!(20950));
        tracker.observe_order(&stop, std::slice::from_ref(&position));
        assert!(!tracker.contains(position.id));
    }

    #[test]
    fn test_pre_existing_stop_skips_tracking() {
        let tracker = PendingStopTracker::new();
        let position = long_position();
        let stop = stop_order(OrderSide::Sell, OrderKind::Stop, dec!(20950));

        tracker.track_if_unprotected(&position, std::slice::from_ref(&stop), now());
        assert!(!tracker.contains(position.id));
    }

    #[test]
    fn test_overdue_is_strictly_greater_than_grace() {
        let tracker = PendingStopTracker::new();
        let position = long_position();
        tracker.track_if_unprotected(&position, &[], now());

        let grace = TimeDelta::seconds(30);
        // Elapsed exactly equal to the grace period is not overdue.
        assert!(
            tracker
                .overdue(position.account_id, grace, now() + grace)
                .is_empty()
        );
        assert_eq!(
            tracker
                .overdue(position.account_id, grace, now() + grace + TimeDelta::seconds(1))
                .len(),
            1
        );
    }
}
