use fnv::FnvHashMap;
use itertools::Itertools;
use parking_lot::RwLock;
use std::{collections::HashMap, sync::Arc};
use tracing::debug;
use vigil_store::{Store, StoreError};

use vigil_gateway::{
    id::{AccountId, ContractId, OrderId, PositionId},
    types::{OrderSnapshot, PositionSnapshot},
};

/// Contract metadata cache (LRU + TTL, persisted, fetch-through).
pub mod contracts;

/// Pending protective-stop tracking shared by Rule 8 / Rule 12.
pub mod pending_stop;

/// Per-account daily realised P&L and on-demand unrealized P&L.
pub mod pnl;

/// Per-contract last/bid/ask with freshness clock.
pub mod quotes;

/// Per-account rolling trade timestamps (minute / hour / session windows).
pub mod trades;

/// Outcome of applying a position event, used to drive the pending-stop set
/// and market-hub subscription churn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PositionChange {
    Opened(PositionSnapshot),
    Updated(PositionSnapshot),
    Closed(PositionId),
    /// Close event for a position that was never tracked (idempotent replay).
    Noop,
}

/// Outcome of applying an order event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderChange {
    Upserted(OrderSnapshot),
    Removed(OrderId),
    Noop,
}

#[derive(Debug, Default)]
struct AccountBook {
    positions: HashMap<PositionId, PositionSnapshot>,
    orders: HashMap<OrderId, OrderSnapshot>,
}

/// Per-account open positions and working orders, reconciled from user-hub
/// events and authoritative on the gateway snapshot.
///
/// Updates are idempotent upserts/deletes keyed by id: a `size = 0` position
/// event deletes, a terminal-status order event deletes, anything else
/// upserts. Every mutation writes through to the durable store in the same
/// logical step.
#[derive(Debug)]
pub struct StateTracker {
    store: Arc<Store>,
    inner: RwLock<FnvHashMap<AccountId, AccountBook>>,
}

impl StateTracker {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            inner: RwLock::new(FnvHashMap::default()),
        }
    }

    /// Rebuild in-memory state from the store. The store is authoritative on
    /// process start; the first gateway snapshot after resubscription then
    /// supersedes it.
    pub fn load_from_store(&self) -> Result<(), StoreError> {
        let positions = self.store.load_positions()?;
        let orders = self.store.load_orders()?;

        let mut inner = self.inner.write();
        inner.clear();
        for position in positions {
            inner
                .entry(position.account_id)
                .or_default()
                .positions
                .insert(position.id, position);
        }
        for order in orders {
            inner
                .entry(order.account_id)
                .or_default()
                .orders
                .insert(order.id, order);
        }

        debug!(
            accounts = inner.len(),
            "state tracker loaded snapshot from store"
        );
        Ok(())
    }

    /// Persist the complete in-memory snapshot.
    pub fn save_snapshot(&self) -> Result<(), StoreError> {
        let (positions, orders) = {
            let inner = self.inner.read();
            let positions: Vec<PositionSnapshot> = inner
                .values()
                .flat_map(|book| book.positions.values().cloned())
                .collect();
            let orders: Vec<OrderSnapshot> = inner
                .values()
                .flat_map(|book| book.orders.values().cloned())
                .collect();
            (positions, orders)
        };
        self.store.replace_state_snapshot(&positions, &orders)
    }

    /// Apply a position event. `size = 0` deletes; anything else upserts.
    pub fn update_position(
        &self,
        position: &PositionSnapshot,
    ) -> Result<PositionChange, StoreError> {
        let change = {
            let mut inner = self.inner.write();
            let book = inner.entry(position.account_id).or_default();

            if position.is_closed() {
                match book.positions.remove(&position.id) {
                    Some(_) => PositionChange::Closed(position.id),
                    None => PositionChange::Noop,
                }
            } else {
                match book.positions.insert(position.id, position.clone()) {
                    Some(_) => PositionChange::Updated(position.clone()),
                    None => PositionChange::Opened(position.clone()),
                }
            }
        };

        match &change {
            PositionChange::Closed(id) => self.store.delete_position(*id)?,
            PositionChange::Opened(_) | PositionChange::Updated(_) => {
                self.store.upsert_position(position)?
            }
            PositionChange::Noop => {}
        }
        Ok(change)
    }

    /// Apply an order event. Terminal statuses delete; working statuses
    /// upsert.
    pub fn update_order(&self, order: &OrderSnapshot) -> Result<OrderChange, StoreError> {
        let change = {
            let mut inner = self.inner.write();
            let book = inner.entry(order.account_id).or_default();

            if order.status.is_terminal() {
                match book.orders.remove(&order.id) {
                    Some(_) => OrderChange::Removed(order.id),
                    None => OrderChange::Noop,
                }
            } else {
                book.orders.insert(order.id, order.clone());
                OrderChange::Upserted(order.clone())
            }
        };

        match &change {
            OrderChange::Removed(id) => self.store.delete_order(*id)?,
            OrderChange::Upserted(_) => self.store.upsert_order(order)?,
            OrderChange::Noop => {}
        }
        Ok(change)
    }

    pub fn positions(&self, account: AccountId) -> Vec<PositionSnapshot> {
        self.inner
            .read()
            .get(&account)
            .map(|book| book.positions.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn position(&self, account: AccountId, id: PositionId) -> Option<PositionSnapshot> {
        self.inner
            .read()
            .get(&account)
            .and_then(|book| book.positions.get(&id).cloned())
    }

    pub fn orders(&self, account: AccountId) -> Vec<OrderSnapshot> {
        self.inner
            .read()
            .get(&account)
            .map(|book| book.orders.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn positions_for_contract(
        &self,
        account: AccountId,
        contract: &ContractId,
    ) -> Vec<PositionSnapshot> {
        self.inner
            .read()
            .get(&account)
            .map(|book| {
                book.positions
                    .values()
                    .filter(|position| &position.contract_id == contract)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn orders_for_contract(
        &self,
        account: AccountId,
        contract: &ContractId,
    ) -> Vec<OrderSnapshot> {
        self.inner
            .read()
            .get(&account)
            .map(|book| {
                book.orders
                    .values()
                    .filter(|order| &order.contract_id == contract)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Total contract count across all of the account's positions.
    ///
    /// Long and Short both contribute their absolute magnitude; the `gross`
    /// count type aliases this same sum.
    pub fn position_count(&self, account: AccountId) -> u32 {
        self.inner
            .read()
            .get(&account)
            .map(|book| book.positions.values().map(|position| position.size).sum())
            .unwrap_or(0)
    }

    /// Contract count for one specific contract id.
    pub fn contract_count(&self, account: AccountId, contract: &ContractId) -> u32 {
        self.inner
            .read()
            .get(&account)
            .map(|book| {
                book.positions
                    .values()
                    .filter(|position| &position.contract_id == contract)
                    .map(|position| position.size)
                    .sum()
            })
            .unwrap_or(0)
    }

    /// Union of contract ids referenced by any account's open positions -
    /// the market-hub subscription set.
    pub fn contracts_with_positions(&self) -> Vec<ContractId> {
        let inner = self.inner.read();
        inner
            .values()
            .flat_map(|book| book.positions.values())
            .map(|position| position.contract_id.clone())
            .unique()
            .collect()
    }

    /// Accounts holding a position in `contract` - the quote fan-out set.
    pub fn accounts_holding(&self, contract: &ContractId) -> Vec<AccountId> {
        let inner = self.inner.read();
        inner
            .iter()
            .filter(|(_, book)| {
                book.positions
                    .values()
                    .any(|position| &position.contract_id == contract)
            })
            .map(|(account, _)| *account)
            .collect()
    }

    /// Admin wipe of one account's tracked state.
    pub fn clear_account(&self, account: AccountId) -> Result<(), StoreError> {
        let removed = {
            let mut inner = self.inner.write();
            inner.remove(&account)
        };
        if let Some(book) = removed {
            for id in book.positions.keys() {
                self.store.delete_position(*id)?;
            }
            for id in book.orders.keys() {
                self.store.delete_order(*id)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;
    use vigil_gateway::types::{OrderKind, OrderSide, OrderStatus, PositionSide};

    fn tracker() -> StateTracker {
        StateTracker::new(Arc::new(Store::open_in_memory().unwrap()))
    }

    fn position(account: i64, id: i64, contract: &str, size: u32) -> PositionSnapshot {
        PositionSnapshot {
            id: PositionId::new(id),
            account_id: AccountId::new(account),
            contract_id: ContractId::new(contract),
            side: PositionSide::Long,
            size,
            average_price: dec!(21000),
            creation_timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        }
    }

    fn order(account: i64, id: i64, contract: &str, status: OrderStatus) -> OrderSnapshot {
        OrderSnapshot {
            id: OrderId::new(id),
            account_id: AccountId::new(account),
            contract_id: ContractId::new(contract),
            kind: OrderKind::Limit,
            side: OrderSide::Buy,
            size: 1,
            limit_price: Some(dec!(20990)),
            stop_price: None,
            status,
            creation_timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        }
    }

    #[test]
    fn test_position_upsert_then_close_removes() {
        let tracker = tracker();

        let change = tracker
            .update_position(&position(12345, 1, "CON.F.US.MNQ.U25", 3))
            .unwrap();
        assert!(matches!(change, PositionChange::Opened(_)));
        assert_eq!(tracker.position_count(AccountId::new(12345)), 3);

        let change = tracker
            .update_position(&position(12345, 1, "CON.F.US.MNQ.U25", 0))
            .unwrap();
        assert!(matches!(change, PositionChange::Closed(_)));
        assert!(tracker.positions(AccountId::new(12345)).is_empty());
    }

    #[test]
    fn test_redelivered_close_is_noop() {
        let tracker = tracker();

        tracker
            .update_position(&position(12345, 1, "CON.F.US.MNQ.U25", 3))
            .unwrap();
        tracker
            .update_position(&position(12345, 1, "CON.F.US.MNQ.U25", 0))
            .unwrap();
        let change = tracker
            .update_position(&position(12345, 1, "CON.F.US.MNQ.U25", 0))
            .unwrap();

        assert_eq!(change, PositionChange::Noop);
    }

    #[test]
    fn test_terminal_order_never_tracked() {
        let tracker = tracker();

        tracker
            .update_order(&order(12345, 9, "CON.F.US.MNQ.U25", OrderStatus::Open))
            .unwrap();
        assert_eq!(tracker.orders(AccountId::new(12345)).len(), 1);

        tracker
            .update_order(&order(12345, 9, "CON.F.US.MNQ.U25", OrderStatus::Filled))
            .unwrap();
        assert!(tracker.orders(AccountId::new(12345)).is_empty());

        // Terminal event for an unknown order stays untracked.
        let change = tracker
            .update_order(&order(12345, 77, "CON.F.US.MNQ.U25", OrderStatus::Cancelled))
            .unwrap();
        assert_eq!(change, OrderChange::Noop);
    }

    #[test]
    fn test_counts_sum_across_contracts() {
        let tracker = tracker();
        let account = AccountId::new(12345);

        tracker
            .update_position(&position(12345, 1, "CON.F.US.MNQ.U25", 3))
            .unwrap();
        tracker
            .update_position(&position(12345, 2, "CON.F.US.EP.U25", 3))
            .unwrap();

        assert_eq!(tracker.position_count(account), 6);
        assert_eq!(
            tracker.contract_count(account, &ContractId::new("CON.F.US.MNQ.U25")),
            3
        );
        assert_eq!(tracker.contracts_with_positions().len(), 2);
        assert_eq!(
            tracker.accounts_holding(&ContractId::new("CON.F.US.EP.U25")),
            vec![account]
        );
    }

    #[test]
    fn test_clear_account_wipes_memory_and_store() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let tracker = StateTracker::new(Arc::clone(&store));

        tracker
            .update_position(&position(12345, 1, "CON.F.US.MNQ.U25", 3))
            .unwrap();
        tracker
            .update_order(&order(12345, 9, "CON.F.US.MNQ.U25", OrderStatus::Open))
            .unwrap();
        tracker.clear_account(AccountId::new(12345)).unwrap();

        assert!(tracker.positions(AccountId::new(12345)).is_empty());
        assert!(store.load_positions().unwrap().is_empty());
        assert!(store.load_orders().unwrap().is_empty());
    }

    #[test]
    fn test_snapshot_restart_round_trip() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let tracker = StateTracker::new(Arc::clone(&store));

        tracker
            .update_position(&position(12345, 1, "CON.F.US.MNQ.U25", 3))
            .unwrap();
        tracker
            .update_order(&order(12345, 9, "CON.F.US.MNQ.U25", OrderStatus::Open))
            .unwrap();
        tracker.save_snapshot().unwrap();

        let restarted = StateTracker::new(store);
        restarted.load_from_store().unwrap();

        assert_eq!(
            restarted.positions(AccountId::new(12345)),
            tracker.positions(AccountId::new(12345))
        );
        assert_eq!(
            restarted.orders(AccountId::new(12345)),
            tracker.orders(AccountId::new(12345))
        );
    }
}
