use crate::{
    error::GatewayError,
    id::{AccountId, ContractId, OrderId, PositionId},
    realtime::{HubEvent, HubState, MarketHub, MarketHubEvent, UserHub, UserHubEvent},
    rest::GatewayRestApi,
    types::{
        Contract, OrderRequest, OrderSnapshot, OrderStatus, PositionSnapshot, QuoteUpdate,
    },
};
use chrono::Utc;
use fnv::FnvHashMap;
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicI64, AtomicU32, Ordering},
    },
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

/// Enforcement calls observed by the mock, for test assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockAction {
    ClosePosition {
        account: AccountId,
        contract: ContractId,
    },
    ClosePositionPartial {
        account: AccountId,
        contract: ContractId,
        quantity: u32,
    },
    CancelOrder {
        account: AccountId,
        order: OrderId,
    },
    PlaceOrder(OrderRequest),
}

#[derive(Debug, Default)]
struct MockInner {
    positions: Mutex<FnvHashMap<AccountId, HashMap<PositionId, PositionSnapshot>>>,
    orders: Mutex<FnvHashMap<AccountId, HashMap<OrderId, OrderSnapshot>>>,
    contracts: Mutex<HashMap<ContractId, Contract>>,
    actions: Mutex<Vec<MockAction>>,
    user_tx: Mutex<Option<mpsc::UnboundedSender<HubEvent<UserHubEvent>>>>,
    market_tx: Mutex<Option<mpsc::UnboundedSender<HubEvent<MarketHubEvent>>>>,
    user_state: Mutex<HubState>,
    market_state: Mutex<HubState>,
    subscribed_accounts: Mutex<Vec<AccountId>>,
    subscribed_contracts: Mutex<Vec<ContractId>>,
    next_order_id: AtomicI64,
    fail_transient: AtomicU32,
}

/// In-memory gateway implementing the full boundary (REST + both hubs).
///
/// Enforcement calls mutate the mock book and echo the resulting snapshots
/// onto the user stream, so a system under test converges the same way it
/// would against the live gateway.
#[derive(Debug, Clone, Default)]
pub struct MockGateway {
    inner: Arc<MockInner>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed or overwrite contract metadata.
    pub fn insert_contract(&self, contract: Contract) {
        self.inner
            .contracts
            .lock()
            .insert(contract.id.clone(), contract);
    }

    /// Seed a position without emitting a stream event.
    pub fn seed_position(&self, position: PositionSnapshot) {
        self.inner
            .positions
            .lock()
            .entry(position.account_id)
            .or_default()
            .insert(position.id, position);
    }

    /// Seed an order without emitting a stream event.
    pub fn seed_order(&self, order: OrderSnapshot) {
        self.inner
            .orders
            .lock()
            .entry(order.account_id)
            .or_default()
            .insert(order.id, order);
    }

    /// Fail the next `count` REST calls with a transient server error.
    pub fn fail_next_transient(&self, count: u32) {
        self.inner.fail_transient.store(count, Ordering::SeqCst);
    }

    /// Push a user-hub event, mirroring position/order payloads into the mock
    /// book first so REST reads agree with the stream.
    pub fn push_user_event(&self, event: UserHubEvent) {
        match &event {
            UserHubEvent::Position(position) => {
                let mut positions = self.inner.positions.lock();
                let book = positions.entry(position.account_id).or_default();
                if position.is_closed() {
                    book.remove(&position.id);
                } else {
                    book.insert(position.id, position.clone());
                }
            }
            UserHubEvent::Order(order) => {
                let mut orders = self.inner.orders.lock();
                let book = orders.entry(order.account_id).or_default();
                if order.status.is_terminal() {
                    book.remove(&order.id);
                } else {
                    book.insert(order.id, order.clone());
                }
            }
            _ => {}
        }

        if let Some(tx) = self.inner.user_tx.lock().as_ref() {
            let _ = tx.send(HubEvent::Item(event));
        }
    }

    /// Push a quote onto the market stream.
    pub fn push_quote(&self, quote: QuoteUpdate) {
        if let Some(tx) = self.inner.market_tx.lock().as_ref() {
            let _ = tx.send(HubEvent::Item(MarketHubEvent::Quote(quote)));
        }
    }

    /// Simulate a user-hub outage followed by recovery.
    pub fn interrupt_user_hub(&self) {
        *self.inner.user_state.lock() = HubState::Reconnecting;
        if let Some(tx) = self.inner.user_tx.lock().as_ref() {
            let _ = tx.send(HubEvent::Reconnecting);
            let _ = tx.send(HubEvent::Connected);
        }
        *self.inner.user_state.lock() = HubState::Connected;
    }

    /// Enforcement calls recorded so far.
    pub fn actions(&self) -> Vec<MockAction> {
        self.inner.actions.lock().clone()
    }

    pub fn subscribed_accounts(&self) -> Vec<AccountId> {
        self.inner.subscribed_accounts.lock().clone()
    }

    pub fn subscribed_contracts(&self) -> Vec<ContractId> {
        self.inner.subscribed_contracts.lock().clone()
    }

    fn check_fail(&self) -> Result<(), GatewayError> {
        let remaining = self.inner.fail_transient.load(Ordering::SeqCst);
        if remaining > 0 {
            self.inner
                .fail_transient
                .store(remaining - 1, Ordering::SeqCst);
            return Err(GatewayError::Server(503));
        }
        Ok(())
    }

    fn emit_user(&self, event: UserHubEvent) {
        if let Some(tx) = self.inner.user_tx.lock().as_ref() {
            let _ = tx.send(HubEvent::Item(event));
        }
    }
}

impl GatewayRestApi for MockGateway {
    async fn search_open_positions(
        &self,
        account: AccountId,
    ) -> Result<Vec<PositionSnapshot>, GatewayError> {
        self.check_fail()?;
        Ok(self
            .inner
            .positions
            .lock()
            .get(&account)
            .map(|book| book.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn close_position(
        &self,
        account: AccountId,
        contract: &ContractId,
    ) -> Result<(), GatewayError> {
        self.check_fail()?;
        self.inner.actions.lock().push(MockAction::ClosePosition {
            account,
            contract: contract.clone(),
        });

        let closed: Vec<PositionSnapshot> = {
            let mut positions = self.inner.positions.lock();
            let Some(book) = positions.get_mut(&account) else {
                return Ok(());
            };
            let ids: Vec<PositionId> = book
                .values()
                .filter(|position| &position.contract_id == contract)
                .map(|position| position.id)
                .collect();
            ids.iter().filter_map(|id| book.remove(id)).collect()
        };

        // Already closed is a no-op success.
        for mut position in closed {
            position.size = 0;
            self.emit_user(UserHubEvent::Position(position));
        }
        Ok(())
    }

    async fn close_position_partial(
        &self,
        account: AccountId,
        contract: &ContractId,
        quantity: u32,
    ) -> Result<(), GatewayError> {
        self.check_fail()?;
        self.inner
            .actions
            .lock()
            .push(MockAction::ClosePositionPartial {
                account,
                contract: contract.clone(),
                quantity,
            });

        let updated: Option<PositionSnapshot> = {
            let mut positions = self.inner.positions.lock();
            let book = positions.get_mut(&account);
            book.and_then(|book| {
                let position = book
                    .values_mut()
                    .find(|position| &position.contract_id == contract)?;
                position.size = position.size.saturating_sub(quantity);
                let snapshot = position.clone();
                if snapshot.size == 0 {
                    book.remove(&snapshot.id);
                }
                Some(snapshot)
            })
        };

        if let Some(position) = updated {
            self.emit_user(UserHubEvent::Position(position));
        }
        Ok(())
    }

    async fn search_open_orders(
        &self,
        account: AccountId,
    ) -> Result<Vec<OrderSnapshot>, GatewayError> {
        self.check_fail()?;
        Ok(self
            .inner
            .orders
            .lock()
            .get(&account)
            .map(|book| book.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn cancel_order(&self, account: AccountId, order: OrderId) -> Result<(), GatewayError> {
        self.check_fail()?;
        self.inner
            .actions
            .lock()
            .push(MockAction::CancelOrder { account, order });

        let cancelled = {
            let mut orders = self.inner.orders.lock();
            orders.get_mut(&account).and_then(|book| book.remove(&order))
        };

        if let Some(mut snapshot) = cancelled {
            snapshot.status = OrderStatus::Cancelled;
            self.emit_user(UserHubEvent::Order(snapshot));
        }
        Ok(())
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<OrderId, GatewayError> {
        self.check_fail()?;
        self.inner
            .actions
            .lock()
            .push(MockAction::PlaceOrder(request.clone()));

        let id = OrderId::new(self.inner.next_order_id.fetch_add(1, Ordering::SeqCst) + 1_000);
        let snapshot = OrderSnapshot {
            id,
            account_id: request.account_id,
            contract_id: request.contract_id.clone(),
            kind: request.kind,
            side: request.side,
            size: request.size,
            limit_price: request.limit_price,
            stop_price: request.stop_price,
            status: OrderStatus::Open,
            creation_timestamp: Utc::now(),
        };

        self.inner
            .orders
            .lock()
            .entry(request.account_id)
            .or_default()
            .insert(id, snapshot.clone());
        self.emit_user(UserHubEvent::Order(snapshot));

        Ok(id)
    }

    async fn contract_by_id(&self, contract: &ContractId) -> Result<Contract, GatewayError> {
        self.check_fail()?;
        self.inner
            .contracts
            .lock()
            .get(contract)
            .cloned()
            .ok_or_else(|| GatewayError::Api {
                code: None,
                message: format!("contract {contract} not found"),
            })
    }
}

impl UserHub for MockGateway {
    type EventStream = UnboundedReceiverStream<HubEvent<UserHubEvent>>;

    async fn connect(&self) -> Result<Self::EventStream, GatewayError> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.inner.user_tx.lock() = Some(tx);
        *self.inner.user_state.lock() = HubState::Connected;
        debug!("mock user hub connected");
        Ok(UnboundedReceiverStream::new(rx))
    }

    async fn subscribe_accounts(&self, accounts: &[AccountId]) -> Result<(), GatewayError> {
        let mut subscribed = self.inner.subscribed_accounts.lock();
        for account in accounts {
            if !subscribed.contains(account) {
                subscribed.push(*account);
            }
        }
        Ok(())
    }

    fn state(&self) -> HubState {
        *self.inner.user_state.lock()
    }
}

impl MarketHub for MockGateway {
    type EventStream = UnboundedReceiverStream<HubEvent<MarketHubEvent>>;

    async fn connect(&self) -> Result<Self::EventStream, GatewayError> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.inner.market_tx.lock() = Some(tx);
        *self.inner.market_state.lock() = HubState::Connected;
        debug!("mock market hub connected");
        Ok(UnboundedReceiverStream::new(rx))
    }

    async fn subscribe_contracts(&self, contracts: &[ContractId]) -> Result<(), GatewayError> {
        let mut subscribed = self.inner.subscribed_contracts.lock();
        for contract in contracts {
            if !subscribed.contains(contract) {
                subscribed.push(contract.clone());
            }
        }
        Ok(())
    }

    async fn unsubscribe_contracts(&self, contracts: &[ContractId]) -> Result<(), GatewayError> {
        self.inner
            .subscribed_contracts
            .lock()
            .retain(|subscribed| !contracts.contains(subscribed));
        Ok(())
    }

    fn state(&self) -> HubState {
        *self.inner.market_state.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{id::SymbolId, types::PositionSide};
    use rust_decimal_macros::dec;
    use tokio_stream::StreamExt;

    fn position(account: i64, id: i64, contract: &str, size: u32) -> PositionSnapshot {
        PositionSnapshot {
            id: PositionId::new(id),
            account_id: AccountId::new(account),
            contract_id: ContractId::new(contract),
            side: PositionSide::Long,
            size,
            average_price: dec!(21000),
            creation_timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_close_position_empties_book_and_echoes_snapshot() {
        let gateway = MockGateway::new();
        let mut stream = UserHub::connect(&gateway).await.unwrap();

        gateway.seed_position(position(12345, 1, "CON.F.US.MNQ.U25", 3));
        gateway
            .close_position(AccountId::new(12345), &ContractId::new("CON.F.US.MNQ.U25"))
            .await
            .unwrap();

        let open = gateway
            .search_open_positions(AccountId::new(12345))
            .await
            .unwrap();
        assert!(open.is_empty());

        let event = stream.next().await.unwrap();
        match event {
            HubEvent::Item(UserHubEvent::Position(snapshot)) => assert!(snapshot.is_closed()),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_close_missing_position_is_noop_success() {
        let gateway = MockGateway::new();
        let result = gateway
            .close_position(AccountId::new(1), &ContractId::new("CON.F.US.ES.U25"))
            .await;
        assert!(result.is_ok());
        assert_eq!(gateway.actions().len(), 1);
    }

    #[tokio::test]
    async fn test_fail_next_transient_fails_then_recovers() {
        let gateway = MockGateway::new();
        gateway.fail_next_transient(1);

        let first = gateway.search_open_positions(AccountId::new(1)).await;
        assert!(matches!(first, Err(GatewayError::Server(503))));

        let second = gateway.search_open_positions(AccountId::new(1)).await;
        assert!(second.is_ok());
    }

    #[test]
    fn test_symbol_id_available_for_contract_seeding() {
        let contract = Contract::new(
            ContractId::new("CON.F.US.MNQ.U25"),
            SymbolId::new("F.US.MNQ"),
            dec!(0.25),
            dec!(0.50),
            "Micro E-mini Nasdaq-100".to_string(),
        );
        assert_eq!(contract.symbol_id.root(), "MNQ");
    }
}
