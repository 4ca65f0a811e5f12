use crate::{
    lockout::{LockoutInfo, LockoutManager},
    state::{
        StateTracker,
        contracts::ContractCache,
        pending_stop::{PendingStop, PendingStopTracker},
        pnl::{AccountUnrealized, PnlTracker, account_unrealized},
        quotes::{QuoteEntry, QuoteTracker},
        trades::{TradeCounter, TradeCounts},
    },
    timer::{TimerInfo, TimerWheel},
};
use chrono::{DateTime, TimeDelta, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use vigil_gateway::{
    id::{AccountId, ContractId},
    rest::GatewayRestApi,
    types::{OrderSnapshot, PositionSnapshot},
};
use vigil_store::{EnforcementRecord, Store, StoreError};

/// Read-only boundary for dashboards and the admin CLI.
///
/// Every accessor returns an owned snapshot taken under the owning
/// component's short lock - out-of-scope renderers never touch core state
/// directly.
#[derive(Debug, Clone)]
pub struct AdminView<Rest> {
    state: Arc<StateTracker>,
    pnl: Arc<PnlTracker>,
    quotes: Arc<QuoteTracker>,
    contracts: Arc<ContractCache<Rest>>,
    trades: Arc<TradeCounter>,
    timers: Arc<TimerWheel>,
    lockouts: Arc<LockoutManager>,
    pending_stops: Arc<PendingStopTracker>,
    store: Arc<Store>,
}

impl<Rest> AdminView<Rest>
where
    Rest: GatewayRestApi,
{
    pub fn new(
        state: Arc<StateTracker>,
        pnl: Arc<PnlTracker>,
        quotes: Arc<QuoteTracker>,
        contracts: Arc<ContractCache<Rest>>,
        trades: Arc<TradeCounter>,
        timers: Arc<TimerWheel>,
        lockouts: Arc<LockoutManager>,
        pending_stops: Arc<PendingStopTracker>,
        store: Arc<Store>,
    ) -> Self {
        Self {
            state,
            pnl,
            quotes,
            contracts,
            trades,
            timers,
            lockouts,
            pending_stops,
            store,
        }
    }

    pub fn positions(&self, account: AccountId) -> Vec<PositionSnapshot> {
        self.state.positions(account)
    }

    pub fn orders(&self, account: AccountId) -> Vec<OrderSnapshot> {
        self.state.orders(account)
    }

    pub fn quote(&self, contract: &ContractId) -> Option<QuoteEntry> {
        self.quotes.quote(contract)
    }

    pub fn daily_realized(&self, account: AccountId) -> Decimal {
        self.pnl.daily_realized(account)
    }

    pub fn unrealized(
        &self,
        account: AccountId,
        stale_after: TimeDelta,
        now: DateTime<Utc>,
    ) -> AccountUnrealized {
        account_unrealized(
            account,
            &self.state,
            &self.quotes,
            self.contracts.as_ref(),
            stale_after,
            now,
        )
    }

    pub fn trade_counts(&self, account: AccountId, now: DateTime<Utc>) -> TradeCounts {
        self.trades.counts(account, now)
    }

    pub fn last_trade_time(&self, account: AccountId) -> Option<DateTime<Utc>> {
        self.trades.last_trade_time(account)
    }

    pub fn is_locked_out(&self, account: AccountId, now: DateTime<Utc>) -> bool {
        self.lockouts.is_locked_out(account, now)
    }

    pub fn lockout_info(&self, account: AccountId, now: DateTime<Utc>) -> Option<LockoutInfo> {
        self.lockouts.lockout_info(account, now)
    }

    pub fn active_timers(&self, now: DateTime<Utc>) -> Vec<TimerInfo> {
        self.timers.active_timers(now)
    }

    pub fn pending_stops(&self, account: AccountId) -> Vec<PendingStop> {
        self.pending_stops.entries_for(account)
    }

    pub fn recent_enforcements(&self, limit: usize) -> Result<Vec<EnforcementRecord>, StoreError> {
        self.store.recent_enforcements(limit)
    }
}
