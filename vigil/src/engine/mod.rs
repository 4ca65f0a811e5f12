use crate::{
    enforce::EnforcementJob,
    event::AccountEvent,
    lockout::LockoutManager,
    rules::{RiskRule, StateView},
    state::{
        PositionChange, StateTracker, contracts::ContractCache,
        pending_stop::PendingStopTracker, pnl::PnlTracker, quotes::QuoteTracker,
        trades::TradeCounter,
    },
};
use chrono::{TimeDelta, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};
use vigil_gateway::{
    id::{AccountId, ContractId},
    rest::GatewayRestApi,
};
use vigil_store::StoreError;

/// Hub readers and event routing.
pub mod dispatcher;

/// Bounded per-account event queue with quote shedding.
pub mod queue;

use queue::AccountQueue;

/// Per-account processing pipeline: metadata prewarm, tracker updates, rule
/// fan-out, enforcement dispatch.
///
/// One engine instance runs on one worker task, so events for an account are
/// handled strictly in arrival order. Rules are evaluated in catalog order
/// and every breach is dispatched after all rules have run, so one rule
/// cannot hide another's breach.
#[derive(Debug)]
pub struct AccountEngine<Rest> {
    account: AccountId,
    state: Arc<StateTracker>,
    pnl: Arc<PnlTracker>,
    quotes: Arc<QuoteTracker>,
    contracts: Arc<ContractCache<Rest>>,
    trades: Arc<TradeCounter>,
    pending_stops: Arc<PendingStopTracker>,
    lockouts: Arc<LockoutManager>,
    rules: Arc<Vec<Box<dyn RiskRule>>>,
    jobs_tx: mpsc::Sender<EnforcementJob>,
    subscriptions_tx: mpsc::UnboundedSender<dispatcher::SubscriptionChange>,
    quote_stale_after: TimeDelta,
}

impl<Rest> AccountEngine<Rest>
where
    Rest: GatewayRestApi + Clone,
{
    pub fn new(
        account: AccountId,
        state: Arc<StateTracker>,
        pnl: Arc<PnlTracker>,
        quotes: Arc<QuoteTracker>,
        contracts: Arc<ContractCache<Rest>>,
        trades: Arc<TradeCounter>,
        pending_stops: Arc<PendingStopTracker>,
        lockouts: Arc<LockoutManager>,
        rules: Arc<Vec<Box<dyn RiskRule>>>,
        jobs_tx: mpsc::Sender<EnforcementJob>,
        subscriptions_tx: mpsc::UnboundedSender<dispatcher::SubscriptionChange>,
        quote_stale_after: TimeDelta,
    ) -> Self {
        Self {
            account,
            state,
            pnl,
            quotes,
            contracts,
            trades,
            pending_stops,
            lockouts,
            rules,
            jobs_tx,
            subscriptions_tx,
            quote_stale_after,
        }
    }

    pub fn account(&self) -> AccountId {
        self.account
    }

    /// Handle one event end to end. Store write failures are escalated - the
    /// durable record must not silently diverge from memory.
    pub async fn process(&self, event: AccountEvent) -> Result<(), StoreError> {
        let now = Utc::now();

        // 1. Metadata prewarm, so every downstream lookup is a sync peek.
        if let Some(contract) = referenced_contract(&event) {
            let contract = contract.clone();
            if self.contracts.get(&contract, now).await.is_none() {
                // Price-dependent rules degrade to skip for this event.
                debug!(%contract, "metadata unavailable, price rules will skip");
            }
        }

        // 2. Tracker updates.
        match &event {
            AccountEvent::Position(position) => {
                match self.state.update_position(position)? {
                    PositionChange::Opened(opened) => {
                        let orders = self
                            .state
                            .orders_for_contract(self.account, &opened.contract_id);
                        // Grace runs from the gateway's open time, not
                        // event arrival.
                        self.pending_stops.track_if_unprotected(
                            &opened,
                            &orders,
                            opened.creation_timestamp,
                        );
                        let _ = self.subscriptions_tx.send(
                            dispatcher::SubscriptionChange::Subscribe(opened.contract_id.clone()),
                        );
                    }
                    PositionChange::Closed(id) => {
                        self.pending_stops.remove(id);
                        let _ = self.subscriptions_tx.send(
                            dispatcher::SubscriptionChange::MaybeUnsubscribe(
                                position.contract_id.clone(),
                            ),
                        );
                    }
                    PositionChange::Updated(_) | PositionChange::Noop => {}
                }
            }
            AccountEvent::Order(order) => {
                self.state.update_order(order)?;
                if order.status.is_working() {
                    let positions = self
                        .state
                        .positions_for_contract(self.account, &order.contract_id);
                    self.pending_stops.observe_order(order, &positions);
                }
            }
            AccountEvent::Trade(trade) => {
                self.pnl.apply_trade(trade)?;
                self.trades.record(trade, now)?;
            }
            // Quotes were written by the market reader; account and sweep
            // events carry no tracker state.
            AccountEvent::Quote(_) | AccountEvent::Account(_) | AccountEvent::GraceSweep => {}
        }

        // 3. Rule evaluation in catalog order. A lockout applied by an
        // earlier breach does not stop later rules recording theirs.
        let view = StateView {
            account: self.account,
            now,
            state: &self.state,
            pnl: &self.pnl,
            quotes: &self.quotes,
            contracts: self.contracts.as_ref(),
            trades: &self.trades,
            pending_stops: &self.pending_stops,
            lockouts: &self.lockouts,
            quote_stale_after: self.quote_stale_after,
        };

        let breaches: Vec<_> = self
            .rules
            .iter()
            .filter(|rule| rule.enabled())
            .filter_map(|rule| rule.check(&event, &view))
            .collect();
        drop(view);

        // 4. Enforcement dispatch, after all rules have seen the event.
        for breach in breaches {
            warn!(
                account = %self.account,
                rule = %breach.rule,
                reason = %breach.reason,
                "rule breach"
            );
            if self
                .jobs_tx
                .send(EnforcementJob {
                    account: self.account,
                    breach,
                })
                .await
                .is_err()
            {
                error!(account = %self.account, "executor pool gone, dropping breach");
            }
        }

        Ok(())
    }
}

fn referenced_contract(event: &AccountEvent) -> Option<&ContractId> {
    match event {
        AccountEvent::Position(position) => Some(&position.contract_id),
        AccountEvent::Order(order) => Some(&order.contract_id),
        AccountEvent::Trade(trade) => Some(&trade.contract_id),
        AccountEvent::Quote(quote) => Some(&quote.contract_id),
        AccountEvent::Account(_) | AccountEvent::GraceSweep => None,
    }
}

/// Worker loop: drain the account queue until it closes.
pub async fn run_account_worker<Rest>(
    engine: AccountEngine<Rest>,
    queue: Arc<AccountQueue>,
) -> Result<(), StoreError>
where
    Rest: GatewayRestApi + Clone,
{
    while let Some(event) = queue.pop().await {
        let kind = event.kind();
        if let Err(error) = engine.process(event).await {
            // Durable-state divergence is not recoverable locally.
            error!(account = %engine.account(), kind, %error, "store write failed, stopping worker");
            return Err(error);
        }
    }
    debug!(account = %engine.account(), "account worker drained");
    Ok(())
}
