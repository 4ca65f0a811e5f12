use crate::{engine::queue::AccountQueue, event::AccountEvent, state::{StateTracker, quotes::QuoteTracker}};
use chrono::Utc;
use fnv::FnvHashMap;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use vigil_gateway::{
    id::{AccountId, ContractId},
    realtime::{HubEvent, MarketHub, MarketHubEvent, UserHub},
};

/// Market-hub subscription churn driven by position open/close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionChange {
    Subscribe(ContractId),
    /// Unsubscribe if no account still holds the contract.
    MaybeUnsubscribe(ContractId),
}

/// Route user-hub events into per-account queues until shutdown.
///
/// On every post-outage `Connected` marker the account subscriptions are
/// re-issued; the gateway snapshot that follows supersedes cached state, so
/// no client-side replay is attempted.
pub async fn run_user_reader<User, Stream>(
    hub: Arc<User>,
    mut stream: Stream,
    accounts: Vec<AccountId>,
    queues: Arc<FnvHashMap<AccountId, Arc<AccountQueue>>>,
    mut shutdown: watch::Receiver<bool>,
) where
    User: UserHub,
    Stream: futures::Stream<Item = HubEvent<vigil_gateway::realtime::UserHubEvent>> + Unpin,
{
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            item = stream.next() => {
                let Some(item) = item else {
                    info!("user hub stream ended");
                    break;
                };
                match item {
                    HubEvent::Item(event) => {
                        let account = event.account_id();
                        match queues.get(&account) {
                            Some(queue) => {
                                queue.push(AccountEvent::from(event));
                            }
                            None => {
                                // Events for unsupervised accounts are not
                                // an error, just noise.
                                debug!(%account, "event for unsupervised account dropped");
                            }
                        }
                    }
                    HubEvent::Reconnecting => {
                        warn!("user hub reconnecting");
                    }
                    HubEvent::Connected => {
                        info!("user hub connected, re-subscribing accounts");
                        if let Err(error) = hub.subscribe_accounts(&accounts).await {
                            error!(%error, "failed to re-subscribe accounts");
                        }
                    }
                    HubEvent::AuthFailed => {
                        error!("user hub authentication failed, reader stopping");
                        break;
                    }
                }
            }
        }
    }
}

/// Consume the market hub: write quotes into the tracker (single writer),
/// then fan the event out to every account holding the contract.
pub async fn run_market_reader<Market, Stream>(
    hub: Arc<Market>,
    mut stream: Stream,
    quotes: Arc<QuoteTracker>,
    state: Arc<StateTracker>,
    queues: Arc<FnvHashMap<AccountId, Arc<AccountQueue>>>,
    mut subscriptions: mpsc::UnboundedReceiver<SubscriptionChange>,
    mut shutdown: watch::Receiver<bool>,
) where
    Market: MarketHub,
    Stream: futures::Stream<Item = HubEvent<MarketHubEvent>> + Unpin,
{
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            change = subscriptions.recv() => {
                let Some(change) = change else {
                    // Every worker is gone; subscription churn is over.
                    break;
                };
                apply_subscription_change(hub.as_ref(), &state, change).await;
            }
            item = stream.next() => {
                let Some(item) = item else {
                    info!("market hub stream ended");
                    break;
                };
                match item {
                    HubEvent::Item(MarketHubEvent::Quote(quote)) => {
                        quotes.update(quote.clone(), Utc::now());
                        for account in state.accounts_holding(&quote.contract_id) {
                            if let Some(queue) = queues.get(&account) {
                                queue.push(AccountEvent::Quote(quote.clone()));
                            }
                        }
                    }
                    HubEvent::Reconnecting => {
                        warn!("market hub reconnecting");
                    }
                    HubEvent::Connected => {
                        // The position set may have changed during the
                        // outage; subscribe the current union.
                        let contracts = state.contracts_with_positions();
                        info!(contracts = contracts.len(), "market hub connected, re-subscribing");
                        if let Err(error) = hub.subscribe_contracts(&contracts).await {
                            error!(%error, "failed to re-subscribe contracts");
                        }
                    }
                    HubEvent::AuthFailed => {
                        error!("market hub authentication failed, reader stopping");
                        break;
                    }
                }
            }
        }
    }
}

async fn apply_subscription_change<Market>(
    hub: &Market,
    state: &StateTracker,
    change: SubscriptionChange,
) where
    Market: MarketHub,
{
    match change {
        SubscriptionChange::Subscribe(contract) => {
            if let Err(error) = hub.subscribe_contracts(std::slice::from_ref(&contract)).await {
                error!(%contract, %error, "failed to subscribe contract");
            }
        }
        SubscriptionChange::MaybeUnsubscribe(contract) => {
            if state.accounts_holding(&contract).is_empty() {
                if let Err(error) = hub
                    .unsubscribe_contracts(std::slice::from_ref(&contract))
                    .await
                {
                    error!(%contract, %error, "failed to unsubscribe contract");
                }
            }
        }
    }
}
