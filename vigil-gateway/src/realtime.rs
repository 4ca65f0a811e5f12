use crate::{
    error::GatewayError,
    id::{AccountId, ContractId},
    types::{AccountUpdate, OrderSnapshot, PositionSnapshot, QuoteUpdate, TradeFill},
};
use derive_more::{Constructor, From};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::{fmt::Debug, future::Future, time::Duration};

/// Observable connection state of a realtime hub.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default, Deserialize, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum HubState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Token rejected - the hub stops reconnecting and surfaces one error.
    AuthFailed,
}

impl HubState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Account-scoped event from the user hub.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, From)]
pub enum UserHubEvent {
    Account(AccountUpdate),
    Position(PositionSnapshot),
    Order(OrderSnapshot),
    Trade(TradeFill),
}

impl UserHubEvent {
    pub fn account_id(&self) -> AccountId {
        match self {
            Self::Account(update) => update.account_id,
            Self::Position(position) => position.account_id,
            Self::Order(order) => order.account_id,
            Self::Trade(trade) => trade.account_id,
        }
    }
}

/// Contract-scoped event from the market hub.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, From)]
pub enum MarketHubEvent {
    Quote(QuoteUpdate),
}

/// Item yielded by a hub event stream: either a payload or a lifecycle
/// marker.
///
/// After a `Connected` marker that follows a `Reconnecting`, consumers must
/// re-issue their subscriptions - the gateway snapshot delivered after
/// resubscription supersedes any state cached across the outage.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub enum HubEvent<T> {
    Item(T),
    Reconnecting,
    Connected,
    AuthFailed,
}

impl<T> HubEvent<T> {
    pub fn into_item(self) -> Option<T> {
        match self {
            Self::Item(item) => Some(item),
            _ => None,
        }
    }
}

/// User hub interface: account, position, order, and trade events for the
/// subscribed accounts.
pub trait UserHub
where
    Self: Debug + Send + Sync,
{
    type EventStream: Stream<Item = HubEvent<UserHubEvent>> + Send + Unpin + 'static;

    /// Establish the connection and return the event stream. Implementations
    /// reconnect internally, surfacing lifecycle markers on the stream.
    fn connect(&self) -> impl Future<Output = Result<Self::EventStream, GatewayError>> + Send;

    /// Subscribe the connection to the provided accounts. Safe to repeat;
    /// required again after every `Connected` lifecycle marker.
    fn subscribe_accounts(
        &self,
        accounts: &[AccountId],
    ) -> impl Future<Output = Result<(), GatewayError>> + Send;

    fn state(&self) -> HubState;
}

/// Market hub interface: quote events for the subscribed contracts.
pub trait MarketHub
where
    Self: Debug + Send + Sync,
{
    type EventStream: Stream<Item = HubEvent<MarketHubEvent>> + Send + Unpin + 'static;

    fn connect(&self) -> impl Future<Output = Result<Self::EventStream, GatewayError>> + Send;

    /// Subscribe to quotes for the provided contracts. Safe to repeat.
    fn subscribe_contracts(
        &self,
        contracts: &[ContractId],
    ) -> impl Future<Output = Result<(), GatewayError>> + Send;

    /// Stop quote delivery for contracts no open position references.
    fn unsubscribe_contracts(
        &self,
        contracts: &[ContractId],
    ) -> impl Future<Output = Result<(), GatewayError>> + Send;

    fn state(&self) -> HubState;
}

/// Reconnection backoff policy for hub transports.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize, Constructor,
)]
pub struct ReconnectPolicy {
    /// Initial backoff millisecond duration after the first disconnection.
    pub backoff_ms_initial: u64,

    /// Scaling factor applied after each failed reconnection attempt.
    pub backoff_multiplier: u8,

    /// Maximum possible backoff duration between reconnection attempts.
    pub backoff_ms_max: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            backoff_ms_initial: 1_000,
            backoff_multiplier: 2,
            backoff_ms_max: 30_000,
        }
    }
}

/// Mutable backoff state derived from a [`ReconnectPolicy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectState {
    policy: ReconnectPolicy,
    backoff_ms_current: u64,
}

impl From<ReconnectPolicy> for ReconnectState {
    fn from(policy: ReconnectPolicy) -> Self {
        Self {
            backoff_ms_current: policy.backoff_ms_initial,
            policy,
        }
    }
}

impl ReconnectState {
    /// Delay to sleep before the next attempt, scaling the internal backoff
    /// for the attempt after.
    pub fn next_delay(&mut self) -> Duration {
        let delay = Duration::from_millis(self.backoff_ms_current);
        let next = self.backoff_ms_current * self.policy.backoff_multiplier as u64;
        self.backoff_ms_current = std::cmp::min(next, self.policy.backoff_ms_max);
        delay
    }

    /// Reset after a successful connection.
    pub fn reset(&mut self) {
        self.backoff_ms_current = self.policy.backoff_ms_initial;
    }
}
