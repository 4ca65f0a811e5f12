use derive_more::From;
use serde::{Deserialize, Serialize};
use vigil_gateway::{
    realtime::UserHubEvent,
    types::{AccountUpdate, OrderSnapshot, PositionSnapshot, QuoteUpdate, TradeFill},
};

/// Event delivered to a per-account worker.
///
/// User-hub payloads arrive pre-routed by `accountId`; quotes are fanned out
/// to every account holding the contract; `GraceSweep` is the 1 Hz re-check
/// tick for the pending-stop set.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, From)]
pub enum AccountEvent {
    #[from]
    Account(AccountUpdate),
    #[from]
    Position(PositionSnapshot),
    #[from]
    Order(OrderSnapshot),
    #[from]
    Trade(TradeFill),
    #[from]
    Quote(QuoteUpdate),
    GraceSweep,
}

impl AccountEvent {
    /// True for quote events, the only class the dispatcher may shed under
    /// backlog (quotes are refreshable; trades/positions/orders are not).
    pub fn is_quote(&self) -> bool {
        matches!(self, Self::Quote(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Account(_) => "account",
            Self::Position(_) => "position",
            Self::Order(_) => "order",
            Self::Trade(_) => "trade",
            Self::Quote(_) => "quote",
            Self::GraceSweep => "grace_sweep",
        }
    }
}

impl From<UserHubEvent> for AccountEvent {
    fn from(value: UserHubEvent) -> Self {
        match value {
            UserHubEvent::Account(update) => Self::Account(update),
            UserHubEvent::Position(position) => Self::Position(position),
            UserHubEvent::Order(order) => Self::Order(order),
            UserHubEvent::Trade(trade) => Self::Trade(trade),
        }
    }
}
