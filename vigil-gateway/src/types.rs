use crate::id::{AccountId, ContractId, OrderId, PositionId, SymbolId, TradeId};
use chrono::{DateTime, Utc};
use derive_more::Constructor;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Direction of an open position.
///
/// The gateway encodes sides numerically: Long = 1, Short = 2.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize,
)]
#[serde(try_from = "u8", into = "u8")]
pub enum PositionSide {
    Long,
    Short,
}

impl From<PositionSide> for u8 {
    fn from(value: PositionSide) -> Self {
        match value {
            PositionSide::Long => 1,
            PositionSide::Short => 2,
        }
    }
}

impl TryFrom<u8> for PositionSide {
    type Error = UnknownWireCode;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Long),
            2 => Ok(Self::Short),
            other => Err(UnknownWireCode::new("PositionSide", other)),
        }
    }
}

/// Direction of an order.
///
/// The gateway encodes sides numerically: Buy = 0, Sell = 1.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize,
)]
#[serde(try_from = "u8", into = "u8")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl From<OrderSide> for u8 {
    fn from(value: OrderSide) -> Self {
        match value {
            OrderSide::Buy => 0,
            OrderSide::Sell => 1,
        }
    }
}

impl TryFrom<u8> for OrderSide {
    type Error = UnknownWireCode;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Buy),
            1 => Ok(Self::Sell),
            other => Err(UnknownWireCode::new("OrderSide", other)),
        }
    }
}

/// Order kind.
///
/// Gateway codes: Limit = 1, Market = 2, StopLimit = 3, Stop = 4,
/// TrailingStop = 5.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize,
)]
#[serde(try_from = "u8", into = "u8")]
pub enum OrderKind {
    Limit,
    Market,
    StopLimit,
    Stop,
    TrailingStop,
}

impl OrderKind {
    /// True for the order kinds that can qualify as a protective stop.
    pub fn is_stop_kind(&self) -> bool {
        matches!(self, Self::Stop | Self::StopLimit | Self::TrailingStop)
    }
}

impl From<OrderKind> for u8 {
    fn from(value: OrderKind) -> Self {
        match value {
            OrderKind::Limit => 1,
            OrderKind::Market => 2,
            OrderKind::StopLimit => 3,
            OrderKind::Stop => 4,
            OrderKind::TrailingStop => 5,
        }
    }
}

impl TryFrom<u8> for OrderKind {
    type Error = UnknownWireCode;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Limit),
            2 => Ok(Self::Market),
            3 => Ok(Self::StopLimit),
            4 => Ok(Self::Stop),
            5 => Ok(Self::TrailingStop),
            other => Err(UnknownWireCode::new("OrderKind", other)),
        }
    }
}

/// Order lifecycle status.
///
/// Gateway codes: None = 0, Open = 1, Filled = 2, Cancelled = 3, Expired = 4,
/// Rejected = 5, Pending = 6.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize,
)]
#[serde(try_from = "u8", into = "u8")]
pub enum OrderStatus {
    None,
    Open,
    Filled,
    Cancelled,
    Expired,
    Rejected,
    Pending,
}

impl OrderStatus {
    /// Terminal statuses never transition again; terminal orders are dropped
    /// from tracked state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Filled | Self::Cancelled | Self::Expired | Self::Rejected
        )
    }

    /// Working statuses are tracked as live exposure.
    pub fn is_working(&self) -> bool {
        matches!(self, Self::Open | Self::Pending)
    }
}

impl From<OrderStatus> for u8 {
    fn from(value: OrderStatus) -> Self {
        match value {
            OrderStatus::None => 0,
            OrderStatus::Open => 1,
            OrderStatus::Filled => 2,
            OrderStatus::Cancelled => 3,
            OrderStatus::Expired => 4,
            OrderStatus::Rejected => 5,
            OrderStatus::Pending => 6,
        }
    }
}

impl TryFrom<u8> for OrderStatus {
    type Error = UnknownWireCode;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::Open),
            2 => Ok(Self::Filled),
            3 => Ok(Self::Cancelled),
            4 => Ok(Self::Expired),
            5 => Ok(Self::Rejected),
            6 => Ok(Self::Pending),
            other => Err(UnknownWireCode::new("OrderStatus", other)),
        }
    }
}

/// Error produced when the gateway sends a numeric discriminant this crate
/// does not know. Callers log and drop the event rather than erroring the
/// stream (gateway schema drift tolerance).
#[derive(Debug, Clone, Eq, PartialEq, Error, Constructor)]
#[error("unknown {entity} wire code: {code}")]
pub struct UnknownWireCode {
    pub entity: &'static str,
    pub code: u8,
}

/// Open position as reported by the gateway.
///
/// A snapshot with `size = 0` communicates position closure.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Constructor)]
#[serde(rename_all = "camelCase")]
pub struct PositionSnapshot {
    pub id: PositionId,
    pub account_id: AccountId,
    pub contract_id: ContractId,
    #[serde(rename = "type")]
    pub side: PositionSide,
    pub size: u32,
    pub average_price: Decimal,
    pub creation_timestamp: DateTime<Utc>,
}

impl PositionSnapshot {
    /// True once the gateway reports the position fully closed.
    pub fn is_closed(&self) -> bool {
        self.size == 0
    }
}

/// Working or terminal order as reported by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Constructor)]
#[serde(rename_all = "camelCase")]
pub struct OrderSnapshot {
    pub id: OrderId,
    pub account_id: AccountId,
    pub contract_id: ContractId,
    #[serde(rename = "type")]
    pub kind: OrderKind,
    pub side: OrderSide,
    pub size: u32,
    #[serde(default)]
    pub limit_price: Option<Decimal>,
    #[serde(default)]
    pub stop_price: Option<Decimal>,
    pub status: OrderStatus,
    pub creation_timestamp: DateTime<Utc>,
}

/// Execution fill. Immutable once received.
///
/// `profit_and_loss = None` marks a half-turn (position-opening fill); the
/// closing fill carries the realised pnl of the round trip.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Constructor)]
#[serde(rename_all = "camelCase")]
pub struct TradeFill {
    pub id: TradeId,
    pub account_id: AccountId,
    pub contract_id: ContractId,
    pub order_id: OrderId,
    pub side: OrderSide,
    pub size: u32,
    pub price: Decimal,
    #[serde(default)]
    pub profit_and_loss: Option<Decimal>,
    #[serde(default)]
    pub fees: Decimal,
    #[serde(default)]
    pub voided: bool,
    pub creation_timestamp: DateTime<Utc>,
}

impl TradeFill {
    /// True for fills that open a position half-turn (no realised pnl yet).
    pub fn is_half_turn(&self) -> bool {
        self.profit_and_loss.is_none()
    }
}

/// Account-level update from the user hub.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Constructor)]
#[serde(rename_all = "camelCase")]
pub struct AccountUpdate {
    pub account_id: AccountId,
    pub can_trade: bool,
    #[serde(default)]
    pub simulated: bool,
}

impl AccountUpdate {
    /// The gateway revoking trading authorization is the Rule-10 trigger.
    pub fn authorization_lost(&self) -> bool {
        !self.can_trade
    }
}

/// Top-of-book quote from the market hub.
///
/// `bid <= ask` whenever both sides are present.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Constructor)]
#[serde(rename_all = "camelCase")]
pub struct QuoteUpdate {
    pub contract_id: ContractId,
    #[serde(default)]
    pub best_bid: Option<Decimal>,
    #[serde(default)]
    pub best_ask: Option<Decimal>,
    pub last_price: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Contract metadata, fetched lazily and cached.
///
/// `tick_size > 0 && tick_value > 0` always holds for metadata the gateway
/// accepts as valid.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Constructor)]
#[serde(rename_all = "camelCase")]
pub struct Contract {
    pub id: ContractId,
    pub symbol_id: SymbolId,
    pub tick_size: Decimal,
    pub tick_value: Decimal,
    pub name: String,
}

impl Contract {
    /// Dollar pnl of one contract moving `price_delta` in its favour.
    pub fn value_of_move(&self, price_delta: Decimal) -> Decimal {
        (price_delta / self.tick_size) * self.tick_value
    }
}

/// New order submission (the executor only submits protective stops).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Constructor)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    pub account_id: AccountId,
    pub contract_id: ContractId,
    #[serde(rename = "type")]
    pub kind: OrderKind,
    pub side: OrderSide,
    pub size: u32,
    #[serde(default)]
    pub limit_price: Option<Decimal>,
    #[serde(default)]
    pub stop_price: Option<Decimal>,
}
