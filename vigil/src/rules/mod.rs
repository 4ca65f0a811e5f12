use crate::{
    config::RulesConfig,
    event::AccountEvent,
    lockout::LockoutManager,
    state::{
        StateTracker, contracts::ContractLookup, pending_stop::PendingStopTracker,
        pnl::PnlTracker, quotes::QuoteTracker, trades::TradeCounter,
    },
};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display};
use vigil_gateway::id::{AccountId, ContractId, OrderId, PositionId};
use vigil_store::LockoutKind;

/// R10: account authorization guard.
pub mod auth_guard;

/// R7: cooldown after a losing trade.
pub mod cooldown;

/// R3: daily realized loss limit.
pub mod daily_loss;

/// R6: trade frequency limit.
pub mod frequency;

/// R1: net contract cap across all instruments.
pub mod max_contracts;

/// R2: per-instrument contract caps.
pub mod per_instrument;

/// R5: unrealized profit target / breakeven exit.
pub mod profit_target;

/// R9: order blocking outside session hours.
pub mod session_hours;

/// R8: protective-stop grace enforcement.
pub mod stop_grace;

/// R11: blocked symbol list.
pub mod symbol_blocks;

/// R12: automatic protective stop placement.
pub mod trade_management;

/// R4: daily unrealized loss limit.
pub mod unrealized_loss;

/// Rule identifiers, in catalog (and evaluation) order.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize,
)]
pub enum RuleId {
    R1,
    R2,
    R3,
    R4,
    R5,
    R6,
    R7,
    R8,
    R9,
    R10,
    R11,
    R12,
}

impl RuleId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::R1 => "R1",
            Self::R2 => "R2",
            Self::R3 => "R3",
            Self::R4 => "R4",
            Self::R5 => "R5",
            Self::R6 => "R6",
            Self::R7 => "R7",
            Self::R8 => "R8",
            Self::R9 => "R9",
            Self::R10 => "R10",
            Self::R11 => "R11",
            Self::R12 => "R12",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::R1 => "MaxContracts",
            Self::R2 => "MaxContractsPerInstrument",
            Self::R3 => "DailyRealizedLoss",
            Self::R4 => "DailyUnrealizedLoss",
            Self::R5 => "MaxUnrealizedProfit",
            Self::R6 => "TradeFrequencyLimit",
            Self::R7 => "CooldownAfterLoss",
            Self::R8 => "NoStopLossGrace",
            Self::R9 => "SessionBlockOutside",
            Self::R10 => "AuthLossGuard",
            Self::R11 => "SymbolBlocks",
            Self::R12 => "TradeManagement",
        }
    }
}

impl Display for RuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Expiry of a rule-applied hard lockout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum LockoutUntil {
    /// Until the next scheduled daily reset.
    NextReset,
    After { hours: u32 },
    Permanent,
}

/// A single enforcement directive. The executor interprets these; rules never
/// touch the gateway themselves.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub enum EnforcementAction {
    CloseAllPositions,
    CancelAllOrders,
    /// Close every position the account holds in `contract`.
    CloseContract { contract: ContractId },
    /// Partially close `contract` until the account's count in it is
    /// `target`.
    ReduceContractTo { contract: ContractId, target: u32 },
    /// Partially close positions (largest first) until the account-wide
    /// contract count is `target`.
    ReduceAccountToNet { target: u32 },
    CancelOrder { order: OrderId },
    /// Submit a protective stop `offset_ticks` from the position's entry.
    PlaceStopLoss {
        position: PositionId,
        offset_ticks: u32,
    },
    ApplyLockout {
        kind: LockoutKind,
        until: LockoutUntil,
        reason: String,
    },
    /// Cooldown-kind lockout backed by a `cooldown_<acct>` timer that clears
    /// it on expiry.
    StartCooldown { duration_secs: u64, reason: String },
}

/// Output of a rule's `check`: the enforcement the executor must run.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Breach {
    pub rule: RuleId,
    pub reason: String,
    pub actions: Vec<EnforcementAction>,
    pub details: serde_json::Value,
}

impl Breach {
    pub fn new(rule: RuleId, reason: impl Into<String>, actions: Vec<EnforcementAction>) -> Self {
        Self {
            rule,
            reason: reason.into(),
            actions,
            details: serde_json::Value::Null,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Read-only view of the per-account state plane handed to every `check`.
///
/// Rules are pure computation over this view - no blocking, no gateway
/// calls. Metadata was prewarmed by the dispatcher, so `contracts.peek` is
/// the only lookup a rule needs; a `None` there means "skip price math for
/// this event".
pub struct StateView<'a> {
    pub account: AccountId,
    pub now: DateTime<Utc>,
    pub state: &'a StateTracker,
    pub pnl: &'a PnlTracker,
    pub quotes: &'a QuoteTracker,
    pub contracts: &'a dyn ContractLookup,
    pub trades: &'a TradeCounter,
    pub pending_stops: &'a PendingStopTracker,
    pub lockouts: &'a LockoutManager,
    pub quote_stale_after: TimeDelta,
}

impl Debug for StateView<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateView")
            .field("account", &self.account)
            .field("now", &self.now)
            .finish()
    }
}

/// A rule evaluator: pure `(event, state) -> Option<Breach>`.
pub trait RiskRule
where
    Self: Debug + Send + Sync,
{
    fn id(&self) -> RuleId;

    fn enabled(&self) -> bool;

    fn check(&self, event: &AccountEvent, view: &StateView<'_>) -> Option<Breach>;
}

/// Build the full catalog in evaluation order. Disabled rules are included
/// (the engine skips them before `check`), so toggles are observable.
pub fn build_catalog(config: &RulesConfig) -> Vec<Box<dyn RiskRule>> {
    vec![
        Box::new(max_contracts::MaxContracts::new(config.max_contracts.clone())),
        Box::new(per_instrument::MaxContractsPerInstrument::new(
            config.max_contracts_per_instrument.clone(),
        )),
        Box::new(daily_loss::DailyRealizedLoss::new(
            config.daily_realized_loss.clone(),
        )),
        Box::new(unrealized_loss::DailyUnrealizedLoss::new(
            config.daily_unrealized_loss.clone(),
        )),
        Box::new(profit_target::MaxUnrealizedProfit::new(
            config.max_unrealized_profit.clone(),
        )),
        Box::new(frequency::TradeFrequencyLimit::new(
            config.trade_frequency_limit.clone(),
        )),
        Box::new(cooldown::CooldownAfterLoss::new(
            config.cooldown_after_loss.clone(),
        )),
        Box::new(stop_grace::NoStopLossGrace::new(
            config.no_stop_loss_grace.clone(),
        )),
        Box::new(session_hours::SessionBlockOutside::new(
            config.session_block_outside.clone(),
        )),
        Box::new(auth_guard::AuthLossGuard::new(config.auth_loss_guard.clone())),
        Box::new(symbol_blocks::SymbolBlocks::new(config.symbol_blocks.clone())),
        Box::new(trade_management::TradeManagement::new(
            config.trade_management.clone(),
        )),
    ]
}
