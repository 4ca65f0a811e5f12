use crate::error::VigilError;
use chrono::NaiveTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::Path};
use vigil_gateway::id::AccountId;

/// Top-level daemon configuration document.
///
/// A single JSON document supplies the supervised accounts, gateway
/// endpoints, cache/staleness/retry tuning, the reset schedule, and every
/// per-rule toggle and parameter.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct VigilConfig {
    /// Accounts to supervise.
    pub accounts: Vec<AccountId>,

    pub gateway: GatewayConfig,

    /// Path of the embedded store file.
    #[serde(default = "default_store_path")]
    pub store_path: String,

    /// Quotes older than this are flagged stale for unrealized-P&L math.
    #[serde(default = "default_quote_stale")]
    pub quote_stale_after_secs: u64,

    /// Deadline for both hubs to report connected during startup.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Grace given to in-flight enforcement actions during shutdown.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,

    #[serde(default)]
    pub contract_cache: ContractCacheConfig,

    #[serde(default)]
    pub executor_retry: RetryConfig,

    #[serde(default)]
    pub reset: ResetConfig,

    pub rules: RulesConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    pub rest_url: String,
    pub user_hub_url: String,
    pub market_hub_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct ContractCacheConfig {
    pub max_size: usize,
    pub ttl_secs: u64,
}

impl Default for ContractCacheConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            ttl_secs: 3600,
        }
    }
}

/// Enforcement executor retry tuning (transient faults only).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct RetryConfig {
    pub attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay_ms: 200,
            max_delay_ms: 5_000,
        }
    }
}

/// Daily session-reset schedule in a named IANA zone.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct ResetConfig {
    pub hour: u32,
    pub minute: u32,
    pub zone: String,
    pub holidays_path: Option<String>,
}

impl Default for ResetConfig {
    fn default() -> Self {
        Self {
            hour: 17,
            minute: 0,
            zone: "America/New_York".to_string(),
            holidays_path: None,
        }
    }
}

/// Per-rule toggles and parameters, in catalog order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct RulesConfig {
    pub max_contracts: MaxContractsConfig,
    pub max_contracts_per_instrument: MaxContractsPerInstrumentConfig,
    pub daily_realized_loss: DailyRealizedLossConfig,
    pub daily_unrealized_loss: DailyUnrealizedLossConfig,
    pub max_unrealized_profit: MaxUnrealizedProfitConfig,
    pub trade_frequency_limit: TradeFrequencyConfig,
    pub cooldown_after_loss: CooldownAfterLossConfig,
    pub no_stop_loss_grace: NoStopLossGraceConfig,
    pub session_block_outside: SessionBlockConfig,
    pub auth_loss_guard: AuthLossGuardConfig,
    pub symbol_blocks: SymbolBlocksConfig,
    pub trade_management: TradeManagementConfig,
}

/// How positions are counted towards the Rule-1 limit.
///
/// `gross` is accepted but currently aliases `net`: the counting API sums
/// absolute position magnitudes in both modes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CountType {
    #[default]
    Net,
    Gross,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct MaxContractsConfig {
    pub enabled: bool,
    pub limit: u32,
    pub count_type: CountType,
    pub close_all: bool,
    pub reduce_to_limit: bool,
    pub lockout_on_breach: bool,
}

impl Default for MaxContractsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            limit: 5,
            count_type: CountType::Net,
            close_all: true,
            reduce_to_limit: false,
            lockout_on_breach: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct MaxContractsPerInstrumentConfig {
    pub enabled: bool,
    /// Symbol root -> contract limit (eg/ "MNQ": 2).
    pub limits: HashMap<String, u32>,
    /// Limit applied to symbols missing from `limits`; `None` leaves unknown
    /// symbols unconstrained.
    pub unknown_symbol_limit: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct DailyRealizedLossConfig {
    pub enabled: bool,
    pub loss_limit: Decimal,
    pub lockout: LockoutUntilConfig,
}

impl Default for DailyRealizedLossConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            loss_limit: Decimal::from(500),
            lockout: LockoutUntilConfig::DailyReset,
        }
    }
}

/// When a rule-applied hard lockout expires.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LockoutUntilConfig {
    /// Until the next scheduled daily reset.
    DailyReset,
    /// Fixed number of hours from enforcement.
    Hours(u32),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnrealizedScope {
    #[default]
    PerPosition,
    Total,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct DailyUnrealizedLossConfig {
    pub enabled: bool,
    pub loss_limit: Decimal,
    pub scope: UnrealizedScope,
    pub lockout: bool,
}

impl Default for DailyUnrealizedLossConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            loss_limit: Decimal::from(300),
            scope: UnrealizedScope::PerPosition,
            lockout: false,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfitMode {
    #[default]
    ProfitTarget,
    Breakeven,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct MaxUnrealizedProfitConfig {
    pub enabled: bool,
    pub mode: ProfitMode,
    pub profit_target: Decimal,
}

impl Default for MaxUnrealizedProfitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: ProfitMode::ProfitTarget,
            profit_target: Decimal::from(1000),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FrequencyWindow {
    Minute,
    #[default]
    Hour,
    Session,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct TradeFrequencyConfig {
    pub enabled: bool,
    pub max_trades: u64,
    pub window: FrequencyWindow,
    pub cooldown_secs: u64,
}

impl Default for TradeFrequencyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_trades: 30,
            window: FrequencyWindow::Hour,
            cooldown_secs: 900,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CooldownTier {
    /// Negative trade pnl at or below which this tier matches.
    pub loss_amount: Decimal,
    pub cooldown_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct CooldownAfterLossConfig {
    pub enabled: bool,
    pub tiers: Vec<CooldownTier>,
}

impl Default for CooldownAfterLossConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            tiers: vec![
                CooldownTier {
                    loss_amount: Decimal::from(-100),
                    cooldown_secs: 300,
                },
                CooldownTier {
                    loss_amount: Decimal::from(-200),
                    cooldown_secs: 900,
                },
                CooldownTier {
                    loss_amount: Decimal::from(-300),
                    cooldown_secs: 1800,
                },
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct NoStopLossGraceConfig {
    pub enabled: bool,
    pub grace_period_secs: u64,
}

impl Default for NoStopLossGraceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            grace_period_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct SessionBlockConfig {
    pub enabled: bool,
    /// Inclusive session open, "HH:MM" wall-clock in `zone`.
    pub start: String,
    /// Inclusive session close, "HH:MM" wall-clock in `zone`.
    pub end: String,
    pub zone: String,
}

impl Default for SessionBlockConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            start: "08:30".to_string(),
            end: "15:00".to_string(),
            zone: "America/Chicago".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct AuthLossGuardConfig {
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct SymbolBlocksConfig {
    pub enabled: bool,
    /// Blocked symbol roots (eg/ "RTY", "BTC").
    pub blocked_symbols: Vec<String>,
    pub close_existing: bool,
    pub lockout: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct TradeManagementConfig {
    pub enabled: bool,
    pub auto_stop_loss: bool,
    pub stop_loss_ticks: u32,
}

impl Default for TradeManagementConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            auto_stop_loss: true,
            stop_loss_ticks: 10,
        }
    }
}

impl VigilConfig {
    /// Load and validate a configuration document.
    pub fn load<P>(path: P) -> Result<Self, VigilError>
    where
        P: AsRef<Path>,
    {
        let raw = std::fs::read_to_string(&path).map_err(|error| {
            VigilError::config(path.as_ref().display().to_string(), error.to_string())
        })?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|error| VigilError::config("<document>", error.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject invalid configuration before any connection is attempted,
    /// naming the offending field path.
    pub fn validate(&self) -> Result<(), VigilError> {
        if self.accounts.is_empty() {
            return Err(VigilError::config("accounts", "at least one account required"));
        }
        if self.contract_cache.max_size == 0 {
            return Err(VigilError::config("contract_cache.max_size", "must be > 0"));
        }
        if self.executor_retry.attempts == 0 {
            return Err(VigilError::config("executor_retry.attempts", "must be > 0"));
        }
        if self.reset.hour > 23 {
            return Err(VigilError::config("reset.hour", "must be 0-23"));
        }
        if self.reset.minute > 59 {
            return Err(VigilError::config("reset.minute", "must be 0-59"));
        }
        parse_zone(&self.reset.zone, "reset.zone")?;

        let rules = &self.rules;
        if rules.max_contracts.enabled && rules.max_contracts.limit == 0 {
            return Err(VigilError::config("rules.max_contracts.limit", "must be > 0"));
        }
        if rules.daily_realized_loss.enabled
            && rules.daily_realized_loss.loss_limit <= Decimal::ZERO
        {
            return Err(VigilError::config(
                "rules.daily_realized_loss.loss_limit",
                "must be a positive dollar amount",
            ));
        }
        if rules.daily_unrealized_loss.enabled
            && rules.daily_unrealized_loss.loss_limit <= Decimal::ZERO
        {
            return Err(VigilError::config(
                "rules.daily_unrealized_loss.loss_limit",
                "must be a positive dollar amount",
            ));
        }
        if rules.max_unrealized_profit.enabled
            && rules.max_unrealized_profit.profit_target <= Decimal::ZERO
        {
            return Err(VigilError::config(
                "rules.max_unrealized_profit.profit_target",
                "must be a positive dollar amount",
            ));
        }
        if rules.trade_frequency_limit.enabled && rules.trade_frequency_limit.max_trades == 0 {
            return Err(VigilError::config(
                "rules.trade_frequency_limit.max_trades",
                "must be > 0",
            ));
        }
        if rules.cooldown_after_loss.enabled {
            if rules.cooldown_after_loss.tiers.is_empty() {
                return Err(VigilError::config(
                    "rules.cooldown_after_loss.tiers",
                    "at least one tier required",
                ));
            }
            for (index, tier) in rules.cooldown_after_loss.tiers.iter().enumerate() {
                if tier.loss_amount >= Decimal::ZERO {
                    return Err(VigilError::config(
                        format!("rules.cooldown_after_loss.tiers[{index}].loss_amount"),
                        "must be negative",
                    ));
                }
            }
        }
        if rules.session_block_outside.enabled {
            parse_session_time(
                &rules.session_block_outside.start,
                "rules.session_block_outside.start",
            )?;
            parse_session_time(
                &rules.session_block_outside.end,
                "rules.session_block_outside.end",
            )?;
            parse_zone(
                &rules.session_block_outside.zone,
                "rules.session_block_outside.zone",
            )?;
        }
        if rules.trade_management.enabled && rules.trade_management.stop_loss_ticks == 0 {
            return Err(VigilError::config(
                "rules.trade_management.stop_loss_ticks",
                "must be > 0",
            ));
        }

        Ok(())
    }
}

pub(crate) fn parse_zone(zone: &str, path: &str) -> Result<chrono_tz::Tz, VigilError> {
    zone.parse::<chrono_tz::Tz>()
        .map_err(|_| VigilError::config(path, format!("unknown IANA zone: {zone}")))
}

pub(crate) fn parse_session_time(value: &str, path: &str) -> Result<NaiveTime, VigilError> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .map_err(|_| VigilError::config(path, format!("expected HH:MM, got: {value}")))
}


fn default_store_path() -> String {
    "vigil.db".to_string()
}

fn default_quote_stale() -> u64 {
    10
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_shutdown_grace() -> u64 {
    10
}
