use crate::state::{StateTracker, contracts::ContractLookup, quotes::QuoteTracker};
use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use chrono_tz::Tz;
use fnv::FnvHashMap;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::debug;
use vigil_gateway::{
    id::AccountId,
    types::{PositionSide, PositionSnapshot, TradeFill},
};
use vigil_store::{Store, StoreError};

/// Per-account realised P&L for the current session day.
///
/// The session day rolls at the scheduled reset time, not midnight. Voided
/// fills and half-turns (`pnl = None`) never contribute.
#[derive(Debug)]
pub struct PnlTracker {
    store: Arc<Store>,
    zone: Tz,
    realized: RwLock<FnvHashMap<AccountId, Decimal>>,
    session_date: RwLock<NaiveDate>,
}

impl PnlTracker {
    pub fn new(store: Arc<Store>, zone: Tz, now: DateTime<Utc>) -> Self {
        Self {
            store,
            zone,
            realized: RwLock::new(FnvHashMap::default()),
            session_date: RwLock::new(now.with_timezone(&zone).date_naive()),
        }
    }

    /// Restore each account's running total for the current session date.
    pub fn load_from_store(&self, accounts: &[AccountId]) -> Result<(), StoreError> {
        let date = *self.session_date.read();
        let mut realized = self.realized.write();
        for account in accounts {
            if let Some(total) = self.store.load_daily_pnl(*account, date)? {
                realized.insert(*account, total);
            }
        }
        Ok(())
    }

    /// Fold a fill into the account's realised total, persisting the new
    /// value. Returns the updated total.
    pub fn apply_trade(&self, trade: &TradeFill) -> Result<Decimal, StoreError> {
        let Some(pnl) = trade.profit_and_loss else {
            return Ok(self.daily_realized(trade.account_id));
        };
        if trade.voided {
            return Ok(self.daily_realized(trade.account_id));
        }

        let total = {
            let mut realized = self.realized.write();
            let total = realized.entry(trade.account_id).or_insert(Decimal::ZERO);
            *total += pnl;
            *total
        };

        let date = *self.session_date.read();
        self.store.upsert_daily_pnl(trade.account_id, date, total)?;
        Ok(total)
    }

    pub fn daily_realized(&self, account: AccountId) -> Decimal {
        self.realized
            .read()
            .get(&account)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    /// Zero the account for a new session day anchored at `now`.
    pub fn reset_daily(&self, account: AccountId, now: DateTime<Utc>) -> Result<(), StoreError> {
        let date = now.with_timezone(&self.zone).date_naive();
        *self.session_date.write() = date;
        self.realized.write().insert(account, Decimal::ZERO);
        self.store.upsert_daily_pnl(account, date, Decimal::ZERO)?;
        debug!(%account, %date, "daily realized pnl reset");
        Ok(())
    }

    pub fn session_date(&self) -> NaiveDate {
        *self.session_date.read()
    }
}

/// Unrealized value with the staleness flag callers decide on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unrealized {
    pub value: Decimal,
    pub stale: bool,
}

/// Account-total unrealized value. `skipped` counts positions excluded
/// because metadata or a quote was unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountUnrealized {
    pub value: Decimal,
    pub stale: bool,
    pub skipped: usize,
}

/// Unrealized P&L of one position from the last traded price:
/// `(price_delta / tick_size) * tick_value * size`, sign by side.
///
/// `None` when the contract metadata or quote is unavailable - callers skip
/// price-dependent rules for this event.
pub fn position_unrealized(
    position: &PositionSnapshot,
    quotes: &QuoteTracker,
    contracts: &dyn ContractLookup,
    stale_after: TimeDelta,
    now: DateTime<Utc>,
) -> Option<Unrealized> {
    let contract = contracts.peek(&position.contract_id)?;
    let last = quotes.last_price(&position.contract_id)?;
    let stale = quotes.is_stale(&position.contract_id, stale_after, now);

    let unit_delta = match position.side {
        PositionSide::Long => last - position.average_price,
        PositionSide::Short => position.average_price - last,
    };
    let value = contract.value_of_move(unit_delta) * Decimal::from(position.size);

    Some(Unrealized { value, stale })
}

/// Aggregate unrealized P&L across the account's open positions.
pub fn account_unrealized(
    account: AccountId,
    state: &StateTracker,
    quotes: &QuoteTracker,
    contracts: &dyn ContractLookup,
    stale_after: TimeDelta,
    now: DateTime<Utc>,
) -> AccountUnrealized {
    let mut total = Decimal::ZERO;
    let mut stale = false;
    let mut skipped = 0;

    for position in state.positions(account) {
        match position_unrealized(&position, quotes, contracts, stale_after, now) {
            Some(unrealized) => {
                total += unrealized.value;
                stale |= unrealized.stale;
            }
            None => skipped += 1,
        }
    }

    AccountUnrealized {
        value: total,
        stale,
        skipped,
    }
}

/// Round to cent precision - comparisons against configured limits happen at
/// two decimal places only.
pub fn to_cents(value: Decimal) -> Decimal {
    value.round_dp(2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use vigil_gateway::{
        id::{ContractId, OrderId, PositionId, SymbolId, TradeId},
        types::{Contract, OrderSide, QuoteUpdate},
    };

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn tracker() -> PnlTracker {
        PnlTracker::new(
            Arc::new(Store::open_in_memory().unwrap()),
            chrono_tz::America::New_York,
            now(),
        )
    }

    fn fill(account: i64, id: i64, pnl: Option<Decimal>, voided: bool) -> TradeFill {
        TradeFill {
            id: TradeId::new(id),
            account_id: AccountId::new(account),
            contract_id: ContractId::new("CON.F.US.MNQ.U25"),
            order_id: OrderId::new(id),
            side: OrderSide::Sell,
            size: 1,
            price: dec!(21000),
            profit_and_loss: pnl,
            fees: dec!(0.74),
            voided,
            creation_timestamp: now(),
        }
    }

    #[test]
    fn test_realized_sums_non_voided_full_turns() {
        let tracker = tracker();
        let account = AccountId::new(12345);

        tracker.apply_trade(&fill(12345, 1, Some(dec!(-200)), false)).unwrap();
        tracker.apply_trade(&fill(12345, 2, None, false)).unwrap();
        tracker.apply_trade(&fill(12345, 3, Some(dec!(-250)), true)).unwrap();
        tracker.apply_trade(&fill(12345, 4, Some(dec!(50)), false)).unwrap();

        assert_eq!(tracker.daily_realized(account), dec!(-150));
    }

    #[test]
    fn test_reset_daily_zeroes_account() {
        let tracker = tracker();
        let account = AccountId::new(12345);

        tracker.apply_trade(&fill(12345, 1, Some(dec!(-600)), false)).unwrap();
        tracker.reset_daily(account, now()).unwrap();

        assert_eq!(tracker.daily_realized(account), Decimal::ZERO);
    }

    #[test]
    fn test_crash_recovery_restores_running_total() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let zone = chrono_tz::America::New_York;
        let account = AccountId::new(12345);

        let tracker = PnlTracker::new(Arc::clone(&store), zone, now());
        tracker.apply_trade(&fill(12345, 1, Some(dec!(-250)), false)).unwrap();

        let restarted = PnlTracker::new(store, zone, now());
        restarted.load_from_store(&[account]).unwrap();
        assert_eq!(restarted.daily_realized(account), dec!(-250));

        restarted.apply_trade(&fill(12345, 2, Some(dec!(50)), false)).unwrap();
        assert_eq!(restarted.daily_realized(account), dec!(-200));
    }

    #[derive(Debug)]
    struct FixedContracts(Contract);

    impl ContractLookup for FixedContracts {
        fn peek(&self, contract: &ContractId) -> Option<Contract> {
            (contract == &self.0.id).then(|| self.0.clone())
        }
    }

    fn mnq_contract() -> Contract {
        Contract::new(
            ContractId::new("CON.F.US.MNQ.U25"),
            SymbolId::new("F.US.MNQ"),
            dec!(0.25),
            dec!(0.50),
            "Micro E-mini Nasdaq-100".to_string(),
        )
    }

    fn long_position(size: u32, entry: Decimal) -> PositionSnapshot {
        PositionSnapshot {
            id: PositionId::new(1),
            account_id: AccountId::new(12345),
            contract_id: ContractId::new("CON.F.US.MNQ.U25"),
            side: PositionSide::Long,
            size,
            average_price: entry,
            creation_timestamp: now(),
        }
    }

    fn quote_at(last: Decimal, received: DateTime<Utc>) -> QuoteTracker {
        let quotes = QuoteTracker::new();
        quotes.update(
            QuoteUpdate {
                contract_id: ContractId::new("CON.F.US.MNQ.U25"),
                best_bid: Some(last - dec!(0.25)),
                best_ask: Some(last + dec!(0.25)),
                last_price: last,
                timestamp: received,
            },
            received,
        );
        quotes
    }

    #[test]
    fn test_long_position_unrealized_loss() {
        let contracts = FixedContracts(mnq_contract());
        let quotes = quote_at(dec!(20950), now());
        let position = long_position(3, dec!(21000));

        let unrealized = position_unrealized(
            &position,
            &quotes,
            &contracts,
            TimeDelta::seconds(10),
            now(),
        )
        .unwrap();

        // 50 points down / 0.25 tick * $0.50 * 3 contracts = -$300.
        assert_eq!(unrealized.value, dec!(-300));
        assert!(!unrealized.stale);
    }

    #[test]
    fn test_short_position_profits_from_falling_price() {
        let contracts = FixedContracts(mnq_contract());
        let quotes = quote_at(dec!(20950), now());
        let mut position = long_position(2, dec!(21000));
        position.side = PositionSide::Short;

        let unrealized = position_unrealized(
            &position,
            &quotes,
            &contracts,
            TimeDelta::seconds(10),
            now(),
        )
        .unwrap();

        assert_eq!(unrealized.value, dec!(200));
    }

    #[test]
    fn test_stale_quote_flagged_not_hidden() {
        let contracts = FixedContracts(mnq_contract());
        let received = now() - TimeDelta::seconds(60);
        let quotes = quote_at(dec!(20950), received);
        let position = long_position(1, dec!(21000));

        let unrealized = position_unrealized(
            &position,
            &quotes,
            &contracts,
            TimeDelta::seconds(10),
            now(),
        )
        .unwrap();

        assert!(unrealized.stale);
        assert_eq!(unrealized.value, dec!(-100));
    }

    #[test]
    fn test_missing_metadata_skips_position() {
        let contracts = FixedContracts(mnq_contract());
        let quotes = quote_at(dec!(20950), now());
        let mut position = long_position(1, dec!(21000));
        position.contract_id = ContractId::new("CON.F.US.UNKNOWN");

        let unrealized = position_unrealized(
            &position,
            &quotes,
            &contracts,
            TimeDelta::seconds(10),
            now(),
        );
        assert!(unrealized.is_none());
    }

    #[test]
    fn test_rounding_only_at_comparison_sites() {
        assert_eq!(to_cents(dec!(-299.999)), dec!(-300.00));
        assert_eq!(to_cents(dec!(100.006)), dec!(100.01));
    }
}
