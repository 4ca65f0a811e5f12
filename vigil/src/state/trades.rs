use chrono::{DateTime, TimeDelta, Utc};
use fnv::FnvHashMap;
use parking_lot::RwLock;
use std::{collections::VecDeque, sync::Arc};
use tracing::debug;
use vigil_gateway::{id::AccountId, types::TradeFill};
use vigil_store::{Store, StoreError, TradeRecord};

/// Trade counts across the three rolling windows Rule 6 can be configured
/// on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TradeCounts {
    pub minute: u64,
    pub hour: u64,
    pub session: u64,
}

#[derive(Debug)]
struct AccountTrades {
    /// Rolling ring of trade timestamps, pruned to one hour retention.
    ring: VecDeque<DateTime<Utc>>,
    session_start: DateTime<Utc>,
    /// Incremental session counter - survives the one-hour ring prune, so
    /// sessions longer than an hour do not under-count.
    session_count: u64,
}

/// Per-account rolling trade timestamps with minute / hour / session
/// windows.
///
/// The in-memory ring keeps at most one hour of history; the session count
/// is carried incrementally and rebuilt from the store on startup.
#[derive(Debug)]
pub struct TradeCounter {
    store: Arc<Store>,
    inner: RwLock<FnvHashMap<AccountId, AccountTrades>>,
    /// Session start for accounts with no persisted row (typically the
    /// previous scheduled reset instant).
    default_session_start: DateTime<Utc>,
}

impl TradeCounter {
    pub fn new(store: Arc<Store>, default_session_start: DateTime<Utc>) -> Self {
        Self {
            store,
            inner: RwLock::new(FnvHashMap::default()),
            default_session_start,
        }
    }

    /// Restore session boundaries and the ≤1h ring from the store.
    pub fn load_from_store(&self, now: DateTime<Utc>) -> Result<(), StoreError> {
        let mut inner = self.inner.write();

        for (account, session_start) in self.store.load_session_starts()? {
            inner.insert(
                account,
                AccountTrades {
                    ring: VecDeque::new(),
                    session_start,
                    session_count: 0,
                },
            );
        }

        // Trade history retention (7 days) covers any session, which rolls
        // daily; rebuild both the ring and the session counters from it.
        let earliest = inner
            .values()
            .map(|trades| trades.session_start)
            .min()
            .unwrap_or(self.default_session_start)
            .min(now - TimeDelta::hours(1));

        for trade in self.store.load_trades_since(earliest)? {
            let entry = inner
                .entry(trade.account_id)
                .or_insert_with(|| AccountTrades {
                    ring: VecDeque::new(),
                    session_start: self.default_session_start,
                    session_count: 0,
                });
            if trade.time > now - TimeDelta::hours(1) {
                entry.ring.push_back(trade.time);
            }
            if trade.time > entry.session_start {
                entry.session_count += 1;
            }
        }

        debug!(accounts = inner.len(), "trade counter loaded from store");
        Ok(())
    }

    /// Record a fill: append, prune the ring to one hour, persist, and
    /// return the updated window counts.
    pub fn record(&self, trade: &TradeFill, now: DateTime<Utc>) -> Result<TradeCounts, StoreError> {
        {
            let mut inner = self.inner.write();
            let entry = inner
                .entry(trade.account_id)
                .or_insert_with(|| AccountTrades {
                    ring: VecDeque::new(),
                    session_start: self.default_session_start,
                    session_count: 0,
                });

            entry.ring.push_back(trade.creation_timestamp);
            let cutoff = now - TimeDelta::hours(1);
            while entry.ring.front().is_some_and(|time| *time <= cutoff) {
                entry.ring.pop_front();
            }
            if trade.creation_timestamp > entry.session_start {
                entry.session_count += 1;
            }
        }

        self.store.insert_trade(&TradeRecord::new(
            trade.id,
            trade.account_id,
            trade.contract_id.clone(),
            trade.creation_timestamp,
            trade.profit_and_loss,
            trade.voided,
        ))?;

        Ok(self.counts(trade.account_id, now))
    }

    pub fn counts(&self, account: AccountId, now: DateTime<Utc>) -> TradeCounts {
        let inner = self.inner.read();
        let Some(entry) = inner.get(&account) else {
            return TradeCounts::default();
        };

        let minute_cutoff = now - TimeDelta::minutes(1);
        let hour_cutoff = now - TimeDelta::hours(1);

        TradeCounts {
            minute: entry.ring.iter().filter(|time| **time > minute_cutoff).count() as u64,
            hour: entry.ring.iter().filter(|time| **time > hour_cutoff).count() as u64,
            session: entry.session_count,
        }
    }

    pub fn trades_in_window(
        &self,
        account: AccountId,
        window: TimeDelta,
        now: DateTime<Utc>,
    ) -> Vec<DateTime<Utc>> {
        let cutoff = now - window;
        self.inner
            .read()
            .get(&account)
            .map(|entry| {
                entry
                    .ring
                    .iter()
                    .filter(|time| **time > cutoff)
                    .copied()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn last_trade_time(&self, account: AccountId) -> Option<DateTime<Utc>> {
        self.inner
            .read()
            .get(&account)
            .and_then(|entry| entry.ring.back().copied())
    }

    pub fn session_start(&self, account: AccountId) -> DateTime<Utc> {
        self.inner
            .read()
            .get(&account)
            .map(|entry| entry.session_start)
            .unwrap_or(self.default_session_start)
    }

    /// Session reset: clear the ring, zero the session count, and persist the
    /// new session boundary.
    pub fn reset_session(&self, account: AccountId, now: DateTime<Utc>) -> Result<(), StoreError> {
        {
            let mut inner = self.inner.write();
            let entry = inner.entry(account).or_insert_with(|| AccountTrades {
                ring: VecDeque::new(),
                session_start: now,
                session_count: 0,
            });
            entry.ring.clear();
            entry.session_count = 0;
            entry.session_start = now;
        }
        self.store.upsert_session_start(account, now)?;
        debug!(%account, "trade counter session reset");
        Ok(())
    }

    /// Periodic sweep: drop ring entries older than one hour for every
    /// account.
    pub fn cleanup_older_than(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - TimeDelta::hours(1);
        let mut removed = 0;
        let mut inner = self.inner.write();
        for entry in inner.values_mut() {
            while entry.ring.front().is_some_and(|time| *time <= cutoff) {
                entry.ring.pop_front();
                removed += 1;
            }
        }
        removed
    }
}
