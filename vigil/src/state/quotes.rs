use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::RwLock;
use std::{collections::HashMap, fmt, sync::Arc};
use vigil_gateway::{id::ContractId, types::QuoteUpdate};

/// Quote plus the local receive clock used for staleness checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteEntry {
    pub quote: QuoteUpdate,
    pub received_at: DateTime<Utc>,
}

type QuoteCallback = Arc<dyn Fn(&QuoteUpdate) + Send + Sync>;

/// Per-contract last/bid/ask overwritten in place on every market tick.
///
/// Callbacks run synchronously inside `update` - a slow subscriber blocks
/// further quote updates for that contract, so subscribers must not do heavy
/// work inline.
pub struct QuoteTracker {
    quotes: RwLock<HashMap<ContractId, QuoteEntry>>,
    subscribers: RwLock<HashMap<ContractId, Vec<QuoteCallback>>>,
}

impl fmt::Debug for QuoteTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuoteTracker")
            .field("quotes", &self.quotes.read().len())
            .finish()
    }
}

impl Default for QuoteTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl QuoteTracker {
    pub fn new() -> Self {
        Self {
            quotes: RwLock::new(HashMap::new()),
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    /// Overwrite the contract's quote and notify subscribers.
    pub fn update(&self, quote: QuoteUpdate, received_at: DateTime<Utc>) {
        if let (Some(bid), Some(ask)) = (quote.best_bid, quote.best_ask) {
            if bid > ask {
                tracing::warn!(contract = %quote.contract_id, %bid, %ask, "crossed quote received");
            }
        }
        let contract = quote.contract_id.clone();
        self.quotes.write().insert(
            contract.clone(),
            QuoteEntry {
                quote: quote.clone(),
                received_at,
            },
        );

        let subscribers = self.subscribers.read();
        if let Some(callbacks) = subscribers.get(&contract) {
            for callback in callbacks {
                callback(&quote);
            }
        }
    }

    pub fn quote(&self, contract: &ContractId) -> Option<QuoteEntry> {
        self.quotes.read().get(contract).cloned()
    }

    pub fn last_price(&self, contract: &ContractId) -> Option<rust_decimal::Decimal> {
        self.quotes
            .read()
            .get(contract)
            .map(|entry| entry.quote.last_price)
    }

    /// Seconds since the quote was received locally, `None` when no quote has
    /// arrived yet.
    pub fn quote_age(&self, contract: &ContractId, now: DateTime<Utc>) -> Option<TimeDelta> {
        self.quotes
            .read()
            .get(contract)
            .map(|entry| now - entry.received_at)
    }

    /// A missing quote is stale by definition.
    pub fn is_stale(&self, contract: &ContractId, max_age: TimeDelta, now: DateTime<Utc>) -> bool {
        match self.quote_age(contract, now) {
            Some(age) => age > max_age,
            None => true,
        }
    }

    /// Register `callback` for updates on each of `contracts`.
    pub fn subscribe(&self, contracts: &[ContractId], callback: QuoteCallback) {
        let mut subscribers = self.subscribers.write();
        for contract in contracts {
            subscribers
                .entry(contract.clone())
                .or_default()
                .push(Arc::clone(&callback));
        }
    }

    /// Drop all callbacks registered for each of `contracts`.
    pub fn unsubscribe(&self, contracts: &[ContractId]) {
        let mut subscribers = self.subscribers.write();
        for contract in contracts {
            subscribers.remove(contract);
        }
    }

    pub fn tracked_contracts(&self) -> Vec<ContractId> {
        self.quotes.read().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;

    fn quote(contract: &str, last: rust_decimal::Decimal) -> QuoteUpdate {
        QuoteUpdate {
            contract_id: ContractId::new(contract),
            best_bid: Some(last - dec!(0.25)),
            best_ask: Some(last + dec!(0.25)),
            last_price: last,
            timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        }
    }

    #[test]
    fn test_update_overwrites_in_place() {
        let tracker = QuoteTracker::new();
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();

        tracker.update(quote("CON.F.US.MNQ.U25", dec!(21000)), now);
        tracker.update(quote("CON.F.US.MNQ.U25", dec!(20950)), now);

        assert_eq!(
            tracker.last_price(&ContractId::new("CON.F.US.MNQ.U25")),
            Some(dec!(20950))
        );
        assert_eq!(tracker.tracked_contracts().len(), 1);
    }

    #[test]
    fn test_staleness_clock() {
        let tracker = QuoteTracker::new();
        let received = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let contract = ContractId::new("CON.F.US.MNQ.U25");

        tracker.update(quote("CON.F.US.MNQ.U25", dec!(21000)), received);

        let fresh_at = received + TimeDelta::seconds(5);
        let stale_at = received + TimeDelta::seconds(11);
        assert!(!tracker.is_stale(&contract, TimeDelta::seconds(10), fresh_at));
        assert!(tracker.is_stale(&contract, TimeDelta::seconds(10), stale_at));

        // Missing quote is stale.
        assert!(tracker.is_stale(&ContractId::new("CON.F.US.EP.U25"), TimeDelta::seconds(10), fresh_at));
    }

    #[test]
    fn test_subscribers_invoked_synchronously() {
        let tracker = QuoteTracker::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let contract = ContractId::new("CON.F.US.MNQ.U25");

        let seen_for_callback = Arc::clone(&seen);
        tracker.subscribe(
            std::slice::from_ref(&contract),
            Arc::new(move |quote| seen_for_callback.lock().push(quote.last_price)),
        );

        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        tracker.update(quote("CON.F.US.MNQ.U25", dec!(21000)), now);
        tracker.unsubscribe(std::slice::from_ref(&contract));
        tracker.update(quote("CON.F.US.MNQ.U25", dec!(20950)), now);

        assert_eq!(*seen.lock(), vec![dec!(21000)]);
    }
}
