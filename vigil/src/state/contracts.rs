use chrono::{DateTime, TimeDelta, Utc};
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::{fmt::Debug, sync::Arc};
use tracing::{debug, warn};
use vigil_gateway::{id::ContractId, rest::GatewayRestApi, types::Contract};
use vigil_store::{Store, StoreError};

/// Synchronous metadata lookup seam used by rules and P&L math.
///
/// The dispatcher prewarms the cache (async, fetch-through) before rules run,
/// so rule-side lookups never block.
pub trait ContractLookup
where
    Self: Debug + Send + Sync,
{
    /// Fresh cached metadata, without touching LRU order or fetching.
    fn peek(&self, contract: &ContractId) -> Option<Contract>;
}

#[derive(Debug, Clone)]
struct CachedContract {
    contract: Contract,
    cached_at: DateTime<Utc>,
}

/// Contract metadata cache: LRU ordered by last access, bounded by
/// `max_size`, entries refetched after `ttl`. Writes persist to the store;
/// startup warms from the store up to capacity.
#[derive(Debug)]
pub struct ContractCache<Rest> {
    rest: Rest,
    store: Arc<Store>,
    max_size: usize,
    ttl: TimeDelta,
    // IndexMap insertion order doubles as LRU order: front = coldest.
    inner: Mutex<IndexMap<ContractId, CachedContract>>,
}

impl<Rest> ContractCache<Rest>
where
    Rest: GatewayRestApi,
{
    pub fn new(rest: Rest, store: Arc<Store>, max_size: usize, ttl: TimeDelta) -> Self {
        Self {
            rest,
            store,
            max_size,
            ttl,
            inner: Mutex::new(IndexMap::new()),
        }
    }

    /// Warm the cache from the store (most recently cached first).
    pub fn load_from_store(&self) -> Result<usize, StoreError> {
        let rows = self.store.load_contracts(self.max_size)?;
        let loaded = rows.len();

        let mut inner = self.inner.lock();
        // Rows arrive newest-first; insert oldest-first so LRU order holds.
        for (contract, cached_at) in rows.into_iter().rev() {
            inner.insert(contract.id.clone(), CachedContract { contract, cached_at });
        }
        debug!(loaded, "contract cache warmed from store");
        Ok(loaded)
    }

    /// Cached metadata or a fetch through the gateway.
    ///
    /// Returns `None` on fetch failure; callers skip price-dependent
    /// computation for the affected event and the miss is logged here.
    pub async fn get(&self, contract: &ContractId, now: DateTime<Utc>) -> Option<Contract> {
        {
            let mut inner = self.inner.lock();
            if let Some(entry) = inner.get(contract).cloned() {
                if now - entry.cached_at < self.ttl {
                    // Touch: move to the hot end.
                    inner.shift_remove(contract);
                    inner.insert(contract.clone(), entry.clone());
                    return Some(entry.contract);
                }
                inner.shift_remove(contract);
            }
        }

        match self.rest.contract_by_id(contract).await {
            Ok(fetched) => {
                if fetched.tick_size <= rust_decimal::Decimal::ZERO
                    || fetched.tick_value <= rust_decimal::Decimal::ZERO
                {
                    warn!(%contract, "gateway returned contract with non-positive tick metadata");
                    return None;
                }
                self.insert(fetched.clone(), now);
                Some(fetched)
            }
            Err(error) => {
                warn!(%contract, %error, "contract metadata fetch failed");
                None
            }
        }
    }

    fn insert(&self, contract: Contract, now: DateTime<Utc>) {
        let evicted = {
            let mut inner = self.inner.lock();
            inner.insert(
                contract.id.clone(),
                CachedContract {
                    contract: contract.clone(),
                    cached_at: now,
                },
            );

            let mut evicted = Vec::new();
            while inner.len() > self.max_size {
                if let Some((id, _)) = inner.shift_remove_index(0) {
                    evicted.push(id);
                }
            }
            evicted
        };

        for id in evicted {
            debug!(contract = %id, "contract cache full, evicted");
        }

        if let Err(error) = self.store.upsert_contract(&contract, now) {
            warn!(contract = %contract.id, %error, "failed to persist contract metadata");
        }
    }

    /// Bulk warm, eg/ for the contracts referenced by loaded positions.
    pub async fn preload(&self, contracts: &[ContractId], now: DateTime<Utc>) -> usize {
        let mut loaded = 0;
        for contract in contracts {
            if self.get(contract, now).await.is_some() {
                loaded += 1;
            }
        }
        debug!(loaded, requested = contracts.len(), "preloaded contracts");
        loaded
    }

    /// Drop an entry, forcing the next access to fetch fresh metadata.
    pub fn invalidate(&self, contract: &ContractId) -> bool {
        self.inner.lock().shift_remove(contract).is_some()
    }

    pub fn is_cached(&self, contract: &ContractId, now: DateTime<Utc>) -> bool {
        self.inner
            .lock()
            .get(contract)
            .is_some_and(|entry| now - entry.cached_at < self.ttl)
    }

    pub fn cached_contracts(&self) -> Vec<ContractId> {
        self.inner.lock().keys().cloned().collect()
    }

    pub fn tick_size(&self, contract: &ContractId) -> Option<rust_decimal::Decimal> {
        self.peek(contract).map(|contract| contract.tick_size)
    }

    pub fn tick_value(&self, contract: &ContractId) -> Option<rust_decimal::Decimal> {
        self.peek(contract).map(|contract| contract.tick_value)
    }
}

impl<Rest> ContractLookup for ContractCache<Rest>
where
    Rest: GatewayRestApi,
{
    fn peek(&self, contract: &ContractId) -> Option<Contract> {
        self.inner
            .lock()
            .get(contract)
            .map(|entry| entry.contract.clone())
    }
}
