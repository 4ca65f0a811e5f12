use chrono::{DateTime, Utc};
use fnv::FnvHashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;
use vigil_store::{LockoutKind, LockoutRecord, Store, StoreError};

use vigil_gateway::id::AccountId;

/// Lockout snapshot for the admin boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockoutInfo {
    pub reason: String,
    pub rule_id: String,
    pub kind: LockoutKind,
    pub until: Option<DateTime<Utc>>,
    pub remaining_secs: i64,
}

/// One lockout slot per account, persisted on every state change.
///
/// Hard and cooldown lockouts auto-clear at expiry (lazily on read and via
/// the periodic sweep); permanent lockouts clear only by explicit removal or
/// a rule-dependent reset.
#[derive(Debug)]
pub struct LockoutManager {
    store: Arc<Store>,
    inner: Mutex<FnvHashMap<AccountId, LockoutRecord>>,
}

impl LockoutManager {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            inner: Mutex::new(FnvHashMap::default()),
        }
    }

    /// Load persisted lockouts, filtering out those already expired.
    pub fn load_from_store(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let records = self.store.load_active_lockouts(now)?;
        let loaded = records.len();

        let mut inner = self.inner.lock();
        inner.clear();
        for record in records {
            inner.insert(record.account_id, record);
        }
        Ok(loaded)
    }

    /// Replace the account's lockout slot.
    pub fn set_lockout(&self, record: LockoutRecord) -> Result<(), StoreError> {
        info!(
            account = %record.account_id,
            reason = %record.reason,
            until = ?record.until,
            kind = ?record.kind,
            "lockout set"
        );
        self.store.upsert_lockout(&record)?;
        self.inner.lock().insert(record.account_id, record);
        Ok(())
    }

    /// Convenience for duration-based hard lockouts.
    pub fn apply_lockout(
        &self,
        account: AccountId,
        reason: String,
        rule_id: String,
        duration: chrono::TimeDelta,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.set_lockout(LockoutRecord::new(
            account,
            reason,
            rule_id,
            LockoutKind::Hard,
            now,
            Some(now + duration),
        ))
    }

    /// Check the slot, lazily clearing an expired entry.
    pub fn is_locked_out(&self, account: AccountId, now: DateTime<Utc>) -> bool {
        let expired = {
            let inner = self.inner.lock();
            match inner.get(&account) {
                None => return false,
                Some(record) => match record.until {
                    None => return true,
                    Some(until) if now < until => return true,
                    Some(_) => true,
                },
            }
        };

        if expired {
            let _ = self.clear_internal(account);
        }
        false
    }

    pub fn lockout(&self, account: AccountId) -> Option<LockoutRecord> {
        self.inner.lock().get(&account).cloned()
    }

    pub fn lockout_info(&self, account: AccountId, now: DateTime<Utc>) -> Option<LockoutInfo> {
        if !self.is_locked_out(account, now) {
            return None;
        }
        let inner = self.inner.lock();
        let record = inner.get(&account)?;
        Some(LockoutInfo {
            reason: record.reason.clone(),
            rule_id: record.rule_id.clone(),
            kind: record.kind,
            until: record.until,
            remaining_secs: record
                .until
                .map(|until| (until - now).num_seconds().max(0))
                .unwrap_or(0),
        })
    }

    /// Manual unlock (admin action). Also used by the cooldown timer expiry
    /// callback.
    pub fn remove_lockout(&self, account: AccountId) -> Result<bool, StoreError> {
        self.clear_internal(account)
    }

    /// Periodic sweep clearing expired non-permanent lockouts even when no
    /// one has queried them.
    pub fn cleanup_expired(&self, now: DateTime<Utc>) -> Result<Vec<AccountId>, StoreError> {
        let expired: Vec<AccountId> = {
            let inner = self.inner.lock();
            inner
                .values()
                .filter(|record| record.until.is_some_and(|until| now >= until))
                .map(|record| record.account_id)
                .collect()
        };

        for account in &expired {
            self.clear_internal(*account)?;
            info!(account = %account, "auto-cleared expired lockout");
        }
        Ok(expired)
    }

    /// All currently held lockout slots (expired entries not yet swept
    /// included).
    pub fn active_lockouts(&self) -> Vec<LockoutRecord> {
        self.inner.lock().values().cloned().collect()
    }

    fn clear_internal(&self, account: AccountId) -> Result<bool, StoreError> {
        let removed = self.inner.lock().remove(&account);
        if let Some(record) = removed {
            self.store.delete_lockout(account)?;
            info!(account = %account, reason = %record.reason, "lockout cleared");
            return Ok(true);
        }
        Ok(false)
    }
}
