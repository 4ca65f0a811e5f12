use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use std::{collections::HashMap, fmt, panic::AssertUnwindSafe};
use tracing::{debug, error, info};
use vigil_gateway::id::{AccountId, PositionId};

/// Timer expiry callback. Runs on the 1 Hz tick task, outside the wheel's
/// internal lock.
pub type TimerCallback = Box<dyn Fn() + Send + Sync>;

/// Observer invoked with the timer name after any timer expires.
pub type TimerObserver = Box<dyn Fn(&str) + Send + Sync>;

/// Conventional timer name for an account's cooldown.
pub fn cooldown_timer_name(account: AccountId) -> String {
    format!("cooldown_{account}")
}

/// Conventional timer name for an account lockout.
pub fn lockout_timer_name(account: AccountId) -> String {
    format!("lockout_{account}")
}

/// Conventional timer name for a position's stop-loss grace window.
pub fn grace_timer_name(position: PositionId) -> String {
    format!("grace_{position}")
}

struct TimerEntry {
    expires_at: DateTime<Utc>,
    started_at: DateTime<Utc>,
    duration: TimeDelta,
    callback: Option<TimerCallback>,
}

/// Timer snapshot for the admin boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerInfo {
    pub name: String,
    pub remaining_secs: i64,
    pub expires_at: DateTime<Utc>,
    pub duration_secs: i64,
    pub started_at: DateTime<Utc>,
}

/// Named countdowns swept by the 1 Hz tick.
///
/// Names are unique: a second `start` for the same name replaces the first.
/// Callbacks execute outside the internal lock; a panicking callback is
/// logged and swallowed.
#[derive(Default)]
pub struct TimerWheel {
    timers: Mutex<HashMap<String, TimerEntry>>,
    observers: Mutex<Vec<TimerObserver>>,
}

impl fmt::Debug for TimerWheel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerWheel")
            .field("timers", &self.timers.lock().len())
            .finish()
    }
}

impl TimerWheel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a countdown.
    pub fn start(
        &self,
        name: impl Into<String>,
        duration: TimeDelta,
        callback: Option<TimerCallback>,
        now: DateTime<Utc>,
    ) {
        let name = name.into();
        let expires_at = now + duration;
        debug!(%name, ?duration, %expires_at, "timer started");
        self.timers.lock().insert(
            name,
            TimerEntry {
                expires_at,
                started_at: now,
                duration,
                callback,
            },
        );
    }

    /// Remove a timer before expiry. Its callback never runs.
    pub fn cancel(&self, name: &str) -> bool {
        let removed = self.timers.lock().remove(name).is_some();
        if removed {
            debug!(%name, "timer cancelled");
        }
        removed
    }

    pub fn is_active(&self, name: &str, now: DateTime<Utc>) -> bool {
        self.timers
            .lock()
            .get(name)
            .is_some_and(|entry| now < entry.expires_at)
    }

    /// Seconds remaining, zero for unknown or expired timers.
    pub fn remaining(&self, name: &str, now: DateTime<Utc>) -> i64 {
        self.timers
            .lock()
            .get(name)
            .map(|entry| (entry.expires_at - now).num_seconds().max(0))
            .unwrap_or(0)
    }

    pub fn timer_info(&self, name: &str, now: DateTime<Utc>) -> Option<TimerInfo> {
        self.timers.lock().get(name).map(|entry| TimerInfo {
            name: name.to_string(),
            remaining_secs: (entry.expires_at - now).num_seconds().max(0),
            expires_at: entry.expires_at,
            duration_secs: entry.duration.num_seconds(),
            started_at: entry.started_at,
        })
    }

    pub fn active_timers(&self, now: DateTime<Utc>) -> Vec<TimerInfo> {
        self.timers
            .lock()
            .iter()
            .filter(|(_, entry)| now < entry.expires_at)
            .map(|(name, entry)| TimerInfo {
                name: name.clone(),
                remaining_secs: (entry.expires_at - now).num_seconds().max(0),
                expires_at: entry.expires_at,
                duration_secs: entry.duration.num_seconds(),
                started_at: entry.started_at,
            })
            .collect()
    }

    /// Register a global observer notified (with the timer name) after any
    /// timer expires.
    pub fn on_expiry(&self, observer: TimerObserver) {
        self.observers.lock().push(observer);
    }

    /// Sweep expired timers and run their callbacks. Called at 1 Hz.
    ///
    /// Expired entries are removed under the lock; callbacks run after it is
    /// released to avoid reentrancy deadlocks (callbacks routinely call back
    /// into managers that start or cancel timers).
    pub fn tick(&self, now: DateTime<Utc>) -> usize {
        let expired: Vec<(String, TimerEntry)> = {
            let mut timers = self.timers.lock();
            let names: Vec<String> = timers
                .iter()
                .filter(|(_, entry)| now >= entry.expires_at)
                .map(|(name, _)| name.clone())
                .collect();
            names
                .into_iter()
                .filter_map(|name| timers.remove(&name).map(|entry| (name, entry)))
                .collect()
        };

        for (name, entry) in &expired {
            info!(name = %name, "timer expired");
            if let Some(callback) = &entry.callback {
                if std::panic::catch_unwind(AssertUnwindSafe(callback)).is_err() {
                    error!(name = %name, "timer callback panicked");
                }
            }

            let observers = self.observers.lock();
            for observer in observers.iter() {
                if std::panic::catch_unwind(AssertUnwindSafe(|| observer(name))).is_err() {
                    error!(name = %name, "timer observer panicked");
                }
            }
        }

        expired.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use parking_lot::Mutex as PMutex;
    use std::sync::Arc;

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_timer_lifecycle() {
        let wheel = TimerWheel::new();

        wheel.start("cooldown_12345", TimeDelta::seconds(1800), None, now());
        assert!(wheel.is_active("cooldown_12345", now()));
        assert_eq!(wheel.remaining("cooldown_12345", now() + TimeDelta::seconds(300)), 1500);

        assert!(wheel.cancel("cooldown_12345"));
        assert!(!wheel.is_active("cooldown_12345", now()));
        assert!(!wheel.cancel("cooldown_12345"));
    }

    #[test]
    fn test_same_name_replaces() {
        let wheel = TimerWheel::new();

        wheel.start("grace_1", TimeDelta::seconds(30), None, now());
        wheel.start("grace_1", TimeDelta::seconds(90), None, now());

        assert_eq!(wheel.remaining("grace_1", now()), 90);
        assert_eq!(wheel.active_timers(now()).len(), 1);
    }

    #[test]
    fn test_tick_fires_callback_once_and_deletes() {
        let wheel = TimerWheel::new();
        let fired = Arc::new(PMutex::new(0u32));

        let fired_for_callback = Arc::clone(&fired);
        wheel.start(
            "cooldown_12345",
            TimeDelta::seconds(10),
            Some(Box::new(move || *fired_for_callback.lock() += 1)),
            now(),
        );

        assert_eq!(wheel.tick(now() + TimeDelta::seconds(5)), 0);
        assert_eq!(wheel.tick(now() + TimeDelta::seconds(10)), 1);
        assert_eq!(*fired.lock(), 1);

        // Deleted after expiry; subsequent ticks see nothing.
        assert_eq!(wheel.tick(now() + TimeDelta::seconds(11)), 0);
        assert!(!wheel.is_active("cooldown_12345", now() + TimeDelta::seconds(11)));
    }

    #[test]
    fn test_panicking_callback_swallowed() {
        let wheel = TimerWheel::new();
        let observed = Arc::new(PMutex::new(Vec::new()));

        wheel.start(
            "grace_7",
            TimeDelta::seconds(1),
            Some(Box::new(|| panic!("callback failure"))),
            now(),
        );

        let observed_for_observer = Arc::clone(&observed);
        wheel.on_expiry(Box::new(move |name| {
            observed_for_observer.lock().push(name.to_string())
        }));

        // The panic is contained and the observer still runs.
        assert_eq!(wheel.tick(now() + TimeDelta::seconds(2)), 1);
        assert_eq!(*observed.lock(), vec!["grace_7".to_string()]);
    }

    #[test]
    fn test_name_conventions() {
        assert_eq!(cooldown_timer_name(AccountId::new(12345)), "cooldown_12345");
        assert_eq!(lockout_timer_name(AccountId::new(12345)), "lockout_12345");
        assert_eq!(grace_timer_name(PositionId::new(7)), "grace_7");
    }
}
