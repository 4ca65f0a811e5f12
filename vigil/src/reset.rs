use crate::error::VigilError;
use chrono::{DateTime, NaiveDate, NaiveTime, TimeDelta, Utc};
use chrono_tz::Tz;
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use std::{collections::HashSet, fmt, path::Path};
use tracing::{error, info, warn};

/// Callback invoked when the daily reset fires, with the firing instant.
pub type ResetCallback = Box<dyn Fn(DateTime<Utc>) + Send + Sync>;

#[derive(Debug, Deserialize)]
struct HolidayDocument {
    #[serde(default)]
    holidays: Vec<String>,
}

/// Fires the daily session reset at a configured wall-clock time in a named
/// zone.
///
/// Idempotent per calendar date in that zone: once fired for a date it will
/// not fire again until the next date, across ordinary days and DST
/// transitions alike. Holiday dates never fire.
pub struct ResetScheduler {
    hour: u32,
    minute: u32,
    zone: Tz,
    holidays: RwLock<HashSet<String>>,
    last_reset_date: Mutex<Option<NaiveDate>>,
    callbacks: Mutex<Vec<ResetCallback>>,
    cancelled: Mutex<bool>,
}

impl fmt::Debug for ResetScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResetScheduler")
            .field("hour", &self.hour)
            .field("minute", &self.minute)
            .field("zone", &self.zone)
            .field("last_reset_date", &*self.last_reset_date.lock())
            .finish()
    }
}

impl ResetScheduler {
    pub fn new(hour: u32, minute: u32, zone: Tz) -> Self {
        info!(hour, minute, %zone, "daily reset scheduled");
        Self {
            hour,
            minute,
            zone,
            holidays: RwLock::new(HashSet::new()),
            last_reset_date: Mutex::new(None),
            callbacks: Mutex::new(Vec::new()),
            cancelled: Mutex::new(false),
        }
    }

    /// Stop the schedule firing. Manual triggers still work.
    pub fn cancel(&self) -> bool {
        let mut cancelled = self.cancelled.lock();
        let was_scheduled = !*cancelled;
        *cancelled = true;
        if was_scheduled {
            info!("daily reset schedule cancelled");
        }
        was_scheduled
    }

    pub fn is_scheduled(&self) -> bool {
        !*self.cancelled.lock()
    }

    /// Load the holiday calendar (`{"holidays": ["YYYY-MM-DD", ...]}`).
    ///
    /// A missing file is tolerated with a warning; a malformed one is a
    /// config error.
    pub fn load_holidays<P>(&self, path: P) -> Result<usize, VigilError>
    where
        P: AsRef<Path>,
    {
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.as_ref().display(), "holiday calendar not found");
                return Ok(0);
            }
            Err(error) => {
                return Err(VigilError::config(
                    "reset.holidays_path",
                    error.to_string(),
                ));
            }
        };

        let document: HolidayDocument = serde_json::from_str(&raw)
            .map_err(|error| VigilError::config("reset.holidays_path", error.to_string()))?;
        let count = document.holidays.len();
        *self.holidays.write() = document.holidays.into_iter().collect();
        info!(count, "holiday calendar loaded");
        Ok(count)
    }

    pub fn set_holidays<I, S>(&self, holidays: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *self.holidays.write() = holidays.into_iter().map(Into::into).collect();
    }

    pub fn is_holiday(&self, date: NaiveDate) -> bool {
        self.holidays.read().contains(&date.to_string())
    }

    /// Register a callback run on every reset firing.
    pub fn on_reset(&self, callback: ResetCallback) {
        self.callbacks.lock().push(callback);
    }

    fn scheduled_time(&self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.hour, self.minute, 0)
            .unwrap_or(NaiveTime::from_hms_opt(17, 0, 0).unwrap_or_default())
    }

    /// Next instant the reset will fire, skipping nothing (holiday
    /// suppression happens at fire time).
    pub fn next_reset_time(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let local = now.with_timezone(&self.zone);
        let mut date = local.date_naive();
        if local.time() >= self.scheduled_time() {
            date = date + TimeDelta::days(1);
        }
        self.instant_on(date, now)
    }

    /// Most recent scheduled reset instant at or before `now` - the default
    /// session start after a restart.
    pub fn previous_reset_time(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let local = now.with_timezone(&self.zone);
        let mut date = local.date_naive();
        if local.time() < self.scheduled_time() {
            date = date - TimeDelta::days(1);
        }
        self.instant_on(date, now)
    }

    fn instant_on(&self, date: NaiveDate, fallback: DateTime<Utc>) -> DateTime<Utc> {
        match date
            .and_time(self.scheduled_time())
            .and_local_timezone(self.zone)
            .earliest()
        {
            Some(instant) => instant.with_timezone(&Utc),
            // Scheduled time falls inside a DST gap; fall back to the query
            // instant rather than inventing one.
            None => fallback,
        }
    }

    pub fn last_reset_date(&self) -> Option<NaiveDate> {
        *self.last_reset_date.lock()
    }

    /// Seed the idempotence guard (eg/ from persisted state on startup).
    pub fn mark_fired(&self, date: NaiveDate) {
        *self.last_reset_date.lock() = Some(date);
    }

    /// Periodic check, called from the 1 Hz tick. Fires at most once per
    /// calendar date in the configured zone, never on a holiday.
    pub fn check(&self, now: DateTime<Utc>) -> bool {
        if !self.is_scheduled() {
            return false;
        }
        let local = now.with_timezone(&self.zone);
        let today = local.date_naive();

        if self.last_reset_date.lock().is_some_and(|last| last == today) {
            return false;
        }
        if local.time() < self.scheduled_time() {
            return false;
        }
        if self.is_holiday(today) {
            return false;
        }

        self.fire(today, now);
        true
    }

    /// Manual trigger (admin action). Respects the once-per-date guard.
    pub fn trigger_now(&self, now: DateTime<Utc>) -> bool {
        let today = now.with_timezone(&self.zone).date_naive();
        if self.last_reset_date.lock().is_some_and(|last| last == today) {
            warn!("reset already triggered today, skipping");
            return false;
        }
        self.fire(today, now);
        true
    }

    fn fire(&self, date: NaiveDate, now: DateTime<Utc>) {
        info!(%date, "executing daily reset");
        *self.last_reset_date.lock() = Some(date);

        let callbacks = self.callbacks.lock();
        for callback in callbacks.iter() {
            if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(now))).is_err() {
                error!("reset callback panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use parking_lot::Mutex as PMutex;
    use std::sync::Arc;

    fn scheduler() -> ResetScheduler {
        ResetScheduler::new(17, 0, chrono_tz::America::New_York)
    }

    /// 2025-07-21 16:59 ET == 20:59 UTC (EDT).
    fn just_before_reset() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 21, 20, 59, 0).unwrap()
    }

    fn at_reset() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 21, 21, 0, 0).unwrap()
    }

    #[test]
    fn test_fires_once_per_date() {
        let scheduler = scheduler();
        let fired = Arc::new(PMutex::new(0u32));
        let fired_for_callback = Arc::clone(&fired);
        scheduler.on_reset(Box::new(move |_| *fired_for_callback.lock() += 1));

        assert!(!scheduler.check(just_before_reset()));
        assert!(scheduler.check(at_reset()));
        assert!(!scheduler.check(at_reset() + TimeDelta::seconds(1)));
        assert!(!scheduler.check(at_reset() + TimeDelta::hours(2)));
        assert_eq!(*fired.lock(), 1);

        // Next calendar date in the zone fires again.
        assert!(scheduler.check(at_reset() + TimeDelta::days(1)));
        assert_eq!(*fired.lock(), 2);
    }

    #[test]
    fn test_holiday_suppresses_fire() {
        let scheduler = scheduler();
        scheduler.set_holidays(["2025-07-21"]);

        assert!(!scheduler.check(at_reset()));
        assert_eq!(scheduler.last_reset_date(), None);

        // The following (non-holiday) date fires normally.
        assert!(scheduler.check(at_reset() + TimeDelta::days(1)));
    }

    #[test]
    fn test_trigger_now_respects_guard() {
        let scheduler = scheduler();

        assert!(scheduler.trigger_now(just_before_reset()));
        assert!(!scheduler.trigger_now(just_before_reset() + TimeDelta::minutes(1)));
    }

    #[test]
    fn test_cancel_stops_scheduled_firing() {
        let scheduler = scheduler();

        assert!(scheduler.is_scheduled());
        assert!(scheduler.cancel());
        assert!(!scheduler.cancel());
        assert!(!scheduler.check(at_reset()));

        // Manual trigger still works after cancellation.
        assert!(scheduler.trigger_now(at_reset()));
    }

    #[test]
    fn test_next_and_previous_reset_times() {
        let scheduler = scheduler();

        let next = scheduler.next_reset_time(just_before_reset());
        assert_eq!(next, at_reset());

        let next_after = scheduler.next_reset_time(at_reset());
        assert_eq!(next_after, at_reset() + TimeDelta::days(1));

        let previous = scheduler.previous_reset_time(just_before_reset());
        assert_eq!(previous, at_reset() - TimeDelta::days(1));
        assert_eq!(scheduler.previous_reset_time(at_reset()), at_reset());
    }

    #[test]
    fn test_zone_wall_clock_not_utc_governs() {
        // 21:30 UTC on a winter date is 16:30 ET (EST): before the reset.
        let scheduler = scheduler();
        let winter_before = Utc.with_ymd_and_hms(2025, 1, 21, 21, 30, 0).unwrap();
        assert!(!scheduler.check(winter_before));

        // 22:00 UTC winter == 17:00 ET.
        let winter_at = Utc.with_ymd_and_hms(2025, 1, 21, 22, 0, 0).unwrap();
        assert!(scheduler.check(winter_at));
    }
}
