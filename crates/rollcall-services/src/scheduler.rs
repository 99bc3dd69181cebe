//! Time-based triggers
//!
//! Two schedules in the school's local timezone:
//!
//! - the end-of-day follow-up sweep, once per (week)day at a fixed time;
//! - the retry sweep, every `interval` minutes inside a daily window.
//!
//! Fire times are computed by pure functions so they can be tested without
//! a clock.

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use rollcall_core::{config::SchedulerConfig, AppResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::retry::RetrySweep;
use crate::trigger::FollowUpTrigger;

/// Days searched ahead for the next fire time; covers any weekend
const LOOKAHEAD_DAYS: u32 = 8;

/// Lets one run of a job through at a time
#[derive(Debug, Default)]
pub struct SingleFlight {
    running: AtomicBool,
}

/// Releases the [`SingleFlight`] when dropped
#[derive(Debug)]
pub struct FlightGuard<'a> {
    flight: &'a SingleFlight,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` if a run is already in progress
    pub fn try_start(&self) -> Option<FlightGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightGuard { flight: self })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.flight.running.store(false, Ordering::Release);
    }
}

fn is_school_day(date: NaiveDate, weekdays_only: bool) -> bool {
    !weekdays_only || !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// First local `date + time` strictly after `after`
fn first_after(
    tz: Tz,
    after: DateTime<Utc>,
    weekdays_only: bool,
    times: impl Fn() -> Vec<NaiveTime>,
) -> Option<DateTime<Utc>> {
    let mut date = after.with_timezone(&tz).date_naive();
    for _ in 0..LOOKAHEAD_DAYS {
        if is_school_day(date, weekdays_only) {
            for time in times() {
                // earliest() also skips times that fall in a DST gap
                if let Some(local) = tz.from_local_datetime(&date.and_time(time)).earliest() {
                    let at = local.with_timezone(&Utc);
                    if at > after {
                        return Some(at);
                    }
                }
            }
        }
        date = date.succ_opt()?;
    }
    None
}

/// Next end-of-day sweep strictly after `after`
pub fn next_end_of_day(
    after: DateTime<Utc>,
    tz: Tz,
    at: NaiveTime,
    weekdays_only: bool,
) -> Option<DateTime<Utc>> {
    first_after(tz, after, weekdays_only, || vec![at])
}

/// Next retry sweep strictly after `after`.
///
/// Slots start at `start_hour:00` and repeat every `interval_minutes` while
/// the hour is at most `end_hour`.
pub fn next_retry_tick(
    after: DateTime<Utc>,
    tz: Tz,
    start_hour: u32,
    end_hour: u32,
    interval_minutes: u32,
    weekdays_only: bool,
) -> Option<DateTime<Utc>> {
    let step = interval_minutes.max(1);
    let window_end = (end_hour.min(23) + 1) * 60;
    first_after(tz, after, weekdays_only, || {
        (start_hour * 60..window_end)
            .step_by(step as usize)
            .filter_map(|m| NaiveTime::from_hms_opt(m / 60, m % 60, 0))
            .collect()
    })
}

/// Lower bound for the next fire time: never at or before a slot that
/// already fired, even when the wall clock lags the timer that woke us
pub fn schedule_floor(last_fired: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
    last_fired.map_or(now, |fired| fired.max(now))
}

/// Both sweeps on their schedules
pub struct Scheduler {
    trigger: Arc<FollowUpTrigger>,
    retry: Arc<RetrySweep>,
    tz: Tz,
    end_of_day: NaiveTime,
    retry_window_start_hour: u32,
    retry_window_end_hour: u32,
    retry_interval_minutes: u32,
    weekdays_only: bool,
}

impl Scheduler {
    pub fn from_config(
        config: &SchedulerConfig,
        trigger: Arc<FollowUpTrigger>,
        retry: Arc<RetrySweep>,
    ) -> AppResult<Self> {
        Ok(Self {
            trigger,
            retry,
            tz: config.tz()?,
            end_of_day: config.end_of_day_time()?,
            retry_window_start_hour: config.retry_window_start_hour,
            retry_window_end_hour: config.retry_window_end_hour,
            retry_interval_minutes: config.retry_interval_minutes,
            weekdays_only: config.weekdays_only,
        })
    }

    pub fn next_end_of_day(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        next_end_of_day(after, self.tz, self.end_of_day, self.weekdays_only)
    }

    pub fn next_retry_tick(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        next_retry_tick(
            after,
            self.tz,
            self.retry_window_start_hour,
            self.retry_window_end_hour,
            self.retry_interval_minutes,
            self.weekdays_only,
        )
    }

    /// Run both schedules until `cancel` fires
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(
            "Scheduler started ({}, end of day {}, retries {}:00-{}:59 every {} min)",
            self.tz,
            self.end_of_day,
            self.retry_window_start_hour,
            self.retry_window_end_hour,
            self.retry_interval_minutes
        );
        tokio::join!(
            self.clone().end_of_day_loop(cancel.clone()),
            self.clone().retry_loop(cancel),
        );
        info!("Scheduler stopped");
    }

    async fn end_of_day_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut last_fired = None;
        while let Some(at) = self.next_end_of_day(schedule_floor(last_fired, Utc::now())) {
            if !sleep_until(at, &cancel).await {
                return;
            }
            last_fired = Some(at);
            let date = at.with_timezone(&self.tz).date_naive();
            match self.trigger.run_end_of_day_sweep(date).await {
                Ok(report) => info!(
                    "Scheduled follow-up sweep for {}: {} total, {} queued",
                    date, report.total, report.successful
                ),
                Err(e) => error!("Scheduled follow-up sweep for {} failed: {}", date, e),
            }
        }
        warn!("No end-of-day sweep time found, end-of-day schedule stopped");
    }

    async fn retry_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut last_fired = None;
        while let Some(at) = self.next_retry_tick(schedule_floor(last_fired, Utc::now())) {
            if !sleep_until(at, &cancel).await {
                return;
            }
            last_fired = Some(at);
            if let Err(e) = self.retry.run(Utc::now().max(at)).await {
                error!("Scheduled retry sweep failed: {}", e);
            }
        }
        warn!("No retry sweep time found, retry schedule stopped");
    }
}

/// Sleep until `at`. `false` if cancelled first.
async fn sleep_until(at: DateTime<Utc>, cancel: &CancellationToken) -> bool {
    let wait = (at - Utc::now()).to_std().unwrap_or_default();
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(wait) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn four_pm() -> NaiveTime {
        NaiveTime::from_hms_opt(16, 0, 0).unwrap()
    }

    #[test]
    fn test_end_of_day_same_day_before_time() {
        // Wednesday 2024-03-13
        let next = next_end_of_day(utc("2024-03-13T09:00:00Z"), Tz::Africa__Accra, four_pm(), true);
        assert_eq!(next, Some(utc("2024-03-13T16:00:00Z")));
    }

    #[test]
    fn test_end_of_day_skips_weekend() {
        // Friday after the sweep time
        let next = next_end_of_day(utc("2024-03-15T16:00:00Z"), Tz::Africa__Accra, four_pm(), true);
        assert_eq!(next, Some(utc("2024-03-18T16:00:00Z")));

        let any_day = next_end_of_day(utc("2024-03-15T16:00:00Z"), Tz::Africa__Accra, four_pm(), false);
        assert_eq!(any_day, Some(utc("2024-03-16T16:00:00Z")));
    }

    #[test]
    fn test_end_of_day_respects_timezone() {
        // 16:00 in Lagos is 15:00 UTC
        let next = next_end_of_day(utc("2024-03-13T09:00:00Z"), Tz::Africa__Lagos, four_pm(), true);
        assert_eq!(next, Some(utc("2024-03-13T15:00:00Z")));
    }

    #[test]
    fn test_retry_ticks_inside_window() {
        let tz = Tz::Africa__Accra;
        assert_eq!(
            next_retry_tick(utc("2024-03-13T06:00:00Z"), tz, 8, 18, 30, true),
            Some(utc("2024-03-13T08:00:00Z"))
        );
        assert_eq!(
            next_retry_tick(utc("2024-03-13T08:00:00Z"), tz, 8, 18, 30, true),
            Some(utc("2024-03-13T08:30:00Z"))
        );
        // the end hour itself is inside the window
        assert_eq!(
            next_retry_tick(utc("2024-03-13T18:10:00Z"), tz, 8, 18, 30, true),
            Some(utc("2024-03-13T18:30:00Z"))
        );
        assert_eq!(
            next_retry_tick(utc("2024-03-13T18:30:00Z"), tz, 8, 18, 30, true),
            Some(utc("2024-03-14T08:00:00Z"))
        );
    }

    #[test]
    fn test_retry_ticks_skip_weekend() {
        assert_eq!(
            next_retry_tick(utc("2024-03-16T10:00:00Z"), Tz::Africa__Accra, 8, 18, 30, true),
            Some(utc("2024-03-18T08:00:00Z"))
        );
    }

    #[test]
    fn test_fired_slot_is_not_picked_again_when_clock_lags() {
        let tz = Tz::Africa__Accra;
        let fired = utc("2024-03-13T16:00:00Z");
        // woke on the timer while the wall clock still reads just before the slot
        let lagging_now = fired - chrono::Duration::milliseconds(5);

        assert_eq!(schedule_floor(Some(fired), lagging_now), fired);
        assert_eq!(
            next_end_of_day(schedule_floor(Some(fired), lagging_now), tz, four_pm(), true),
            Some(utc("2024-03-14T16:00:00Z"))
        );
        assert_eq!(
            next_retry_tick(schedule_floor(Some(fired), lagging_now), tz, 8, 18, 30, true),
            Some(utc("2024-03-13T16:30:00Z"))
        );

        // first pass, or a clock already past the slot
        let later = fired + chrono::Duration::minutes(3);
        assert_eq!(schedule_floor(None, lagging_now), lagging_now);
        assert_eq!(schedule_floor(Some(fired), later), later);
    }

    #[test]
    fn test_single_flight() {
        let flight = SingleFlight::new();
        let guard = flight.try_start();
        assert!(guard.is_some());
        assert!(flight.is_running());
        assert!(flight.try_start().is_none());

        drop(guard);
        assert!(!flight.is_running());
        assert!(flight.try_start().is_some());
    }
}
