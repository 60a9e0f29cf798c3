use chrono::{Local, Months, NaiveDate, NaiveDateTime, TimeDelta};
use tokio::sync::watch;

use crate::error::{AppError, AppResult};

/// Format for moments handed to the backend (local wall-clock time).
pub const MOMENT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";

/// Observable holder for the moment an expense took place.
///
/// Starts unset and initialises itself to the current local time on first
/// access. Every update is published to subscribers before the updating
/// call returns.
#[derive(Debug)]
pub struct MomentCell {
    tx: watch::Sender<Option<NaiveDateTime>>,
}

impl Default for MomentCell {
    fn default() -> Self {
        Self::new()
    }
}

impl MomentCell {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Current value, initialising to now if unset.
    pub fn get(&self) -> NaiveDateTime {
        if let Some(moment) = self.peek() {
            return moment;
        }
        let now = Local::now().naive_local();
        self.tx.send_replace(Some(now));
        now
    }

    /// Current value without initialising.
    pub fn peek(&self) -> Option<NaiveDateTime> {
        *self.tx.borrow()
    }

    /// Replace the calendar date while keeping the time of day.
    ///
    /// `month` is zero-based (0 = January). Out-of-range parts roll over the
    /// way a lenient calendar does: February 30 becomes March 2, month 12 is
    /// January of the following year and day 0 is the last day of the
    /// previous month. Only dates outside the representable range fail.
    pub fn set_date_parts(&self, year: i32, month: u32, day_of_month: u32) -> AppResult<NaiveDateTime> {
        let date = NaiveDate::from_ymd_opt(year, 1, 1)
            .and_then(|first| first.checked_add_months(Months::new(month)))
            .and_then(|start| {
                start.checked_add_signed(TimeDelta::days(i64::from(day_of_month) - 1))
            })
            .ok_or_else(|| {
                AppError::InvalidDate(format!(
                    "year {year}, month {month}, day {day_of_month} is outside the supported range"
                ))
            })?;

        let updated = date.and_time(self.get().time());
        self.tx.send_replace(Some(updated));
        tracing::debug!("Selected date set to {date}");
        Ok(updated)
    }

    /// Receiver that always observes the latest value.
    pub fn subscribe(&self) -> watch::Receiver<Option<NaiveDateTime>> {
        self.tx.subscribe()
    }
}
