//! Working-calendar arithmetic: slot generation and booking-window validation.
//!
//! Everything here works on tenant-local wall-clock `Ms`; minutes since midnight
//! are the unit of comparison against the configured window.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;

use crate::engine::EngineError;
use crate::model::{DAY_MS, MINUTE_MS, Ms, Span};
use crate::settings::{DayWindow, WorkingCalendarConfig, format_hhmm};

pub fn day_start(t: Ms) -> Ms {
    t - t.rem_euclid(DAY_MS)
}

pub fn minutes_of_day(t: Ms) -> u32 {
    (t.rem_euclid(DAY_MS) / MINUTE_MS) as u32
}

/// Weekday index with 0 = Sunday. 1970-01-01 was a Thursday.
pub fn weekday_index(t: Ms) -> u8 {
    (t.div_euclid(DAY_MS) + 4).rem_euclid(7) as u8
}

pub fn date_of(t: Ms) -> NaiveDate {
    DateTime::<Utc>::from_timestamp_millis(t)
        .map(|d| d.date_naive())
        .unwrap_or_default()
}

pub fn date_to_ms(date: NaiveDate) -> Ms {
    date.and_time(NaiveTime::MIN).and_utc().timestamp_millis()
}

/// Date at a given minute of the day.
pub fn at_minutes(date: NaiveDate, minutes: u32) -> Ms {
    date_to_ms(date) + minutes as Ms * MINUTE_MS
}

pub fn format_date(t: Ms) -> String {
    date_of(t).format("%Y-%m-%d").to_string()
}

pub fn format_time(t: Ms) -> String {
    format_hhmm(minutes_of_day(t))
}

/// Current wall-clock time in the given zone, as tenant-local `Ms`.
pub fn local_now(tz: Tz) -> Ms {
    Utc::now()
        .with_timezone(&tz)
        .naive_local()
        .and_utc()
        .timestamp_millis()
}

// ── Slot Generator ───────────────────────────────────────────────

/// Lazy "HH:MM" slots from the window start (inclusive) to its end (exclusive).
/// Cloning yields an independent restart from the same position.
#[derive(Debug, Clone)]
pub struct Slots {
    cursor: u32,
    window: DayWindow,
}

impl Slots {
    pub fn new(window: DayWindow) -> Self {
        Self {
            cursor: window.start,
            window,
        }
    }

    /// The same sequence as minutes since midnight.
    pub fn minutes(self) -> impl Iterator<Item = u32> {
        let DayWindow { start, end, step } = self.window;
        (start..end).step_by(step.max(1) as usize)
    }
}

impl Iterator for Slots {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        if self.cursor >= self.window.end {
            return None;
        }
        let slot = format_hhmm(self.cursor);
        self.cursor += self.window.step.max(1);
        Some(slot)
    }
}

pub fn slots(config: &WorkingCalendarConfig) -> Slots {
    Slots::new(config.window())
}

// ── Booking Window Validator ─────────────────────────────────────

pub fn is_working_day(date: NaiveDate, config: &WorkingCalendarConfig) -> bool {
    let idx = date.weekday().num_days_from_sunday() as u8;
    config.working_days.contains(&idx)
}

/// `start <= minutes(t) < end`.
pub fn is_within_working_hours(t: Ms, config: &WorkingCalendarConfig) -> bool {
    let window = config.window();
    let m = minutes_of_day(t);
    window.start <= m && m < window.end
}

/// `minutes(t) <= end`, inclusive, unlike the start check, so an appointment
/// may finish exactly at closing time.
pub fn is_end_within_working_hours(t: Ms, config: &WorkingCalendarConfig) -> bool {
    minutes_of_day(t) <= config.window().end
}

/// Run the three window checks in order. Nothing is written before this passes.
pub fn validate_booking_window(span: &Span, config: &WorkingCalendarConfig) -> Result<(), EngineError> {
    if !is_working_day(date_of(span.start), config) {
        return Err(EngineError::NotWorkingDay);
    }
    if !is_within_working_hours(span.start, config) {
        return Err(EngineError::OutsideWorkingHours);
    }
    // Measure the end against the start's day so an appointment running past
    // midnight cannot wrap back into the window.
    let end_minutes = (span.end - day_start(span.start)).div_euclid(MINUTE_MS);
    if !is_end_within_working_hours(span.end, config) || end_minutes > config.window().end as Ms {
        return Err(EngineError::EndOutsideWorkingHours);
    }
    Ok(())
}

/// The seven days of the week containing `date`, starting at the configured
/// week-start day, each tagged with whether it is a working day.
pub fn week_days(date: NaiveDate, config: &WorkingCalendarConfig) -> Vec<(NaiveDate, bool)> {
    let weekday = date.weekday().num_days_from_sunday() as i64;
    let offset = (weekday - config.week_start_day as i64).rem_euclid(7);
    let first = date - Duration::days(offset);
    (0..7)
        .map(|i| {
            let d = first + Duration::days(i);
            (d, is_working_day(d, config))
        })
        .collect()
}
