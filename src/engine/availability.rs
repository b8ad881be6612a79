use chrono::NaiveDate;

use crate::calendar::{self, Slots};
use crate::model::*;
use crate::settings::WorkingCalendarConfig;

// ── Day availability ──────────────────────────────────────────────

/// One candidate slot of a worker's day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotInfo {
    pub time: String,
    pub span: Span,
    pub bookable: bool,
}

/// Free time of a worker on `date`: the working window minus every confirmed
/// appointment. Empty on non-working days.
pub fn free_intervals(ws: &WorkerState, date: NaiveDate, config: &WorkingCalendarConfig) -> Vec<Span> {
    if !calendar::is_working_day(date, config) {
        return Vec::new();
    }
    let window = config.window();
    let open = Span::new(
        calendar::at_minutes(date, window.start),
        calendar::at_minutes(date, window.end),
    );

    let mut busy: Vec<Span> = ws
        .overlapping(&open)
        .filter(|a| a.is_confirmed())
        .map(|a| a.span)
        .collect();
    busy.sort_by_key(|s| s.start);
    let busy = merge_overlapping(&busy);

    subtract_intervals(&[open], &busy)
}

/// Candidate slots for `date`, each `slot_gap` wide, tagged with whether a
/// booking of exactly that span would pass the window and conflict checks.
pub fn day_slots(ws: &WorkerState, date: NaiveDate, config: &WorkingCalendarConfig) -> Vec<SlotInfo> {
    let window = config.window();
    let step = window.step.max(1) as Ms * MINUTE_MS;
    let free = free_intervals(ws, date, config);

    let times = Slots::new(window);
    let minutes = times.clone().minutes();
    times
        .zip(minutes)
        .map(|(time, m)| {
            let start = calendar::at_minutes(date, m);
            let span = Span::new(start, start + step);
            let bookable = calendar::validate_booking_window(&span, config).is_ok()
                && free.iter().any(|f| f.contains_span(&span));
            SlotInfo { time, span, bookable }
        })
        .collect()
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

/// `base` minus `to_remove`; both sorted and disjoint.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut cursor = b.start;

        while ri < to_remove.len() && to_remove[ri].end <= cursor {
            ri += 1;
        }

        for r in to_remove[ri..].iter().take_while(|r| r.start < b.end) {
            if r.start > cursor {
                result.push(Span::new(cursor, r.start));
            }
            cursor = cursor.max(r.end);
        }

        if cursor < b.end {
            result.push(Span::new(cursor, b.end));
        }
    }

    result
}
