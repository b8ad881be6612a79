use chrono::Duration;
use tracing::debug;
use ulid::Ulid;

use crate::calendar;
use crate::model::*;
use crate::observability;
use crate::settings::ReminderSettings;

use super::{Engine, EngineError};

/// Fire times for an appointment starting at `start`: for each offset `d`, the
/// calendar date `d` days before the start at the configured time of day.
/// Times not strictly after `now` are dropped.
pub fn reminder_times(start: Ms, settings: &ReminderSettings, now: Ms) -> Vec<(u32, Ms)> {
    if !settings.enabled {
        return Vec::new();
    }
    let time_of_day = settings.default_time_minutes();
    let start_date = calendar::date_of(start);
    settings
        .days_before
        .iter()
        .filter_map(|&d| {
            let date = start_date.checked_sub_signed(Duration::days(d as i64))?;
            let at = calendar::at_minutes(date, time_of_day);
            (at > now).then_some((d, at))
        })
        .collect()
}

/// Metrics for a committed reminder event.
pub(super) fn record_reminder_event(event: &Event) {
    match event {
        Event::ReminderQueued { .. } => {
            metrics::counter!(observability::REMINDERS_QUEUED_TOTAL).increment(1);
        }
        Event::ReminderResolved { status, .. } => {
            metrics::counter!(observability::REMINDERS_RESOLVED_TOTAL, "status" => status.as_str()).increment(1);
        }
        _ => {}
    }
}

impl Engine {
    /// `ReminderQueued` events for `recipients` of a confirmed appointment.
    pub(super) fn reminder_events(&self, appointment: &Appointment, recipients: &[Ulid], now: Ms) -> Vec<Event> {
        if !appointment.is_confirmed() || recipients.is_empty() {
            return Vec::new();
        }
        let settings = self.settings().reminders;
        let times = reminder_times(appointment.span.start, &settings, now);
        let channel = settings.channel;

        let events: Vec<Event> = recipients
            .iter()
            .flat_map(|&customer_id| {
                times.iter().map(move |&(days_before, scheduled_for)| ReminderQueueItem {
                    id: Ulid::new(),
                    appointment_id: appointment.id,
                    tenant_id: appointment.tenant_id.clone(),
                    customer_id,
                    scheduled_for,
                    channel,
                    days_before,
                    status: ReminderStatus::Pending,
                    last_error: None,
                })
            })
            .map(|item| Event::ReminderQueued { item })
            .collect();
        debug!(appointment = %appointment.id, queued = events.len(), "reminders scheduled");
        events
    }

    /// `ReminderResolved(cancelled)` for every pending reminder of an
    /// appointment. Caller holds the reminder lock until they are committed.
    pub(super) fn reminder_cancellations(&self, appointment_id: Ulid) -> Vec<Event> {
        let ids: Vec<Ulid> = self
            .reminders_by_appointment
            .get(&appointment_id)
            .map(|ids| ids.value().clone())
            .unwrap_or_default();
        ids.into_iter()
            .filter(|id| {
                self.reminders
                    .get(id)
                    .is_some_and(|r| r.status.can_transition_to(ReminderStatus::Cancelled))
            })
            .map(|id| Event::ReminderResolved {
                id,
                status: ReminderStatus::Cancelled,
                error: None,
            })
            .collect()
    }

    /// Move every pending reminder of an appointment to `cancelled`.
    /// Sent and failed items keep their state.
    pub async fn cancel_pending_reminders(&self, appointment_id: Ulid) -> Result<usize, EngineError> {
        let _gate = self.write_gate.read().await;
        let _transition = self.reminder_lock.lock().await;
        let cancellations = self.reminder_cancellations(appointment_id);
        self.persist_shared_all(&cancellations).await?;
        cancellations.iter().for_each(record_reminder_event);
        Ok(cancellations.len())
    }

    /// Record the outcome of a pending reminder. Terminal items are rejected.
    pub async fn resolve_reminder(
        &self,
        id: Ulid,
        status: ReminderStatus,
        error: Option<String>,
    ) -> Result<(), EngineError> {
        let _gate = self.write_gate.read().await;
        let _transition = self.reminder_lock.lock().await;
        let current = self
            .reminders
            .get(&id)
            .map(|r| r.status)
            .ok_or(EngineError::NotFound { kind: "reminder", id })?;
        if !current.can_transition_to(status) {
            return Err(EngineError::InvalidState("reminder already resolved"));
        }
        let event = Event::ReminderResolved { id, status, error };
        self.persist_shared(&event).await?;
        record_reminder_event(&event);
        Ok(())
    }

    /// Pending reminders due at or before `now`, oldest first.
    pub fn collect_due_reminders(&self, now: Ms) -> Vec<ReminderQueueItem> {
        let mut due: Vec<ReminderQueueItem> = self
            .reminders
            .iter()
            .filter(|r| r.status == ReminderStatus::Pending && r.scheduled_for <= now)
            .map(|r| r.value().clone())
            .collect();
        due.sort_by_key(|r| (r.scheduled_for, r.id));
        due
    }
}
