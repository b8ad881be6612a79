//! Per-tenant background jobs: reminder delivery and WAL compaction.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::calendar;
use crate::engine::{Engine, EngineError};
use crate::messaging::{render_template, Messenger, OutboundMessage, TemplateVars};
use crate::model::*;
use crate::observability;

/// What one dispatcher pass did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub sent: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Items resolved by someone else between selection and recording.
    pub skipped: usize,
}

impl DispatchReport {
    pub fn total(&self) -> usize {
        self.sent + self.failed + self.cancelled + self.skipped
    }
}

enum Plan {
    Cancel,
    Fail(String),
    Send(OutboundMessage),
}

async fn plan_delivery(engine: &Engine, item: &ReminderQueueItem) -> Plan {
    let Some(appointment) = engine.get_appointment(item.appointment_id).await else {
        return Plan::Cancel;
    };
    if !appointment.is_confirmed() {
        return Plan::Cancel;
    }
    let Some(phone) = engine.get_customer(&item.customer_id).and_then(|c| c.phone) else {
        return Plan::Fail("customer has no phone number".into());
    };

    let settings = engine.settings();
    let service = engine
        .get_service(&appointment.service_id)
        .map(|s| s.name)
        .unwrap_or_default();
    let worker = engine
        .worker_name(&appointment.worker_id)
        .await
        .unwrap_or_default();
    let date = calendar::format_date(appointment.span.start);
    let time = calendar::format_time(appointment.span.start);
    let body = render_template(&settings.reminders.template, &TemplateVars {
        service: &service,
        date: &date,
        time: &time,
        worker: &worker,
        business: &settings.business_name,
    });

    Plan::Send(OutboundMessage {
        channel: item.channel,
        to: phone,
        body,
    })
}

/// Deliver every pending reminder due at `now`. Failures are recorded on the
/// item and never retried.
pub async fn dispatch_due(engine: &Engine, messenger: &dyn Messenger, now: Ms) -> DispatchReport {
    let mut report = DispatchReport::default();
    let due = engine.collect_due_reminders(now);
    metrics::histogram!(observability::DISPATCH_BATCH_SIZE).record(due.len() as f64);

    for item in due {
        let (status, error) = match plan_delivery(engine, &item).await {
            Plan::Cancel => (ReminderStatus::Cancelled, None),
            Plan::Fail(reason) => (ReminderStatus::Failed, Some(reason)),
            Plan::Send(message) => {
                // Cancelled while we were rendering.
                if engine
                    .get_reminder(&item.id)
                    .is_none_or(|r| r.status != ReminderStatus::Pending)
                {
                    report.skipped += 1;
                    continue;
                }
                match messenger.send(&message).await {
                    Ok(()) => (ReminderStatus::Sent, None),
                    Err(reason) => {
                        let err = EngineError::DeliveryFailed(reason);
                        error!(tenant = %engine.tenant, reminder = %item.id, "{err}");
                        (ReminderStatus::Failed, Some(err.to_string()))
                    }
                }
            }
        };

        match engine.resolve_reminder(item.id, status, error).await {
            Ok(()) => match status {
                ReminderStatus::Sent => report.sent += 1,
                ReminderStatus::Failed => report.failed += 1,
                _ => report.cancelled += 1,
            },
            Err(e) => {
                debug!("dispatch skip {}: {e}", item.id);
                report.skipped += 1;
            }
        }
    }
    report
}

/// Run `dispatch_due` every `every` until `shutdown` fires.
pub async fn run_dispatcher(
    engine: Arc<Engine>,
    messenger: Arc<dyn Messenger>,
    every: Duration,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }
        let now = engine.context().now;
        let report = dispatch_due(&engine, messenger.as_ref(), now).await;
        if report.total() > 0 {
            info!(
                tenant = %engine.tenant,
                sent = report.sent,
                failed = report.failed,
                cancelled = report.cancelled,
                "reminders dispatched"
            );
        }
    }
    debug!(tenant = %engine.tenant, "dispatcher stopped");
}

/// Compact the WAL whenever `threshold` appends have piled up since the last
/// compaction.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, every: Duration, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!(tenant = %engine.tenant, appends, "compacted WAL"),
            Err(e) => error!(tenant = %engine.tenant, "WAL compaction failed: {e}"),
        }
    }
    debug!(tenant = %engine.tenant, "compactor stopped");
}
