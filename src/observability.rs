use std::net::SocketAddr;

use crate::engine::EngineError;
use crate::model::BookingOutcome;
use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "slotwise_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "slotwise_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "slotwise_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "slotwise_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "slotwise_connections_rejected_total";

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "slotwise_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotwise_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotwise_wal_flush_batch_size";

// ── Scheduling policy ───────────────────────────────────────────

/// Counter: accepted booking requests. Labels: outcome (created, joined, waitlisted).
pub const BOOKINGS_TOTAL: &str = "slotwise_bookings_total";

/// Counter: rejected booking requests. Labels: reason.
pub const BOOKINGS_REJECTED_TOTAL: &str = "slotwise_bookings_rejected_total";

/// Counter: reminder items queued.
pub const REMINDERS_QUEUED_TOTAL: &str = "slotwise_reminders_queued_total";

/// Counter: reminder items leaving `pending`. Labels: status.
pub const REMINDERS_RESOLVED_TOTAL: &str = "slotwise_reminders_resolved_total";

/// Histogram: reminders handled per dispatcher pass.
pub const DISPATCH_BATCH_SIZE: &str = "slotwise_dispatch_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

pub fn outcome_label(outcome: &BookingOutcome) -> &'static str {
    match outcome {
        BookingOutcome::Created { .. } => "created",
        BookingOutcome::Joined { .. } => "joined",
        BookingOutcome::Waitlisted { .. } => "waitlisted",
    }
}

pub fn rejection_label(err: &EngineError) -> &'static str {
    match err {
        EngineError::NotWorkingDay => "not_working_day",
        EngineError::OutsideWorkingHours => "outside_working_hours",
        EngineError::EndOutsideWorkingHours => "end_outside_working_hours",
        EngineError::SlotConflict(_) => "slot_conflict",
        EngineError::CapacityExceeded { .. } => "capacity_exceeded",
        EngineError::NotFound { .. } | EngineError::AppointmentNotFound(_) => "not_found",
        EngineError::LimitExceeded(_) | EngineError::InvalidSpan { .. } => "limit",
        EngineError::WalError(_) => "wal",
        _ => "other",
    }
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertWorker { .. } => "insert_worker",
        Command::InsertService { .. } => "insert_service",
        Command::InsertCustomer { .. } => "insert_customer",
        Command::InsertAppointment { .. } => "insert_appointment",
        Command::Reschedule { .. } => "reschedule",
        Command::Cancel { .. } => "cancel",
        Command::Confirm { .. } => "confirm",
        Command::UpdateSettings { .. } => "update_settings",
        Command::DeleteWorker { .. } => "delete_worker",
        Command::DeleteService { .. } => "delete_service",
        Command::DeleteCustomer { .. } => "delete_customer",
        Command::DeleteAppointment { .. } => "delete_appointment",
        Command::SelectWorkers => "select_workers",
        Command::SelectServices => "select_services",
        Command::SelectCustomers => "select_customers",
        Command::SelectSettings => "select_settings",
        Command::SelectAppointments { .. } => "select_appointments",
        Command::SelectAppointment { .. } => "select_appointment",
        Command::SelectReminders { .. } => "select_reminders",
        Command::SelectWaitlist { .. } => "select_waitlist",
        Command::SelectSlots { .. } => "select_slots",
        Command::SelectWeek { .. } => "select_week",
        Command::Listen { .. } => "listen",
        Command::Unlisten { .. } => "unlisten",
        Command::UnlistenAll => "unlisten_all",
    }
}
