use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::settings::TenantSettings;

/// Tenant-local wall-clock milliseconds since the Unix epoch. The only time type.
///
/// Instants are already expressed in the tenant's local time; nothing below the
/// tenant manager converts between zones.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 60 * MINUTE_MS;
pub const DAY_MS: Ms = 24 * HOUR_MS;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Fallible constructor for spans coming from the outside world.
    pub fn checked(start: Ms, end: Ms) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// Request-scoped context passed into every mutation.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub tenant: String,
    /// "Now" in tenant-local wall-clock time.
    pub now: Ms,
}

impl RequestContext {
    pub fn new(tenant: impl Into<String>, now: Ms) -> Self {
        Self {
            tenant: tenant.into(),
            now,
        }
    }
}

// ── Catalog ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worker {
    pub id: Ulid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: Ulid,
    pub name: String,
    pub is_group: bool,
    pub max_capacity: Option<u32>,
    pub min_capacity: Option<u32>,
    pub allow_waitlist: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: Ulid,
    pub name: String,
    pub phone: Option<String>,
}

// ── Appointments ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppointmentStatus {
    Confirmed,
    Pending,
    Cancelled,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "confirmed" => Some(AppointmentStatus::Confirmed),
            "pending" => Some(AppointmentStatus::Pending),
            "cancelled" | "canceled" => Some(AppointmentStatus::Cancelled),
            _ => None,
        }
    }
}

/// One customer's seats in an appointment. Non-group appointments have exactly one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attendee {
    pub customer_id: Ulid,
    pub participants: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub tenant_id: String,
    pub customer_id: Ulid,
    pub service_id: Ulid,
    pub worker_id: Ulid,
    pub span: Span,
    pub status: AppointmentStatus,
    pub is_group: bool,
    pub current_participants: u32,
    pub max_capacity: Option<u32>,
    pub attendees: Vec<Attendee>,
}

impl Appointment {
    pub fn is_confirmed(&self) -> bool {
        self.status == AppointmentStatus::Confirmed
    }

    pub fn is_live(&self) -> bool {
        self.status != AppointmentStatus::Cancelled
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitlistEntry {
    pub id: Ulid,
    /// The full session the request was turned away from, if one existed.
    pub appointment_id: Option<Ulid>,
    pub service_id: Ulid,
    pub worker_id: Ulid,
    pub customer_id: Ulid,
    pub span: Span,
    pub participants: u32,
}

/// What a successful booking request turned into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingOutcome {
    /// A new appointment (or group session) was created.
    Created { appointment_id: Ulid, status: AppointmentStatus },
    /// The request joined an existing group session.
    Joined {
        appointment_id: Ulid,
        current_participants: u32,
        status: AppointmentStatus,
    },
    /// The session was full and the service keeps a waitlist.
    Waitlisted { entry_id: Ulid },
}

impl BookingOutcome {
    pub fn appointment_id(&self) -> Option<Ulid> {
        match self {
            BookingOutcome::Created { appointment_id, .. }
            | BookingOutcome::Joined { appointment_id, .. } => Some(*appointment_id),
            BookingOutcome::Waitlisted { .. } => None,
        }
    }
}

// ── Reminders ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Sms,
    Whatsapp,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Sms => "sms",
            Channel::Whatsapp => "whatsapp",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReminderStatus {
    Pending,
    Sent,
    Cancelled,
    Failed,
}

impl ReminderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderStatus::Pending => "pending",
            ReminderStatus::Sent => "sent",
            ReminderStatus::Cancelled => "cancelled",
            ReminderStatus::Failed => "failed",
        }
    }

    /// Only `pending` may move; `sent`, `failed` and `cancelled` are terminal.
    pub fn can_transition_to(&self, next: ReminderStatus) -> bool {
        *self == ReminderStatus::Pending && next != ReminderStatus::Pending
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderQueueItem {
    pub id: Ulid,
    pub appointment_id: Ulid,
    pub tenant_id: String,
    pub customer_id: Ulid,
    pub scheduled_for: Ms,
    pub channel: Channel,
    pub days_before: u32,
    pub status: ReminderStatus,
    pub last_error: Option<String>,
}

// ── Worker timeline ──────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct WorkerState {
    pub id: Ulid,
    pub name: String,
    /// Every appointment of this worker, sorted by `span.start`.
    pub appointments: Vec<Appointment>,
    pub waitlist: Vec<WaitlistEntry>,
}

impl WorkerState {
    pub fn new(id: Ulid, name: String) -> Self {
        Self {
            id,
            name,
            appointments: Vec::new(),
            waitlist: Vec::new(),
        }
    }

    /// Insert appointment maintaining sort order by span.start.
    pub fn insert_appointment(&mut self, appointment: Appointment) {
        let pos = self
            .appointments
            .binary_search_by_key(&appointment.span.start, |a| a.span.start)
            .unwrap_or_else(|e| e);
        self.appointments.insert(pos, appointment);
    }

    pub fn remove_appointment(&mut self, id: Ulid) -> Option<Appointment> {
        let pos = self.appointments.iter().position(|a| a.id == id)?;
        Some(self.appointments.remove(pos))
    }

    pub fn appointment(&self, id: Ulid) -> Option<&Appointment> {
        self.appointments.iter().find(|a| a.id == id)
    }

    pub fn appointment_mut(&mut self, id: Ulid) -> Option<&mut Appointment> {
        self.appointments.iter_mut().find(|a| a.id == id)
    }

    /// Appointments whose span overlaps the query window.
    /// Binary search skips everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Appointment> {
        let right_bound = self
            .appointments
            .partition_point(|a| a.span.start < query.end);
        self.appointments[..right_bound]
            .iter()
            .filter(move |a| a.span.end > query.start)
    }

    pub fn live_appointment_count(&self) -> usize {
        self.appointments.iter().filter(|a| a.is_live()).count()
    }
}

/// The event types, flat with no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    SettingsUpdated {
        settings: TenantSettings,
    },
    WorkerAdded {
        id: Ulid,
        name: String,
    },
    WorkerRemoved {
        id: Ulid,
    },
    ServiceAdded {
        service: Service,
    },
    ServiceRemoved {
        id: Ulid,
    },
    CustomerAdded {
        customer: Customer,
    },
    CustomerRemoved {
        id: Ulid,
    },
    AppointmentBooked {
        appointment: Appointment,
    },
    ParticipantsAdded {
        id: Ulid,
        worker_id: Ulid,
        customer_id: Ulid,
        participants: u32,
        status: AppointmentStatus,
    },
    AppointmentConfirmed {
        id: Ulid,
        worker_id: Ulid,
    },
    AppointmentRescheduled {
        id: Ulid,
        worker_id: Ulid,
        span: Span,
    },
    AppointmentCancelled {
        id: Ulid,
        worker_id: Ulid,
    },
    AppointmentDeleted {
        id: Ulid,
        worker_id: Ulid,
    },
    Waitlisted {
        entry: WaitlistEntry,
    },
    ReminderQueued {
        item: ReminderQueueItem,
    },
    ReminderResolved {
        id: Ulid,
        status: ReminderStatus,
        error: Option<String>,
    },
}

impl Event {
    /// Worker whose timeline this event touches, if any.
    pub fn worker_id(&self) -> Option<Ulid> {
        match self {
            Event::WorkerAdded { id, .. } | Event::WorkerRemoved { id } => Some(*id),
            Event::AppointmentBooked { appointment } => Some(appointment.worker_id),
            Event::ParticipantsAdded { worker_id, .. }
            | Event::AppointmentConfirmed { worker_id, .. }
            | Event::AppointmentRescheduled { worker_id, .. }
            | Event::AppointmentCancelled { worker_id, .. }
            | Event::AppointmentDeleted { worker_id, .. } => Some(*worker_id),
            Event::Waitlisted { entry } => Some(entry.worker_id),
            Event::SettingsUpdated { .. }
            | Event::ServiceAdded { .. }
            | Event::ServiceRemoved { .. }
            | Event::CustomerAdded { .. }
            | Event::CustomerRemoved { .. }
            | Event::ReminderQueued { .. }
            | Event::ReminderResolved { .. } => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Event::SettingsUpdated { .. } => "settings_updated",
            Event::WorkerAdded { .. } => "worker_added",
            Event::WorkerRemoved { .. } => "worker_removed",
            Event::ServiceAdded { .. } => "service_added",
            Event::ServiceRemoved { .. } => "service_removed",
            Event::CustomerAdded { .. } => "customer_added",
            Event::CustomerRemoved { .. } => "customer_removed",
            Event::AppointmentBooked { .. } => "appointment_booked",
            Event::ParticipantsAdded { .. } => "participants_added",
            Event::AppointmentConfirmed { .. } => "appointment_confirmed",
            Event::AppointmentRescheduled { .. } => "appointment_rescheduled",
            Event::AppointmentCancelled { .. } => "appointment_cancelled",
            Event::AppointmentDeleted { .. } => "appointment_deleted",
            Event::Waitlisted { .. } => "waitlisted",
            Event::ReminderQueued { .. } => "reminder_queued",
            Event::ReminderResolved { .. } => "reminder_resolved",
        }
    }
}
