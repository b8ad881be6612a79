use ulid::Ulid;

use crate::settings::SettingsError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("not a working day")]
    NotWorkingDay,
    #[error("start outside working hours")]
    OutsideWorkingHours,
    #[error("end outside working hours")]
    EndOutsideWorkingHours,
    #[error("conflict with appointment: {0}")]
    SlotConflict(Ulid),
    #[error("capacity {max} exceeded: {current} booked, {requested} requested")]
    CapacityExceeded { max: u32, current: u32, requested: u32 },
    #[error("appointment not found: {0}")]
    AppointmentNotFound(Ulid),
    #[error("delivery failed: {0}")]
    DeliveryFailed(String),
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: Ulid },
    #[error("already exists: {0}")]
    AlreadyExists(Ulid),
    #[error("{kind} {id} still has live appointments")]
    HasAppointments { kind: &'static str, id: Ulid },
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
    #[error("invalid appointment span: [{start}, {end})")]
    InvalidSpan { start: i64, end: i64 },
    #[error("{0}")]
    InvalidSettings(String),
    #[error("phone {0} already belongs to another customer")]
    PhoneTaken(String),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    WalError(String),
}

impl From<SettingsError> for EngineError {
    fn from(e: SettingsError) -> Self {
        EngineError::InvalidSettings(e.to_string())
    }
}

impl EngineError {
    /// Message suitable for showing to the person making the booking.
    pub fn user_message(&self) -> String {
        match self {
            EngineError::NotWorkingDay => "We are closed on that day. Please pick another date.".into(),
            EngineError::OutsideWorkingHours => {
                "That time is outside our opening hours. Please pick another time.".into()
            }
            EngineError::EndOutsideWorkingHours => {
                "The appointment would run past closing time. Please pick an earlier time.".into()
            }
            EngineError::SlotConflict(_) => {
                "That time is already booked. Please choose another slot.".into()
            }
            EngineError::CapacityExceeded { .. } => "This session is fully booked.".into(),
            EngineError::AppointmentNotFound(_) => "We could not find that appointment.".into(),
            EngineError::DeliveryFailed(_) => "The reminder could not be delivered.".into(),
            EngineError::NotFound { kind, .. } => format!("We could not find that {kind}."),
            EngineError::PhoneTaken(_) => {
                "That phone number is already registered to another customer.".into()
            }
            other => other.to_string(),
        }
    }

    /// SQLSTATE reported over the wire.
    pub fn sqlstate(&self) -> &'static str {
        match self {
            EngineError::NotWorkingDay
            | EngineError::OutsideWorkingHours
            | EngineError::EndOutsideWorkingHours
            | EngineError::InvalidSpan { .. }
            | EngineError::InvalidSettings(_) => "22023",
            EngineError::SlotConflict(_) | EngineError::CapacityExceeded { .. } => "23P01",
            EngineError::AppointmentNotFound(_) | EngineError::NotFound { .. } => "P0002",
            EngineError::AlreadyExists(_) | EngineError::PhoneTaken(_) => "23505",
            EngineError::HasAppointments { .. } => "23503",
            EngineError::LimitExceeded(_) => "54000",
            EngineError::WalError(_) => "58030",
            EngineError::InvalidState(_) => "55000",
            EngineError::DeliveryFailed(_) => "P0001",
        }
    }
}
