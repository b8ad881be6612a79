use ulid::Ulid;

use crate::model::*;

use super::EngineError;

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    use crate::limits::*;
    if span.start >= span.end {
        return Err(EngineError::InvalidSpan {
            start: span.start,
            end: span.end,
        });
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(())
}

pub(crate) fn validate_name(name: &str) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::InvalidState("name must not be empty"));
    }
    if name.len() > crate::limits::MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(())
}

/// Half-open overlap test against the worker's confirmed appointments.
/// Pending and cancelled appointments never block; `exclude` skips the
/// appointment being moved or confirmed.
pub(crate) fn check_no_conflict(ws: &WorkerState, span: &Span, exclude: Option<Ulid>) -> Result<(), EngineError> {
    match ws
        .overlapping(span)
        .find(|a| a.is_confirmed() && Some(a.id) != exclude)
    {
        Some(existing) => Err(EngineError::SlotConflict(existing.id)),
        None => Ok(()),
    }
}

/// `current + requested <= max`.
pub fn check_capacity(max: u32, current: u32, requested: u32) -> Result<(), EngineError> {
    if current.saturating_add(requested) > max {
        return Err(EngineError::CapacityExceeded {
            max,
            current,
            requested,
        });
    }
    Ok(())
}

/// The live group session of `service_id` occupying exactly `span`, if any.
pub(crate) fn find_group_session<'a>(ws: &'a WorkerState, service_id: Ulid, span: &Span) -> Option<&'a Appointment> {
    ws.overlapping(span)
        .find(|a| a.is_group && a.is_live() && a.service_id == service_id && a.span == *span)
}
