//! Bounded fallback plan for customer registration.
//!
//! A registration first tries to store the customer with their phone number.
//! When that number already belongs to someone else, the plan falls back to
//! storing the customer without a phone so the booking can still go ahead.
//! The plan is finite; once it is exhausted the last error is returned.

use crate::engine::EngineError;
use crate::limits::MAX_PHONE_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationStep {
    WithPhone,
    WithoutPhone,
}

#[derive(Debug, Clone)]
pub struct RegistrationPlan {
    steps: &'static [RegistrationStep],
    next: usize,
}

impl RegistrationPlan {
    pub fn new(has_phone: bool) -> Self {
        const WITH_PHONE: &[RegistrationStep] = &[RegistrationStep::WithPhone, RegistrationStep::WithoutPhone];
        const WITHOUT_PHONE: &[RegistrationStep] = &[RegistrationStep::WithoutPhone];
        Self {
            steps: if has_phone { WITH_PHONE } else { WITHOUT_PHONE },
            next: 0,
        }
    }

    pub fn remaining(&self) -> usize {
        self.steps.len() - self.next
    }
}

impl Iterator for RegistrationPlan {
    type Item = RegistrationStep;

    fn next(&mut self) -> Option<RegistrationStep> {
        let step = self.steps.get(self.next).copied()?;
        self.next += 1;
        Some(step)
    }
}

/// Errors that move the plan on to its next step. Everything else aborts.
pub fn should_fall_back(err: &EngineError) -> bool {
    matches!(err, EngineError::PhoneTaken(_))
}

/// Keep digits and a leading `+`; spaces, dashes and brackets are dropped.
pub fn normalize_phone(raw: &str) -> Result<String, EngineError> {
    let trimmed = raw.trim();
    let mut out = String::with_capacity(trimmed.len());
    if trimmed.starts_with('+') {
        out.push('+');
    }
    out.extend(trimmed.chars().filter(char::is_ascii_digit));
    if !out.chars().any(|c| c.is_ascii_digit()) {
        return Err(EngineError::InvalidState("phone number has no digits"));
    }
    if out.len() > MAX_PHONE_LEN {
        return Err(EngineError::LimitExceeded("phone number too long"));
    }
    Ok(out)
}
