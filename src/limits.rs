use crate::model::Ms;

// ── Tenants ──────────────────────────────────────────────────────

pub const MAX_TENANTS: usize = 1024;
pub const MAX_TENANT_NAME_LEN: usize = 128;

// ── Catalog ──────────────────────────────────────────────────────

pub const MAX_WORKERS_PER_TENANT: usize = 1_000;
pub const MAX_SERVICES_PER_TENANT: usize = 1_000;
pub const MAX_CUSTOMERS_PER_TENANT: usize = 200_000;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_PHONE_LEN: usize = 32;

// ── Appointments ─────────────────────────────────────────────────

pub const MAX_APPOINTMENTS_PER_WORKER: usize = 100_000;
pub const MAX_PARTICIPANTS: u32 = 10_000;
pub const MAX_WAITLIST_PER_WORKER: usize = 10_000;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;
/// An appointment never spans more than one day.
pub const MAX_SPAN_DURATION_MS: Ms = 86_400_000;

// ── Settings ─────────────────────────────────────────────────────

pub const MAX_SETTINGS_LEN: usize = 64 * 1024;
pub const MAX_TEMPLATE_LEN: usize = 1_600;
pub const MAX_REMINDER_OFFSETS: usize = 8;
pub const MAX_REMINDER_DAYS_BEFORE: u32 = 60;

// ── Queries ──────────────────────────────────────────────────────

pub const MAX_SQL_LEN: usize = 128 * 1024;
