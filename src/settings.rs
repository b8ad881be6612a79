//! Per-tenant settings.
//!
//! Tenants hand us a loosely-typed JSON blob (every field optional, working days
//! as indices or names). It is resolved into [`TenantSettings`] once, on load;
//! everything downstream reads the typed struct and never re-derives defaults.

use std::collections::BTreeSet;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::limits::*;
use crate::model::Channel;

pub const DEFAULT_DAY_START: &str = "09:00";
pub const DEFAULT_DAY_END: &str = "18:00";
pub const DEFAULT_SLOT_GAP_MINUTES: u32 = 30;
/// Step used when the configured hours cannot be parsed.
pub const FALLBACK_SLOT_GAP_MINUTES: u32 = 60;
pub const DEFAULT_REMINDER_TIME: &str = "09:00";
pub const DEFAULT_TEMPLATE: &str =
    "Hi! A reminder of your {{service}} with {{worker}} on {{date}} at {{time}}. See you soon, {{business}}";

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("settings are not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid settings: {0}")]
    Invalid(String),
}

fn invalid(msg: impl Into<String>) -> SettingsError {
    SettingsError::Invalid(msg.into())
}

/// Parse "HH:MM" into minutes since midnight. "24:00" is accepted as end of day.
pub fn parse_hhmm(s: &str) -> Option<u32> {
    let (h, m) = s.trim().split_once(':')?;
    if h.is_empty() || m.len() != 2 {
        return None;
    }
    let h: u32 = h.parse().ok()?;
    let m: u32 = m.parse().ok()?;
    match (h, m) {
        (24, 0) => Some(24 * 60),
        (0..=23, 0..=59) => Some(h * 60 + m),
        _ => None,
    }
}

pub fn format_hhmm(minutes: u32) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

/// Working hours exactly as the tenant configured them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingHours {
    pub start: String,
    pub end: String,
}

/// Resolved bookable window of a day, in minutes since midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayWindow {
    pub start: u32,
    pub end: u32,
    pub step: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingCalendarConfig {
    /// Weekday indices, 0 = Sunday.
    pub working_days: BTreeSet<u8>,
    pub working_hours: WorkingHours,
    pub slot_gap_minutes: u32,
    pub week_start_day: u8,
}

impl Default for WorkingCalendarConfig {
    fn default() -> Self {
        Self {
            working_days: (1..=6).collect(),
            working_hours: WorkingHours {
                start: DEFAULT_DAY_START.into(),
                end: DEFAULT_DAY_END.into(),
            },
            slot_gap_minutes: DEFAULT_SLOT_GAP_MINUTES,
            week_start_day: 1,
        }
    }
}

impl WorkingCalendarConfig {
    /// The window every scheduling decision uses. Unparsable hours fall back to
    /// 09:00-18:00 stepping hourly.
    pub fn window(&self) -> DayWindow {
        let start = parse_hhmm(&self.working_hours.start);
        let end = parse_hhmm(&self.working_hours.end);
        match (start, end) {
            (Some(start), Some(end)) if start < end => DayWindow {
                start,
                end,
                step: self.slot_gap_minutes.max(1),
            },
            _ => DayWindow {
                start: 9 * 60,
                end: 18 * 60,
                step: FALLBACK_SLOT_GAP_MINUTES,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderSettings {
    pub enabled: bool,
    pub days_before: Vec<u32>,
    /// Validated "HH:MM".
    pub default_time: String,
    pub channel: Channel,
    pub template: String,
}

impl Default for ReminderSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            days_before: vec![1],
            default_time: DEFAULT_REMINDER_TIME.into(),
            channel: Channel::Sms,
            template: DEFAULT_TEMPLATE.into(),
        }
    }
}

impl ReminderSettings {
    pub fn default_time_minutes(&self) -> u32 {
        parse_hhmm(&self.default_time).unwrap_or(9 * 60)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantSettings {
    pub business_name: String,
    pub calendar: WorkingCalendarConfig,
    pub reminders: ReminderSettings,
    /// IANA zone name; validated on load.
    pub timezone: String,
    /// New non-group bookings start `pending` until an admin confirms them.
    pub require_approval: bool,
}

impl Default for TenantSettings {
    fn default() -> Self {
        Self {
            business_name: String::new(),
            calendar: WorkingCalendarConfig::default(),
            reminders: ReminderSettings::default(),
            timezone: "UTC".into(),
            require_approval: false,
        }
    }
}

impl TenantSettings {
    pub fn tz(&self) -> Tz {
        self.timezone.parse().unwrap_or(Tz::UTC)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".into())
    }

    /// Resolve a loosely-typed settings blob, filling every missing field with its default.
    pub fn from_json(blob: &str) -> Result<Self, SettingsError> {
        if blob.len() > MAX_SETTINGS_LEN {
            return Err(invalid("settings blob too large"));
        }
        let raw: RawSettings = serde_json::from_str(blob)?;
        raw.resolve()
    }
}

// ── Loose input shape ────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSettings {
    #[serde(alias = "business_name")]
    business_name: Option<String>,
    #[serde(alias = "working_days")]
    working_days: Option<Vec<RawDay>>,
    #[serde(alias = "working_hours")]
    working_hours: Option<RawHours>,
    #[serde(alias = "slot_gap_minutes", alias = "slotGap")]
    slot_gap_minutes: Option<u32>,
    #[serde(alias = "week_start_day", alias = "weekStart")]
    week_start_day: Option<RawDay>,
    /// Nested form, as produced by [`TenantSettings::to_json`].
    calendar: Option<RawCalendar>,
    reminders: Option<RawReminders>,
    timezone: Option<String>,
    #[serde(alias = "require_approval")]
    require_approval: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCalendar {
    #[serde(alias = "working_days")]
    working_days: Option<Vec<RawDay>>,
    #[serde(alias = "working_hours")]
    working_hours: Option<RawHours>,
    #[serde(alias = "slot_gap_minutes")]
    slot_gap_minutes: Option<u32>,
    #[serde(alias = "week_start_day")]
    week_start_day: Option<RawDay>,
}

#[derive(Debug, Deserialize)]
struct RawHours {
    start: Option<String>,
    end: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReminders {
    enabled: Option<bool>,
    #[serde(alias = "days_before")]
    days_before: Option<Vec<u32>>,
    #[serde(alias = "default_time", alias = "time")]
    default_time: Option<String>,
    channel: Option<String>,
    template: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawDay {
    Index(u8),
    Name(String),
}

impl RawDay {
    fn index(&self) -> Result<u8, SettingsError> {
        match self {
            RawDay::Index(i) if *i <= 6 => Ok(*i),
            RawDay::Index(i) => Err(invalid(format!("weekday index {i} out of range 0..=6"))),
            RawDay::Name(name) => {
                let lower = name.trim().to_ascii_lowercase();
                let idx = match lower.get(..3) {
                    Some("sun") => 0,
                    Some("mon") => 1,
                    Some("tue") => 2,
                    Some("wed") => 3,
                    Some("thu") => 4,
                    Some("fri") => 5,
                    Some("sat") => 6,
                    _ => return Err(invalid(format!("unknown weekday: {name}"))),
                };
                Ok(idx)
            }
        }
    }
}

impl RawSettings {
    fn resolve(self) -> Result<TenantSettings, SettingsError> {
        let defaults = TenantSettings::default();
        let nested = self.calendar.unwrap_or_default();

        let business_name = self.business_name.unwrap_or(defaults.business_name);
        if business_name.len() > MAX_NAME_LEN {
            return Err(invalid("business name too long"));
        }

        let working_days = match self.working_days.or(nested.working_days) {
            Some(days) => days.iter().map(RawDay::index).collect::<Result<BTreeSet<u8>, _>>()?,
            None => defaults.calendar.working_days,
        };

        let working_hours = match self.working_hours.or(nested.working_hours) {
            Some(h) => WorkingHours {
                start: h.start.unwrap_or_else(|| DEFAULT_DAY_START.into()),
                end: h.end.unwrap_or_else(|| DEFAULT_DAY_END.into()),
            },
            None => defaults.calendar.working_hours,
        };
        // Unparsable hours are tolerated (they resolve to the fallback window),
        // but well-formed hours must describe a non-empty day.
        if let (Some(start), Some(end)) = (
            parse_hhmm(&working_hours.start),
            parse_hhmm(&working_hours.end),
        ) && start >= end
        {
            return Err(invalid(format!(
                "working hours start {} must be before end {}",
                working_hours.start, working_hours.end
            )));
        }

        let slot_gap_minutes = self
            .slot_gap_minutes
            .or(nested.slot_gap_minutes)
            .unwrap_or(defaults.calendar.slot_gap_minutes);
        if slot_gap_minutes == 0 || slot_gap_minutes > 24 * 60 {
            return Err(invalid("slot gap must be between 1 and 1440 minutes"));
        }

        let week_start_day = match self.week_start_day.or(nested.week_start_day) {
            Some(day) => day.index()?,
            None => defaults.calendar.week_start_day,
        };

        let reminders = match self.reminders {
            Some(raw) => raw.resolve()?,
            None => defaults.reminders,
        };

        let timezone = self.timezone.unwrap_or(defaults.timezone);
        if timezone.parse::<Tz>().is_err() {
            return Err(invalid(format!("unknown timezone: {timezone}")));
        }

        Ok(TenantSettings {
            business_name,
            calendar: WorkingCalendarConfig {
                working_days,
                working_hours,
                slot_gap_minutes,
                week_start_day,
            },
            reminders,
            timezone,
            require_approval: self.require_approval.unwrap_or(defaults.require_approval),
        })
    }
}

impl RawReminders {
    fn resolve(self) -> Result<ReminderSettings, SettingsError> {
        let defaults = ReminderSettings::default();

        let mut days_before = self.days_before.unwrap_or(defaults.days_before);
        days_before.sort_unstable();
        days_before.dedup();
        if days_before.len() > MAX_REMINDER_OFFSETS {
            return Err(invalid("too many reminder offsets"));
        }
        if days_before.iter().any(|d| *d > MAX_REMINDER_DAYS_BEFORE) {
            return Err(invalid("reminder offset too far ahead"));
        }

        let default_time = self.default_time.unwrap_or(defaults.default_time);
        if parse_hhmm(&default_time).is_none_or(|m| m >= 24 * 60) {
            return Err(invalid(format!("bad reminder time: {default_time}")));
        }

        let channel = match self.channel.as_deref().map(str::to_ascii_lowercase).as_deref() {
            None => defaults.channel,
            Some("sms") => Channel::Sms,
            Some("whatsapp") => Channel::Whatsapp,
            Some(other) => return Err(invalid(format!("unknown reminder channel: {other}"))),
        };

        let template = self.template.unwrap_or(defaults.template);
        if template.len() > MAX_TEMPLATE_LEN {
            return Err(invalid("reminder template too long"));
        }

        Ok(ReminderSettings {
            enabled: self.enabled.unwrap_or(defaults.enabled),
            days_before,
            default_time,
            channel,
            template,
        })
    }
}
