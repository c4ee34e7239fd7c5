use chrono::{DateTime, NaiveTime, Utc};
use serde::Serialize;

pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_STAFF: &str = "staff";
pub const ROLE_CLIENT: &str = "client";

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_CONFIRMED: &str = "confirmed";
pub const STATUS_CANCELLED: &str = "cancelled";
pub const STATUS_NO_SHOW: &str = "no_show";

/// Allowed status transitions: pending can be confirmed, cancelled or marked
/// no-show; confirmed can still be cancelled or marked no-show. Staff-deletion
/// cleanup forces `cancelled` regardless, outside this table.
pub fn transition_allowed(from: &str, to: &str) -> bool {
    match from {
        STATUS_PENDING => matches!(to, STATUS_CONFIRMED | STATUS_CANCELLED | STATUS_NO_SHOW),
        STATUS_CONFIRMED => matches!(to, STATUS_CANCELLED | STATUS_NO_SHOW),
        _ => false,
    }
}

#[allow(dead_code)]
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRow {
    pub id: String,
    pub username: String,
    pub display_name: String,
    pub role: String,
    pub password_hash: String,
    pub phone: Option<String>,
    pub active: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct ServiceRow {
    pub id: String,
    pub name: String,
    pub category: String,
    pub duration_minutes: i64,
    pub price: String,
    pub active: i64,
    pub position: i64,
}

#[allow(dead_code)]
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ScheduleRow {
    pub id: String,
    pub staff_id: String,
    pub weekday: i64,
    pub start_time: String,
    pub end_time: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BlockedTimeRow {
    pub id: String,
    pub staff_id: Option<String>,
    pub starts_at: String,
    pub ends_at: String,
    pub reason: Option<String>,
    pub is_available_slot: i64,
}

/// A registered-client or guest appointment joined with its service and
/// staff names. Guest rows carry the client identity inline; registered
/// rows resolve it from the users table.
#[allow(dead_code)]
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AppointmentRow {
    pub id: String,
    pub client_name: String,
    pub client_phone: Option<String>,
    pub service_id: String,
    pub service_name: String,
    pub duration_minutes: i64,
    pub staff_id: Option<String>,
    pub staff_name: Option<String>,
    pub starts_at: String,
    pub status: String,
    pub notes: Option<String>,
    pub created_at: String,
    pub is_guest: i64,
}

#[allow(dead_code)]
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct GalleryPhotoRow {
    pub id: String,
    pub title: String,
    pub image_url: String,
    pub position: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ActivityRow {
    pub message: String,
    pub created_at: String,
}

/// Timestamps are stored as RFC 3339 UTC text.
pub fn parse_instant(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Times of day are stored as `HH:MM` text.
pub fn parse_time_of_day(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_from_pending() {
        assert!(transition_allowed(STATUS_PENDING, STATUS_CONFIRMED));
        assert!(transition_allowed(STATUS_PENDING, STATUS_CANCELLED));
        assert!(transition_allowed(STATUS_PENDING, STATUS_NO_SHOW));
        assert!(!transition_allowed(STATUS_PENDING, STATUS_PENDING));
    }

    #[test]
    fn cancelled_is_terminal() {
        assert!(!transition_allowed(STATUS_CANCELLED, STATUS_PENDING));
        assert!(!transition_allowed(STATUS_CANCELLED, STATUS_CONFIRMED));
        assert!(!transition_allowed(STATUS_NO_SHOW, STATUS_CANCELLED));
    }

    #[test]
    fn parses_stored_timestamps_and_times() {
        assert!(parse_instant("2026-08-06T12:30:00+00:00").is_some());
        assert!(parse_instant("not a timestamp").is_none());
        assert_eq!(parse_time_of_day("09:30"), NaiveTime::from_hms_opt(9, 30, 0));
        assert!(parse_time_of_day("9h30").is_none());
    }
}
