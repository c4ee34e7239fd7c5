pub mod guard;
pub mod occupancy;
pub mod schedule;
pub mod slots;

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc,
};
use thiserror::Error;

/// Half-open interval of absolute instants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn contains(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        start >= self.start && end <= self.end
    }

    /// "09:00–13:00" in the salon zone, for rejection messages.
    pub fn label(&self, zone: FixedOffset) -> String {
        format!(
            "{}–{}",
            format_local_hm(self.start, zone),
            format_local_hm(self.end, zone)
        )
    }
}

/// The working windows of one staff member on one calendar day.
/// Override windows supersede the weekly schedule entirely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaySchedule {
    Override(Vec<TimeWindow>),
    Weekly(TimeWindow),
    Off,
}

impl DaySchedule {
    pub fn windows(&self) -> &[TimeWindow] {
        match self {
            DaySchedule::Override(windows) => windows,
            DaySchedule::Weekly(window) => std::slice::from_ref(window),
            DaySchedule::Off => &[],
        }
    }
}

/// Time already consumed on a staff member's calendar: a non-cancelled
/// appointment (either table) or an explicit block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OccupiedInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub kind: OccupancyKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OccupancyKind {
    Appointment { id: String, service_name: String },
    Block { reason: Option<String> },
}

impl OccupiedInterval {
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        start < self.end && end > self.start
    }
}

#[derive(Debug, Error)]
pub enum AvailabilityError {
    #[error("could not verify availability")]
    Infrastructure(#[from] sqlx::Error),
    #[error("stored time value could not be parsed: {0}")]
    BadRecord(String),
}

/// Write-time rejections, each with its user-facing message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConflictError {
    #[error("cannot create appointments in the past")]
    PastDate,
    #[error("outside working hours; available windows are: {windows}")]
    OutsideWorkingHours { windows: String },
    #[error("this time is blocked{}", reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    Blocked { reason: Option<String> },
    #[error("overlaps an existing {service} appointment")]
    OverlapsAppointment { service: String },
    #[error("this professional does not work on the selected day")]
    NoSchedule,
}

/// Convert a salon-local wall time to the absolute instant it names.
pub fn local_to_utc(local: NaiveDateTime, zone: FixedOffset) -> DateTime<Utc> {
    Utc.from_utc_datetime(&(local - Duration::seconds(zone.local_minus_utc() as i64)))
}

/// The salon-local calendar date an instant falls on.
pub fn local_date(instant: DateTime<Utc>, zone: FixedOffset) -> NaiveDate {
    instant.with_timezone(&zone).date_naive()
}

/// [midnight, next midnight) of a salon-local calendar day, as instants.
pub fn day_bounds(date: NaiveDate, zone: FixedOffset) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = local_to_utc(date.and_time(NaiveTime::MIN), zone);
    (start, start + Duration::days(1))
}

/// Sunday-based weekday index in [0, 6], on the salon-local date.
pub fn weekday_index(date: NaiveDate) -> i64 {
    date.weekday().num_days_from_sunday() as i64
}

pub fn format_local_hm(instant: DateTime<Utc>, zone: FixedOffset) -> String {
    instant.with_timezone(&zone).format("%H:%M").to_string()
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;

    /// UTC-3, the salon's zone in production.
    pub fn zone() -> FixedOffset {
        FixedOffset::west_opt(3 * 3600).unwrap()
    }

    pub fn instant(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        local_to_utc(
            NaiveDate::from_ymd_opt(y, mo, d)
                .unwrap()
                .and_hms_opt(h, mi, 0)
                .unwrap(),
            zone(),
        )
    }

    pub fn window(y: i32, mo: u32, d: u32, h1: u32, m1: u32, h2: u32, m2: u32) -> TimeWindow {
        TimeWindow {
            start: instant(y, mo, d, h1, m1),
            end: instant(y, mo, d, h2, m2),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::*;
    use super::*;

    #[test]
    fn day_boundaries_follow_the_salon_zone() {
        // 01:30 UTC on the 7th is still the evening of the 6th in UTC-3.
        let late_evening = Utc
            .with_ymd_and_hms(2026, 8, 7, 1, 30, 0)
            .single()
            .unwrap();
        assert_eq!(
            local_date(late_evening, zone()),
            NaiveDate::from_ymd_opt(2026, 8, 6).unwrap()
        );

        let (from, to) = day_bounds(NaiveDate::from_ymd_opt(2026, 8, 6).unwrap(), zone());
        assert_eq!(from, Utc.with_ymd_and_hms(2026, 8, 6, 3, 0, 0).single().unwrap());
        assert_eq!(to, Utc.with_ymd_and_hms(2026, 8, 7, 3, 0, 0).single().unwrap());
    }

    #[test]
    fn weekday_is_sunday_based_and_local() {
        // 2026-08-09 is a Sunday.
        assert_eq!(weekday_index(NaiveDate::from_ymd_opt(2026, 8, 9).unwrap()), 0);
        assert_eq!(weekday_index(NaiveDate::from_ymd_opt(2026, 8, 10).unwrap()), 1);
    }

    #[test]
    fn touching_intervals_do_not_overlap() {
        let occupied = OccupiedInterval {
            start: instant(2026, 8, 6, 10, 0),
            end: instant(2026, 8, 6, 11, 0),
            kind: OccupancyKind::Block { reason: None },
        };
        assert!(!occupied.overlaps(instant(2026, 8, 6, 11, 0), instant(2026, 8, 6, 12, 0)));
        assert!(!occupied.overlaps(instant(2026, 8, 6, 9, 0), instant(2026, 8, 6, 10, 0)));
        assert!(occupied.overlaps(instant(2026, 8, 6, 10, 59), instant(2026, 8, 6, 11, 59)));
    }

    #[test]
    fn window_labels_use_local_wall_time() {
        let w = window(2026, 8, 6, 9, 0, 13, 0);
        assert_eq!(w.label(zone()), "09:00–13:00");
    }
}
