use chrono::{FixedOffset, NaiveDate};
use sqlx::SqlitePool;

use crate::models::{parse_instant, parse_time_of_day, BlockedTimeRow, ScheduleRow};

use super::{day_bounds, local_to_utc, weekday_index, AvailabilityError, DaySchedule, TimeWindow};

/// Resolve the working windows for one staff member on one salon-local day.
///
/// Override windows (blocked_times rows with is_available_slot = 1) on that
/// day supersede the weekly schedule entirely; without any, the single
/// weekly row for the weekday applies, and without that the day is off.
pub async fn resolve_day_schedule(
    pool: &SqlitePool,
    staff_id: &str,
    date: NaiveDate,
    zone: FixedOffset,
) -> Result<DaySchedule, AvailabilityError> {
    let (from, to) = day_bounds(date, zone);
    let overrides: Vec<BlockedTimeRow> = sqlx::query_as(
        r#"SELECT id, staff_id, starts_at, ends_at, reason, is_available_slot
           FROM blocked_times
           WHERE staff_id = ? AND is_available_slot = 1 AND starts_at >= ? AND starts_at < ?
           ORDER BY starts_at"#,
    )
    .bind(staff_id)
    .bind(from.to_rfc3339())
    .bind(to.to_rfc3339())
    .fetch_all(pool)
    .await?;

    if !overrides.is_empty() {
        let mut windows = Vec::with_capacity(overrides.len());
        for row in &overrides {
            let start = parse_instant(&row.starts_at)
                .ok_or_else(|| AvailabilityError::BadRecord(row.starts_at.clone()))?;
            let end = parse_instant(&row.ends_at)
                .ok_or_else(|| AvailabilityError::BadRecord(row.ends_at.clone()))?;
            if end > start {
                windows.push(TimeWindow { start, end });
            }
        }
        return Ok(DaySchedule::Override(merge_windows(windows)));
    }

    let weekly: Option<ScheduleRow> = sqlx::query_as(
        r#"SELECT id, staff_id, weekday, start_time, end_time
           FROM staff_schedules
           WHERE staff_id = ? AND weekday = ?
           LIMIT 1"#,
    )
    .bind(staff_id)
    .bind(weekday_index(date))
    .fetch_optional(pool)
    .await?;

    let Some(row) = weekly else {
        return Ok(DaySchedule::Off);
    };

    let start = parse_time_of_day(&row.start_time)
        .ok_or_else(|| AvailabilityError::BadRecord(row.start_time.clone()))?;
    let end = parse_time_of_day(&row.end_time)
        .ok_or_else(|| AvailabilityError::BadRecord(row.end_time.clone()))?;
    if end <= start {
        return Ok(DaySchedule::Off);
    }

    Ok(DaySchedule::Weekly(TimeWindow {
        start: local_to_utc(date.and_time(start), zone),
        end: local_to_utc(date.and_time(end), zone),
    }))
}

/// Sort windows by start and coalesce touching or overlapping ones.
pub fn merge_windows(mut windows: Vec<TimeWindow>) -> Vec<TimeWindow> {
    windows.sort_by_key(|w| w.start);
    let mut merged: Vec<TimeWindow> = Vec::with_capacity(windows.len());
    for window in windows {
        match merged.last_mut() {
            Some(last) if window.start <= last.end => {
                if window.end > last.end {
                    last.end = window.end;
                }
            }
            _ => merged.push(window),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::super::testutil::*;
    use super::*;

    #[test]
    fn merges_touching_windows_into_one() {
        let merged = merge_windows(vec![
            window(2026, 8, 6, 9, 0, 11, 0),
            window(2026, 8, 6, 11, 0, 13, 0),
        ]);
        assert_eq!(merged, vec![window(2026, 8, 6, 9, 0, 13, 0)]);
    }

    #[test]
    fn merges_overlapping_windows_regardless_of_input_order() {
        let merged = merge_windows(vec![
            window(2026, 8, 6, 12, 0, 15, 0),
            window(2026, 8, 6, 9, 0, 13, 0),
        ]);
        assert_eq!(merged, vec![window(2026, 8, 6, 9, 0, 15, 0)]);
    }

    #[test]
    fn keeps_disjoint_windows_separate_and_sorted() {
        let merged = merge_windows(vec![
            window(2026, 8, 6, 14, 0, 18, 0),
            window(2026, 8, 6, 9, 0, 12, 0),
        ]);
        assert_eq!(
            merged,
            vec![window(2026, 8, 6, 9, 0, 12, 0), window(2026, 8, 6, 14, 0, 18, 0)]
        );
    }

    #[test]
    fn contained_window_is_absorbed() {
        let merged = merge_windows(vec![
            window(2026, 8, 6, 9, 0, 18, 0),
            window(2026, 8, 6, 10, 0, 11, 0),
        ]);
        assert_eq!(merged, vec![window(2026, 8, 6, 9, 0, 18, 0)]);
    }
}
