use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;

use crate::models::{parse_instant, BlockedTimeRow, STATUS_CANCELLED};

use super::{AvailabilityError, OccupancyKind, OccupiedInterval};

#[derive(Debug, sqlx::FromRow)]
struct BookedRow {
    id: String,
    starts_at: String,
    duration_minutes: i64,
    service_name: String,
}

/// Collect every interval already consumed on a staff member's calendar
/// within [from, to): non-cancelled appointments from both tables, the
/// staff member's blocks, and global blocks. Override windows are working
/// time and are never returned here.
///
/// Every query or decode failure propagates; an error must never be read
/// as "no occupancy", because that is exactly how double-bookings happen.
pub async fn collect_occupancy(
    pool: &SqlitePool,
    staff_id: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<OccupiedInterval>, AvailabilityError> {
    // An appointment starting before `from` can still reach into the range;
    // no service lasts a day, so one day of slack covers every duration.
    let reach_back = (from - Duration::days(1)).to_rfc3339();
    let from_text = from.to_rfc3339();
    let to_text = to.to_rfc3339();

    let mut occupied = Vec::new();

    let booked: Vec<BookedRow> = sqlx::query_as(
        r#"SELECT a.id, a.starts_at, s.duration_minutes, s.name AS service_name
           FROM appointments a
           JOIN services s ON a.service_id = s.id
           WHERE a.staff_id = ? AND a.status != ? AND a.starts_at >= ? AND a.starts_at < ?
           UNION ALL
           SELECT g.id, g.starts_at, s.duration_minutes, s.name AS service_name
           FROM guest_appointments g
           JOIN services s ON g.service_id = s.id
           WHERE g.staff_id = ? AND g.status != ? AND g.starts_at >= ? AND g.starts_at < ?
           ORDER BY starts_at"#,
    )
    .bind(staff_id)
    .bind(STATUS_CANCELLED)
    .bind(&reach_back)
    .bind(&to_text)
    .bind(staff_id)
    .bind(STATUS_CANCELLED)
    .bind(&reach_back)
    .bind(&to_text)
    .fetch_all(pool)
    .await?;

    for row in booked {
        let start = parse_instant(&row.starts_at)
            .ok_or_else(|| AvailabilityError::BadRecord(row.starts_at.clone()))?;
        let end = start + Duration::minutes(row.duration_minutes);
        if end > from {
            occupied.push(OccupiedInterval {
                start,
                end,
                kind: OccupancyKind::Appointment {
                    id: row.id,
                    service_name: row.service_name,
                },
            });
        }
    }

    let blocks: Vec<BlockedTimeRow> = sqlx::query_as(
        r#"SELECT id, staff_id, starts_at, ends_at, reason, is_available_slot
           FROM blocked_times
           WHERE (staff_id = ? OR staff_id IS NULL)
             AND is_available_slot = 0
             AND starts_at < ? AND ends_at > ?
           ORDER BY starts_at"#,
    )
    .bind(staff_id)
    .bind(&to_text)
    .bind(&from_text)
    .fetch_all(pool)
    .await?;

    for row in blocks {
        let start = parse_instant(&row.starts_at)
            .ok_or_else(|| AvailabilityError::BadRecord(row.starts_at.clone()))?;
        let end = parse_instant(&row.ends_at)
            .ok_or_else(|| AvailabilityError::BadRecord(row.ends_at.clone()))?;
        occupied.push(OccupiedInterval {
            start,
            end,
            kind: OccupancyKind::Block { reason: row.reason },
        });
    }

    occupied.sort_by_key(|interval| interval.start);
    Ok(occupied)
}
