use chrono::{DateTime, Duration, FixedOffset, Utc};
use sqlx::SqlitePool;
use thiserror::Error;

use crate::auth::new_id;
use crate::models::{
    parse_instant, transition_allowed, ServiceRow, STATUS_CANCELLED, STATUS_PENDING,
};

use super::occupancy::collect_occupancy;
use super::schedule::resolve_day_schedule;
use super::{
    day_bounds, local_date, AvailabilityError, ConflictError, DaySchedule, OccupancyKind,
    OccupiedInterval,
};

/// A write about to land on one of the appointment tables, reduced to the
/// fields the guard rules on.
#[derive(Debug, Clone)]
pub struct ProposedWrite {
    /// Row under update, excluded from the overlap scan. None on insert.
    pub exclude_id: Option<String>,
    /// None means the appointment is (being) detached from its staff.
    pub staff_id: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub duration_minutes: i64,
    pub new_status: String,
    /// None on insert.
    pub old_status: Option<String>,
}

impl ProposedWrite {
    fn cancelling(&self) -> bool {
        self.new_status == STATUS_CANCELLED
    }

    fn was_cancelled(&self) -> bool {
        self.old_status.as_deref() == Some(STATUS_CANCELLED)
    }
}

#[derive(Debug, Error)]
pub enum BookingError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Conflict(ConflictError),
    #[error("this professional does not work on the selected day")]
    NoSchedule,
    #[error("could not verify availability, please try again")]
    Infrastructure(String),
}

impl From<ConflictError> for BookingError {
    fn from(err: ConflictError) -> Self {
        match err {
            ConflictError::NoSchedule => BookingError::NoSchedule,
            other => BookingError::Conflict(other),
        }
    }
}

impl From<AvailabilityError> for BookingError {
    fn from(err: AvailabilityError) -> Self {
        match err {
            AvailabilityError::Infrastructure(e) => BookingError::Infrastructure(e.to_string()),
            AvailabilityError::BadRecord(v) => BookingError::Infrastructure(v),
        }
    }
}

impl From<sqlx::Error> for BookingError {
    fn from(err: sqlx::Error) -> Self {
        BookingError::Infrastructure(err.to_string())
    }
}

/// The full decision table of the guard, pure in all inputs.
///
/// Rule order: past-date (with the cancellation/detachment carve-outs),
/// cancellation short-circuit, working hours, blocked windows, existing
/// appointments. Each rejection carries its own user-facing message.
pub fn evaluate(
    proposed: &ProposedWrite,
    schedule: &DaySchedule,
    occupied: &[OccupiedInterval],
    now: DateTime<Utc>,
    zone: FixedOffset,
) -> Result<(), ConflictError> {
    let slot_end = proposed.starts_at + Duration::minutes(proposed.duration_minutes);
    let detached = proposed.staff_id.is_none();

    if proposed.starts_at <= now
        && !(proposed.cancelling() || proposed.was_cancelled() || detached)
    {
        return Err(ConflictError::PastDate);
    }

    // A cancelled or detached appointment cannot conflict with anything.
    if proposed.cancelling() || detached {
        return Ok(());
    }

    match schedule {
        DaySchedule::Off => return Err(ConflictError::NoSchedule),
        DaySchedule::Override(windows) => {
            // With day-specific windows the appointment must lie entirely
            // inside one of them; partial coverage is rejected.
            if !windows.iter().any(|w| w.contains(proposed.starts_at, slot_end)) {
                let listed = windows
                    .iter()
                    .map(|w| w.label(zone))
                    .collect::<Vec<_>>()
                    .join(", ");
                return Err(ConflictError::OutsideWorkingHours { windows: listed });
            }
        }
        DaySchedule::Weekly(window) => {
            if !window.contains(proposed.starts_at, slot_end) {
                return Err(ConflictError::OutsideWorkingHours {
                    windows: window.label(zone),
                });
            }
        }
    }

    for interval in occupied {
        if let OccupancyKind::Block { reason } = &interval.kind {
            if interval.overlaps(proposed.starts_at, slot_end) {
                return Err(ConflictError::Blocked {
                    reason: reason.clone(),
                });
            }
        }
    }

    for interval in occupied {
        if let OccupancyKind::Appointment { id, service_name } = &interval.kind {
            if proposed.exclude_id.as_deref() == Some(id.as_str()) {
                continue;
            }
            if interval.overlaps(proposed.starts_at, slot_end) {
                return Err(ConflictError::OverlapsAppointment {
                    service: service_name.clone(),
                });
            }
        }
    }

    Ok(())
}

/// Resolve schedule and occupancy for the proposed write and run `evaluate`.
///
/// Callers mutating appointment rows must hold the state's booking lock so
/// this check-then-write is atomic against concurrent submissions.
pub async fn check(
    pool: &SqlitePool,
    proposed: &ProposedWrite,
    now: DateTime<Utc>,
    zone: FixedOffset,
) -> Result<(), BookingError> {
    let Some(staff_id) = proposed.staff_id.as_deref() else {
        return evaluate(proposed, &DaySchedule::Off, &[], now, zone).map_err(BookingError::from);
    };
    if proposed.cancelling() {
        return evaluate(proposed, &DaySchedule::Off, &[], now, zone).map_err(BookingError::from);
    }

    let date = local_date(proposed.starts_at, zone);
    let schedule = resolve_day_schedule(pool, staff_id, date, zone).await?;
    let (from, to) = day_bounds(date, zone);
    let occupied = collect_occupancy(pool, staff_id, from, to).await?;
    evaluate(proposed, &schedule, &occupied, now, zone).map_err(BookingError::from)
}

#[derive(Debug, Clone)]
pub enum BookingIdentity {
    Registered { user_id: String },
    Guest { name: String, phone: String },
}

#[derive(Debug, Clone)]
pub struct NewBooking {
    pub service_id: String,
    pub staff_id: String,
    pub starts_at: DateTime<Utc>,
    pub notes: Option<String>,
    pub identity: BookingIdentity,
}

/// Guard and insert a new booking; returns the appointment id.
pub async fn submit_booking(
    pool: &SqlitePool,
    booking: &NewBooking,
    now: DateTime<Utc>,
    zone: FixedOffset,
) -> Result<String, BookingError> {
    if let BookingIdentity::Guest { name, phone } = &booking.identity {
        if name.trim().is_empty() || phone.trim().is_empty() {
            return Err(BookingError::Validation(
                "name and phone are required to book as a guest".into(),
            ));
        }
    }

    let service: Option<ServiceRow> = sqlx::query_as(
        "SELECT id, name, category, duration_minutes, price, active, position
         FROM services WHERE id = ? AND active = 1",
    )
    .bind(&booking.service_id)
    .fetch_optional(pool)
    .await?;
    let Some(service) = service else {
        return Err(BookingError::Validation("unknown service".into()));
    };

    let proposed = ProposedWrite {
        exclude_id: None,
        staff_id: Some(booking.staff_id.clone()),
        starts_at: booking.starts_at,
        duration_minutes: service.duration_minutes,
        new_status: STATUS_PENDING.to_string(),
        old_status: None,
    };
    check(pool, &proposed, now, zone).await?;

    let id = new_id();
    let created_at = now.to_rfc3339();
    let starts_at = booking.starts_at.to_rfc3339();
    match &booking.identity {
        BookingIdentity::Registered { user_id } => {
            sqlx::query(
                r#"INSERT INTO appointments
                   (id, user_id, service_id, staff_id, starts_at, status, notes, created_at)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
            )
            .bind(&id)
            .bind(user_id)
            .bind(&booking.service_id)
            .bind(&booking.staff_id)
            .bind(&starts_at)
            .bind(STATUS_PENDING)
            .bind(&booking.notes)
            .bind(&created_at)
            .execute(pool)
            .await?;
        }
        BookingIdentity::Guest { name, phone } => {
            sqlx::query(
                r#"INSERT INTO guest_appointments
                   (id, client_name, client_phone, service_id, staff_id, starts_at, status, notes, created_at)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            )
            .bind(&id)
            .bind(name.trim())
            .bind(phone.trim())
            .bind(&booking.service_id)
            .bind(&booking.staff_id)
            .bind(&starts_at)
            .bind(STATUS_PENDING)
            .bind(&booking.notes)
            .bind(&created_at)
            .execute(pool)
            .await?;
        }
    }

    Ok(id)
}

#[derive(Debug, Clone)]
pub struct AppointmentUpdate {
    pub status: String,
    /// None detaches the appointment from any staff member.
    pub staff_id: Option<String>,
    /// None keeps the current start time.
    pub starts_at: Option<DateTime<Utc>>,
}

/// Guard and apply a status / reassignment / reschedule update.
pub async fn apply_update(
    pool: &SqlitePool,
    id: &str,
    is_guest: bool,
    update: &AppointmentUpdate,
    now: DateTime<Utc>,
    zone: FixedOffset,
) -> Result<(), BookingError> {
    let table = if is_guest { "guest_appointments" } else { "appointments" };

    let select = format!(
        "SELECT a.starts_at, a.status, s.duration_minutes
         FROM {table} a JOIN services s ON a.service_id = s.id
         WHERE a.id = ?"
    );
    let current: Option<(String, String, i64)> = sqlx::query_as(&select)
        .bind(id)
        .fetch_optional(pool)
        .await?;
    let Some((starts_at_text, old_status, duration_minutes)) = current else {
        return Err(BookingError::Validation("appointment not found".into()));
    };

    if update.status != old_status && !transition_allowed(&old_status, &update.status) {
        return Err(BookingError::Validation(format!(
            "cannot change status from {old_status} to {}",
            update.status
        )));
    }

    let current_start = parse_instant(&starts_at_text)
        .ok_or_else(|| BookingError::Infrastructure(starts_at_text.clone()))?;
    let target_start = update.starts_at.unwrap_or(current_start);

    let proposed = ProposedWrite {
        exclude_id: Some(id.to_string()),
        staff_id: update.staff_id.clone(),
        starts_at: target_start,
        duration_minutes,
        new_status: update.status.clone(),
        old_status: Some(old_status),
    };
    check(pool, &proposed, now, zone).await?;

    let apply = format!("UPDATE {table} SET status = ?, staff_id = ?, starts_at = ? WHERE id = ?");
    sqlx::query(&apply)
        .bind(&update.status)
        .bind(&update.staff_id)
        .bind(target_start.to_rfc3339())
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::testutil::*;
    use super::*;
    use crate::models::{STATUS_CONFIRMED, STATUS_NO_SHOW};

    fn proposed(start: DateTime<Utc>, minutes: i64) -> ProposedWrite {
        ProposedWrite {
            exclude_id: None,
            staff_id: Some("staff-1".into()),
            starts_at: start,
            duration_minutes: minutes,
            new_status: STATUS_PENDING.into(),
            old_status: None,
        }
    }

    fn booked(id: &str, start: DateTime<Utc>, minutes: i64) -> OccupiedInterval {
        OccupiedInterval {
            start,
            end: start + Duration::minutes(minutes),
            kind: OccupancyKind::Appointment {
                id: id.into(),
                service_name: "Corte".into(),
            },
        }
    }

    #[test]
    fn accepts_a_free_slot_inside_the_weekly_window() {
        let schedule = DaySchedule::Weekly(window(2026, 8, 6, 9, 0, 18, 0));
        let p = proposed(instant(2026, 8, 6, 10, 0), 60);
        assert_eq!(
            evaluate(&p, &schedule, &[], instant(2026, 8, 1, 9, 0), zone()),
            Ok(())
        );
    }

    #[test]
    fn rejects_past_starts_unless_cancelling_or_detaching() {
        let schedule = DaySchedule::Weekly(window(2026, 8, 6, 9, 0, 18, 0));
        let now = instant(2026, 8, 6, 12, 0);

        let p = proposed(instant(2026, 8, 6, 10, 0), 60);
        assert_eq!(
            evaluate(&p, &schedule, &[], now, zone()),
            Err(ConflictError::PastDate)
        );

        // Setting the status to cancelled is exempt.
        let mut cancelling = p.clone();
        cancelling.new_status = STATUS_CANCELLED.into();
        cancelling.old_status = Some(STATUS_PENDING.into());
        assert_eq!(evaluate(&cancelling, &schedule, &[], now, zone()), Ok(()));

        // So is detaching the staff member.
        let mut detaching = p.clone();
        detaching.staff_id = None;
        detaching.old_status = Some(STATUS_PENDING.into());
        assert_eq!(evaluate(&detaching, &schedule, &[], now, zone()), Ok(()));

        // A plain status change on a past appointment is not.
        let mut confirming = p.clone();
        confirming.new_status = STATUS_CONFIRMED.into();
        confirming.old_status = Some(STATUS_PENDING.into());
        assert_eq!(
            evaluate(&confirming, &schedule, &[], now, zone()),
            Err(ConflictError::PastDate)
        );

        let mut no_show = p;
        no_show.new_status = STATUS_NO_SHOW.into();
        no_show.old_status = Some(STATUS_CONFIRMED.into());
        assert_eq!(
            evaluate(&no_show, &schedule, &[], now, zone()),
            Err(ConflictError::PastDate)
        );
    }

    #[test]
    fn boundary_touch_with_existing_booking_is_not_a_conflict() {
        let schedule = DaySchedule::Weekly(window(2026, 8, 6, 9, 0, 18, 0));
        let occupied = [booked("other", instant(2026, 8, 6, 10, 0), 60)];
        let now = instant(2026, 8, 1, 9, 0);

        let at_eleven = proposed(instant(2026, 8, 6, 11, 0), 60);
        assert_eq!(evaluate(&at_eleven, &schedule, &occupied, now, zone()), Ok(()));

        let at_1059 = proposed(instant(2026, 8, 6, 10, 59), 60);
        assert_eq!(
            evaluate(&at_1059, &schedule, &occupied, now, zone()),
            Err(ConflictError::OverlapsAppointment {
                service: "Corte".into()
            })
        );
    }

    #[test]
    fn row_under_update_does_not_conflict_with_itself() {
        let schedule = DaySchedule::Weekly(window(2026, 8, 6, 9, 0, 18, 0));
        let occupied = [booked("self", instant(2026, 8, 6, 10, 0), 60)];
        let mut p = proposed(instant(2026, 8, 6, 10, 30), 60);
        p.exclude_id = Some("self".into());
        p.old_status = Some(STATUS_PENDING.into());
        p.new_status = STATUS_CONFIRMED.into();
        assert_eq!(
            evaluate(&p, &schedule, &occupied, instant(2026, 8, 1, 9, 0), zone()),
            Ok(())
        );
    }

    #[test]
    fn override_windows_require_full_containment() {
        let schedule = DaySchedule::Override(vec![
            window(2026, 8, 6, 9, 0, 11, 0),
            window(2026, 8, 6, 14, 0, 16, 0),
        ]);
        let now = instant(2026, 8, 1, 9, 0);

        assert_eq!(
            evaluate(&proposed(instant(2026, 8, 6, 9, 30), 60), &schedule, &[], now, zone()),
            Ok(())
        );
        // 10:30 + 60min spills past the 11:00 edge of the first window.
        assert_eq!(
            evaluate(&proposed(instant(2026, 8, 6, 10, 30), 60), &schedule, &[], now, zone()),
            Err(ConflictError::OutsideWorkingHours {
                windows: "09:00–11:00, 14:00–16:00".into()
            })
        );
    }

    #[test]
    fn blocked_window_rejects_even_inside_an_override_window() {
        let schedule = DaySchedule::Override(vec![window(2026, 8, 6, 9, 0, 13, 0)]);
        let occupied = [OccupiedInterval {
            start: instant(2026, 8, 6, 10, 0),
            end: instant(2026, 8, 6, 11, 0),
            kind: OccupancyKind::Block {
                reason: Some("equipment maintenance".into()),
            },
        }];
        assert_eq!(
            evaluate(
                &proposed(instant(2026, 8, 6, 10, 30), 60),
                &schedule,
                &occupied,
                instant(2026, 8, 1, 9, 0),
                zone()
            ),
            Err(ConflictError::Blocked {
                reason: Some("equipment maintenance".into())
            })
        );
    }

    #[test]
    fn off_day_is_its_own_rejection() {
        assert_eq!(
            evaluate(
                &proposed(instant(2026, 8, 6, 10, 0), 30),
                &DaySchedule::Off,
                &[],
                instant(2026, 8, 1, 9, 0),
                zone()
            ),
            Err(ConflictError::NoSchedule)
        );
    }

    #[test]
    fn block_outranks_the_overlap_message_when_both_apply() {
        let schedule = DaySchedule::Weekly(window(2026, 8, 6, 9, 0, 18, 0));
        let occupied = [
            booked("other", instant(2026, 8, 6, 10, 0), 60),
            OccupiedInterval {
                start: instant(2026, 8, 6, 10, 0),
                end: instant(2026, 8, 6, 11, 0),
                kind: OccupancyKind::Block { reason: None },
            },
        ];
        assert_eq!(
            evaluate(
                &proposed(instant(2026, 8, 6, 10, 0), 60),
                &schedule,
                &occupied,
                instant(2026, 8, 1, 9, 0),
                zone()
            ),
            Err(ConflictError::Blocked { reason: None })
        );
    }
}
