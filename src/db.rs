use std::{env, fs, path::Path};

use chrono::Utc;
use sqlx::SqlitePool;

use crate::{
    auth::{hash_password, new_id},
    models::{AppointmentRow, ROLE_ADMIN, ROLE_STAFF, STATUS_CANCELLED, STATUS_CONFIRMED, STATUS_PENDING},
};

/// Appointments from both tables, joined with service and staff names.
/// Guest rows carry identity inline; registered rows take it from users.
const APPOINTMENT_UNION: &str = r#"
    SELECT a.id, u.display_name AS client_name, u.phone AS client_phone, a.service_id,
           s.name AS service_name, s.duration_minutes, a.staff_id, st.display_name AS staff_name,
           a.starts_at, a.status, a.notes, a.created_at, 0 AS is_guest
      FROM appointments a
      JOIN services s ON a.service_id = s.id
      JOIN users u ON a.user_id = u.id
      LEFT JOIN users st ON a.staff_id = st.id
     UNION ALL
    SELECT g.id, g.client_name, g.client_phone, g.service_id,
           s.name, s.duration_minutes, g.staff_id, st.display_name,
           g.starts_at, g.status, g.notes, g.created_at, 1
      FROM guest_appointments g
      JOIN services s ON g.service_id = s.id
      LEFT JOIN users st ON g.staff_id = st.id
"#;

pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

pub fn ensure_sqlite_dir(db_url: &str) -> std::io::Result<()> {
    let path = if let Some(path) = db_url.strip_prefix("sqlite://") {
        Some(path)
    } else if let Some(path) = db_url.strip_prefix("sqlite:") {
        Some(path)
    } else {
        None
    };

    let Some(path) = path else {
        return Ok(());
    };

    let path = path.split('?').next().unwrap_or(path);
    if path == ":memory:" || path.is_empty() {
        return Ok(());
    }

    let path = path.strip_prefix("file:").unwrap_or(path);
    let db_path = Path::new(path);
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

pub async fn seed_defaults(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    seed_admin(pool).await?;
    seed_services(pool).await?;
    seed_demo_staff(pool).await?;
    Ok(())
}

pub async fn log_activity(
    pool: &SqlitePool,
    kind: &str,
    message: &str,
    user_id: Option<&str>,
    appointment_id: Option<&str>,
) {
    let _ = sqlx::query(
        r#"INSERT INTO activities (id, kind, message, created_at, user_id, appointment_id)
           VALUES (?, ?, ?, ?, ?, ?)"#,
    )
    .bind(new_id())
    .bind(kind)
    .bind(message)
    .bind(Utc::now().to_rfc3339())
    .bind(user_id)
    .bind(appointment_id)
    .execute(pool)
    .await;
}

pub async fn fetch_appointment(pool: &SqlitePool, appointment_id: &str) -> Option<AppointmentRow> {
    let sql = format!("SELECT * FROM ({APPOINTMENT_UNION}) WHERE id = ? LIMIT 1");
    sqlx::query_as::<_, AppointmentRow>(&sql)
        .bind(appointment_id)
        .fetch_optional(pool)
        .await
        .unwrap_or(None)
}

pub async fn fetch_appointments(
    pool: &SqlitePool,
    status: Option<&str>,
) -> Result<Vec<AppointmentRow>, sqlx::Error> {
    match status {
        Some(status) => {
            let sql = format!(
                "SELECT * FROM ({APPOINTMENT_UNION}) WHERE status = ? ORDER BY starts_at DESC"
            );
            sqlx::query_as::<_, AppointmentRow>(&sql)
                .bind(status)
                .fetch_all(pool)
                .await
        }
        None => {
            let sql = format!("SELECT * FROM ({APPOINTMENT_UNION}) ORDER BY starts_at DESC");
            sqlx::query_as::<_, AppointmentRow>(&sql).fetch_all(pool).await
        }
    }
}

pub async fn fetch_staff_appointments(
    pool: &SqlitePool,
    staff_id: &str,
    limit: i64,
) -> Result<Vec<AppointmentRow>, sqlx::Error> {
    let sql = format!(
        "SELECT * FROM ({APPOINTMENT_UNION}) WHERE staff_id = ? ORDER BY starts_at DESC LIMIT ?"
    );
    sqlx::query_as::<_, AppointmentRow>(&sql)
        .bind(staff_id)
        .bind(limit)
        .fetch_all(pool)
        .await
}

/// Delete a staff member. Their open appointments are detached (staff_id
/// nulled) and forced to cancelled; historical rows keep their status but
/// lose the dangling staff reference. Appointment rows themselves survive.
pub async fn detach_and_delete_staff(
    pool: &SqlitePool,
    staff_id: &str,
) -> Result<u64, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let mut detached = 0;
    for table in ["appointments", "guest_appointments"] {
        let cancel = format!(
            "UPDATE {table} SET staff_id = NULL, status = ? WHERE staff_id = ? AND status IN (?, ?)"
        );
        detached += sqlx::query(&cancel)
            .bind(STATUS_CANCELLED)
            .bind(staff_id)
            .bind(STATUS_PENDING)
            .bind(STATUS_CONFIRMED)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let release = format!("UPDATE {table} SET staff_id = NULL WHERE staff_id = ?");
        sqlx::query(&release).bind(staff_id).execute(&mut *tx).await?;
    }

    sqlx::query("DELETE FROM staff_schedules WHERE staff_id = ?")
        .bind(staff_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM blocked_times WHERE staff_id = ?")
        .bind(staff_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(staff_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(detached)
}

async fn seed_admin(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let existing = sqlx::query_as::<_, (String,)>("SELECT id FROM users WHERE role = ? LIMIT 1")
        .bind(ROLE_ADMIN)
        .fetch_optional(pool)
        .await?;

    if existing.is_some() {
        return Ok(());
    }

    let username = env::var("ADMIN_USER").unwrap_or_else(|_| "admin".to_string());
    let password = env::var("ADMIN_PASSWORD").unwrap_or_else(|_| "admin".to_string());
    let display_name = env::var("ADMIN_DISPLAY_NAME").unwrap_or_else(|_| "Salon Admin".to_string());

    if password == "admin" {
        log::warn!("ADMIN_PASSWORD not set. Using default password 'admin'. Set ADMIN_PASSWORD in production.");
    }

    let password_hash = hash_password(&password)
        .map_err(|_| sqlx::Error::Protocol("password hash failed".into()))?;
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        r#"INSERT INTO users (id, username, display_name, role, password_hash, phone, active, created_at)
           VALUES (?, ?, ?, ?, ?, NULL, 1, ?)"#,
    )
    .bind(new_id())
    .bind(username)
    .bind(display_name)
    .bind(ROLE_ADMIN)
    .bind(password_hash)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}

async fn seed_services(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let existing = sqlx::query_as::<_, (String,)>("SELECT id FROM services LIMIT 1")
        .fetch_optional(pool)
        .await?;
    if existing.is_some() {
        return Ok(());
    }

    let catalog = [
        ("Corte de pelo", "Cabello", 45, "$ 900"),
        ("Peinado", "Cabello", 30, "$ 700"),
        ("Coloración", "Color", 90, "$ 2400"),
        ("Mechas", "Color", 120, "$ 3200"),
        ("Manicura", "Uñas", 60, "$ 800"),
    ];

    for (position, (name, category, duration, price)) in catalog.into_iter().enumerate() {
        sqlx::query(
            r#"INSERT INTO services (id, name, category, duration_minutes, price, active, position)
               VALUES (?, ?, ?, ?, ?, 1, ?)"#,
        )
        .bind(new_id())
        .bind(name)
        .bind(category)
        .bind(duration)
        .bind(price)
        .bind(position as i64)
        .execute(pool)
        .await?;
    }

    Ok(())
}

async fn seed_demo_staff(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    if env::var("SEED_STAFF").unwrap_or_else(|_| "false".to_string()) != "true" {
        return Ok(());
    }

    let existing = sqlx::query_as::<_, (String,)>("SELECT id FROM users WHERE role = ? LIMIT 1")
        .bind(ROLE_STAFF)
        .fetch_optional(pool)
        .await?;
    if existing.is_some() {
        return Ok(());
    }

    let username = env::var("STAFF_USER").unwrap_or_else(|_| "staff1".to_string());
    let password = env::var("STAFF_PASSWORD").unwrap_or_else(|_| "change-me".to_string());
    let display_name = env::var("STAFF_DISPLAY_NAME").unwrap_or_else(|_| "Staff One".to_string());
    if password == "change-me" {
        log::warn!("STAFF_PASSWORD not set. Using default password 'change-me'. Set STAFF_PASSWORD in production.");
    }

    let password_hash = hash_password(&password)
        .map_err(|_| sqlx::Error::Protocol("password hash failed".into()))?;
    let now = Utc::now().to_rfc3339();
    let staff_id = new_id();

    sqlx::query(
        r#"INSERT INTO users (id, username, display_name, role, password_hash, phone, active, created_at)
           VALUES (?, ?, ?, ?, ?, NULL, 1, ?)"#,
    )
    .bind(&staff_id)
    .bind(username)
    .bind(display_name)
    .bind(ROLE_STAFF)
    .bind(password_hash)
    .bind(now)
    .execute(pool)
    .await?;

    // Tuesday through Saturday, 09:00 to 18:00.
    for weekday in 2..=6 {
        sqlx::query(
            r#"INSERT INTO staff_schedules (id, staff_id, weekday, start_time, end_time)
               VALUES (?, ?, ?, '09:00', '18:00')"#,
        )
        .bind(new_id())
        .bind(&staff_id)
        .bind(weekday)
        .execute(pool)
        .await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::availability::guard::{
        apply_update, submit_booking, AppointmentUpdate, BookingError, BookingIdentity, NewBooking,
    };
    use crate::availability::occupancy::collect_occupancy;
    use crate::availability::schedule::resolve_day_schedule;
    use crate::availability::slots::{generate_slots, SlotReason};
    use crate::availability::testutil::{instant, zone};
    use crate::availability::{day_bounds, local_date, weekday_index, ConflictError, DaySchedule};
    use crate::models::STATUS_CONFIRMED;
    use chrono::{DateTime, Utc};
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        pool
    }

    async fn insert_staff(pool: &SqlitePool, name: &str) -> String {
        let id = new_id();
        sqlx::query(
            r#"INSERT INTO users (id, username, display_name, role, password_hash, phone, active, created_at)
               VALUES (?, ?, ?, 'staff', 'x', NULL, 1, ?)"#,
        )
        .bind(&id)
        .bind(name)
        .bind(name)
        .bind(Utc::now().to_rfc3339())
        .execute(pool)
        .await
        .unwrap();
        id
    }

    async fn insert_service(pool: &SqlitePool, name: &str, duration: i64) -> String {
        let id = new_id();
        sqlx::query(
            r#"INSERT INTO services (id, name, category, duration_minutes, price, active, position)
               VALUES (?, ?, '', ?, '', 1, 0)"#,
        )
        .bind(&id)
        .bind(name)
        .bind(duration)
        .execute(pool)
        .await
        .unwrap();
        id
    }

    async fn insert_weekly(pool: &SqlitePool, staff_id: &str, day: i64, from: &str, to: &str) {
        sqlx::query(
            "INSERT INTO staff_schedules (id, staff_id, weekday, start_time, end_time) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(new_id())
        .bind(staff_id)
        .bind(day)
        .bind(from)
        .bind(to)
        .execute(pool)
        .await
        .unwrap();
    }

    async fn insert_window(
        pool: &SqlitePool,
        staff_id: Option<&str>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        available: bool,
        reason: Option<&str>,
    ) {
        sqlx::query(
            r#"INSERT INTO blocked_times (id, staff_id, starts_at, ends_at, reason, is_available_slot, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(new_id())
        .bind(staff_id)
        .bind(start.to_rfc3339())
        .bind(end.to_rfc3339())
        .bind(reason)
        .bind(available as i64)
        .bind(Utc::now().to_rfc3339())
        .execute(pool)
        .await
        .unwrap();
    }

    fn guest(service_id: &str, staff_id: &str, starts_at: DateTime<Utc>) -> NewBooking {
        NewBooking {
            service_id: service_id.to_string(),
            staff_id: staff_id.to_string(),
            starts_at,
            notes: None,
            identity: BookingIdentity::Guest {
                name: "Ana Pereira".into(),
                phone: "+598 99 123 456".into(),
            },
        }
    }

    #[tokio::test]
    async fn overlapping_bookings_cannot_both_commit() {
        let pool = test_pool().await;
        let staff = insert_staff(&pool, "vale").await;
        let service = insert_service(&pool, "Corte de pelo", 60).await;
        let day = chrono::NaiveDate::from_ymd_opt(2030, 3, 5).unwrap();
        insert_weekly(&pool, &staff, weekday_index(day), "09:00", "18:00").await;

        let now = instant(2030, 3, 1, 9, 0);
        let first = submit_booking(&pool, &guest(&service, &staff, instant(2030, 3, 5, 10, 0)), now, zone()).await;
        assert!(first.is_ok());

        let overlap = submit_booking(&pool, &guest(&service, &staff, instant(2030, 3, 5, 10, 30)), now, zone()).await;
        assert!(matches!(
            overlap,
            Err(BookingError::Conflict(ConflictError::OverlapsAppointment { .. }))
        ));

        // Touching boundaries are not a conflict.
        let touching = submit_booking(&pool, &guest(&service, &staff, instant(2030, 3, 5, 11, 0)), now, zone()).await;
        assert!(touching.is_ok());
    }

    #[tokio::test]
    async fn override_windows_supersede_the_weekly_schedule() {
        let pool = test_pool().await;
        let staff = insert_staff(&pool, "vale").await;
        let day = chrono::NaiveDate::from_ymd_opt(2030, 3, 5).unwrap();
        insert_weekly(&pool, &staff, weekday_index(day), "09:00", "18:00").await;
        insert_window(&pool, Some(&staff), instant(2030, 3, 5, 14, 0), instant(2030, 3, 5, 16, 0), true, None).await;

        let schedule = resolve_day_schedule(&pool, &staff, day, zone()).await.unwrap();
        match &schedule {
            DaySchedule::Override(windows) => assert_eq!(windows.len(), 1),
            other => panic!("expected override schedule, got {other:?}"),
        }

        // The weekly 09:00 start is not offered once overrides exist.
        let slots = generate_slots(schedule.windows(), &[], 30, instant(2030, 3, 1, 9, 0), zone());
        assert_eq!(slots.first().map(|s| s.time.as_str()), Some("14:00"));
        assert!(slots.iter().all(|s| s.time.as_str() >= "14:00"));
    }

    #[tokio::test]
    async fn touching_override_windows_resolve_to_one_merged_window() {
        let pool = test_pool().await;
        let staff = insert_staff(&pool, "vale").await;
        let day = chrono::NaiveDate::from_ymd_opt(2030, 3, 5).unwrap();
        insert_window(&pool, Some(&staff), instant(2030, 3, 5, 9, 0), instant(2030, 3, 5, 11, 0), true, None).await;
        insert_window(&pool, Some(&staff), instant(2030, 3, 5, 11, 0), instant(2030, 3, 5, 13, 0), true, None).await;

        let schedule = resolve_day_schedule(&pool, &staff, day, zone()).await.unwrap();
        assert_eq!(
            schedule,
            DaySchedule::Override(vec![crate::availability::TimeWindow {
                start: instant(2030, 3, 5, 9, 0),
                end: instant(2030, 3, 5, 13, 0),
            }])
        );
    }

    #[tokio::test]
    async fn global_blocks_reject_bookings_for_every_staff_member() {
        let pool = test_pool().await;
        let staff = insert_staff(&pool, "vale").await;
        let service = insert_service(&pool, "Peinado", 30).await;
        let day = chrono::NaiveDate::from_ymd_opt(2030, 3, 5).unwrap();
        insert_weekly(&pool, &staff, weekday_index(day), "09:00", "18:00").await;
        insert_window(
            &pool,
            None,
            instant(2030, 3, 5, 12, 0),
            instant(2030, 3, 5, 13, 0),
            false,
            Some("feriado"),
        )
        .await;

        let now = instant(2030, 3, 1, 9, 0);
        let blocked = submit_booking(&pool, &guest(&service, &staff, instant(2030, 3, 5, 12, 30)), now, zone()).await;
        assert!(matches!(
            blocked,
            Err(BookingError::Conflict(ConflictError::Blocked { reason: Some(r) })) if r == "feriado"
        ));

        let slots_day = collect_occupancy(
            &pool,
            &staff,
            day_bounds(day, zone()).0,
            day_bounds(day, zone()).1,
        )
        .await
        .unwrap();
        assert_eq!(slots_day.len(), 1);
    }

    #[tokio::test]
    async fn slot_listing_and_guard_agree_on_the_same_day() {
        let pool = test_pool().await;
        let staff = insert_staff(&pool, "vale").await;
        let service = insert_service(&pool, "Corte de pelo", 60).await;
        let day = chrono::NaiveDate::from_ymd_opt(2030, 3, 5).unwrap();
        insert_weekly(&pool, &staff, weekday_index(day), "09:00", "12:00").await;

        let now = instant(2030, 3, 1, 9, 0);
        submit_booking(&pool, &guest(&service, &staff, instant(2030, 3, 5, 9, 0)), now, zone())
            .await
            .unwrap();

        let schedule = resolve_day_schedule(&pool, &staff, day, zone()).await.unwrap();
        let (from, to) = day_bounds(day, zone());
        let occupied = collect_occupancy(&pool, &staff, from, to).await.unwrap();
        let slots = generate_slots(schedule.windows(), &occupied, 60, now, zone());

        // 09:00 and 09:30 collide with the booking; 10:00 onward fits until
        // 11:00, the last start whose hour still ends inside the window.
        let times: Vec<_> = slots
            .iter()
            .filter(|s| s.available)
            .map(|s| s.time.as_str())
            .collect();
        assert_eq!(times, vec!["10:00", "10:30", "11:00"]);
        assert_eq!(
            slots.iter().find(|s| s.time == "09:30").and_then(|s| s.reason),
            Some(SlotReason::Occupied)
        );

        for slot in &slots {
            let result = submit_booking(&pool, &guest(&service, &staff, slot.starts_at), now, zone()).await;
            match (slot.available, result) {
                (true, Ok(id)) => {
                    // Roll back so the next candidate sees the original state.
                    sqlx::query("DELETE FROM guest_appointments WHERE id = ?")
                        .bind(&id)
                        .execute(&pool)
                        .await
                        .unwrap();
                }
                (false, Err(_)) => {}
                (available, result) => {
                    panic!("slot {} advertised {available} but guard said {result:?}", slot.time)
                }
            }
        }
    }

    #[tokio::test]
    async fn occupancy_errors_propagate_instead_of_reading_as_free() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        // No migrations: the tables are missing and the query must fail.
        let result = collect_occupancy(
            &pool,
            "staff-1",
            instant(2030, 3, 5, 0, 0),
            instant(2030, 3, 6, 0, 0),
        )
        .await;
        assert!(matches!(
            result,
            Err(crate::availability::AvailabilityError::Infrastructure(_))
        ));
    }

    #[tokio::test]
    async fn past_appointments_can_be_cancelled_but_not_confirmed() {
        let pool = test_pool().await;
        let staff = insert_staff(&pool, "vale").await;
        let service = insert_service(&pool, "Peinado", 30).await;
        let day = chrono::NaiveDate::from_ymd_opt(2030, 3, 5).unwrap();
        insert_weekly(&pool, &staff, weekday_index(day), "09:00", "18:00").await;

        let booked_at = instant(2030, 3, 5, 10, 0);
        let id = submit_booking(&pool, &guest(&service, &staff, booked_at), instant(2030, 3, 1, 9, 0), zone())
            .await
            .unwrap();

        // The appointment date has since passed.
        let later = instant(2030, 3, 9, 9, 0);

        let confirm = AppointmentUpdate {
            status: STATUS_CONFIRMED.into(),
            staff_id: Some(staff.clone()),
            starts_at: None,
        };
        assert!(matches!(
            apply_update(&pool, &id, true, &confirm, later, zone()).await,
            Err(BookingError::Conflict(ConflictError::PastDate))
        ));

        let cancel = AppointmentUpdate {
            status: STATUS_CANCELLED.into(),
            staff_id: Some(staff.clone()),
            starts_at: None,
        };
        apply_update(&pool, &id, true, &cancel, later, zone()).await.unwrap();

        let status: (String,) = sqlx::query_as("SELECT status FROM guest_appointments WHERE id = ?")
            .bind(&id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(status.0, STATUS_CANCELLED);
    }

    #[tokio::test]
    async fn deleting_staff_detaches_and_cancels_open_appointments() {
        let pool = test_pool().await;
        let staff = insert_staff(&pool, "vale").await;
        let service = insert_service(&pool, "Corte de pelo", 60).await;
        let day = chrono::NaiveDate::from_ymd_opt(2030, 3, 5).unwrap();
        insert_weekly(&pool, &staff, weekday_index(day), "09:00", "18:00").await;

        let now = instant(2030, 3, 1, 9, 0);
        let starts_at = instant(2030, 3, 5, 10, 0);
        let id = submit_booking(&pool, &guest(&service, &staff, starts_at), now, zone())
            .await
            .unwrap();

        let detached = detach_and_delete_staff(&pool, &staff).await.unwrap();
        assert_eq!(detached, 1);

        let row = fetch_appointment(&pool, &id).await.unwrap();
        assert_eq!(row.status, STATUS_CANCELLED);
        assert!(row.staff_id.is_none());

        let user: Option<(String,)> = sqlx::query_as("SELECT id FROM users WHERE id = ?")
            .bind(&staff)
            .fetch_optional(&pool)
            .await
            .unwrap();
        assert!(user.is_none());

        // The freed slot is bookable again for a replacement staff member.
        let replacement = insert_staff(&pool, "marta").await;
        insert_weekly(&pool, &replacement, weekday_index(local_date(starts_at, zone())), "09:00", "18:00").await;
        assert!(submit_booking(&pool, &guest(&service, &replacement, starts_at), now, zone())
            .await
            .is_ok());
    }
}
