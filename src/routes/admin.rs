use actix_web::{http::header, middleware::from_fn, web, HttpResponse, Result};
use actix_web_httpauth::middleware::HttpAuthentication;
use askama::Template;
use chrono::{NaiveDate, Utc};
use serde::Deserialize;

use crate::{
    auth::{admin_validator, hash_password, logout_guard, new_id, AuthUser},
    availability::{format_local_hm, guard, local_to_utc},
    db::{detach_and_delete_staff, fetch_appointment, fetch_appointments, fetch_staff_appointments, log_activity},
    filters,
    models::{
        parse_instant, parse_time_of_day, ActivityRow, AppointmentRow, BlockedTimeRow,
        GalleryPhotoRow, ScheduleRow, ServiceRow, UserRow, ROLE_STAFF, STATUS_CANCELLED,
        STATUS_CONFIRMED, STATUS_NO_SHOW, STATUS_PENDING,
    },
    state::{AppState, ServerEvent},
    templates::{not_found, render},
    whatsapp,
};

const WEEKDAY_NAMES: [&str; 7] = [
    "Sunday", "Monday", "Tuesday", "Wednesday", "Thursday", "Friday", "Saturday",
];

#[derive(Clone, Debug)]
struct StatCard {
    label: String,
    value: i64,
}

#[derive(Clone, Debug)]
struct AppointmentView {
    id: String,
    client_name: String,
    client_phone: String,
    has_phone: bool,
    service: String,
    duration_minutes: i64,
    notes: String,
    has_notes: bool,
    when_label: String,
    status: String,
    staff_id: String,
    staff_name: String,
    is_guest: bool,
}

#[derive(Clone, Debug)]
struct ActivityView {
    message: String,
    created_at: String,
}

#[derive(Clone, Debug)]
struct StaffView {
    id: String,
    display_name: String,
    username: String,
    phone: String,
    active: bool,
    selected: bool,
}

#[derive(Clone, Debug)]
struct ScheduleView {
    weekday: i64,
    weekday_name: String,
    start_time: String,
    end_time: String,
}

#[derive(Clone, Debug)]
struct WindowView {
    id: String,
    day_label: String,
    time_label: String,
    reason: String,
    is_override: bool,
    global: bool,
}

#[derive(Clone, Debug)]
struct StatusOption {
    value: &'static str,
    selected: bool,
}

#[derive(Template)]
#[template(path = "admin_dashboard.html")]
struct AdminDashboardTemplate {
    admin_name: String,
    stats: Vec<StatCard>,
    upcoming: Vec<AppointmentView>,
    activities: Vec<ActivityView>,
}

#[derive(Template)]
#[template(path = "admin_appointments.html")]
struct AdminAppointmentsTemplate {
    appointments: Vec<AppointmentView>,
    status_filter: String,
}

#[derive(Template)]
#[template(path = "admin_appointment_detail.html")]
struct AdminAppointmentDetailTemplate {
    appointment: AppointmentView,
    staff: Vec<StaffView>,
    statuses: Vec<StatusOption>,
    errors: Vec<String>,
}

#[derive(Template)]
#[template(path = "admin_staff.html")]
struct AdminStaffTemplate {
    staff: Vec<StaffView>,
    errors: Vec<String>,
    success: String,
    has_success: bool,
}

#[derive(Template)]
#[template(path = "admin_staff_detail.html")]
struct AdminStaffDetailTemplate {
    member: StaffView,
    stats: Vec<StatCard>,
    schedule: Vec<ScheduleView>,
    windows: Vec<WindowView>,
    recent: Vec<AppointmentView>,
    errors: Vec<String>,
    weekday_names: Vec<(i64, String)>,
}

#[derive(Template)]
#[template(path = "admin_blocked.html")]
struct AdminBlockedTemplate {
    windows: Vec<WindowView>,
    errors: Vec<String>,
}

#[derive(Template)]
#[template(path = "admin_services.html")]
struct AdminServicesTemplate {
    services: Vec<ServiceRow>,
    errors: Vec<String>,
}

#[derive(Template)]
#[template(path = "admin_gallery.html")]
struct AdminGalleryTemplate {
    photos: Vec<GalleryPhotoRow>,
    errors: Vec<String>,
}

#[derive(Deserialize)]
struct AppointmentFilter {
    status: Option<String>,
}

#[derive(Deserialize)]
struct AppointmentUpdateForm {
    status: String,
    staff_id: Option<String>,
    date: Option<String>,
    time: Option<String>,
}

#[derive(Deserialize)]
struct StaffCreateForm {
    username: String,
    display_name: String,
    phone: Option<String>,
    password: String,
}

#[derive(Deserialize)]
struct ScheduleForm {
    weekday: i64,
    start_time: String,
    end_time: String,
}

#[derive(Deserialize)]
struct ScheduleDeleteForm {
    weekday: i64,
}

#[derive(Deserialize)]
struct WindowForm {
    date: String,
    start_time: String,
    end_time: String,
    kind: String,
    reason: Option<String>,
}

#[derive(Deserialize)]
struct GlobalBlockForm {
    date: String,
    start_time: String,
    end_time: String,
    reason: Option<String>,
}

#[derive(Deserialize)]
struct ServiceCreateForm {
    name: String,
    category: Option<String>,
    duration_minutes: i64,
    price: Option<String>,
}

#[derive(Deserialize)]
struct PhotoCreateForm {
    title: String,
    image_url: String,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/admin")
            .wrap(HttpAuthentication::basic(admin_validator))
            .wrap(from_fn(logout_guard))
            .service(web::resource("").route(web::get().to(index)))
            .service(web::resource("/").route(web::get().to(index)))
            .service(web::resource("/dashboard").route(web::get().to(dashboard)))
            .service(web::resource("/appointments").route(web::get().to(list_appointments)))
            .service(
                web::resource("/appointments/{id}")
                    .route(web::get().to(appointment_detail))
                    .route(web::post().to(update_appointment)),
            )
            .service(
                web::resource("/staff")
                    .route(web::get().to(list_staff))
                    .route(web::post().to(create_staff)),
            )
            .service(web::resource("/staff/{id}").route(web::get().to(staff_detail)))
            .service(web::resource("/staff/{id}/schedule").route(web::post().to(upsert_schedule)))
            .service(
                web::resource("/staff/{id}/schedule/delete")
                    .route(web::post().to(delete_schedule)),
            )
            .service(web::resource("/staff/{id}/windows").route(web::post().to(create_window)))
            .service(web::resource("/staff/{id}/delete").route(web::post().to(delete_staff)))
            .service(web::resource("/windows/{id}/delete").route(web::post().to(delete_window)))
            .service(
                web::resource("/blocked")
                    .route(web::get().to(list_blocked))
                    .route(web::post().to(create_global_block)),
            )
            .service(
                web::resource("/services")
                    .route(web::get().to(list_services))
                    .route(web::post().to(create_service)),
            )
            .service(web::resource("/services/{id}/toggle").route(web::post().to(toggle_service)))
            .service(
                web::resource("/gallery")
                    .route(web::get().to(gallery))
                    .route(web::post().to(create_photo)),
            )
            .service(web::resource("/gallery/{id}/delete").route(web::post().to(delete_photo))),
    );
}

async fn index() -> HttpResponse {
    HttpResponse::Found()
        .append_header((header::LOCATION, "/admin/dashboard"))
        .finish()
}

async fn dashboard(state: web::Data<AppState>, auth: web::ReqData<AuthUser>) -> Result<HttpResponse> {
    let stats = vec![
        StatCard {
            label: "Total appointments".to_string(),
            value: count_appointments(&state, None).await,
        },
        StatCard {
            label: "Pending review".to_string(),
            value: count_appointments(&state, Some(STATUS_PENDING)).await,
        },
        StatCard {
            label: "Confirmed".to_string(),
            value: count_appointments(&state, Some(STATUS_CONFIRMED)).await,
        },
        StatCard {
            label: "Cancelled".to_string(),
            value: count_appointments(&state, Some(STATUS_CANCELLED)).await,
        },
    ];

    let upcoming = fetch_appointments(&state.db, None)
        .await
        .unwrap_or_default()
        .into_iter()
        .take(6)
        .map(|row| to_view(&state, row))
        .collect();

    let activities = sqlx::query_as::<_, ActivityRow>(
        "SELECT message, created_at FROM activities ORDER BY created_at DESC LIMIT 10",
    )
    .fetch_all(&state.db)
    .await
    .unwrap_or_default()
    .into_iter()
    .map(|row| ActivityView {
        message: row.message,
        created_at: row.created_at,
    })
    .collect();

    Ok(render(AdminDashboardTemplate {
        admin_name: auth.display_name.clone(),
        stats,
        upcoming,
        activities,
    }))
}

async fn list_appointments(
    state: web::Data<AppState>,
    query: web::Query<AppointmentFilter>,
) -> Result<HttpResponse> {
    let status_filter = query.status.clone().unwrap_or_default();
    let status = (!status_filter.is_empty()).then_some(status_filter.as_str());
    let appointments = fetch_appointments(&state.db, status)
        .await
        .unwrap_or_default()
        .into_iter()
        .map(|row| to_view(&state, row))
        .collect();

    Ok(render(AdminAppointmentsTemplate {
        appointments,
        status_filter,
    }))
}

async fn appointment_detail(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let appointment_id = path.into_inner();
    match detail_template(&state, &appointment_id, Vec::new()).await {
        Some(template) => Ok(render(template)),
        None => Ok(not_found("Appointment not found")),
    }
}

async fn update_appointment(
    state: web::Data<AppState>,
    path: web::Path<String>,
    form: web::Form<AppointmentUpdateForm>,
    auth: web::ReqData<AuthUser>,
) -> Result<HttpResponse> {
    let appointment_id = path.into_inner();
    let form = form.into_inner();

    let Some(current) = fetch_appointment(&state.db, &appointment_id).await else {
        return Ok(not_found("Appointment not found"));
    };

    let staff_id = form
        .staff_id
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string);

    let date_input = form.date.as_deref().map(str::trim).unwrap_or("");
    let time_input = form.time.as_deref().map(str::trim).unwrap_or("");
    let starts_at = if date_input.is_empty() && time_input.is_empty() {
        None
    } else {
        let date = NaiveDate::parse_from_str(date_input, "%Y-%m-%d").ok();
        let time = parse_time_of_day(time_input);
        match (date, time) {
            (Some(date), Some(time)) => Some(local_to_utc(date.and_time(time), state.zone)),
            _ => {
                let template =
                    detail_template(&state, &appointment_id, vec!["Reschedule needs both a valid date and time.".into()])
                        .await;
                return Ok(template.map(render).unwrap_or_else(|| not_found("Appointment not found")));
            }
        }
    };

    let update = guard::AppointmentUpdate {
        status: form.status.clone(),
        staff_id,
        starts_at,
    };

    let applied = {
        let _write = state.booking_lock.lock().await;
        guard::apply_update(
            &state.db,
            &appointment_id,
            current.is_guest != 0,
            &update,
            Utc::now(),
            state.zone,
        )
        .await
    };

    if let Err(err) = applied {
        let template = detail_template(&state, &appointment_id, vec![err.to_string()]).await;
        return Ok(template.map(render).unwrap_or_else(|| not_found("Appointment not found")));
    }

    log_activity(
        &state.db,
        "appointment_updated",
        &format!("{} updated appointment {}.", auth.display_name, appointment_id),
        Some(&auth.id),
        Some(&appointment_id),
    )
    .await;

    if let Some(row) = fetch_appointment(&state.db, &appointment_id).await {
        notify_status_change(&state, &row, &current).await;
        let _ = state
            .events
            .send(ServerEvent::from_row("appointment_updated", row));
    }

    Ok(HttpResponse::SeeOther()
        .append_header((header::LOCATION, format!("/admin/appointments/{appointment_id}")))
        .finish())
}

async fn notify_status_change(state: &AppState, row: &AppointmentRow, before: &AppointmentRow) {
    let Some(phone) = row.client_phone.as_deref().filter(|p| !p.trim().is_empty()) else {
        return;
    };
    let when_label = when_label(state, &row.starts_at);

    if row.status != before.status {
        let template = match row.status.as_str() {
            STATUS_CONFIRMED => Some(whatsapp::TEMPLATE_BOOKING_CONFIRMED),
            STATUS_CANCELLED => Some(whatsapp::TEMPLATE_BOOKING_CANCELLED),
            _ => None,
        };
        if let Some(template) = template {
            whatsapp::notify(state, phone, template, &[&row.client_name, &when_label]).await;
            return;
        }
    }
    if row.starts_at != before.starts_at {
        whatsapp::notify(
            state,
            phone,
            whatsapp::TEMPLATE_BOOKING_RESCHEDULED,
            &[&row.client_name, &when_label],
        )
        .await;
    }
}

async fn list_staff(state: web::Data<AppState>) -> Result<HttpResponse> {
    let staff = fetch_staff_views(&state).await.unwrap_or_default();
    Ok(render(AdminStaffTemplate {
        staff,
        errors: Vec::new(),
        success: String::new(),
        has_success: false,
    }))
}

async fn create_staff(
    state: web::Data<AppState>,
    form: web::Form<StaffCreateForm>,
    auth: web::ReqData<AuthUser>,
) -> Result<HttpResponse> {
    let form = form.into_inner();
    let mut errors = Vec::new();
    if form.username.trim().is_empty() {
        errors.push("Username is required.".to_string());
    }
    if form.display_name.trim().is_empty() {
        errors.push("Display name is required.".to_string());
    }
    if form.password.trim().len() < 6 {
        errors.push("Password must be at least 6 characters.".to_string());
    }

    if !errors.is_empty() {
        let staff = fetch_staff_views(&state).await.unwrap_or_default();
        return Ok(render(AdminStaffTemplate {
            staff,
            errors,
            success: String::new(),
            has_success: false,
        }));
    }

    let password_hash = hash_password(&form.password)
        .map_err(|_| actix_web::error::ErrorInternalServerError("hash failure"))?;
    let now = Utc::now().to_rfc3339();

    let result = sqlx::query(
        r#"INSERT INTO users (id, username, display_name, role, password_hash, phone, active, created_at)
           VALUES (?, ?, ?, ?, ?, ?, 1, ?)"#,
    )
    .bind(new_id())
    .bind(form.username.trim())
    .bind(form.display_name.trim())
    .bind(ROLE_STAFF)
    .bind(password_hash)
    .bind(form.phone.as_deref().map(str::trim).filter(|p| !p.is_empty()))
    .bind(now)
    .execute(&state.db)
    .await;

    if let Err(err) = result {
        let staff = fetch_staff_views(&state).await.unwrap_or_default();
        return Ok(render(AdminStaffTemplate {
            staff,
            errors: vec![format!("Failed to create staff member: {err}")],
            success: String::new(),
            has_success: false,
        }));
    }

    log_activity(
        &state.db,
        "staff_created",
        &format!("{} created a new staff profile.", auth.display_name),
        Some(&auth.id),
        None,
    )
    .await;

    let staff = fetch_staff_views(&state).await.unwrap_or_default();
    Ok(render(AdminStaffTemplate {
        staff,
        errors: Vec::new(),
        success: "Staff member created successfully.".to_string(),
        has_success: true,
    }))
}

async fn staff_detail(state: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse> {
    let staff_id = path.into_inner();
    match staff_detail_template(&state, &staff_id, Vec::new()).await {
        Some(template) => Ok(render(template)),
        None => Ok(not_found("Staff member not found")),
    }
}

async fn upsert_schedule(
    state: web::Data<AppState>,
    path: web::Path<String>,
    form: web::Form<ScheduleForm>,
) -> Result<HttpResponse> {
    let staff_id = path.into_inner();
    let form = form.into_inner();

    let mut errors = Vec::new();
    if !(0..=6).contains(&form.weekday) {
        errors.push("Weekday must be between Sunday and Saturday.".to_string());
    }
    let start = parse_time_of_day(form.start_time.trim());
    let end = parse_time_of_day(form.end_time.trim());
    match (start, end) {
        (Some(start), Some(end)) if end <= start => {
            errors.push("End time must be after start time.".to_string());
        }
        (None, _) | (_, None) => errors.push("Times must look like 09:00.".to_string()),
        _ => {}
    }

    if !errors.is_empty() {
        let template = staff_detail_template(&state, &staff_id, errors).await;
        return Ok(template.map(render).unwrap_or_else(|| not_found("Staff member not found")));
    }

    sqlx::query(
        r#"INSERT INTO staff_schedules (id, staff_id, weekday, start_time, end_time)
           VALUES (?, ?, ?, ?, ?)
           ON CONFLICT(staff_id, weekday) DO UPDATE SET
             start_time = excluded.start_time,
             end_time = excluded.end_time"#,
    )
    .bind(new_id())
    .bind(&staff_id)
    .bind(form.weekday)
    .bind(form.start_time.trim())
    .bind(form.end_time.trim())
    .execute(&state.db)
    .await
    .map_err(actix_web::error::ErrorInternalServerError)?;

    Ok(redirect_to_staff(&staff_id))
}

async fn delete_schedule(
    state: web::Data<AppState>,
    path: web::Path<String>,
    form: web::Form<ScheduleDeleteForm>,
) -> Result<HttpResponse> {
    let staff_id = path.into_inner();
    sqlx::query("DELETE FROM staff_schedules WHERE staff_id = ? AND weekday = ?")
        .bind(&staff_id)
        .bind(form.weekday)
        .execute(&state.db)
        .await
        .map_err(actix_web::error::ErrorInternalServerError)?;

    Ok(redirect_to_staff(&staff_id))
}

async fn create_window(
    state: web::Data<AppState>,
    path: web::Path<String>,
    form: web::Form<WindowForm>,
) -> Result<HttpResponse> {
    let staff_id = path.into_inner();
    let form = form.into_inner();
    let is_override = form.kind == "override";

    match insert_window(&state, Some(staff_id.as_str()), &form.date, &form.start_time, &form.end_time, is_override, form.reason.as_deref()).await {
        Ok(()) => Ok(redirect_to_staff(&staff_id)),
        Err(message) => {
            let template = staff_detail_template(&state, &staff_id, vec![message]).await;
            Ok(template.map(render).unwrap_or_else(|| not_found("Staff member not found")))
        }
    }
}

async fn delete_window(state: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse> {
    let window_id = path.into_inner();
    let owner: Option<(Option<String>,)> =
        sqlx::query_as("SELECT staff_id FROM blocked_times WHERE id = ?")
            .bind(&window_id)
            .fetch_optional(&state.db)
            .await
            .unwrap_or(None);

    sqlx::query("DELETE FROM blocked_times WHERE id = ?")
        .bind(&window_id)
        .execute(&state.db)
        .await
        .map_err(actix_web::error::ErrorInternalServerError)?;

    let location = match owner.and_then(|(staff_id,)| staff_id) {
        Some(staff_id) => format!("/admin/staff/{staff_id}"),
        None => "/admin/blocked".to_string(),
    };
    Ok(HttpResponse::SeeOther()
        .append_header((header::LOCATION, location))
        .finish())
}

async fn delete_staff(
    state: web::Data<AppState>,
    path: web::Path<String>,
    auth: web::ReqData<AuthUser>,
) -> Result<HttpResponse> {
    let staff_id = path.into_inner();

    let member: Option<UserRow> = sqlx::query_as(
        "SELECT id, username, display_name, role, password_hash, phone, active, created_at
         FROM users WHERE id = ? AND role = ?",
    )
    .bind(&staff_id)
    .bind(ROLE_STAFF)
    .fetch_optional(&state.db)
    .await
    .unwrap_or(None);

    let Some(member) = member else {
        return Ok(not_found("Staff member not found"));
    };

    // Detachment and forced cancellation are exempt from the past-date
    // guard, so historical appointments survive this without conflict.
    let detached = {
        let _write = state.booking_lock.lock().await;
        detach_and_delete_staff(&state.db, &staff_id)
            .await
            .map_err(actix_web::error::ErrorInternalServerError)?
    };

    log_activity(
        &state.db,
        "staff_deleted",
        &format!(
            "{} removed {} ({} open appointments detached).",
            auth.display_name, member.display_name, detached
        ),
        Some(&auth.id),
        None,
    )
    .await;

    Ok(HttpResponse::SeeOther()
        .append_header((header::LOCATION, "/admin/staff"))
        .finish())
}

async fn list_blocked(state: web::Data<AppState>) -> Result<HttpResponse> {
    let windows = fetch_windows(&state, None).await.unwrap_or_default();
    Ok(render(AdminBlockedTemplate {
        windows,
        errors: Vec::new(),
    }))
}

async fn create_global_block(
    state: web::Data<AppState>,
    form: web::Form<GlobalBlockForm>,
) -> Result<HttpResponse> {
    let form = form.into_inner();
    match insert_window(&state, None, &form.date, &form.start_time, &form.end_time, false, form.reason.as_deref()).await {
        Ok(()) => Ok(HttpResponse::SeeOther()
            .append_header((header::LOCATION, "/admin/blocked"))
            .finish()),
        Err(message) => {
            let windows = fetch_windows(&state, None).await.unwrap_or_default();
            Ok(render(AdminBlockedTemplate {
                windows,
                errors: vec![message],
            }))
        }
    }
}

async fn list_services(state: web::Data<AppState>) -> Result<HttpResponse> {
    let services = fetch_all_services(&state).await.unwrap_or_default();
    Ok(render(AdminServicesTemplate {
        services,
        errors: Vec::new(),
    }))
}

async fn create_service(
    state: web::Data<AppState>,
    form: web::Form<ServiceCreateForm>,
) -> Result<HttpResponse> {
    let form = form.into_inner();
    let mut errors = Vec::new();
    if form.name.trim().is_empty() {
        errors.push("Service name is required.".to_string());
    }
    if form.duration_minutes <= 0 {
        errors.push("Duration must be a positive number of minutes.".to_string());
    }

    if !errors.is_empty() {
        let services = fetch_all_services(&state).await.unwrap_or_default();
        return Ok(render(AdminServicesTemplate { services, errors }));
    }

    let position: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(position), 0) + 1 FROM services")
        .fetch_one(&state.db)
        .await
        .unwrap_or(0);

    sqlx::query(
        r#"INSERT INTO services (id, name, category, duration_minutes, price, active, position)
           VALUES (?, ?, ?, ?, ?, 1, ?)"#,
    )
    .bind(new_id())
    .bind(form.name.trim())
    .bind(form.category.as_deref().unwrap_or("").trim())
    .bind(form.duration_minutes)
    .bind(form.price.as_deref().unwrap_or("").trim())
    .bind(position)
    .execute(&state.db)
    .await
    .map_err(actix_web::error::ErrorInternalServerError)?;

    Ok(HttpResponse::SeeOther()
        .append_header((header::LOCATION, "/admin/services"))
        .finish())
}

async fn toggle_service(state: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse> {
    let service_id = path.into_inner();
    sqlx::query("UPDATE services SET active = 1 - active WHERE id = ?")
        .bind(&service_id)
        .execute(&state.db)
        .await
        .map_err(actix_web::error::ErrorInternalServerError)?;

    Ok(HttpResponse::SeeOther()
        .append_header((header::LOCATION, "/admin/services"))
        .finish())
}

async fn gallery(state: web::Data<AppState>) -> Result<HttpResponse> {
    let photos = fetch_photos(&state).await.unwrap_or_default();
    Ok(render(AdminGalleryTemplate {
        photos,
        errors: Vec::new(),
    }))
}

async fn create_photo(
    state: web::Data<AppState>,
    form: web::Form<PhotoCreateForm>,
) -> Result<HttpResponse> {
    let form = form.into_inner();
    let mut errors = Vec::new();
    if form.title.trim().is_empty() {
        errors.push("Title is required.".to_string());
    }
    if !form.image_url.trim().starts_with("http") {
        errors.push("Image URL must be an http(s) link to the hosted image.".to_string());
    }

    if !errors.is_empty() {
        let photos = fetch_photos(&state).await.unwrap_or_default();
        return Ok(render(AdminGalleryTemplate { photos, errors }));
    }

    let position: i64 =
        sqlx::query_scalar("SELECT COALESCE(MAX(position), 0) + 1 FROM gallery_photos")
            .fetch_one(&state.db)
            .await
            .unwrap_or(0);

    sqlx::query(
        r#"INSERT INTO gallery_photos (id, title, image_url, position, created_at)
           VALUES (?, ?, ?, ?, ?)"#,
    )
    .bind(new_id())
    .bind(form.title.trim())
    .bind(form.image_url.trim())
    .bind(position)
    .bind(Utc::now().to_rfc3339())
    .execute(&state.db)
    .await
    .map_err(actix_web::error::ErrorInternalServerError)?;

    Ok(HttpResponse::SeeOther()
        .append_header((header::LOCATION, "/admin/gallery"))
        .finish())
}

async fn delete_photo(state: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse> {
    let photo_id = path.into_inner();
    sqlx::query("DELETE FROM gallery_photos WHERE id = ?")
        .bind(&photo_id)
        .execute(&state.db)
        .await
        .map_err(actix_web::error::ErrorInternalServerError)?;

    Ok(HttpResponse::SeeOther()
        .append_header((header::LOCATION, "/admin/gallery"))
        .finish())
}

fn redirect_to_staff(staff_id: &str) -> HttpResponse {
    HttpResponse::SeeOther()
        .append_header((header::LOCATION, format!("/admin/staff/{staff_id}")))
        .finish()
}

/// Shared insert for override and block windows. End must come after start;
/// that is the caller-fixable validation this form can fail.
async fn insert_window(
    state: &web::Data<AppState>,
    staff_id: Option<&str>,
    date: &str,
    start_time: &str,
    end_time: &str,
    is_override: bool,
    reason: Option<&str>,
) -> std::result::Result<(), String> {
    let date = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
        .map_err(|_| "Date must look like 2026-08-06.".to_string())?;
    let start = parse_time_of_day(start_time.trim()).ok_or_else(|| "Times must look like 09:00.".to_string())?;
    let end = parse_time_of_day(end_time.trim()).ok_or_else(|| "Times must look like 09:00.".to_string())?;
    if end <= start {
        return Err("End time must be after start time.".to_string());
    }

    let starts_at = local_to_utc(date.and_time(start), state.zone);
    let ends_at = local_to_utc(date.and_time(end), state.zone);

    sqlx::query(
        r#"INSERT INTO blocked_times (id, staff_id, starts_at, ends_at, reason, is_available_slot, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(new_id())
    .bind(staff_id)
    .bind(starts_at.to_rfc3339())
    .bind(ends_at.to_rfc3339())
    .bind(reason.map(str::trim).filter(|r| !r.is_empty()))
    .bind(is_override as i64)
    .bind(Utc::now().to_rfc3339())
    .execute(&state.db)
    .await
    .map_err(|err| format!("Could not save the window: {err}"))?;

    Ok(())
}

async fn detail_template(
    state: &web::Data<AppState>,
    appointment_id: &str,
    errors: Vec<String>,
) -> Option<AdminAppointmentDetailTemplate> {
    let row = fetch_appointment(&state.db, appointment_id).await?;
    let appointment = to_view(state, row);

    let mut staff = fetch_staff_views(state).await.unwrap_or_default();
    for member in &mut staff {
        member.selected = member.id == appointment.staff_id;
    }
    let statuses = vec![
        StatusOption {
            value: STATUS_PENDING,
            selected: appointment.status == STATUS_PENDING,
        },
        StatusOption {
            value: STATUS_CONFIRMED,
            selected: appointment.status == STATUS_CONFIRMED,
        },
        StatusOption {
            value: STATUS_CANCELLED,
            selected: appointment.status == STATUS_CANCELLED,
        },
        StatusOption {
            value: STATUS_NO_SHOW,
            selected: appointment.status == STATUS_NO_SHOW,
        },
    ];

    Some(AdminAppointmentDetailTemplate {
        appointment,
        staff,
        statuses,
        errors,
    })
}

async fn staff_detail_template(
    state: &web::Data<AppState>,
    staff_id: &str,
    errors: Vec<String>,
) -> Option<AdminStaffDetailTemplate> {
    let user: UserRow = sqlx::query_as(
        "SELECT id, username, display_name, role, password_hash, phone, active, created_at
         FROM users WHERE id = ? AND role = ?",
    )
    .bind(staff_id)
    .bind(ROLE_STAFF)
    .fetch_optional(&state.db)
    .await
    .unwrap_or(None)?;

    let member = StaffView {
        id: user.id,
        display_name: user.display_name,
        username: user.username,
        phone: user.phone.unwrap_or_default(),
        active: user.active == 1,
        selected: false,
    };

    let stats = vec![
        StatCard {
            label: "Total appointments".to_string(),
            value: count_staff_appointments(state, &member.id, None).await,
        },
        StatCard {
            label: "Pending".to_string(),
            value: count_staff_appointments(state, &member.id, Some(STATUS_PENDING)).await,
        },
        StatCard {
            label: "Confirmed".to_string(),
            value: count_staff_appointments(state, &member.id, Some(STATUS_CONFIRMED)).await,
        },
    ];

    let schedule = sqlx::query_as::<_, ScheduleRow>(
        "SELECT id, staff_id, weekday, start_time, end_time
         FROM staff_schedules WHERE staff_id = ? ORDER BY weekday",
    )
    .bind(&member.id)
    .fetch_all(&state.db)
    .await
    .unwrap_or_default()
    .into_iter()
    .map(|row| ScheduleView {
        weekday: row.weekday,
        weekday_name: weekday_name(row.weekday),
        start_time: row.start_time,
        end_time: row.end_time,
    })
    .collect();

    let windows = fetch_windows(state, Some(&member.id)).await.unwrap_or_default();

    let recent = fetch_staff_appointments(&state.db, &member.id, 8)
        .await
        .unwrap_or_default()
        .into_iter()
        .map(|row| to_view(state, row))
        .collect();

    Some(AdminStaffDetailTemplate {
        member,
        stats,
        schedule,
        windows,
        recent,
        errors,
        weekday_names: WEEKDAY_NAMES
            .iter()
            .enumerate()
            .map(|(i, name)| (i as i64, name.to_string()))
            .collect(),
    })
}

async fn fetch_staff_views(state: &web::Data<AppState>) -> Result<Vec<StaffView>, sqlx::Error> {
    let rows = sqlx::query_as::<_, UserRow>(
        "SELECT id, username, display_name, role, password_hash, phone, active, created_at
         FROM users WHERE role = ? ORDER BY display_name",
    )
    .bind(ROLE_STAFF)
    .fetch_all(&state.db)
    .await?;

    Ok(rows
        .into_iter()
        .map(|user| StaffView {
            id: user.id,
            username: user.username,
            display_name: user.display_name,
            phone: user.phone.unwrap_or_default(),
            active: user.active == 1,
            selected: false,
        })
        .collect())
}

async fn fetch_windows(
    state: &web::Data<AppState>,
    staff_id: Option<&str>,
) -> Result<Vec<WindowView>, sqlx::Error> {
    let rows = match staff_id {
        Some(staff_id) => {
            sqlx::query_as::<_, BlockedTimeRow>(
                "SELECT id, staff_id, starts_at, ends_at, reason, is_available_slot
                 FROM blocked_times WHERE staff_id = ? ORDER BY starts_at DESC",
            )
            .bind(staff_id)
            .fetch_all(&state.db)
            .await?
        }
        None => {
            sqlx::query_as::<_, BlockedTimeRow>(
                "SELECT id, staff_id, starts_at, ends_at, reason, is_available_slot
                 FROM blocked_times WHERE staff_id IS NULL ORDER BY starts_at DESC",
            )
            .fetch_all(&state.db)
            .await?
        }
    };

    Ok(rows
        .into_iter()
        .map(|row| {
            let global = row.staff_id.is_none();
            let (day_label, time_label) = match (parse_instant(&row.starts_at), parse_instant(&row.ends_at)) {
                (Some(start), Some(end)) => (
                    start.with_timezone(&state.zone).format("%d %b %Y").to_string(),
                    format!(
                        "{}–{}",
                        format_local_hm(start, state.zone),
                        format_local_hm(end, state.zone)
                    ),
                ),
                _ => (row.starts_at.clone(), row.ends_at.clone()),
            };
            WindowView {
                id: row.id,
                day_label,
                time_label,
                reason: row.reason.unwrap_or_default(),
                is_override: row.is_available_slot != 0,
                global,
            }
        })
        .collect())
}

async fn fetch_all_services(state: &web::Data<AppState>) -> Result<Vec<ServiceRow>, sqlx::Error> {
    sqlx::query_as::<_, ServiceRow>(
        "SELECT id, name, category, duration_minutes, price, active, position
         FROM services ORDER BY position, name",
    )
    .fetch_all(&state.db)
    .await
}

async fn fetch_photos(state: &web::Data<AppState>) -> Result<Vec<GalleryPhotoRow>, sqlx::Error> {
    sqlx::query_as::<_, GalleryPhotoRow>(
        "SELECT id, title, image_url, position FROM gallery_photos ORDER BY position, created_at",
    )
    .fetch_all(&state.db)
    .await
}

fn weekday_name(weekday: i64) -> String {
    WEEKDAY_NAMES
        .get(weekday as usize)
        .copied()
        .unwrap_or("?")
        .to_string()
}

fn when_label(state: &AppState, starts_at: &str) -> String {
    parse_instant(starts_at)
        .map(|instant| {
            format!(
                "{} {}",
                instant.with_timezone(&state.zone).format("%d %b %Y"),
                format_local_hm(instant, state.zone)
            )
        })
        .unwrap_or_else(|| starts_at.to_string())
}

fn to_view(state: &web::Data<AppState>, row: AppointmentRow) -> AppointmentView {
    let notes = row.notes.unwrap_or_default();
    let client_phone = row.client_phone.unwrap_or_default();
    AppointmentView {
        id: row.id,
        client_name: row.client_name,
        client_phone: client_phone.clone(),
        has_phone: !client_phone.trim().is_empty(),
        service: row.service_name,
        duration_minutes: row.duration_minutes,
        notes: notes.clone(),
        has_notes: !notes.trim().is_empty(),
        when_label: when_label(state, &row.starts_at),
        status: row.status,
        staff_id: row.staff_id.unwrap_or_default(),
        staff_name: row.staff_name.unwrap_or_else(|| "Unassigned".to_string()),
        is_guest: row.is_guest != 0,
    }
}

async fn count_appointments(state: &web::Data<AppState>, status: Option<&str>) -> i64 {
    let (a, g) = match status {
        Some(status) => (
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM appointments WHERE status = ?")
                .bind(status)
                .fetch_one(&state.db)
                .await
                .unwrap_or(0),
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM guest_appointments WHERE status = ?")
                .bind(status)
                .fetch_one(&state.db)
                .await
                .unwrap_or(0),
        ),
        None => (
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM appointments")
                .fetch_one(&state.db)
                .await
                .unwrap_or(0),
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM guest_appointments")
                .fetch_one(&state.db)
                .await
                .unwrap_or(0),
        ),
    };
    a + g
}

async fn count_staff_appointments(
    state: &web::Data<AppState>,
    staff_id: &str,
    status: Option<&str>,
) -> i64 {
    let (a, g) = match status {
        Some(status) => (
            sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM appointments WHERE staff_id = ? AND status = ?",
            )
            .bind(staff_id)
            .bind(status)
            .fetch_one(&state.db)
            .await
            .unwrap_or(0),
            sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM guest_appointments WHERE staff_id = ? AND status = ?",
            )
            .bind(staff_id)
            .bind(status)
            .fetch_one(&state.db)
            .await
            .unwrap_or(0),
        ),
        None => (
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM appointments WHERE staff_id = ?")
                .bind(staff_id)
                .fetch_one(&state.db)
                .await
                .unwrap_or(0),
            sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM guest_appointments WHERE staff_id = ?",
            )
            .bind(staff_id)
            .fetch_one(&state.db)
            .await
            .unwrap_or(0),
        ),
    };
    a + g
}
