use actix_web::{http::header, web, HttpRequest, HttpResponse, Result};
use actix_web::http::header::Header;
use actix_web_httpauth::headers::authorization::{Authorization, Basic};
use askama::Template;
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::{
    auth::{
        authenticate_credentials, clear_logout_cookie, client_from_request, logout_cookie,
        AUTH_REALM,
    },
    availability::{
        day_bounds, format_local_hm, guard, local_to_utc, occupancy::collect_occupancy,
        schedule::resolve_day_schedule, slots::generate_slots, AvailabilityError, DaySchedule,
    },
    db::{fetch_appointment, log_activity},
    filters,
    models::{parse_time_of_day, GalleryPhotoRow, ServiceRow, ROLE_ADMIN, ROLE_STAFF},
    state::{AppState, ServerEvent},
    templates::render,
    whatsapp,
};

#[derive(Clone, Debug)]
struct StaffSummary {
    id: String,
    display_name: String,
    initials: String,
    selected: bool,
}

#[derive(Template)]
#[template(path = "home.html")]
struct HomeTemplate {
    services: Vec<ServiceRow>,
    staff: Vec<StaffSummary>,
    photos: Vec<GalleryPhotoRow>,
}

#[derive(Template)]
#[template(path = "gallery.html")]
struct GalleryTemplate {
    photos: Vec<GalleryPhotoRow>,
}

#[derive(Clone, Debug, Default)]
struct BookingView {
    client_name: String,
    client_phone: String,
    date: String,
    time: String,
    notes: String,
}

#[derive(Template)]
#[template(path = "book.html")]
struct BookingTemplate {
    services: Vec<ServiceRow>,
    staff: Vec<StaffSummary>,
    form: BookingView,
    errors: Vec<String>,
    selected_service: String,
    as_client: Option<String>,
}

#[derive(Template)]
#[template(path = "book_success.html")]
struct BookingSuccessTemplate {
    appointment_id: String,
    when_label: String,
}

#[derive(Template)]
#[template(path = "status.html")]
struct StatusTemplate {
    appointment_id: String,
    found: bool,
    client_name: String,
    service: String,
    when_label: String,
    status: String,
    staff_name: String,
}

#[derive(Deserialize)]
struct BookingForm {
    service_id: String,
    staff_id: String,
    date: String,
    time: String,
    client_name: Option<String>,
    client_phone: Option<String>,
    notes: Option<String>,
}

#[derive(Deserialize)]
struct AvailabilityQuery {
    staff_id: String,
    service_id: String,
    date: String,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/").route(web::get().to(home)))
        .service(web::resource("/gallery").route(web::get().to(gallery)))
        .service(
            web::resource("/book")
                .route(web::get().to(show_booking))
                .route(web::post().to(create_booking)),
        )
        .service(web::resource("/api/availability").route(web::get().to(availability)))
        .service(web::resource("/status/{id}").route(web::get().to(status_page)))
        .service(web::resource("/login").route(web::get().to(login)))
        .service(web::resource("/logout").route(web::get().to(logout)))
        .service(web::resource("/health").route(web::get().to(health)));
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().body("ok")
}

async fn logout(req: HttpRequest) -> HttpResponse {
    HttpResponse::SeeOther()
        .append_header((header::LOCATION, "/"))
        .cookie(logout_cookie(&req))
        .insert_header((header::CACHE_CONTROL, "no-store"))
        .finish()
}

#[derive(Deserialize)]
struct LoginQuery {
    next: Option<String>,
}

async fn login(
    state: web::Data<AppState>,
    req: HttpRequest,
    query: web::Query<LoginQuery>,
) -> HttpResponse {
    let auth = match Authorization::<Basic>::parse(&req) {
        Ok(auth) => auth,
        Err(_) => return auth_challenge(),
    };
    let credentials = auth.into_scheme();
    let username = credentials.user_id();
    let password = credentials.password().unwrap_or_default();

    let user = match authenticate_credentials(&state, username, password).await {
        Some(user) => user,
        None => return auth_challenge(),
    };

    let requested = query.next.as_deref().unwrap_or("");
    let requested = if requested.starts_with('/') { requested } else { "" };
    let fallback = match user.role.as_str() {
        ROLE_ADMIN => "/admin/dashboard",
        ROLE_STAFF => "/staff/dashboard",
        _ => "/book",
    };

    let redirect = match user.role.as_str() {
        ROLE_ADMIN if requested.starts_with("/admin") => requested,
        ROLE_STAFF if requested.starts_with("/staff") => requested,
        _ => fallback,
    };

    HttpResponse::SeeOther()
        .append_header((header::LOCATION, redirect))
        .cookie(clear_logout_cookie(&req))
        .insert_header((header::CACHE_CONTROL, "no-store"))
        .finish()
}

fn auth_challenge() -> HttpResponse {
    HttpResponse::Unauthorized()
        .insert_header((header::WWW_AUTHENTICATE, format!("Basic realm=\"{}\"", AUTH_REALM)))
        .insert_header((header::CACHE_CONTROL, "no-store"))
        .finish()
}

async fn home(state: web::Data<AppState>) -> Result<HttpResponse> {
    let services = fetch_services(&state).await.unwrap_or_default();
    let staff = fetch_staff(&state).await.unwrap_or_default();
    let photos = fetch_photos(&state, Some(6)).await.unwrap_or_default();

    Ok(render(HomeTemplate { services, staff, photos }))
}

async fn gallery(state: web::Data<AppState>) -> Result<HttpResponse> {
    let photos = fetch_photos(&state, None).await.unwrap_or_default();
    Ok(render(GalleryTemplate { photos }))
}

async fn show_booking(state: web::Data<AppState>, req: HttpRequest) -> Result<HttpResponse> {
    let services = fetch_services(&state).await.unwrap_or_default();
    let staff = fetch_staff(&state).await.unwrap_or_default();
    let as_client = client_from_request(&state, &req)
        .await
        .map(|user| user.display_name);

    Ok(render(BookingTemplate {
        services,
        staff,
        form: BookingView::default(),
        errors: Vec::new(),
        selected_service: String::new(),
        as_client,
    }))
}

/// The advisory read path: resolves the day schedule, collects occupancy
/// and returns the slot grid. A write can still lose the race and be
/// rejected by the guard, at which point the UI re-fetches this.
async fn availability(
    state: web::Data<AppState>,
    query: web::Query<AvailabilityQuery>,
) -> HttpResponse {
    let Ok(date) = NaiveDate::parse_from_str(&query.date, "%Y-%m-%d") else {
        return HttpResponse::BadRequest()
            .json(json!({ "error": "bad_date", "message": "date must be YYYY-MM-DD" }));
    };

    let duration: Option<(i64,)> =
        sqlx::query_as("SELECT duration_minutes FROM services WHERE id = ? AND active = 1")
            .bind(&query.service_id)
            .fetch_optional(&state.db)
            .await
            .unwrap_or(None);
    let Some((duration_minutes,)) = duration else {
        return HttpResponse::BadRequest()
            .json(json!({ "error": "bad_service", "message": "unknown service" }));
    };

    let zone = state.zone;
    let schedule = match resolve_day_schedule(&state.db, &query.staff_id, date, zone).await {
        Ok(schedule) => schedule,
        Err(err) => return availability_error(err),
    };
    if schedule == DaySchedule::Off {
        return HttpResponse::NotFound().json(json!({
            "error": "no_schedule",
            "message": "this professional does not work on the selected day",
        }));
    }

    let (from, to) = day_bounds(date, zone);
    let occupied = match collect_occupancy(&state.db, &query.staff_id, from, to).await {
        Ok(occupied) => occupied,
        Err(err) => return availability_error(err),
    };

    let now = Utc::now();
    let slots = generate_slots(schedule.windows(), &occupied, duration_minutes, now, zone);
    let windows: Vec<String> = schedule.windows().iter().map(|w| w.label(zone)).collect();

    HttpResponse::Ok().json(json!({
        "works_today": true,
        "windows": windows,
        "slots": slots,
    }))
}

fn availability_error(err: AvailabilityError) -> HttpResponse {
    match err {
        AvailabilityError::Infrastructure(e) => {
            log::error!("availability lookup failed: {e}");
            HttpResponse::ServiceUnavailable().json(json!({
                "error": "unavailable",
                "message": "could not verify availability, please try again",
            }))
        }
        AvailabilityError::BadRecord(value) => {
            log::error!("corrupt stored time value: {value}");
            HttpResponse::ServiceUnavailable().json(json!({
                "error": "unavailable",
                "message": "could not verify availability, please try again",
            }))
        }
    }
}

async fn create_booking(
    state: web::Data<AppState>,
    req: HttpRequest,
    form: web::Form<BookingForm>,
) -> Result<HttpResponse> {
    let form = form.into_inner();
    let client = client_from_request(&state, &req).await;

    let mut errors = Vec::new();
    if form.service_id.trim().is_empty() {
        errors.push("Please select a service.".to_string());
    }
    if form.staff_id.trim().is_empty() {
        errors.push("Please select a professional.".to_string());
    }
    let date = NaiveDate::parse_from_str(form.date.trim(), "%Y-%m-%d").ok();
    if date.is_none() {
        errors.push("Please pick a date.".to_string());
    }
    let time = parse_time_of_day(form.time.trim());
    if time.is_none() {
        errors.push("Please pick a time slot.".to_string());
    }
    if client.is_none() {
        if form.client_name.as_deref().unwrap_or("").trim().is_empty() {
            errors.push("Full name is required.".to_string());
        }
        if form.client_phone.as_deref().unwrap_or("").trim().is_empty() {
            errors.push("Phone number is required.".to_string());
        }
    }

    if !errors.is_empty() {
        return Ok(rerender_booking(&state, &req, form, errors).await);
    }

    // Checked non-empty above.
    let (Some(date), Some(time)) = (date, time) else {
        return Ok(rerender_booking(&state, &req, form, vec!["Please pick a date and time.".into()]).await);
    };
    let starts_at = local_to_utc(date.and_time(time), state.zone);

    let identity = match &client {
        Some(user) => guard::BookingIdentity::Registered { user_id: user.id.clone() },
        None => guard::BookingIdentity::Guest {
            name: form.client_name.clone().unwrap_or_default(),
            phone: form.client_phone.clone().unwrap_or_default(),
        },
    };

    let booking = guard::NewBooking {
        service_id: form.service_id.clone(),
        staff_id: form.staff_id.clone(),
        starts_at,
        notes: form.notes.clone().filter(|n| !n.trim().is_empty()),
        identity,
    };

    let submitted = {
        let _write = state.booking_lock.lock().await;
        guard::submit_booking(&state.db, &booking, Utc::now(), state.zone).await
    };

    let appointment_id = match submitted {
        Ok(id) => id,
        Err(err) => {
            return Ok(rerender_booking(&state, &req, form, vec![err.to_string()]).await);
        }
    };

    let client_label = client
        .as_ref()
        .map(|user| user.display_name.clone())
        .or_else(|| form.client_name.clone())
        .unwrap_or_default();
    log_activity(
        &state.db,
        "appointment_created",
        &format!("New appointment requested for {client_label}."),
        client.as_ref().map(|user| user.id.as_str()),
        Some(&appointment_id),
    )
    .await;

    let when_label = format!(
        "{} {}",
        date.format("%d %b %Y"),
        format_local_hm(starts_at, state.zone)
    );

    let phone = match &client {
        Some(user) => user.phone.clone().unwrap_or_default(),
        None => form.client_phone.clone().unwrap_or_default(),
    };
    whatsapp::notify(
        &state,
        &phone,
        whatsapp::TEMPLATE_BOOKING_RECEIVED,
        &[&client_label, &when_label],
    )
    .await;

    if let Some(row) = fetch_appointment(&state.db, &appointment_id).await {
        let _ = state
            .events
            .send(ServerEvent::from_row("appointment_created", row));
    }

    Ok(render(BookingSuccessTemplate {
        appointment_id,
        when_label,
    }))
}

async fn rerender_booking(
    state: &web::Data<AppState>,
    req: &HttpRequest,
    form: BookingForm,
    errors: Vec<String>,
) -> HttpResponse {
    let services = fetch_services(state).await.unwrap_or_default();
    let mut staff = fetch_staff(state).await.unwrap_or_default();
    for member in &mut staff {
        member.selected = member.id == form.staff_id;
    }
    let as_client = client_from_request(state, req)
        .await
        .map(|user| user.display_name);

    render(BookingTemplate {
        services,
        staff,
        form: BookingView {
            client_name: form.client_name.unwrap_or_default(),
            client_phone: form.client_phone.unwrap_or_default(),
            date: form.date,
            time: form.time,
            notes: form.notes.unwrap_or_default(),
        },
        errors,
        selected_service: form.service_id,
        as_client,
    })
}

async fn status_page(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let appointment_id = path.into_inner();
    let row = fetch_appointment(&state.db, &appointment_id).await;

    let template = match row {
        Some(row) => {
            let when_label = crate::models::parse_instant(&row.starts_at)
                .map(|instant| {
                    format!(
                        "{} {}",
                        instant.with_timezone(&state.zone).format("%d %b %Y"),
                        format_local_hm(instant, state.zone)
                    )
                })
                .unwrap_or_else(|| row.starts_at.clone());
            StatusTemplate {
                appointment_id,
                found: true,
                client_name: row.client_name,
                service: row.service_name,
                when_label,
                status: row.status,
                staff_name: row.staff_name.unwrap_or_else(|| "Unassigned".to_string()),
            }
        }
        None => StatusTemplate {
            appointment_id,
            found: false,
            client_name: String::new(),
            service: String::new(),
            when_label: String::new(),
            status: String::new(),
            staff_name: String::new(),
        },
    };

    Ok(render(template))
}

async fn fetch_services(state: &web::Data<AppState>) -> Result<Vec<ServiceRow>, sqlx::Error> {
    sqlx::query_as::<_, ServiceRow>(
        "SELECT id, name, category, duration_minutes, price, active, position
         FROM services WHERE active = 1 ORDER BY position, name",
    )
    .fetch_all(&state.db)
    .await
}

async fn fetch_staff(state: &web::Data<AppState>) -> Result<Vec<StaffSummary>, sqlx::Error> {
    let rows = sqlx::query_as::<_, (String, String)>(
        "SELECT id, display_name FROM users WHERE role = 'staff' AND active = 1 ORDER BY display_name",
    )
    .fetch_all(&state.db)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(id, display_name)| {
            let initials = display_name
                .split_whitespace()
                .filter_map(|part| part.chars().next())
                .take(2)
                .collect::<String>();
            StaffSummary {
                id,
                display_name,
                initials: initials.to_uppercase(),
                selected: false,
            }
        })
        .collect())
}

async fn fetch_photos(
    state: &web::Data<AppState>,
    limit: Option<i64>,
) -> Result<Vec<GalleryPhotoRow>, sqlx::Error> {
    match limit {
        Some(limit) => {
            sqlx::query_as::<_, GalleryPhotoRow>(
                "SELECT id, title, image_url, position FROM gallery_photos ORDER BY position, created_at LIMIT ?",
            )
            .bind(limit)
            .fetch_all(&state.db)
            .await
        }
        None => {
            sqlx::query_as::<_, GalleryPhotoRow>(
                "SELECT id, title, image_url, position FROM gallery_photos ORDER BY position, created_at",
            )
            .fetch_all(&state.db)
            .await
        }
    }
}
