use actix_web::{http::header, middleware::from_fn, web, HttpResponse, Result};
use actix_web_httpauth::middleware::HttpAuthentication;
use askama::Template;
use chrono::Utc;
use serde::Deserialize;

use crate::{
    auth::{logout_guard, staff_validator, AuthUser},
    availability::{format_local_hm, guard},
    db::{fetch_appointment, fetch_staff_appointments, log_activity},
    filters,
    models::{
        parse_instant, AppointmentRow, STATUS_CANCELLED, STATUS_CONFIRMED, STATUS_NO_SHOW,
        STATUS_PENDING,
    },
    state::{AppState, ServerEvent},
    templates::render,
    whatsapp,
};

#[derive(Clone, Debug)]
struct AppointmentView {
    id: String,
    client_name: String,
    client_phone: String,
    has_phone: bool,
    service: String,
    notes: String,
    has_notes: bool,
    when_label: String,
    status: String,
}

#[derive(Clone, Debug)]
struct StatCard {
    label: String,
    value: i64,
}

#[derive(Template)]
#[template(path = "staff_dashboard.html")]
struct StaffDashboardTemplate {
    staff_name: String,
    stats: Vec<StatCard>,
    upcoming: Vec<AppointmentView>,
}

#[derive(Template)]
#[template(path = "staff_appointments.html")]
struct StaffAppointmentsTemplate {
    appointments: Vec<AppointmentView>,
}

#[derive(Deserialize)]
struct AppointmentStatusForm {
    status: String,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/staff")
            .wrap(HttpAuthentication::basic(staff_validator))
            .wrap(from_fn(logout_guard))
            .service(web::resource("").route(web::get().to(index)))
            .service(web::resource("/").route(web::get().to(index)))
            .service(web::resource("/dashboard").route(web::get().to(dashboard)))
            .service(web::resource("/appointments").route(web::get().to(list_appointments)))
            .service(
                web::resource("/appointments/{id}/status").route(web::post().to(update_status)),
            ),
    );
}

async fn index() -> HttpResponse {
    HttpResponse::Found()
        .append_header((header::LOCATION, "/staff/dashboard"))
        .finish()
}

async fn dashboard(state: web::Data<AppState>, auth: web::ReqData<AuthUser>) -> Result<HttpResponse> {
    let stats = vec![
        StatCard {
            label: "Total appointments".to_string(),
            value: count(&state, &auth.id, None).await,
        },
        StatCard {
            label: "Pending".to_string(),
            value: count(&state, &auth.id, Some(STATUS_PENDING)).await,
        },
        StatCard {
            label: "Confirmed".to_string(),
            value: count(&state, &auth.id, Some(STATUS_CONFIRMED)).await,
        },
        StatCard {
            label: "No shows".to_string(),
            value: count(&state, &auth.id, Some(STATUS_NO_SHOW)).await,
        },
    ];

    let upcoming = fetch_staff_appointments(&state.db, &auth.id, 8)
        .await
        .unwrap_or_default()
        .into_iter()
        .map(|row| to_view(&state, row))
        .collect();

    Ok(render(StaffDashboardTemplate {
        staff_name: auth.display_name.clone(),
        stats,
        upcoming,
    }))
}

async fn list_appointments(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
) -> Result<HttpResponse> {
    let appointments = fetch_staff_appointments(&state.db, &auth.id, 200)
        .await
        .unwrap_or_default()
        .into_iter()
        .map(|row| to_view(&state, row))
        .collect();

    Ok(render(StaffAppointmentsTemplate { appointments }))
}

async fn update_status(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
    form: web::Form<AppointmentStatusForm>,
) -> Result<HttpResponse> {
    let appointment_id = path.into_inner();
    let status = form.into_inner().status;
    let allowed = [STATUS_CONFIRMED, STATUS_CANCELLED, STATUS_NO_SHOW];
    if !allowed.contains(&status.as_str()) {
        return Ok(HttpResponse::BadRequest().body("Invalid status"));
    }

    let Some(current) = fetch_appointment(&state.db, &appointment_id).await else {
        return Ok(HttpResponse::NotFound().body("Appointment not found"));
    };
    if current.staff_id.as_deref() != Some(auth.id.as_str()) {
        return Ok(HttpResponse::Forbidden().body("Not allowed"));
    }

    let update = guard::AppointmentUpdate {
        status: status.clone(),
        staff_id: current.staff_id.clone(),
        starts_at: None,
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
        return Ok(HttpResponse::UnprocessableEntity().body(err.to_string()));
    }

    log_activity(
        &state.db,
        "staff_status_update",
        &format!("{} updated appointment {} to {}.", auth.display_name, appointment_id, status),
        Some(&auth.id),
        Some(&appointment_id),
    )
    .await;

    if let Some(row) = fetch_appointment(&state.db, &appointment_id).await {
        if let Some(phone) = row.client_phone.as_deref().filter(|p| !p.trim().is_empty()) {
            let template = match status.as_str() {
                STATUS_CONFIRMED => Some(whatsapp::TEMPLATE_BOOKING_CONFIRMED),
                STATUS_CANCELLED => Some(whatsapp::TEMPLATE_BOOKING_CANCELLED),
                _ => None,
            };
            if let Some(template) = template {
                let when = when_label(&state, &row.starts_at);
                whatsapp::notify(&state, phone, template, &[&row.client_name, &when]).await;
            }
        }
        let _ = state
            .events
            .send(ServerEvent::from_row("appointment_updated", row));
    }

    Ok(HttpResponse::SeeOther()
        .append_header((header::LOCATION, "/staff/appointments"))
        .finish())
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

fn to_view(state: &AppState, row: AppointmentRow) -> AppointmentView {
    let notes = row.notes.unwrap_or_default();
    let client_phone = row.client_phone.unwrap_or_default();
    AppointmentView {
        id: row.id,
        client_name: row.client_name,
        client_phone: client_phone.clone(),
        has_phone: !client_phone.trim().is_empty(),
        service: row.service_name,
        notes: notes.clone(),
        has_notes: !notes.trim().is_empty(),
        when_label: when_label(state, &row.starts_at),
        status: row.status,
    }
}

async fn count(state: &AppState, staff_id: &str, status: Option<&str>) -> i64 {
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
