use std::sync::Arc;

use chrono::FixedOffset;
use serde::Serialize;
use sqlx::SqlitePool;
use tokio::sync::{broadcast, Mutex};

use crate::models::AppointmentRow;
use crate::whatsapp::WhatsAppConfig;

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub events: broadcast::Sender<ServerEvent>,
    pub whatsapp: WhatsAppConfig,
    /// Salon-local zone, threaded into all schedule and slot computation.
    pub zone: FixedOffset,
    /// Serializes every guarded appointment write; held across the guard's
    /// check and the insert/update so concurrent submissions cannot both
    /// pass against the same committed rows.
    pub booking_lock: Arc<Mutex<()>>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ServerEvent {
    pub kind: String,
    pub appointment_id: Option<String>,
    pub status: Option<String>,
    pub client_name: Option<String>,
    pub client_phone: Option<String>,
    pub service: Option<String>,
    pub starts_at: Option<String>,
    pub staff_name: Option<String>,
    pub staff_id: Option<String>,
    pub is_guest: Option<bool>,
}

impl ServerEvent {
    pub fn from_row(kind: &str, row: AppointmentRow) -> Self {
        Self {
            kind: kind.to_string(),
            appointment_id: Some(row.id),
            status: Some(row.status),
            client_name: Some(row.client_name),
            client_phone: row.client_phone,
            service: Some(row.service_name),
            starts_at: Some(row.starts_at),
            staff_name: row.staff_name,
            staff_id: row.staff_id,
            is_guest: Some(row.is_guest != 0),
        }
    }
}
