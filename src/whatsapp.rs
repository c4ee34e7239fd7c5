use std::env;

use serde_json::json;

use crate::state::AppState;

pub const TEMPLATE_BOOKING_RECEIVED: &str = "booking_received";
pub const TEMPLATE_BOOKING_CONFIRMED: &str = "booking_confirmed";
pub const TEMPLATE_BOOKING_CANCELLED: &str = "booking_cancelled";
pub const TEMPLATE_BOOKING_RESCHEDULED: &str = "booking_rescheduled";

#[derive(Clone, Debug)]
pub struct WhatsAppConfig {
    pub api_url: String,
    pub token: String,
    pub sender_phone_id: String,
}

impl WhatsAppConfig {
    pub fn from_env() -> Self {
        Self {
            api_url: env::var("WHATSAPP_API_URL").unwrap_or_default(),
            token: env::var("WHATSAPP_TOKEN").unwrap_or_default(),
            sender_phone_id: env::var("WHATSAPP_PHONE_ID").unwrap_or_default(),
        }
    }

    pub fn enabled(&self) -> bool {
        !(self.api_url.trim().is_empty() || self.token.trim().is_empty())
    }
}

/// Send a templated WhatsApp message after a committed booking change.
///
/// Notification delivery is fully decoupled from the booking decision: a
/// failure here is logged and the committed appointment stands.
pub async fn notify(state: &AppState, phone: &str, template: &str, params: &[&str]) {
    if !state.whatsapp.enabled() {
        return;
    }
    let phone = phone.trim();
    if phone.is_empty() {
        return;
    }

    if let Err(err) = send_template(&state.whatsapp, phone, template, params).await {
        log::warn!("WhatsApp send failed for template {template}: {err}");
    }
}

async fn send_template(
    config: &WhatsAppConfig,
    phone: &str,
    template: &str,
    params: &[&str],
) -> Result<(), reqwest::Error> {
    let parameters: Vec<_> = params
        .iter()
        .map(|value| json!({ "type": "text", "text": value }))
        .collect();

    let body = json!({
        "messaging_product": "whatsapp",
        "to": phone,
        "type": "template",
        "template": {
            "name": template,
            "language": { "code": "es" },
            "components": [{ "type": "body", "parameters": parameters }]
        }
    });

    let url = format!(
        "{}/{}/messages",
        config.api_url.trim_end_matches('/'),
        config.sender_phone_id
    );

    let client = reqwest::Client::new();
    client
        .post(url)
        .bearer_auth(&config.token)
        .json(&body)
        .send()
        .await?
        .error_for_status()?;
    Ok(())
}
