mod auth;
mod availability;
mod db;
mod filters;
mod models;
mod routes;
mod state;
mod templates;
mod whatsapp;

use std::env;
use std::str::FromStr;
use std::sync::Arc;

use actix_files::Files;
use actix_web::{middleware, web, App, HttpServer};
use chrono::FixedOffset;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tokio::sync::{broadcast, Mutex};

use crate::state::AppState;
use crate::whatsapp::WhatsAppConfig;

/// America/Montevideo, the salon's zone, has sat at UTC-3 year round since
/// 2015. The offset stays configurable for deployments elsewhere.
const DEFAULT_UTC_OFFSET_MINUTES: i32 = -180;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    if let Err(err) = run().await {
        eprintln!("Startup error: {err}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .init();

    let db_url = env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://./data/salonbook.db".to_string());
    db::ensure_sqlite_dir(&db_url)?;

    let connect_options = SqliteConnectOptions::from_str(&db_url)?
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(connect_options)
        .await?;

    db::run_migrations(&pool).await?;
    db::seed_defaults(&pool).await?;

    let (events, _) = broadcast::channel(64);
    let state = AppState {
        db: pool.clone(),
        events,
        whatsapp: WhatsAppConfig::from_env(),
        zone: salon_zone(),
        booking_lock: Arc::new(Mutex::new(())),
    };

    if state.whatsapp.enabled() {
        log::info!("WhatsApp notifications enabled");
    } else {
        log::info!("WhatsApp notifications disabled (set WHATSAPP_API_URL and WHATSAPP_TOKEN)");
    }

    let port: u16 = env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8080);

    let address = format!("0.0.0.0:{port}");
    log::info!("Starting SalonBook on http://{address}");

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .wrap(middleware::Logger::default())
            .service(Files::new("/static", "./static").prefer_utf8(true))
            .configure(routes::public::configure)
            .configure(routes::admin::configure)
            .configure(routes::staff::configure)
            .configure(routes::events::configure)
    })
    .bind(address)?
    .run()
    .await?;

    Ok(())
}

fn salon_zone() -> FixedOffset {
    let minutes = env::var("SALON_UTC_OFFSET_MINUTES")
        .ok()
        .and_then(|value| value.parse::<i32>().ok())
        .unwrap_or(DEFAULT_UTC_OFFSET_MINUTES);

    FixedOffset::east_opt(minutes * 60).unwrap_or_else(|| {
        log::warn!("SALON_UTC_OFFSET_MINUTES={minutes} is out of range, falling back to UTC-3");
        FixedOffset::west_opt(3 * 3600).expect("UTC-3 is a valid offset")
    })
}
