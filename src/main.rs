#[macro_use]
extern crate rocket;

mod api;
mod auth;
mod config;
mod env;
mod error;
mod models;
mod repository;
mod state;
mod stats;
mod store;
mod telemetry;
#[cfg(test)]
mod test;
mod validation;
mod views;

use std::time::Duration;

use api::{
    api_create_marks, api_delete_marks, api_get_marks, api_get_student_marks, api_login,
    api_logout, api_register, api_session, api_session_events, api_update_marks, health,
};
use auth::{unauthorized, unauthorized_api};
use config::AppConfig;
use env::load_environment;
use error::AppError;
use rocket::{Build, Rocket};
use sqlx::sqlite::SqlitePoolOptions;
use state::Portal;
use telemetry::{TelemetryFairing, init_tracing, shutdown_telemetry};
use thiserror::Error;
use tracing::{error, info};
use views::{register_page, sign_in_page, student_page, teacher_page};

const SESSION_PURGE_INTERVAL: Duration = Duration::from_secs(3600);

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("{0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("Application error: {0}")]
    App(#[from] AppError),
    #[error("Launch failed: {0}")]
    Launch(String),
}

#[rocket::main]
async fn main() -> Result<(), Error> {
    let loaded = load_environment().map_err(|e| anyhow::anyhow!(e))?;

    let config = AppConfig::from_env();
    init_tracing(&config.profile).map_err(|e| anyhow::anyhow!(e))?;
    info!(files = ?loaded, "Loaded environment");

    if config.is_production() && dotenvy::var("ROCKET_SECRET_KEY").is_err() {
        return Err(Error::Launch(
            "ROCKET_SECRET_KEY must be set in production to sign session cookies".to_string(),
        ));
    }

    let pool = SqlitePoolOptions::new()
        .connect(&config.database_url)
        .await?;

    info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(AppError::from)?;
    info!("Migrations completed successfully");

    let portal = Portal::sqlite(pool, config);

    let identity = portal.identity.clone();
    tokio::spawn(async move {
        loop {
            match identity.purge_expired_sessions().await {
                Ok(count) if count > 0 => info!("Purged {} expired sessions", count),
                Ok(_) => {}
                Err(e) => error!("Failed to purge expired sessions: {}", e),
            }

            tokio::time::sleep(SESSION_PURGE_INTERVAL).await;
        }
    });

    let result = init_rocket(portal)
        .await
        .launch()
        .await
        .map(|_| ())
        .map_err(|e| Error::Launch(e.to_string()));

    shutdown_telemetry();
    result
}

pub async fn init_rocket(portal: Portal) -> Rocket<Build> {
    info!("Starting marks tracker");

    rocket::build()
        .manage(portal)
        .mount(
            "/api",
            routes![
                api_register,
                api_login,
                api_logout,
                api_session,
                api_session_events,
                api_create_marks,
                api_get_marks,
                api_update_marks,
                api_delete_marks,
                api_get_student_marks,
                health,
            ],
        )
        .register("/api", catchers![unauthorized_api])
        .mount(
            "/",
            routes![sign_in_page, register_page, teacher_page, student_page],
        )
        .register("/", catchers![unauthorized])
        .attach(TelemetryFairing)
}
