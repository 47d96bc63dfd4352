#[macro_use]
extern crate rocket;

mod access;
mod achievements;
mod aggregator;
mod api;
mod auth;
mod config;
mod database;
mod db;
mod env;
mod error;
mod models;
mod spreadsheet;
mod telemetry;
mod validation;
#[cfg(test)]
mod test;

use auth::{Role, forbidden_api, unauthorized_api};
use config::GradingConfig;
use db::{clean_expired_sessions, create_user, find_user_by_username};
use error::AppError;
use rocket::{Build, Rocket, tokio};
use sqlx::SqlitePool;
use telemetry::{TelemetryFairing, init_tracing};
use thiserror::Error;
use tracing::{error, info, warn};

const DEFAULT_DATABASE_URL: &str = "sqlite://subject_sculptor.db?mode=rwc";
const SESSION_CLEANUP_INTERVAL_SECS: u64 = 3600;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Figment(#[from] rocket::figment::Error),
    #[error("{0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("Application error: {0}")]
    App(#[from] AppError),
}

#[launch]
async fn rocket() -> Rocket<Build> {
    // The subscriber reads RUST_LOG and the exporter settings, so the env
    // files have to be applied first
    let environment = env::load_environment();
    init_tracing();

    match environment {
        Ok(report) => report.log(),
        Err(e) => {
            error!("Failed to load environment: {}", e);
            std::process::exit(1);
        }
    }

    match setup().await {
        Ok(rocket) => rocket,
        Err(e) => {
            error!("Failed to start subject sculptor: {}", e);
            std::process::exit(1);
        }
    }
}

async fn setup() -> Result<Rocket<Build>, Error> {
    let database_url =
        dotenvy::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());
    let pool = SqlitePool::connect(&database_url).await?;

    database::apply_schema(&pool).await?;
    seed_admin(&pool).await?;

    let pool_clone = pool.clone();
    tokio::spawn(async move {
        tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;

        loop {
            match clean_expired_sessions(&pool_clone).await {
                Ok(count) => {
                    if count > 0 {
                        info!("Cleaned up {} expired sessions", count);
                    }
                }
                Err(e) => {
                    error!("Failed to clean expired sessions: {}", e);
                }
            }

            tokio::time::sleep(tokio::time::Duration::from_secs(SESSION_CLEANUP_INTERVAL_SECS))
                .await;
        }
    });

    init_rocket(pool).await
}

async fn seed_admin(pool: &SqlitePool) -> Result<(), AppError> {
    let Some((username, password)) = env::admin_seed() else {
        return Ok(());
    };

    if find_user_by_username(pool, &username).await?.is_some() {
        return Ok(());
    }

    warn!(username = %username, "Creating admin account from environment");
    create_user(pool, &username, &password, Role::Admin, None).await?;
    Ok(())
}

pub async fn init_rocket(pool: SqlitePool) -> Result<Rocket<Build>, Error> {
    info!("Starting subject sculptor");

    let rocket = rocket::build();
    let grading = GradingConfig::from_figment(rocket.figment())?;
    info!(
        written_weight = grading.default_written_weight,
        grade_level = grading.default_grade_level,
        "Loaded grading defaults"
    );

    Ok(rocket
        .manage(pool)
        .manage(grading)
        .mount("/api", api::routes())
        .register("/api", catchers![unauthorized_api, forbidden_api])
        .attach(TelemetryFairing))
}
