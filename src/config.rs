use std::fmt::Display;
use std::str::FromStr;

use tracing::{info, warn};

use crate::env::PRODUCTION_PROFILE;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://marks.db?mode=rwc";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub session_ttl_hours: i64,
    pub bcrypt_cost: u32,
    pub profile: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            database_url: try_load("DATABASE_URL", DEFAULT_DATABASE_URL.to_string()),
            session_ttl_hours: try_load("SESSION_TTL_HOURS", 1),
            bcrypt_cost: try_load("BCRYPT_COST", bcrypt::DEFAULT_COST),
            profile: try_load("ROCKET_PROFILE", "development".to_string()),
        }
    }

    pub fn is_production(&self) -> bool {
        self.profile == PRODUCTION_PROFILE
    }
}

fn try_load<T>(key: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    match dotenvy::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|e| {
            warn!("Invalid {key} value {raw:?}: {e}, using default: {default}");
            default
        }),
        Err(_) => {
            info!("{key} not set, using default: {default}");
            default
        }
    }
}
