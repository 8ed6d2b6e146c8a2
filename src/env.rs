use std::path::Path;

pub const PRODUCTION_PROFILE: &str = "production";

/// Files layered on top of the process environment, later ones winning.
pub fn env_files(profile: &str) -> [&'static str; 3] {
    let profile_file = if profile == PRODUCTION_PROFILE {
        "config/prod.env"
    } else {
        "config/dev.env"
    };

    ["config/common.env", profile_file, ".secrets.env"]
}

/// Loads every env file that exists and returns the ones that were read.
/// Runs before tracing is up, so the caller logs the result.
pub fn load_environment() -> Result<Vec<&'static str>, dotenvy::Error> {
    let profile = dotenvy::var("ROCKET_PROFILE").unwrap_or_else(|_| "development".to_string());

    let mut loaded = Vec::new();
    for path in env_files(&profile) {
        if load_env_file(path)? {
            loaded.push(path);
        }
    }

    Ok(loaded)
}

fn load_env_file(path: &str) -> Result<bool, dotenvy::Error> {
    if !Path::new(path).exists() {
        return Ok(false);
    }

    dotenvy::from_filename_override(path)?;
    Ok(true)
}
