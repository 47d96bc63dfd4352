use std::path::Path;

use anyhow::Context;
use tracing::{info, warn};

/// Which environment files were applied and which were absent. Loading runs
/// before the subscriber exists, so the outcome is logged afterwards.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct EnvReport {
    pub loaded: Vec<String>,
    pub missing: Vec<String>,
}

impl EnvReport {
    pub fn log(&self) {
        for path in &self.loaded {
            info!("Loaded environment from: {}", path);
        }
        for path in &self.missing {
            warn!("Environment file {} not found, skipping", path);
        }
    }
}

fn env_files() -> Vec<&'static str> {
    let is_production =
        dotenvy::var("ROCKET_PROFILE").unwrap_or("development".to_string()) == "production";

    if is_production {
        vec!["config/common.env", "config/prod.env", ".secrets.env"]
    } else {
        vec!["config/common.env", "config/dev.env", ".secrets.env"]
    }
}

pub fn load_environment() -> anyhow::Result<EnvReport> {
    load_env_files(&env_files())
}

/// Applies the files in order; later files override earlier ones.
pub fn load_env_files<P: AsRef<Path>>(paths: &[P]) -> anyhow::Result<EnvReport> {
    let mut report = EnvReport::default();

    for path in paths {
        let path = path.as_ref();
        let display = path.display().to_string();
        if !path.exists() {
            report.missing.push(display);
            continue;
        }

        dotenvy::from_filename_override(path)
            .with_context(|| format!("Failed to load environment file {}", display))?;
        report.loaded.push(display);
    }

    Ok(report)
}

/// Credentials for an admin account created on launch when none exists.
pub fn admin_seed() -> Option<(String, String)> {
    let username = dotenvy::var("ADMIN_USERNAME").ok()?;
    let password = dotenvy::var("ADMIN_PASSWORD").ok()?;
    if username.trim().is_empty() || password.is_empty() {
        return None;
    }
    Some((username, password))
}
