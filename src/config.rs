use rocket::figment::Figment;
use serde::Deserialize;
use tracing::warn;

use crate::models::{DEFAULT_GRADE_LEVEL, DEFAULT_WRITTEN_WEIGHT};
use crate::spreadsheet::ImportDefaults;

/// The `[grading]` table of the Rocket configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GradingConfig {
    pub default_written_weight: u8,
    pub default_grade_level: i64,
}

impl Default for GradingConfig {
    fn default() -> Self {
        Self {
            default_written_weight: DEFAULT_WRITTEN_WEIGHT,
            default_grade_level: DEFAULT_GRADE_LEVEL,
        }
    }
}

impl GradingConfig {
    pub fn from_figment(figment: &Figment) -> Result<Self, rocket::figment::Error> {
        if !figment.contains("grading") {
            return Ok(Self::default());
        }

        let mut config: GradingConfig = figment.extract_inner("grading")?;
        if !matches!(config.default_written_weight, 1 | 2) {
            warn!(
                configured = config.default_written_weight,
                "Written weight must be 1 or 2, using the default"
            );
            config.default_written_weight = DEFAULT_WRITTEN_WEIGHT;
        }
        Ok(config)
    }

    pub fn import_defaults(&self) -> ImportDefaults {
        ImportDefaults {
            written_weight: self.default_written_weight,
            grade_level: self.default_grade_level,
        }
    }
}
