use std::fs;

use serde::Deserialize;

/// Tunables that apply regardless of how the pipeline is invoked. CLI
/// flags layer on top of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub tolerance: i32,
    pub confidence_threshold: u8,
    pub parallel: Option<usize>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tolerance: 8,
            confidence_threshold: 60,
            parallel: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    tolerance: Option<i32>,
    confidence_threshold: Option<u8>,
    parallel: Option<usize>,
}

/// Defaults, overlaid by `formport.toml` in the working directory,
/// overlaid by `APP__*` environment variables. Unreadable or invalid
/// layers are skipped, never fatal.
pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("formport.toml") {
        if let Ok(file_cfg) = toml::from_str::<FileSettings>(&raw) {
            if let Some(v) = file_cfg.tolerance {
                settings.tolerance = v;
            }
            if let Some(v) = file_cfg.confidence_threshold {
                settings.confidence_threshold = v;
            }
            if let Some(v) = file_cfg.parallel {
                settings.parallel = Some(v);
            }
        }
    }

    if let Ok(v) = std::env::var("APP__TOLERANCE") {
        if let Ok(parsed) = v.parse::<i32>() {
            settings.tolerance = parsed;
        }
    }
    if let Ok(v) = std::env::var("APP__CONFIDENCE_THRESHOLD") {
        if let Ok(parsed) = v.parse::<u8>() {
            settings.confidence_threshold = parsed;
        }
    }
    if let Ok(v) = std::env::var("APP__PARALLEL") {
        if let Ok(parsed) = v.parse::<usize>() {
            settings.parallel = Some(parsed);
        }
    }

    settings
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
