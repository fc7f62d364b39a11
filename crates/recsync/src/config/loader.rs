use std::path::Path;

use crate::config::schema::SyncSettings;
use crate::error::ConfigError;

pub fn load_settings<P: AsRef<Path>>(path: P) -> Result<SyncSettings, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_settings_from_str(&content)
}

pub fn load_settings_from_str(content: &str) -> Result<SyncSettings, ConfigError> {
    let settings: SyncSettings = serde_json::from_str(content)?;

    validate_settings(&settings)?;

    Ok(settings)
}

fn validate_settings(settings: &SyncSettings) -> Result<(), ConfigError> {
    if !settings.budget.run_to_completion {
        if settings.budget.max_run_seconds == 0 {
            return Err(ConfigError::Validation {
                message: "budget.max_run_seconds must be positive unless run_to_completion is set"
                    .to_string(),
            });
        }
        if settings.budget.max_messages == 0 {
            return Err(ConfigError::Validation {
                message: "budget.max_messages must be positive unless run_to_completion is set"
                    .to_string(),
            });
        }
    }

    if settings.window.page_size == 0 || settings.window.page_size > 500 {
        return Err(ConfigError::Validation {
            message: format!(
                "window.page_size must be between 1 and 500, got {}",
                settings.window.page_size
            ),
        });
    }

    if settings.window.incremental_overlap_days < 0 {
        return Err(ConfigError::Validation {
            message: "window.incremental_overlap_days must not be negative".to_string(),
        });
    }

    if settings.window.default_lookback_months == 0 {
        return Err(ConfigError::Validation {
            message: "window.default_lookback_months must be at least 1".to_string(),
        });
    }

    if settings.cadence.cancellation_check_interval == 0 {
        return Err(ConfigError::Validation {
            message: "cadence.cancellation_check_interval must be at least 1".to_string(),
        });
    }

    if settings.classifier.keywords.is_empty() {
        return Err(ConfigError::Validation {
            message: "classifier.keywords must not be empty".to_string(),
        });
    }

    if settings.classifier.min_confidence > 100 {
        return Err(ConfigError::Validation {
            message: "classifier.min_confidence must be at most 100".to_string(),
        });
    }

    if settings.money.symbol_weight == 0 || settings.money.keyword_weight == 0 {
        return Err(ConfigError::Validation {
            message: "money weights must be positive".to_string(),
        });
    }

    if settings.preview.max_concurrent_renders == 0 {
        return Err(ConfigError::Validation {
            message: "preview.max_concurrent_renders must be at least 1".to_string(),
        });
    }

    Ok(())
}
