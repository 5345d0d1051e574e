use axum::http::HeaderValue;
use thiserror::Error;

use super::models::{Config, CorsConfig, MailConfig};

/// Largest batch the report and mail paths are sized for.
pub const MAX_BATCH_CAPACITY: u32 = 1_000;

#[derive(Debug, Error)]
pub enum ConfigGuardRailError {
    #[error("BATCH_CAPACITY must be between 1 and {max}, got {value}")]
    InvalidCapacity { value: u32, max: u32 },
    #[error("SERVER_PORT must not be 0")]
    InvalidPort,
    #[error("invalid CORS configuration: {reason}")]
    InvalidCorsConfig { reason: String },
    #[error("operator allow-list contains duplicate id '{id}'")]
    DuplicateOperator { id: String },
    #[error("{name} has unparseable value '{value}'")]
    InvalidEnvValue { name: String, value: String },
}

#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigWarnings {
    pub items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push<S: Into<String>>(&mut self, message: S) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    pub fn push_with_hint<S: Into<String>, H: Into<String>>(
        &mut self,
        message: S,
        hint: H,
    ) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn extend(&mut self, other: ConfigWarnings) {
        self.items.extend(other.items);
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.items.iter().any(|w| w.message.contains(needle))
    }
}

pub fn apply_guard_rails(
    config: &Config,
) -> Result<ConfigWarnings, ConfigGuardRailError> {
    let mut warnings = ConfigWarnings::default();

    let capacity = config.batch.capacity;
    if capacity == 0 || capacity > MAX_BATCH_CAPACITY {
        return Err(ConfigGuardRailError::InvalidCapacity {
            value: capacity,
            max: MAX_BATCH_CAPACITY,
        });
    }

    if config.server.port == 0 {
        return Err(ConfigGuardRailError::InvalidPort);
    }

    validate_cors(&config.cors, &mut warnings)?;
    check_mail(&config.mail, config.batch.auto_finalize, &mut warnings);

    if let Some(entries) = &config.operators.allow_list {
        let mut seen = std::collections::HashSet::new();
        for entry in entries {
            if !seen.insert(entry.id.as_str()) {
                return Err(ConfigGuardRailError::DuplicateOperator {
                    id: entry.id.clone(),
                });
            }
        }
    }

    Ok(warnings)
}

fn check_mail(
    mail: &MailConfig,
    auto_finalize: bool,
    warnings: &mut ConfigWarnings,
) {
    if !mail.has_credentials() {
        warnings.push_with_hint(
            "Mail credentials not configured; finalize requests will fail with CONFIG_ERROR",
            "Set EMAIL_USER and EMAIL_PASS (or EMAIL_APP_PASSWORD)",
        );
    }

    if !mail.has_destination() {
        warnings.push_with_hint(
            "EMAIL_TO not configured; completed batches have no destination",
            "Set EMAIL_TO to the address that receives batch reports",
        );
    }

    if !matches!(mail.smtp_port, 465 | 587) {
        warnings.push_with_hint(
            format!(
                "SMTP_PORT {} is non-standard; implicit TLS will be used",
                mail.smtp_port
            ),
            "Use 465 for implicit TLS or 587 for STARTTLS",
        );
    }

    if auto_finalize && !mail.verify_before_send {
        warnings.push(
            "BATCH_AUTO_FINALIZE is on with SMTP_VERIFY off; relay problems surface only as failed batches",
        );
    }
}

fn validate_cors(
    cors: &CorsConfig,
    warnings: &mut ConfigWarnings,
) -> Result<(), ConfigGuardRailError> {
    if cors.allowed_origins.is_empty() {
        return Err(ConfigGuardRailError::InvalidCorsConfig {
            reason: "CORS_ALLOWED_ORIGINS must include at least one origin"
                .into(),
        });
    }

    for origin in &cors.allowed_origins {
        if origin == "*" {
            continue;
        }
        HeaderValue::from_str(origin).map_err(|_| {
            ConfigGuardRailError::InvalidCorsConfig {
                reason: format!(
                    "invalid origin `{origin}` in CORS_ALLOWED_ORIGINS"
                ),
            }
        })?;
    }

    if cors.is_wildcard_included() && cors.allowed_origins.len() > 1 {
        warnings.push(
            "CORS wildcard origin listed alongside explicit origins; the wildcard wins",
        );
    }

    Ok(())
}
