use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::util::{
    InvalidVar, first_var, parse_bool_var, parse_csv_var, parse_number_var,
};

use super::OperatorEntry;

/// Raw configuration as defined in a TOML file.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    #[serde(default)]
    pub server: FileServerConfig,
    #[serde(default)]
    pub batch: FileBatchConfig,
    #[serde(default)]
    pub mail: FileMailConfig,
    #[serde(default)]
    pub operators: FileOperatorsConfig,
    #[serde(default)]
    pub cors: FileCorsConfig,
    #[serde(default)]
    pub report: FileReportConfig,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileServerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileBatchConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capacity: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_finalize: Option<bool>,
}

/// Mail settings from the file. Credentials are expected in the
/// environment; only the non-secret parts live here.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileMailConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smtp_host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smtp_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verify_before_send: Option<bool>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileOperatorsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow: Option<Vec<OperatorEntry>>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileCorsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_origins: Option<Vec<String>>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileReportConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<PathBuf>,
}

/// Environment-derived configuration values.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub server_host: Option<String>,
    pub server_port: Option<u16>,
    pub batch_capacity: Option<u32>,
    pub batch_auto_finalize: Option<bool>,
    pub email_user: Option<String>,
    pub email_password: Option<String>,
    pub email_to: Option<String>,
    pub smtp_host: Option<String>,
    pub smtp_port: Option<u16>,
    pub smtp_verify: Option<bool>,
    pub operators: Option<Vec<String>>,
    pub cors_allowed_origins: Option<Vec<String>>,
    pub report_work_dir: Option<PathBuf>,
    /// Variables that were set but could not be parsed.
    pub invalid: Vec<InvalidVar>,
}

impl EnvConfig {
    pub fn gather() -> Self {
        let mut invalid = Vec::new();
        let server_port = keep(parse_number_var("SERVER_PORT"), &mut invalid);
        let batch_capacity =
            keep(parse_number_var("BATCH_CAPACITY"), &mut invalid);
        let batch_auto_finalize =
            keep(parse_bool_var("BATCH_AUTO_FINALIZE"), &mut invalid);
        let smtp_port = keep(parse_number_var("SMTP_PORT"), &mut invalid);
        let smtp_verify = keep(parse_bool_var("SMTP_VERIFY"), &mut invalid);

        Self {
            config_path: std::env::var("GEOGUARD_CONFIG")
                .ok()
                .map(PathBuf::from),
            server_host: std::env::var("SERVER_HOST").ok(),
            server_port,
            batch_capacity,
            batch_auto_finalize,
            email_user: first_var(&["EMAIL_USER"]),
            email_password: first_var(&["EMAIL_PASS", "EMAIL_APP_PASSWORD"]),
            email_to: first_var(&["EMAIL_TO"]),
            smtp_host: first_var(&["SMTP_HOST"]),
            smtp_port,
            smtp_verify,
            operators: parse_csv_var("GEOGUARD_OPERATORS"),
            cors_allowed_origins: parse_csv_var("CORS_ALLOWED_ORIGINS"),
            report_work_dir: std::env::var("REPORT_WORK_DIR")
                .ok()
                .filter(|value| !value.trim().is_empty())
                .map(PathBuf::from),
            invalid,
        }
    }
}

fn keep<T>(
    parsed: Result<Option<T>, InvalidVar>,
    invalid: &mut Vec<InvalidVar>,
) -> Option<T> {
    parsed.unwrap_or_else(|err| {
        invalid.push(err);
        None
    })
}
