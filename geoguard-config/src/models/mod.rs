pub mod sources;

use std::{fmt, path::PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub batch: BatchConfig,
    pub mail: MailConfig,
    pub operators: OperatorsConfig,
    pub cors: CorsConfig,
    pub report: ReportConfig,
    pub metadata: ConfigMetadata,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Scans required before a batch may be finalized.
    pub capacity: u32,
    /// Finalize in the background as soon as a batch reaches capacity.
    pub auto_finalize: bool,
}

#[derive(Clone)]
pub struct MailConfig {
    pub user: Option<String>,
    pub password: Option<String>,
    pub to: Option<String>,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub verify_before_send: bool,
}

impl MailConfig {
    pub fn has_credentials(&self) -> bool {
        self.user.as_deref().is_some_and(|v| !v.trim().is_empty())
            && self.password.as_deref().is_some_and(|v| !v.trim().is_empty())
    }

    pub fn has_destination(&self) -> bool {
        self.to.as_deref().is_some_and(|v| !v.trim().is_empty())
    }
}

impl fmt::Debug for MailConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailConfig")
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("to", &self.to)
            .field("smtp_host", &self.smtp_host)
            .field("smtp_port", &self.smtp_port)
            .field("verify_before_send", &self.verify_before_send)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct OperatorEntry {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl OperatorEntry {
    /// Parses `id` or `id=Display Name`.
    pub fn parse(raw: &str) -> Option<Self> {
        let (id, name) = match raw.split_once('=') {
            Some((id, name)) => (id.trim(), Some(name.trim())),
            None => (raw.trim(), None),
        };
        if id.is_empty() {
            return None;
        }
        Some(Self {
            id: id.to_string(),
            name: name.filter(|n| !n.is_empty()).map(str::to_string),
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct OperatorsConfig {
    /// `None` accepts any non-empty operator id.
    pub allow_list: Option<Vec<OperatorEntry>>,
}

#[derive(Debug, Clone)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl CorsConfig {
    pub fn is_wildcard_included(&self) -> bool {
        self.allowed_origins
            .iter()
            .any(|origin| origin.trim() == "*")
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReportConfig {
    /// Parent directory for per-run artifact scopes; system temp when unset.
    pub work_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
}
