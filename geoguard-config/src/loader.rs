use once_cell::sync::Lazy;
use std::{
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::debug;

use super::{
    models::{
        BatchConfig, Config, ConfigMetadata, CorsConfig, MailConfig,
        OperatorEntry, OperatorsConfig, ReportConfig, ServerConfig,
        sources::{EnvConfig, FileConfig},
    },
    validation::{self, ConfigGuardRailError, ConfigWarnings},
};

static DEFAULT_CONFIG_LOCATIONS: Lazy<Vec<PathBuf>> = Lazy::new(|| {
    vec![
        PathBuf::from("geoguard.toml"),
        PathBuf::from("config/geoguard.toml"),
    ]
});

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_CAPACITY: u32 = 20;
pub const DEFAULT_SMTP_HOST: &str = "smtp.gmail.com";
pub const DEFAULT_SMTP_PORT: u16 = 465;

#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
}

#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self { options }
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_file_loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path).map(|_| true).or_else(
                |err| match err {
                    dotenvy::Error::Io(_) => Ok(false),
                    _ => Err(err),
                },
            )?,
            None => {
                dotenvy::dotenv().map(|_| true).or_else(|err| match err {
                    dotenvy::Error::Io(_) => Ok(false),
                    _ => Err(err),
                })?
            }
        };

        let env_config = EnvConfig::gather();
        let (file_config, config_path) = self.load_file_config(&env_config)?;

        let (config, warnings) = compose_config(
            file_config,
            env_config,
            config_path,
            env_file_loaded,
        )?;

        Ok(ConfigLoad { config, warnings })
    }

    fn load_file_config(
        &self,
        env_config: &EnvConfig,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        let explicit = self
            .options
            .config_path
            .clone()
            .or_else(|| env_config.config_path.clone());

        let path = match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigLoadError::MissingConfig { path });
                }
                path
            }
            None => match DEFAULT_CONFIG_LOCATIONS
                .iter()
                .find(|candidate| candidate.exists())
            {
                Some(found) => found.clone(),
                None => return Ok((None, None)),
            },
        };

        debug!(path = %path.display(), "loading configuration file");
        let file_config = parse_file(&path)?;
        Ok((Some(file_config), Some(path)))
    }
}

fn parse_file(path: &Path) -> Result<FileConfig, ConfigLoadError> {
    let contents =
        fs::read_to_string(path).map_err(|err| ConfigLoadError::Io {
            path: path.to_path_buf(),
            source: err,
        })?;
    toml::from_str(&contents).map_err(|err| ConfigLoadError::Parse {
        path: path.to_path_buf(),
        source: err,
    })
}

/// Merges file and environment values over the defaults. Environment wins.
pub(crate) fn compose_config(
    file_config: Option<FileConfig>,
    env: EnvConfig,
    config_path: Option<PathBuf>,
    env_file_loaded: bool,
) -> Result<(Config, ConfigWarnings), ConfigLoadError> {
    if let Some(var) = env.invalid.first() {
        return Err(ConfigGuardRailError::InvalidEnvValue {
            name: var.name.clone(),
            value: var.value.clone(),
        }
        .into());
    }

    let mut warnings = ConfigWarnings::default();

    if file_config.is_none() {
        warnings.push_with_hint(
            "No geoguard.toml detected; using environment variables and defaults",
            "Create geoguard.toml or set GEOGUARD_CONFIG to pin settings in a file",
        );
    }

    let FileConfig {
        server: file_server,
        batch: file_batch,
        mail: file_mail,
        operators: file_operators,
        cors: file_cors,
        report: file_report,
    } = file_config.unwrap_or_default();

    let server = ServerConfig {
        host: env
            .server_host
            .or(file_server.host)
            .unwrap_or_else(|| DEFAULT_HOST.to_string()),
        port: env.server_port.or(file_server.port).unwrap_or(DEFAULT_PORT),
    };

    let batch = BatchConfig {
        capacity: env
            .batch_capacity
            .or(file_batch.capacity)
            .unwrap_or(DEFAULT_CAPACITY),
        auto_finalize: env
            .batch_auto_finalize
            .or(file_batch.auto_finalize)
            .unwrap_or(false),
    };

    let mail = MailConfig {
        user: env.email_user.or(file_mail.user),
        password: env.email_password,
        to: env.email_to.or(file_mail.to),
        smtp_host: env
            .smtp_host
            .or(file_mail.smtp_host)
            .unwrap_or_else(|| DEFAULT_SMTP_HOST.to_string()),
        smtp_port: env
            .smtp_port
            .or(file_mail.smtp_port)
            .unwrap_or(DEFAULT_SMTP_PORT),
        verify_before_send: env
            .smtp_verify
            .or(file_mail.verify_before_send)
            .unwrap_or(true),
    };

    let env_operators = env.operators.map(|raw| {
        raw.iter()
            .filter_map(|entry| OperatorEntry::parse(entry))
            .collect::<Vec<_>>()
    });
    let operators = OperatorsConfig {
        allow_list: env_operators
            .or(file_operators.allow)
            .filter(|entries| !entries.is_empty()),
    };

    let cors = CorsConfig {
        allowed_origins: env
            .cors_allowed_origins
            .or(file_cors.allowed_origins)
            .unwrap_or_else(default_cors_origins),
    };

    let report = ReportConfig {
        work_dir: env.report_work_dir.or(file_report.work_dir),
    };

    let config = Config {
        server,
        batch,
        mail,
        operators,
        cors,
        report,
        metadata: ConfigMetadata {
            config_path,
            env_file_loaded,
        },
    };

    let guard_warnings = validation::apply_guard_rails(&config)?;
    warnings.extend(guard_warnings);

    Ok((config, warnings))
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("configuration file missing: {path}")]
    MissingConfig { path: PathBuf },
    #[error("failed to read configuration {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error(transparent)]
    GuardRail(#[from] ConfigGuardRailError),
    #[error(transparent)]
    EnvFile(#[from] dotenvy::Error),
}

#[derive(Debug)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::InvalidVar;

    fn full_mail_env() -> EnvConfig {
        EnvConfig {
            email_user: Some("sender@example.com".into()),
            email_password: Some("app-password".into()),
            email_to: Some("ops@example.com".into()),
            ..Default::default()
        }
    }

    #[test]
    fn defaults_apply_without_sources() {
        let (config, warnings) =
            compose_config(None, EnvConfig::default(), None, false).unwrap();

        assert_eq!(config.server.host, DEFAULT_HOST);
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.batch.capacity, 20);
        assert!(!config.batch.auto_finalize);
        assert_eq!(config.mail.smtp_host, "smtp.gmail.com");
        assert_eq!(config.mail.smtp_port, 465);
        assert!(config.mail.verify_before_send);
        assert!(config.operators.allow_list.is_none());
        assert!(config.cors.is_wildcard_included());

        assert!(warnings.contains("Mail credentials not configured"));
        assert!(warnings.contains("No geoguard.toml"));
    }

    #[test]
    fn environment_overrides_file() {
        let file: FileConfig = toml::from_str(
            r#"
            [server]
            port = 8080

            [batch]
            capacity = 5
            auto_finalize = true

            [mail]
            to = "file@example.com"
            smtp_port = 587

            [[operators.allow]]
            id = "42"
            name = "Dana"
            "#,
        )
        .unwrap();

        let env = EnvConfig {
            batch_capacity: Some(3),
            ..full_mail_env()
        };

        let (config, warnings) = compose_config(
            Some(file),
            env,
            Some(PathBuf::from("geoguard.toml")),
            false,
        )
        .unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.batch.capacity, 3);
        assert!(config.batch.auto_finalize);
        assert_eq!(config.mail.to.as_deref(), Some("ops@example.com"));
        assert_eq!(config.mail.smtp_port, 587);
        let operators = config.operators.allow_list.unwrap();
        assert_eq!(operators[0].name.as_deref(), Some("Dana"));
        assert!(warnings.is_empty(), "{warnings:?}");
    }

    #[test]
    fn operator_csv_is_parsed() {
        let env = EnvConfig {
            operators: Some(vec!["42=Dana Lee".into(), "7".into()]),
            ..full_mail_env()
        };
        let (config, _) = compose_config(None, env, None, false).unwrap();

        let operators = config.operators.allow_list.unwrap();
        assert_eq!(operators.len(), 2);
        assert_eq!(operators[1].id, "7");
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let env = EnvConfig {
            batch_capacity: Some(0),
            ..Default::default()
        };
        let err = compose_config(None, env, None, false).unwrap_err();
        assert!(matches!(
            err,
            ConfigLoadError::GuardRail(ConfigGuardRailError::InvalidCapacity {
                value: 0,
                ..
            })
        ));
    }

    #[test]
    fn unparseable_env_value_is_rejected() {
        let env = EnvConfig {
            invalid: vec![InvalidVar {
                name: "BATCH_CAPACITY".into(),
                value: "2O".into(),
            }],
            ..full_mail_env()
        };
        let err = compose_config(None, env, None, false).unwrap_err();
        assert!(matches!(
            &err,
            ConfigLoadError::GuardRail(ConfigGuardRailError::InvalidEnvValue {
                name,
                value,
            }) if name == "BATCH_CAPACITY" && value == "2O"
        ));
        assert!(err.to_string().contains("BATCH_CAPACITY"));
    }

    #[test]
    fn invalid_origin_is_rejected() {
        let env = EnvConfig {
            cors_allowed_origins: Some(vec![
                "http://ok.example".into(),
                "bad\norigin".into(),
            ]),
            ..Default::default()
        };
        assert!(matches!(
            compose_config(None, env, None, false),
            Err(ConfigLoadError::GuardRail(
                ConfigGuardRailError::InvalidCorsConfig { .. }
            ))
        ));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let loader =
            ConfigLoader::new().with_config_path(dir.path().join("absent.toml"));
        let err = loader.load_file_config(&EnvConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigLoadError::MissingConfig { .. }));
    }

    #[test]
    fn explicit_file_is_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("geoguard.toml");
        std::fs::write(&path, "[batch]\ncapacity = 12\n").unwrap();

        let loader = ConfigLoader::new().with_config_path(&path);
        let (file, found) =
            loader.load_file_config(&EnvConfig::default()).unwrap();
        assert_eq!(file.unwrap().batch.capacity, Some(12));
        assert_eq!(found, Some(path));
    }
}
