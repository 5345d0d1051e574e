//! Configuration library for GeoGuard.
//!
//! Values are layered: `.env` file, optional `geoguard.toml`, process
//! environment, then built-in defaults. Guard rails reject configurations the
//! server cannot run with and collect warnings for ones it can only partly
//! serve (for example, missing mail credentials).

pub mod loader;
pub mod models;
pub mod util;
pub mod validation;

pub use loader::{ConfigLoad, ConfigLoadError, ConfigLoader, ConfigLoaderOptions};
pub use models::{
    BatchConfig, Config, ConfigMetadata, CorsConfig, MailConfig,
    OperatorEntry, OperatorsConfig, ReportConfig, ServerConfig,
};
pub use validation::{ConfigGuardRailError, ConfigWarning, ConfigWarnings};
