use config::{Config, ConfigError, File as ConfigFile};
use serde::Deserialize;

/// Operator configuration, loaded from an optional `Config.toml` next to
/// the binary. Everything has a sensible empty default so the tool runs
/// with no file at all.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// Hosts swept when the command line names none.
    #[serde(default)]
    pub hosts: Vec<String>,
    /// Glob patterns for files the scan should never consider.
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
}

pub fn load_configuration() -> Result<AppConfig, ConfigError> {
    let builder = Config::builder()
        .add_source(ConfigFile::with_name("Config").required(false))
        .build()?;
    builder.try_deserialize::<AppConfig>()
}
