use anyhow::Context;
use serde::Deserialize;
use std::path::Path;

/// Optional file-based configuration.
///
/// ```toml
/// rooms = [
///     "https://www.douyu.com/793400",
///     "http://www.quanmin.tv/3446603",
/// ]
/// log_filter = "barrage=debug"
/// ```
#[derive(Debug, Default, Deserialize)]
pub struct AppConfig {
    /// Room URLs added at startup.
    #[serde(default)]
    pub rooms: Vec<String>,

    /// Default tracing filter, overridden by RUST_LOG.
    #[serde(default)]
    pub log_filter: Option<String>,
}

impl AppConfig {
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))
    }
}
