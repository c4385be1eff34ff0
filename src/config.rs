use std::net::SocketAddr;
use std::path::PathBuf;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::gate::RoutePaths;

pub const CONFIG_FILE: &str = "labgate.toml";
pub const ENV_PREFIX: &str = "LABGATE_";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub bind_address: SocketAddr,
    /// Postgres connection string. Without one the service keeps everything in memory.
    pub database_url: Option<String>,
    /// Root directory for lab attachments.
    pub data_dir: PathBuf,
    pub session_ttl_hours: i64,
    pub routes: RoutePaths,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 3000)),
            database_url: None,
            data_dir: PathBuf::from("labgate"),
            session_ttl_hours: 48,
            routes: RoutePaths::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config error: {0}")]
    Figment(#[from] figment::Error),
    #[error("config error: session_ttl_hours must be positive, got {0}")]
    SessionTtl(i64),
}

impl Settings {
    pub fn load() -> Result<Settings, ConfigError> {
        Self::from_figment(
            Figment::from(Serialized::defaults(Settings::default()))
                .merge(Toml::file(CONFIG_FILE))
                .merge(Env::prefixed(ENV_PREFIX).split("__")),
        )
    }

    pub fn from_figment(figment: Figment) -> Result<Settings, ConfigError> {
        let settings: Settings = figment.extract()?;
        if settings.session_ttl_hours <= 0 {
            return Err(ConfigError::SessionTtl(settings.session_ttl_hours));
        }
        Ok(settings)
    }
}
