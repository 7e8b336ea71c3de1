//! Startup configuration: CLI flags win over the TOML config file, which
//! wins over the built-in defaults.

use std::path::Path;

use ferron_rpc::CodecKind;
use serde::Deserialize;

pub const DEFAULT_LISTEN: &str = "127.0.0.1:4246";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unreadable config {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid config {path}: {message}")]
    Parse { path: String, message: String },

    #[error(transparent)]
    Codec(#[from] ferron_rpc::RpcError),
}

/// On-disk shape of the config file. Every field is optional; a missing
/// file behaves like an empty one.
#[derive(Debug, Default, Deserialize, PartialEq, Eq)]
pub struct ConfigFile {
    pub listen: Option<String>,
    pub http_listen: Option<String>,
    pub codec: Option<String>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&raw).map_err(|err| ConfigError::Parse {
            path: path.display().to_string(),
            message: err.to_string(),
        })
    }
}

/// Fully resolved startup settings.
#[derive(Debug, PartialEq, Eq)]
pub struct Settings {
    pub listen: String,
    pub http_listen: Option<String>,
    pub codec: CodecKind,
}

pub fn resolve(
    cli_listen: Option<String>,
    cli_http_listen: Option<String>,
    cli_codec: Option<String>,
    file: &ConfigFile,
) -> Result<Settings, ConfigError> {
    let listen = cli_listen
        .or_else(|| file.listen.clone())
        .unwrap_or_else(|| DEFAULT_LISTEN.to_string());
    let http_listen = cli_http_listen.or_else(|| file.http_listen.clone());
    let codec = cli_codec
        .or_else(|| file.codec.clone())
        .map(|name| name.parse::<CodecKind>())
        .transpose()?
        .unwrap_or_default();
    Ok(Settings {
        listen,
        http_listen,
        codec,
    })
}
