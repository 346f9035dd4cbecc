//! Environment-driven server configuration.
//!
//! Variables carry the `TANDEM_` prefix (`TANDEM_BIND_ADDR`,
//! `TANDEM_ALLOW_EXTERNAL`, `TANDEM_QUEUE_CAPACITY`). An `app.env` file, or failing that a `.env`
//! file, is read first so its values are visible to the loader.

use std::path::Path;

use log::{error, info};
use tandem_collab::ServerConfig;
use thiserror::Error;

pub const ENV_PREFIX: &str = "TANDEM_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable error: {0}")]
    Env(#[from] envy::Error),
    #[error("invalid bind address `{0}`")]
    BindAddr(String),
}

/// Load the server configuration from the process environment.
pub fn load() -> Result<ServerConfig, ConfigError> {
    if Path::new("app.env").exists() {
        dotenvy::from_filename("app.env").ok();
    } else {
        dotenvy::dotenv().ok();
    }

    match from_vars(std::env::vars()) {
        Ok(config) => {
            info!("Configuration loaded (bind {}, external {})", config.bind_addr, config.allow_external);
            Ok(config)
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            Err(e)
        }
    }
}

/// Build a configuration from `(name, value)` pairs; unprefixed names are ignored.
pub fn from_vars<I>(vars: I) -> Result<ServerConfig, ConfigError>
where
    I: IntoIterator<Item = (String, String)>,
{
    let config: ServerConfig = envy::prefixed(ENV_PREFIX).from_iter(vars)?;
    if config.bind_addr.parse::<std::net::SocketAddr>().is_err() {
        return Err(ConfigError::BindAddr(config.bind_addr));
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = from_vars(vars(&[("HOME", "/root")])).unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.bind_addr, "127.0.0.1:9090");
        assert!(!config.allow_external);
    }

    #[test]
    fn test_prefixed_overrides() {
        let config = from_vars(vars(&[
            ("TANDEM_BIND_ADDR", "0.0.0.0:7000"),
            ("TANDEM_ALLOW_EXTERNAL", "true"),
            ("TANDEM_QUEUE_CAPACITY", "64"),
        ]))
        .unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:7000");
        assert!(config.allow_external);
        assert_eq!(config.queue_capacity, 64);
    }

    #[test]
    fn test_unprefixed_names_ignored() {
        let config = from_vars(vars(&[("BIND_ADDR", "0.0.0.0:7000")])).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:9090");
    }

    #[test]
    fn test_bad_bool_is_env_error() {
        let err = from_vars(vars(&[("TANDEM_ALLOW_EXTERNAL", "maybe")])).unwrap_err();
        assert!(matches!(err, ConfigError::Env(_)));
    }

    #[test]
    fn test_bad_bind_addr() {
        let err = from_vars(vars(&[("TANDEM_BIND_ADDR", "localhost")])).unwrap_err();
        assert!(matches!(err, ConfigError::BindAddr(addr) if addr == "localhost"));
    }
}
