//! Configuration loaded from environment variables.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

/// JWT secrets that ship in sample `.env` files and must never be used.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

#[derive(Debug, Clone)]
pub struct Config {
    pub addr: SocketAddr,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub bootstrap: Option<Bootstrap>,
}

/// First-run library and supervisor account.
#[derive(Debug, Clone)]
pub struct Bootstrap {
    pub library: String,
    pub supervisor: String,
    pub password: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Description | Default |
    /// |----------|-------------|---------|
    /// | `LMS_HOST` | Bind host | `0.0.0.0` |
    /// | `LMS_PORT` | Bind port | `3000` |
    /// | `LMS_DB_PATH` | SQLite database file | `lms.db` |
    /// | `LMS_JWT_SECRET` | Token signing secret | (required) |
    /// | `LMS_BOOTSTRAP_LIBRARY` | Library created on first run | unset |
    /// | `LMS_BOOTSTRAP_SUPERVISOR` | Its supervisor's username | unset |
    /// | `LMS_BOOTSTRAP_PASSWORD` | Its supervisor's password | unset |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let host = var("LMS_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port = var("LMS_PORT").unwrap_or_else(|| "3000".into());
        let addr = format!("{}:{}", host, port)
            .parse()
            .map_err(|_| ConfigError::InvalidAddr(format!("{}:{}", host, port)))?;

        let db_path = var("LMS_DB_PATH").unwrap_or_else(|| "lms.db".into()).into();

        let jwt_secret = var("LMS_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            return Err(ConfigError::InsecureSecret);
        }

        let bootstrap = match (
            var("LMS_BOOTSTRAP_LIBRARY"),
            var("LMS_BOOTSTRAP_SUPERVISOR"),
            var("LMS_BOOTSTRAP_PASSWORD"),
        ) {
            (Some(library), Some(supervisor), Some(password)) => Some(Bootstrap {
                library,
                supervisor,
                password,
            }),
            (None, None, None) => None,
            _ => return Err(ConfigError::PartialBootstrap),
        };

        Ok(Self {
            addr,
            db_path,
            jwt_secret,
            bootstrap,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid bind address: {0}")]
    InvalidAddr(String),

    #[error("LMS_JWT_SECRET is unset or still a placeholder")]
    InsecureSecret,

    #[error("LMS_BOOTSTRAP_LIBRARY, LMS_BOOTSTRAP_SUPERVISOR and LMS_BOOTSTRAP_PASSWORD must be set together")]
    PartialBootstrap,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply() {
        let config = load(&[("LMS_JWT_SECRET", "s3cret")]).unwrap();
        assert_eq!(config.addr.to_string(), "0.0.0.0:3000");
        assert_eq!(config.db_path, PathBuf::from("lms.db"));
        assert!(config.bootstrap.is_none());
    }

    #[test]
    fn placeholder_secret_is_rejected() {
        assert!(matches!(load(&[]), Err(ConfigError::InsecureSecret)));
        assert!(matches!(
            load(&[("LMS_JWT_SECRET", "dev-secret-change-me")]),
            Err(ConfigError::InsecureSecret)
        ));
    }

    #[test]
    fn bootstrap_needs_all_three_values() {
        let partial = load(&[("LMS_JWT_SECRET", "s3cret"), ("LMS_BOOTSTRAP_LIBRARY", "Central")]);
        assert!(matches!(partial, Err(ConfigError::PartialBootstrap)));

        let full = load(&[
            ("LMS_JWT_SECRET", "s3cret"),
            ("LMS_BOOTSTRAP_LIBRARY", "Central"),
            ("LMS_BOOTSTRAP_SUPERVISOR", "admin"),
            ("LMS_BOOTSTRAP_PASSWORD", "hunter22"),
        ])
        .unwrap();
        assert_eq!(full.bootstrap.unwrap().supervisor, "admin");
    }

    #[test]
    fn bad_port_is_reported() {
        let err = load(&[("LMS_JWT_SECRET", "s3cret"), ("LMS_PORT", "http")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidAddr(_)));
    }
}
