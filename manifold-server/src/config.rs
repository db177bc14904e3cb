//! Server configuration.
//!
//! Loaded from a YAML file; the secrets (database DSN, OIDC client secret)
//! can be overridden through environment variables so they stay out of the
//! config file.

use serde::Deserialize;

use manifold_auth::OidcConfig;
use manifold_core::{Error, Result};

fn default_listen() -> String {
    "0.0.0.0:17070".to_string()
}

fn default_controller_name() -> String {
    "manifold".to_string()
}

fn default_watch_interval() -> u64 {
    30
}

fn default_sweep_interval() -> u64 {
    300
}

fn default_session_ttl_hours() -> u64 {
    24
}

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// Address the WebSocket endpoints listen on.
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Database DSN (`sqlite:...` or `postgres://...`).
    pub dsn: String,
    /// Name this plane answers to as a controller.
    #[serde(default = "default_controller_name")]
    pub controller_name: String,
    /// Stable UUID this plane presents as a controller.
    pub controller_uuid: String,
    /// Hostname used in redirect frames, e.g. `manifold.example.com:443`.
    #[serde(default)]
    pub public_hostname: String,
    /// External OIDC provider; absent in test setups that inject
    /// identities directly.
    #[serde(default)]
    pub oidc: Option<OidcConfig>,
    /// Principals given plane-administrator rights at startup.
    #[serde(default)]
    pub admin_identities: Vec<String>,
    /// Seconds between controller polls of the summary-watcher supervisor.
    #[serde(default = "default_watch_interval")]
    pub watch_interval_secs: u64,
    /// Seconds between runs of the cleanup sweepers.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Days of audit log to retain; 0 disables the retention sweep.
    #[serde(default)]
    pub audit_retention_days: u64,
    #[serde(default = "default_session_ttl_hours")]
    pub session_ttl_hours: u64,
}

impl Config {
    /// Read a config file, then overlay the secret-bearing environment
    /// variables `MANIFOLD_DSN` and `MANIFOLD_OIDC_CLIENT_SECRET`.
    pub fn load(path: &str) -> Result<Config> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::server_configuration(format!("read {path}: {e}")))?;
        let mut config: Config = serde_yaml::from_str(&raw)
            .map_err(|e| Error::server_configuration(format!("parse {path}: {e}")))?;
        if let Ok(dsn) = std::env::var("MANIFOLD_DSN") {
            config.dsn = dsn;
        }
        if let Ok(secret) = std::env::var("MANIFOLD_OIDC_CLIENT_SECRET") {
            if let Some(oidc) = &mut config.oidc {
                oidc.client_secret = secret;
            }
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.dsn.is_empty() {
            return Err(Error::server_configuration("dsn must be set"));
        }
        if uuid::Uuid::parse_str(&self.controller_uuid).is_err() {
            return Err(Error::server_configuration(format!(
                "controller_uuid {:?} is not a UUID",
                self.controller_uuid
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_parses_with_defaults() {
        let config: Config = serde_yaml::from_str(
            "dsn: \"sqlite::memory:\"\ncontroller_uuid: 6d4f7c43-854c-4091-8e16-d6ce4945c25c\n",
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.controller_name, "manifold");
        assert_eq!(config.listen, "0.0.0.0:17070");
        assert_eq!(config.watch_interval_secs, 30);
        assert!(config.oidc.is_none());
    }

    #[test]
    fn bad_uuid_is_rejected() {
        let config: Config = serde_yaml::from_str(
            "dsn: \"sqlite::memory:\"\ncontroller_uuid: not-a-uuid\n",
        )
        .unwrap();
        assert_eq!(
            config.validate().unwrap_err().code(),
            "server-configuration"
        );
    }
}
