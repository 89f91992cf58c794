//! Broker connection configuration and URL construction.

use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Serialize};

/// Structured broker connection settings.
///
/// [`connection_url`](BrokerConfig::connection_url) assembles the canonical
/// URL deterministically; callers holding a ready-made URL can bypass this
/// struct entirely.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BrokerConfig {
    /// Broker host name or address.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// Optional password, embedded percent-encoded in the URL.
    pub password: Option<String>,
    /// Use the encrypted transport scheme (`rediss`) instead of `redis`.
    pub tls: bool,
    /// Database index; `0` is omitted from the URL.
    pub database: u32,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 6379,
            password: None,
            tls: false,
            database: 0,
        }
    }
}

impl BrokerConfig {
    /// Build the connection URL:
    /// `{scheme}://[:{password}@]{host}:{port}[/{database}]`.
    #[must_use]
    pub fn connection_url(&self) -> String {
        let scheme = if self.tls { "rediss" } else { "redis" };
        let auth = self.password.as_deref().map_or_else(String::new, |pw| {
            format!(":{}@", utf8_percent_encode(pw, NON_ALPHANUMERIC))
        });
        let db_suffix = if self.database == 0 {
            String::new()
        } else {
            format!("/{}", self.database)
        };
        format!("{scheme}://{auth}{}:{}{db_suffix}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_url() {
        assert_eq!(
            BrokerConfig::default().connection_url(),
            "redis://localhost:6379"
        );
    }

    #[test]
    fn tls_selects_encrypted_scheme() {
        let cfg = BrokerConfig {
            tls: true,
            ..BrokerConfig::default()
        };
        assert_eq!(cfg.connection_url(), "rediss://localhost:6379");
    }

    #[test]
    fn password_is_percent_encoded() {
        let cfg = BrokerConfig {
            password: Some("p@ss w/1".into()),
            ..BrokerConfig::default()
        };
        assert_eq!(
            cfg.connection_url(),
            "redis://:p%40ss%20w%2F1@localhost:6379"
        );
    }

    #[test]
    fn nonzero_database_appends_suffix() {
        let cfg = BrokerConfig {
            database: 3,
            ..BrokerConfig::default()
        };
        assert_eq!(cfg.connection_url(), "redis://localhost:6379/3");
    }

    #[test]
    fn database_zero_has_no_suffix() {
        let cfg = BrokerConfig {
            database: 0,
            ..BrokerConfig::default()
        };
        assert!(!cfg.connection_url().ends_with("/0"));
    }

    #[test]
    fn all_fields_combined() {
        let cfg = BrokerConfig {
            host: "broker.internal".into(),
            port: 6380,
            password: Some("secret".into()),
            tls: true,
            database: 2,
        };
        assert_eq!(
            cfg.connection_url(),
            "rediss://:secret@broker.internal:6380/2"
        );
    }

    #[test]
    fn serde_defaults_fill_missing_fields() {
        let cfg: BrokerConfig = serde_json::from_str(r#"{"host": "h"}"#).unwrap();
        assert_eq!(cfg.host, "h");
        assert_eq!(cfg.port, 6379);
        assert!(!cfg.tls);
    }
}
