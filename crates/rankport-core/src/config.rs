//! Configuration loaded from `config.toml`, with `RANKPORT_*` environment overrides.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{RankportError, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RankportConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub auth: AuthConfig,
    pub billing: BillingConfig,
}

/// HTTP listener and host routing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Suffix stripped from the Host header to get the tenant name.
    pub base_hostname: String,
    /// The one host that serves admin endpoints.
    pub admin_hostname: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            base_hostname: ".t.rankport.dev".into(),
            admin_hostname: "admin.t.rankport.dev".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Central database (tenants, visits, id sequence, billing cache).
    pub center_db_path: String,
    /// Directory holding one SQLite file per tenant. Empty keeps partitions in memory.
    pub tenant_db_dir: String,
    pub busy_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            center_db_path: "rankport.db".into(),
            tenant_db_dir: "tenant_db".into(),
            busy_timeout_ms: 5_000,
        }
    }
}

/// Token verification keys. The RSA public key wins when both are set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub jwt_public_key_path: Option<String>,
    pub jwt_secret: Option<String>,
    pub cookie_name: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_public_key_path: None,
            jwt_secret: None,
            cookie_name: "rankport_session".into(),
        }
    }
}

/// Yen charged per player per competition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BillingConfig {
    pub scorer_visitor_yen: i64,
    pub scorer_yen: i64,
    pub visitor_yen: i64,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            scorer_visitor_yen: 100,
            scorer_yen: 50,
            visitor_yen: 10,
        }
    }
}

impl RankportConfig {
    /// `~/.rankport/config.toml`
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".rankport")
            .join("config.toml")
    }

    /// Load from a TOML file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RankportError::internal(format!("Read config {}: {e}", path.display())))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| RankportError::validation(format!("Parse config: {e}")))
    }

    /// Resolve the config file (`RANKPORT_CONFIG` or the default path), fall back to
    /// defaults when it doesn't exist, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = std::env::var("RANKPORT_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| Self::default_path());
        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            tracing::debug!("no config at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply `RANKPORT_*` overrides from `lookup` (normally the process environment).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("RANKPORT_HOST") {
            self.server.host = v;
        }
        if let Some(port) = lookup("RANKPORT_PORT").and_then(|v| v.parse().ok()) {
            self.server.port = port;
        }
        if let Some(v) = lookup("RANKPORT_BASE_HOSTNAME") {
            self.server.base_hostname = v;
        }
        if let Some(v) = lookup("RANKPORT_ADMIN_HOSTNAME") {
            self.server.admin_hostname = v;
        }
        if let Some(v) = lookup("RANKPORT_CENTER_DB") {
            self.storage.center_db_path = v;
        }
        if let Some(v) = lookup("RANKPORT_TENANT_DB_DIR") {
            self.storage.tenant_db_dir = v;
        }
        if let Some(v) = lookup("RANKPORT_JWT_KEY_FILE") {
            self.auth.jwt_public_key_path = Some(v);
        }
        if let Some(v) = lookup("RANKPORT_JWT_SECRET") {
            self.auth.jwt_secret = Some(v);
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| RankportError::internal(format!("Serialize config: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let cfg = RankportConfig::default();
        assert_eq!(cfg.server.port, 3000);
        assert_eq!(cfg.auth.cookie_name, "rankport_session");
        assert_eq!(cfg.billing, BillingConfig { scorer_visitor_yen: 100, scorer_yen: 50, visitor_yen: 10 });
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let cfg = RankportConfig::from_toml(
            r#"
            [server]
            port = 8080

            [billing]
            visitor_yen = 20
            "#,
        )
        .unwrap();
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.server.host, "0.0.0.0");
        assert_eq!(cfg.billing.visitor_yen, 20);
        assert_eq!(cfg.billing.scorer_yen, 50);
    }

    #[test]
    fn test_invalid_toml() {
        let err = RankportConfig::from_toml("[server\nport = ").unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("RANKPORT_PORT", "4000"),
            ("RANKPORT_TENANT_DB_DIR", ""),
            ("RANKPORT_JWT_SECRET", "s3cret"),
        ]);
        let mut cfg = RankportConfig::default();
        cfg.apply_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.server.port, 4000);
        assert_eq!(cfg.storage.tenant_db_dir, "");
        assert_eq!(cfg.auth.jwt_secret.as_deref(), Some("s3cret"));
        assert!(cfg.auth.jwt_public_key_path.is_none());
    }

    #[test]
    fn test_toml_roundtrip_of_defaults() {
        let text = RankportConfig::default().to_toml().unwrap();
        let back = RankportConfig::from_toml(&text).unwrap();
        assert_eq!(back.storage.center_db_path, "rankport.db");
    }
}
