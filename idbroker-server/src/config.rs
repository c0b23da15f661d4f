use std::{collections::HashSet, path::PathBuf, time::Duration};

use serde::Deserialize;

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file `{0}`: {1}")]
    ReadConfigFile(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse config file `{0}`: {1}")]
    ParseConfigFile(PathBuf, #[source] toml::de::Error),

    #[error("Config must declare at least one connector")]
    NoConnectors,

    #[error("Duplicate connector id `{0}`")]
    DuplicateConnectorId(String),

    #[error("issuer must be an absolute http(s) URL, got `{0}`")]
    InvalidIssuer(String),
}

/// Static description of a connector instance. `config` is opaque and
/// owned by the connector type.
#[derive(Clone, Debug, Deserialize)]
pub struct ConnectorConfig {
    pub id: String,
    #[serde(rename = "type")]
    pub connector_type: String,
    pub name: String,
    #[serde(default)]
    pub config: toml::Value,
}

#[derive(Clone, Debug, Deserialize)]
struct RawRefreshTokenPolicy {
    #[serde(default = "default_true")]
    rotation_enabled: bool,
    #[serde(default)]
    absolute_lifetime_secs: u64,
    #[serde(default)]
    valid_if_not_used_for_secs: u64,
    #[serde(default = "default_reuse_interval")]
    reuse_interval_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_reuse_interval() -> u64 {
    30
}

impl Default for RawRefreshTokenPolicy {
    fn default() -> Self {
        Self {
            rotation_enabled: true,
            absolute_lifetime_secs: 0,
            valid_if_not_used_for_secs: 0,
            reuse_interval_secs: default_reuse_interval(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RefreshTokenPolicyConfig {
    pub rotation_enabled: bool,
    pub absolute_lifetime: Duration,
    pub valid_if_not_used_for: Duration,
    pub reuse_interval: Duration,
}

impl From<RawRefreshTokenPolicy> for RefreshTokenPolicyConfig {
    fn from(raw: RawRefreshTokenPolicy) -> Self {
        Self {
            rotation_enabled: raw.rotation_enabled,
            absolute_lifetime: Duration::from_secs(raw.absolute_lifetime_secs),
            valid_if_not_used_for: Duration::from_secs(raw.valid_if_not_used_for_secs),
            reuse_interval: Duration::from_secs(raw.reuse_interval_secs),
        }
    }
}

#[derive(Clone, Debug)]
pub struct KeyRotationConfig {
    pub rotation_frequency: Duration,
    pub id_token_valid_for: Duration,
    /// "Static" mode: fixed key, century-long rotation intervals.
    pub static_mode: bool,
}

impl Default for KeyRotationConfig {
    fn default() -> Self {
        Self {
            rotation_frequency: Duration::from_secs(6 * 3600),
            id_token_valid_for: Duration::from_secs(6 * 3600 + 3600),
            static_mode: false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub issuer: String,
    pub port: u16,
    /// `None` selects the in-memory storage backend (tests, single-node dev).
    pub database_url: Option<String>,
    pub connectors: Vec<ConnectorConfig>,
    pub refresh_policy: RefreshTokenPolicyConfig,
    pub key_rotation: KeyRotationConfig,
    pub id_token_ttl: Duration,
    pub skip_approval: bool,
    pub request_timeout: Duration,
}

impl ServerConfig {
    pub fn from_toml_file(path: &PathBuf) -> ConfigResult<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadConfigFile(path.clone(), e))?;
        let raw: RawServerConfig = toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseConfigFile(path.clone(), e))?;
        raw.resolve()
    }

    pub fn jwks_uri(&self) -> String {
        format!("{}/keys", self.issuer)
    }

    pub fn authorization_endpoint(&self) -> String {
        format!("{}/auth", self.issuer)
    }

    pub fn token_endpoint(&self) -> String {
        format!("{}/token", self.issuer)
    }
}

#[derive(Clone, Debug, Deserialize)]
struct RawServerConfig {
    issuer: String,
    #[serde(default = "default_port")]
    port: u16,
    database_url: Option<String>,
    #[serde(default)]
    connectors: Vec<ConnectorConfig>,
    #[serde(default)]
    refresh_policy: RawRefreshTokenPolicy,
    #[serde(default)]
    key_rotation_frequency_secs: Option<u64>,
    #[serde(default)]
    id_token_valid_for_secs: Option<u64>,
    #[serde(default)]
    static_keys: bool,
    #[serde(default)]
    id_token_ttl_secs: Option<u64>,
    #[serde(default)]
    skip_approval: bool,
    #[serde(default = "default_request_timeout_secs")]
    request_timeout_secs: u64,
}

fn default_port() -> u16 {
    5556
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl RawServerConfig {
    fn resolve(self) -> ConfigResult<ServerConfig> {
        let issuer = self.issuer.trim_end_matches('/').to_string();
        if !(issuer.starts_with("http://") || issuer.starts_with("https://")) {
            return Err(ConfigError::InvalidIssuer(issuer));
        }

        if self.connectors.is_empty() {
            return Err(ConfigError::NoConnectors);
        }
        let mut seen = HashSet::new();
        for c in &self.connectors {
            if !seen.insert(c.id.clone()) {
                return Err(ConfigError::DuplicateConnectorId(c.id.clone()));
            }
        }

        let key_rotation = if self.static_keys {
            KeyRotationConfig {
                rotation_frequency: Duration::from_secs(100 * 365 * 24 * 3600),
                id_token_valid_for: Duration::from_secs(100 * 365 * 24 * 3600),
                static_mode: true,
            }
        } else {
            KeyRotationConfig {
                rotation_frequency: self
                    .key_rotation_frequency_secs
                    .map(Duration::from_secs)
                    .unwrap_or_else(|| KeyRotationConfig::default().rotation_frequency),
                id_token_valid_for: self
                    .id_token_valid_for_secs
                    .map(Duration::from_secs)
                    .unwrap_or_else(|| KeyRotationConfig::default().id_token_valid_for),
                static_mode: false,
            }
        };

        Ok(ServerConfig {
            issuer,
            port: self.port,
            database_url: self.database_url,
            connectors: self.connectors,
            refresh_policy: self.refresh_policy.into(),
            key_rotation,
            id_token_ttl: Duration::from_secs(self.id_token_ttl_secs.unwrap_or(3600)),
            skip_approval: self.skip_approval,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    struct TempFile {
        path: PathBuf,
    }

    impl TempFile {
        fn new(contents: &str) -> Self {
            let path = std::env::temp_dir()
                .join(format!("idbroker-test-{}.toml", uuid::Uuid::new_v4()));
            let mut f = std::fs::File::create(&path).unwrap();
            f.write_all(contents.as_bytes()).unwrap();
            Self { path }
        }
    }

    impl Drop for TempFile {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }

    #[test]
    fn rejects_missing_connectors() {
        let f = TempFile::new(
            r#"
            issuer = "https://idp.example.com"
            "#,
        );
        let err = ServerConfig::from_toml_file(&f.path).unwrap_err();
        assert!(matches!(err, ConfigError::NoConnectors));
    }

    #[test]
    fn rejects_duplicate_connector_ids() {
        let f = TempFile::new(
            r#"
            issuer = "https://idp.example.com"
            [[connectors]]
            id = "mock"
            type = "mock"
            name = "Mock"
            [[connectors]]
            id = "mock"
            type = "local"
            name = "Local"
            "#,
        );
        let err = ServerConfig::from_toml_file(&f.path).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateConnectorId(_)));
    }

    #[test]
    fn rejects_non_http_issuer() {
        let f = TempFile::new(
            r#"
            issuer = "idp.example.com"
            [[connectors]]
            id = "mock"
            type = "mock"
            name = "Mock"
            "#,
        );
        let err = ServerConfig::from_toml_file(&f.path).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidIssuer(_)));
    }

    #[test]
    fn accepts_minimal_valid_config() {
        let f = TempFile::new(
            r#"
            issuer = "https://idp.example.com"
            [[connectors]]
            id = "mock"
            type = "mock"
            name = "Mock"
            "#,
        );
        let cfg = ServerConfig::from_toml_file(&f.path).unwrap();
        assert_eq!(cfg.issuer, "https://idp.example.com");
        assert_eq!(cfg.port, 5556);
        assert!(cfg.refresh_policy.rotation_enabled);
    }
}
