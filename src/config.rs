use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub ca_store: CaStoreConfig,
    pub generated_store: GeneratedStoreConfig,
    pub issuance: IssuanceConfig,
    pub reload: ReloadConfig,
    pub history: HistoryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaStoreConfig {
    /// Encrypted key store holding the CA's own certificate and private key
    pub path: PathBuf,
    pub password: String,
    /// Store entry the CA identity is read from
    pub alias: String,
}

impl Default for CaStoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("certs/ca.keystore"),
            password: "changeit".to_string(),
            alias: "ca".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedStoreConfig {
    /// Encrypted key store holding all issued certificates, keyed by common name
    pub path: PathBuf,
    pub password: String,
}

impl Default for GeneratedStoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("certs/generated.keystore"),
            password: "changeit".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuanceConfig {
    /// RSA modulus size for generated subject keys
    pub key_bits: usize,
    pub default_validity_days: u32,
}

impl Default for IssuanceConfig {
    fn default() -> Self {
        Self {
            key_bits: 2048,
            default_validity_days: 365,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReloadConfig {
    /// Reload attempts after a CA store file change before giving up
    pub max_attempts: u32,
    /// Delay before each reload attempt
    pub retry_delay_ms: u64,
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_delay_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Sign attempts retained before oldest-first eviction
    pub max_entries: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { max_entries: 100 }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ca_store: CaStoreConfig::default(),
            generated_store: GeneratedStoreConfig::default(),
            issuance: IssuanceConfig::default(),
            reload: ReloadConfig::default(),
            history: HistoryConfig::default(),
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::error::CertmintError::Config(e.to_string()))?;
        Ok(config)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.ca_store.path.as_os_str().is_empty() {
            return Err(crate::error::CertmintError::InvalidConfig(
                "ca_store.path cannot be empty".to_string(),
            ));
        }

        if self.ca_store.password.is_empty() {
            return Err(crate::error::CertmintError::InvalidConfig(
                "ca_store.password cannot be empty".to_string(),
            ));
        }

        if self.ca_store.alias.is_empty() {
            return Err(crate::error::CertmintError::InvalidConfig(
                "ca_store.alias cannot be empty".to_string(),
            ));
        }

        if self.generated_store.path.as_os_str().is_empty() {
            return Err(crate::error::CertmintError::InvalidConfig(
                "generated_store.path cannot be empty".to_string(),
            ));
        }

        if self.generated_store.password.is_empty() {
            return Err(crate::error::CertmintError::InvalidConfig(
                "generated_store.password cannot be empty".to_string(),
            ));
        }

        if self.issuance.key_bits < 2048 {
            return Err(crate::error::CertmintError::InvalidConfig(
                "issuance.key_bits must be at least 2048".to_string(),
            ));
        }

        if self.reload.max_attempts == 0 {
            return Err(crate::error::CertmintError::InvalidConfig(
                "reload.max_attempts must be greater than 0".to_string(),
            ));
        }

        if self.history.max_entries == 0 {
            return Err(crate::error::CertmintError::InvalidConfig(
                "history.max_entries must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
