//! Service configuration, read from TOML
use super::lifecycle::Request;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("configuration validation failed: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    pub store: StoreConfig,
    pub ids: IdConfig,
    pub cancel: CancelPolicy,
    pub log_level: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    pub path: PathBuf,
    pub temporary: bool, // sled removes the files on drop
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IdConfig {
    pub request_prefix: String, // bech32 hrp
}

/// Who may cancel a draft or pending request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CancelPolicy {
    pub requester_may_cancel: bool,
    pub administrators: Vec<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            ids: IdConfig::default(),
            cancel: CancelPolicy::default(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("approvals.db"),
            temporary: false,
        }
    }
}

impl Default for IdConfig {
    fn default() -> Self {
        Self {
            request_prefix: "req_".to_string(),
        }
    }
}

impl Default for CancelPolicy {
    fn default() -> Self {
        Self {
            requester_may_cancel: true,
            administrators: vec![],
        }
    }
}

impl CancelPolicy {
    pub fn allows(&self, request: &Request, actor_id: &str) -> bool {
        (self.requester_may_cancel && request.requester_id == actor_id)
            || self.administrators.iter().any(|admin| admin == actor_id)
    }
}

impl ServiceConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("could not read config file `{}`", path.display()))?;
        Self::from_toml_str(&raw)
            .with_context(|| format!("could not load config file `{}`", path.display()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ids.request_prefix.is_empty() {
            return Err(ConfigError::Invalid("ids.request_prefix must not be empty".into()));
        }
        bech32::Hrp::parse(&self.ids.request_prefix).map_err(|e| {
            ConfigError::Invalid(format!(
                "ids.request_prefix `{}` is not a bech32 prefix: {e}",
                self.ids.request_prefix
            ))
        })?;
        // ids are always encoded lowercase
        if self.ids.request_prefix != self.ids.request_prefix.to_ascii_lowercase() {
            return Err(ConfigError::Invalid(format!(
                "ids.request_prefix `{}` must be lowercase",
                self.ids.request_prefix
            )));
        }
        if !self.cancel.requester_may_cancel && self.cancel.administrators.is_empty() {
            return Err(ConfigError::Invalid(
                "cancel policy allows nobody to cancel a request".into(),
            ));
        }
        if !self.store.temporary && self.store.path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("store.path must not be empty".into()));
        }
        Ok(())
    }

    pub fn sled_config(&self) -> sled::Config {
        sled::Config::new()
            .path(&self.store.path)
            .temporary(self.store.temporary)
    }
}
