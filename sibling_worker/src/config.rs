//! # Sibling Configuration
//!
//! [`SiblingConfig`] holds everything a host needs to talk to its siblings:
//! where the control channel lives, the fixed names used by the spawn and
//! delivery protocols, which protocol generation is spoken, and where the
//! attestation device is.
//!
//! Configuration is layered:
//!
//! 1. Built-in defaults (every field has one).
//! 2. A TOML file, loaded with [`SiblingConfig::load_from_file`].
//! 3. Environment overrides, applied by [`SiblingConfig::apply_env_overrides`]:
//!    `SIBLING_CONTROL_URL`, `SIBLING_REQUEST_TIMEOUT_SECS`,
//!    `SIBLING_ATTESTATION_DEVICE`.
//! 4. CLI flags, applied by the binary.

use crate::error::{Result, WorkerError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONTROL_URL: &str = "http://workerd.local/";
pub const DEFAULT_CREATE_PATH: &str = "workers";
pub const DEFAULT_ENTRYPOINT_NAME: &str = "DedicatedWorkerGlobalScope";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

/// Which generation of the spawn protocol the host speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProtocolGeneration {
    /// Inbound handler registered under the locally generated id.
    #[default]
    IdKeyed,
    /// Inbound handler registered under the name returned by the creation
    /// response, falling back to the id.
    NameKeyed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SiblingConfig {
    #[serde(default = "default_control_url")]
    pub control_url: String,
    #[serde(default = "default_create_path")]
    pub create_path: String,
    /// Entrypoint addressed on the sibling by every delivery
    #[serde(default = "default_entrypoint_name")]
    pub entrypoint_name: String,
    #[serde(default)]
    pub protocol: ProtocolGeneration,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_attestation_device")]
    pub attestation_device: PathBuf,
}

fn default_control_url() -> String {
    DEFAULT_CONTROL_URL.to_string()
}

fn default_create_path() -> String {
    DEFAULT_CREATE_PATH.to_string()
}

fn default_entrypoint_name() -> String {
    DEFAULT_ENTRYPOINT_NAME.to_string()
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_attestation_device() -> PathBuf {
    PathBuf::from(sibling_attest::DEFAULT_DEVICE_PATH)
}

impl Default for SiblingConfig {
    fn default() -> Self {
        Self {
            control_url: default_control_url(),
            create_path: default_create_path(),
            entrypoint_name: default_entrypoint_name(),
            protocol: ProtocolGeneration::default(),
            request_timeout_secs: default_request_timeout_secs(),
            attestation_device: default_attestation_device(),
        }
    }
}

impl SiblingConfig {
    /// Load a configuration file. Missing fields take their defaults.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| WorkerError::Config(format!("failed to read {}: {e}", path.display())))?;
        let config: SiblingConfig = toml::from_str(&contents)
            .map_err(|e| WorkerError::Config(format!("failed to parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `SIBLING_*` environment overrides. Unparseable values are ignored.
    pub fn apply_env_overrides(mut self) -> Self {
        if let Some(url) = control_url_override() {
            self.control_url = url;
        }
        if let Some(secs) = request_timeout_secs_override() {
            self.request_timeout_secs = secs;
        }
        if let Some(device) = attestation_device_override() {
            self.attestation_device = device;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.control_url)?;
        if self.create_path.is_empty() {
            return Err(WorkerError::Config("create_path must not be empty".to_string()));
        }
        if self.entrypoint_name.is_empty() {
            return Err(WorkerError::Config(
                "entrypoint_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn control_url_override() -> Option<String> {
    std::env::var("SIBLING_CONTROL_URL")
        .ok()
        .filter(|s| !s.is_empty())
}

fn request_timeout_secs_override() -> Option<u64> {
    std::env::var("SIBLING_REQUEST_TIMEOUT_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
}

fn attestation_device_override() -> Option<PathBuf> {
    std::env::var_os("SIBLING_ATTESTATION_DEVICE").map(PathBuf::from)
}
