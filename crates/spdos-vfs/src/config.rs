//! Startup configuration.
//!
//! ```toml
//! max_descriptors = 32
//!
//! [local]
//! max_file_size = 1048576
//!
//! [https]
//! timeout_ms = 5000
//! buffer_limit = 16384
//! index_limit = 262144
//!
//! [netfs]
//! timeout_ms = 2000
//!
//! [[mount]]
//! index = 1
//! protocol = "https"
//! path = "/zx"
//! hostname = "files.example.org"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backends::{DEFAULT_MAX_FILE_SIZE, HttpsOptions, NetFsOptions};
use crate::descriptor::DEFAULT_MAX_DESCRIPTORS;
use crate::error::VfsError;
use crate::mount::{Credentials, MountRequest};
use crate::registry::BackendRegistry;
use crate::vfs::Vfs;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("mount {index} failed: {source}")]
    Mount {
        index: usize,
        #[source]
        source: VfsError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    /// Writes that would grow a RAM file past this fail with `EFBIG`.
    pub max_file_size: u64,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpsConfig {
    pub timeout_ms: u64,
    pub buffer_limit: usize,
    pub index_limit: usize,
}

impl Default for HttpsConfig {
    fn default() -> Self {
        let defaults = HttpsOptions::default();
        Self {
            timeout_ms: defaults.timeout.as_millis() as u64,
            buffer_limit: defaults.buffer_limit,
            index_limit: defaults.index_limit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetFsConfig {
    pub timeout_ms: u64,
}

impl Default for NetFsConfig {
    fn default() -> Self {
        Self {
            timeout_ms: NetFsOptions::default().timeout.as_millis() as u64,
        }
    }
}

/// One `[[mount]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountConfig {
    pub index: usize,
    pub protocol: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl MountConfig {
    pub fn to_request(&self) -> MountRequest {
        MountRequest {
            index: self.index,
            protocol: self.protocol.clone(),
            path: self.path.clone(),
            hostname: self.hostname.clone(),
            credentials: Credentials::from_parts(self.user.as_deref(), self.password.as_deref()),
        }
    }
}

/// Dispatcher configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VfsConfig {
    pub max_descriptors: usize,
    pub local: LocalConfig,
    pub https: HttpsConfig,
    pub netfs: NetFsConfig,
    #[serde(rename = "mount")]
    pub mounts: Vec<MountConfig>,
}

impl Default for VfsConfig {
    fn default() -> Self {
        Self {
            max_descriptors: DEFAULT_MAX_DESCRIPTORS,
            local: LocalConfig::default(),
            https: HttpsConfig::default(),
            netfs: NetFsConfig::default(),
            mounts: Vec::new(),
        }
    }
}

impl VfsConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn https_options(&self) -> HttpsOptions {
        HttpsOptions {
            timeout: Duration::from_millis(self.https.timeout_ms),
            buffer_limit: self.https.buffer_limit,
            index_limit: self.https.index_limit,
        }
    }

    pub fn netfs_options(&self) -> NetFsOptions {
        NetFsOptions {
            timeout: Duration::from_millis(self.netfs.timeout_ms),
        }
    }
}

impl Vfs {
    /// Dispatcher with the default protocols, configured and mounted from
    /// `config`.
    pub fn from_config(config: &VfsConfig) -> Result<Self, ConfigError> {
        Self::from_config_with_registry(config, BackendRegistry::with_defaults(config.https_options()))
    }

    /// Like [`from_config`](Self::from_config), over a caller-built registry
    /// (for network filesystem protocols).
    pub fn from_config_with_registry(
        config: &VfsConfig,
        registry: BackendRegistry,
    ) -> Result<Self, ConfigError> {
        registry
            .ram_store()
            .lock()
            .set_max_file_size(config.local.max_file_size);
        let mut vfs = Vfs::with_registry(registry, config.max_descriptors);
        for mount in &config.mounts {
            vfs.mount(mount.to_request())
                .map_err(|source| ConfigError::Mount {
                    index: mount.index,
                    source,
                })?;
        }
        Ok(vfs)
    }
}
