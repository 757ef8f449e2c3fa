//! Configuration for the protected entity manager and its backends
//!
//! A configuration directory looks like:
//!
//! ```text
//! conf/
//!   s3config.json        optional object-storage endpoint for transports
//!   pes/
//!     fs.pe.json         parameters for the "fs" type manager
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::{CustodianError, Result};

/// File holding the object-storage endpoint configuration
pub const S3_CONFIG_FILE: &str = "s3config.json";
/// Directory holding one parameter file per backend type
pub const PE_CONFIG_DIR: &str = "pes";
/// Suffix of backend parameter files
pub const PE_CONFIG_SUFFIX: &str = ".pe.json";

const DEFAULT_REGION: &str = "us-west-2";

/// Object-storage endpoint used to build presigned transports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S3Config {
    /// Endpoint host name or address
    #[serde(default)]
    pub host: String,
    /// Endpoint port
    #[serde(default)]
    pub port: u16,
    /// Static access key; the default AWS provider chain is used when empty
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub access_key: String,
    /// Static secret key
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub secret: String,
    /// Path prefix in front of every bucket
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub prefix: String,
    /// Base URL used for unsigned transports
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_base: Option<String>,
    /// Signing region
    #[serde(default = "default_region")]
    pub region: String,
}

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 9000,
            access_key: String::new(),
            secret: String::new(),
            prefix: String::new(),
            url_base: None,
            region: default_region(),
        }
    }
}

impl S3Config {
    /// Endpoint URL in the form `http://host:port[/prefix]`
    pub fn endpoint_url(&self) -> String {
        let mut url = format!("http://{}:{}", self.host, self.port);
        let prefix = self.prefix.trim_matches('/');
        if !prefix.is_empty() {
            url.push('/');
            url.push_str(prefix);
        }
        url
    }

    pub fn has_static_credentials(&self) -> bool {
        !self.access_key.is_empty() && !self.secret.is_empty()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(CustodianError::config("S3 endpoint host must not be empty"));
        }
        if self.port == 0 {
            return Err(CustodianError::config("S3 endpoint port must not be zero"));
        }
        Ok(())
    }
}

/// Parameters of the `fs` backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FsConfig {
    /// Directory whose entries are the protected entities
    pub root: PathBuf,
    /// Where snapshots are kept, defaults to `<root>/.snapshots`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshots_dir: Option<PathBuf>,
}

impl FsConfig {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            snapshots_dir: None,
        }
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.snapshots_dir
            .clone()
            .unwrap_or_else(|| self.root.join(".snapshots"))
    }
}

/// Everything needed to build a protected entity manager
#[derive(Debug, Clone, Default)]
pub struct ManagerConfig {
    pub s3: Option<S3Config>,
    /// Raw backend parameters keyed by type name
    pub type_params: BTreeMap<String, serde_json::Value>,
}

impl ManagerConfig {
    /// Load a configuration directory
    ///
    /// # Errors
    /// `Config` if the directory is missing or a file cannot be parsed
    pub fn from_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(CustodianError::config(format!(
                "configuration directory {} does not exist",
                dir.display()
            )));
        }

        let s3_path = dir.join(S3_CONFIG_FILE);
        let s3 = if s3_path.is_file() {
            let config: S3Config = read_json(&s3_path)?;
            config.validate()?;
            Some(config)
        } else {
            None
        };

        let mut type_params = BTreeMap::new();
        let pes_dir = dir.join(PE_CONFIG_DIR);
        if pes_dir.is_dir() {
            let entries = fs::read_dir(&pes_dir).map_err(|e| {
                CustodianError::config(format!("Failed to read {}: {e}", pes_dir.display()))
            })?;
            for entry in entries {
                let path = entry?.path();
                let file_name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                match file_name.strip_suffix(PE_CONFIG_SUFFIX) {
                    Some(type_name) if !type_name.is_empty() => {
                        let params: serde_json::Value = read_json(&path)?;
                        debug!(type_name = %type_name, path = %path.display(), "Loaded backend parameters");
                        type_params.insert(type_name.to_string(), params);
                    }
                    _ => warn!(path = %path.display(), "Ignoring unrecognised file in pes directory"),
                }
            }
        }

        Ok(Self { s3, type_params })
    }

    /// Typed parameters for one backend type, if configured
    pub fn params_for<T: serde::de::DeserializeOwned>(&self, type_name: &str) -> Result<Option<T>> {
        match self.type_params.get(type_name) {
            Some(value) => serde_json::from_value(value.clone()).map(Some).map_err(|e| {
                CustodianError::config(format!("Invalid parameters for type {type_name}: {e}"))
            }),
            None => Ok(None),
        }
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path)
        .map_err(|e| CustodianError::config(format!("Failed to read {}: {e}", path.display())))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| CustodianError::config(format!("Failed to parse {}: {e}", path.display())))
}
