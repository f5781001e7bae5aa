//! Encryption status of the persistent store and its publication.

use crate::config::VaultmgrConfig;
use crate::error::{VaultError, VaultResult};
use crate::provider::{EncryptionTool, HardwareShareSource, StatusPublisher};
use chrono::{DateTime, Utc};
use log::{debug, error};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const INIT_FAILURE: &str = "Initialization failure";
pub const INCOMPATIBLE_FS: &str = "File system is incompatible, needs a disruptive upgrade";
pub const NO_TPM: &str = "No active TPM found, but needed for key generation";

/// Data-at-rest encryption state reported for a vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataSecAtRestStatus {
    Disabled,
    Enabled,
    Error,
}

/// Record published on the status bus, keyed by `name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VaultStatus {
    pub name: String,
    pub status: DataSecAtRestStatus,
    #[serde(default)]
    pub error_text: String,
    #[serde(default)]
    pub error_timestamp: Option<DateTime<Utc>>,
}

impl VaultStatus {
    pub fn enabled(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: DataSecAtRestStatus::Enabled,
            error_text: String::new(),
            error_timestamp: None,
        }
    }

    /// Status with `detail` stamped at the current time.
    pub fn with_error_now(
        name: impl Into<String>,
        status: DataSecAtRestStatus,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            status,
            error_text: detail.into(),
            error_timestamp: Some(Utc::now()),
        }
    }

    pub fn key(&self) -> &str {
        &self.name
    }
}

/// Determines the store-wide status by probing the encryption tool.
pub struct StatusResolver<T: EncryptionTool> {
    config: Arc<VaultmgrConfig>,
    tool: T,
    hardware: Arc<dyn HardwareShareSource>,
}

impl<T: EncryptionTool> StatusResolver<T> {
    pub fn new(config: Arc<VaultmgrConfig>, tool: T, hardware: Arc<dyn HardwareShareSource>) -> Self {
        Self {
            config,
            tool,
            hardware,
        }
    }

    /// Store-wide status and detail text.
    pub fn fetch_status(&self) -> (DataSecAtRestStatus, String) {
        if Path::new(&self.config.tool.fscrypt_conf).exists() {
            match self.tool.mount_status() {
                Err(err) => {
                    debug!("setting status to Error: {err}");
                    (DataSecAtRestStatus::Error, INIT_FAILURE.to_string())
                }
                Ok(_) => {
                    debug!("setting status to Enabled");
                    (DataSecAtRestStatus::Enabled, String::new())
                }
            }
        } else if self.hardware.present() {
            debug!("setting status to Disabled, filesystem predates encryption support");
            (DataSecAtRestStatus::Disabled, INCOMPATIBLE_FS.to_string())
        } else {
            debug!("setting status to Disabled, no TPM in use");
            (DataSecAtRestStatus::Disabled, NO_TPM.to_string())
        }
    }

    /// Build the record for one vault. An `Enabled` input is re-checked
    /// against the vault directory and downgraded to `Error` if that fails.
    pub fn vault_status(
        &self,
        name: &str,
        vault_path: &Path,
        status: DataSecAtRestStatus,
        detail: &str,
    ) -> VaultStatus {
        if status != DataSecAtRestStatus::Enabled {
            return VaultStatus::with_error_now(name, status, detail);
        }
        match self.tool.path_status(vault_path) {
            Ok(_) => VaultStatus::enabled(name),
            Err(err) => {
                error!("status of {} failed: {err}", vault_path.display());
                VaultStatus::with_error_now(name, DataSecAtRestStatus::Error, err.tool_output())
            }
        }
    }

    /// Resolve and publish the record for one vault.
    pub fn publish_vault_status(
        &self,
        publisher: &dyn StatusPublisher,
        name: &str,
        vault_path: &Path,
        status: DataSecAtRestStatus,
        detail: &str,
    ) -> VaultResult<VaultStatus> {
        let record = self.vault_status(name, vault_path, status, detail);
        debug!("publishing VaultStatus {}", record.key());
        publisher.publish(&record)?;
        Ok(record)
    }
}

/// Publishes each record as `<dir>/<name>.json`, replacing it atomically.
#[derive(Debug, Clone)]
pub struct JsonDirPublisher {
    dir: PathBuf,
}

impl JsonDirPublisher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn record_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }

    pub fn read(&self, name: &str) -> VaultResult<VaultStatus> {
        let contents = fs::read_to_string(self.record_path(name))?;
        Ok(serde_json::from_str(&contents)?)
    }
}

impl StatusPublisher for JsonDirPublisher {
    fn publish(&self, status: &VaultStatus) -> VaultResult<()> {
        let publish_err = |reason: String| VaultError::Publish {
            name: status.name.clone(),
            reason,
        };
        fs::create_dir_all(&self.dir).map_err(|err| publish_err(err.to_string()))?;
        let payload = serde_json::to_vec_pretty(status)?;
        let target = self.record_path(&status.name);
        let temp = self.dir.join(format!(".{}.json.tmp", status.name));
        fs::write(&temp, payload).map_err(|err| publish_err(err.to_string()))?;
        fs::rename(&temp, &target).map_err(|err| publish_err(err.to_string()))?;
        Ok(())
    }
}
