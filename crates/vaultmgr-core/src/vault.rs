//! Per-vault lifecycle: absent → created/locked → unlocked.

use crate::config::VaultmgrConfig;
use crate::error::VaultResult;
use crate::protector::ProtectorMigrator;
use crate::provider::{EncryptionTool, KeyringLinker, PolicyUnlock};
use crate::staging::KeyStager;
use log::{debug, error, info};
use std::fs::{self, DirBuilder};
use std::os::unix::fs::DirBuilderExt;
use std::path::Path;
use std::sync::Arc;

/// Observed state of a vault directory before setup acts on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultState {
    Absent,
    /// Exists, not encrypted, empty: safe to create.
    NeedsCreation,
    /// Exists, not encrypted, holds data the agent does not own.
    Foreign,
    /// Encrypted and locked.
    Locked,
    /// Encrypted and already unlocked in this boot.
    Unlocked,
}

/// What `setup_vault` ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupOutcome {
    /// Deprecated vault that does not exist; left dormant.
    Dormant,
    /// Non-empty or deprecated unencrypted directory left as found.
    Untouched,
    Created,
    Unlocked,
    /// Unlocked with the cloud-only key, then migrated to the combined key.
    Migrated,
}

/// Drives vault creation, unlock, and fallback recovery against an encryption tool.
pub struct VaultManager<T: EncryptionTool> {
    config: Arc<VaultmgrConfig>,
    tool: T,
    keyring: Arc<dyn KeyringLinker>,
    stager: KeyStager,
}

impl<T: EncryptionTool> VaultManager<T> {
    pub fn new(
        config: Arc<VaultmgrConfig>,
        tool: T,
        keyring: Arc<dyn KeyringLinker>,
        stager: KeyStager,
    ) -> Self {
        Self {
            config,
            tool,
            keyring,
            stager,
        }
    }

    pub fn config(&self) -> &VaultmgrConfig {
        &self.config
    }

    pub fn tool(&self) -> &T {
        &self.tool
    }

    pub fn migrator(&self) -> ProtectorMigrator<'_, T> {
        ProtectorMigrator::new(&self.config, &self.tool, &self.stager)
    }

    /// Make sure the tool's global config exists and the persistent mount is
    /// prepared for encryption metadata.
    pub fn prepare_environment(&self) -> VaultResult<()> {
        self.tool.setup_global()?;
        if let Err(err) = self.tool.mount_status() {
            info!(
                "{} not set up for encryption yet ({err}); preparing first use",
                self.config.mount_point()
            );
            self.tool.setup_mount()?;
        }
        Ok(())
    }

    /// Classify `vault_path` without changing anything.
    pub fn inspect(&self, vault_path: &Path) -> VaultResult<VaultState> {
        if !vault_path.exists() {
            return Ok(VaultState::Absent);
        }
        if let Ok(listing) = self.tool.path_status(vault_path) {
            return Ok(match listing.directory_unlocked {
                Some(PolicyUnlock::Yes) => VaultState::Unlocked,
                _ => VaultState::Locked,
            });
        }
        if is_dir_empty(vault_path) {
            Ok(VaultState::NeedsCreation)
        } else {
            Ok(VaultState::Foreign)
        }
    }

    /// Bring one vault to the unlocked state, creating it when it is new.
    ///
    /// A deprecated vault is only ever unlocked. Unencrypted directories that
    /// already hold data are never encrypted over.
    pub fn setup_vault(&self, vault_path: &Path, deprecated: bool) -> VaultResult<SetupOutcome> {
        if !vault_path.exists() {
            if deprecated {
                info!(
                    "vault {} is deprecated and absent; not creating it",
                    vault_path.display()
                );
                return Ok(SetupOutcome::Dormant);
            }
            DirBuilder::new()
                .recursive(true)
                .mode(0o755)
                .create(vault_path)?;
        }

        if let Err(err) = self.tool.path_status(vault_path) {
            debug!("status for {}: {err}", vault_path.display());
            if deprecated || !is_dir_empty(vault_path) {
                info!(
                    "not disturbing non-empty or deprecated vault {} (deprecated={deprecated})",
                    vault_path.display()
                );
                return Ok(SetupOutcome::Untouched);
            }
            self.create_vault(vault_path)?;
            return Ok(SetupOutcome::Created);
        }

        info!("unlocking {}", vault_path.display());
        match self.unlock_vault(vault_path, false) {
            Ok(()) => {
                info!("unlocked {}", vault_path.display());
                Ok(SetupOutcome::Unlocked)
            }
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => {
                info!(
                    "unlocking {} with fallback key after: {err}",
                    vault_path.display()
                );
                self.unlock_vault(vault_path, true)?;
                info!("migrating protector of {} to the combined key", vault_path.display());
                self.migrator().change_protector(vault_path)?;
                Ok(SetupOutcome::Migrated)
            }
        }
    }

    /// Encrypt the existing, empty `vault_path` under a fresh protector.
    pub fn create_vault(&self, vault_path: &Path) -> VaultResult<()> {
        self.migrator().remove_protector_if_any(vault_path)?;

        let staging = &self.config.staging;
        let staged = self
            .stager
            .stage(false, &staging.key_dir, &staging.key_file())?;

        let label = self.config.protector_label(vault_path);
        if let Err(err) = self.tool.encrypt(vault_path, staged.key_file(), &label) {
            error!("encryption of {} failed: {err}", vault_path.display());
            return Err(err);
        }
        info!("created vault {} with protector {label}", vault_path.display());
        self.keyring.link_session_keyring()
    }

    /// Unlock `vault_path` with the combined key, or the cloud-only key in fallback mode.
    ///
    /// The keyring is linked once per attempt, whether or not the unlock itself worked.
    pub fn unlock_vault(&self, vault_path: &Path, cloud_key_only: bool) -> VaultResult<()> {
        let staging = &self.config.staging;
        let staged = self
            .stager
            .stage(cloud_key_only, &staging.key_dir, &staging.key_file())?;

        let unlocked = self.tool.unlock(vault_path, staged.key_file());
        let linked = self.keyring.link_session_keyring();
        drop(staged);

        if let Err(err) = &unlocked {
            error!("error unlocking {}: {err}", vault_path.display());
        }
        unlocked?;
        linked
    }
}

/// Unreadable directories count as non-empty so they are never encrypted over.
fn is_dir_empty(path: &Path) -> bool {
    match fs::read_dir(path) {
        Ok(mut entries) => entries.next().is_none(),
        Err(err) => {
            error!("error reading {}: {err}", path.display());
            false
        }
    }
}
