//! Protector migration and idempotent protector/policy removal.

use crate::config::VaultmgrConfig;
use crate::error::VaultResult;
use crate::provider::EncryptionTool;
use crate::staging::KeyStager;
use log::{debug, error, info, warn};
use std::path::Path;

/// Works on the protector and policy objects the encryption tool keeps for a vault.
pub struct ProtectorMigrator<'a, T: EncryptionTool> {
    config: &'a VaultmgrConfig,
    tool: &'a T,
    stager: &'a KeyStager,
}

impl<'a, T: EncryptionTool> ProtectorMigrator<'a, T> {
    pub fn new(config: &'a VaultmgrConfig, tool: &'a T, stager: &'a KeyStager) -> Self {
        Self {
            config,
            tool,
            stager,
        }
    }

    /// Re-wrap the vault's raw-key protector from the cloud-only key to the
    /// combined key, so the next boot unlocks without the fallback.
    ///
    /// Returns `Ok(false)` when the vault lists no raw-key protector.
    pub fn change_protector(&self, vault_path: &Path) -> VaultResult<bool> {
        let listing = self.tool.path_status(vault_path)?;
        let Some(protector) = listing.raw_key_protector(None) else {
            info!(
                "no raw key protector listed for {}; nothing to migrate",
                vault_path.display()
            );
            return Ok(false);
        };

        let staging = &self.config.staging;
        let old_key = self
            .stager
            .stage(true, &staging.old_key_dir, &staging.old_key_file())?;
        let new_key = self
            .stager
            .stage(false, &staging.key_dir, &staging.key_file())?;

        if let Err(err) =
            self.tool
                .change_passphrase(&protector.id, new_key.key_file(), old_key.key_file())
        {
            error!("error changing protector key for {}: {err}", vault_path.display());
            debug!("{}", err.tool_output());
            return Err(err);
        }

        info!("changed key for protector {}", protector.id);
        Ok(true)
    }

    /// Destroy this vault's labelled protector and the policy bound to it.
    ///
    /// An absent protector is success, and so is a mount that cannot be
    /// listed. An absent policy after the protector is gone is tolerated.
    pub fn remove_protector_if_any(&self, vault_path: &Path) -> VaultResult<()> {
        let label = self.config.protector_label(vault_path);
        let listing = match self.tool.mount_status() {
            Ok(listing) => listing,
            Err(err) => {
                warn!("cannot list protectors, assuming none named {label}: {err}");
                return Ok(());
            }
        };
        let Some(protector) = listing.raw_key_protector(Some(&label)) else {
            debug!("no protector named {label}; nothing to remove");
            return Ok(());
        };
        let protector_id = protector.id.clone();

        info!(
            "removing protector {protector_id} for vault {}",
            vault_path.display()
        );
        self.tool.destroy_protector(&protector_id)?;

        let listing = self.tool.mount_status()?;
        match listing.policy_for_protector(&protector_id) {
            Some(policy) => {
                info!(
                    "removing policy {} for vault {}",
                    policy.id,
                    vault_path.display()
                );
                self.tool.destroy_policy(&policy.id)?;
            }
            None => debug!("no policy bound to protector {protector_id}"),
        }
        Ok(())
    }
}
