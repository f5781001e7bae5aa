//! Collaborator seams: the directory-encryption tool, keyring, tmpfs mounts,
//! key-share channels, and the status bus.
//!
//! Implementations are expected to stay thin so the lifecycle logic can be
//! exercised without real binaries, TPMs, or root privileges.

use crate::error::VaultResult;
use crate::keyfile::SecretShare;
use crate::status::VaultStatus;
use std::path::Path;
use std::sync::Arc;

/// What a protector row wraps, as reported in the DESCRIPTION column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtectorKind {
    RawKey,
    CustomPassphrase,
    LoginPassphrase,
    Other(String),
}

/// One protector row of a status listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectorEntry {
    pub id: String,
    /// `true` when the protector lives on another filesystem and is only linked here.
    pub linked: bool,
    pub kind: ProtectorKind,
    pub label: Option<String>,
}

/// Unlock state of a policy row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyUnlock {
    Yes,
    No,
    Partially,
    Unknown(String),
}

/// One policy row of a status listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyEntry {
    pub id: String,
    pub unlocked: PolicyUnlock,
    pub protectors: Vec<String>,
}

/// Structured view of a `status` listing for a mountpoint or a directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusListing {
    pub protectors: Vec<ProtectorEntry>,
    pub policies: Vec<PolicyEntry>,
    /// Policy applied to the queried directory, when a directory was queried.
    pub directory_policy: Option<String>,
    pub directory_unlocked: Option<PolicyUnlock>,
}

impl StatusListing {
    /// First native raw-key protector, optionally restricted to `label`.
    pub fn raw_key_protector(&self, label: Option<&str>) -> Option<&ProtectorEntry> {
        self.protectors.iter().find(|p| {
            !p.linked
                && p.kind == ProtectorKind::RawKey
                && label.map_or(true, |want| p.label.as_deref() == Some(want))
        })
    }

    /// Policy that lists `protector_id` among its protectors.
    pub fn policy_for_protector(&self, protector_id: &str) -> Option<&PolicyEntry> {
        self.policies
            .iter()
            .find(|policy| policy.protectors.iter().any(|p| p == protector_id))
    }
}

/// The per-directory encryption tool (fscrypt). Every method maps onto one
/// fixed invocation; non-zero exits surface as `VaultError::ExternalTool`.
pub trait EncryptionTool {
    /// Write the global tool configuration if missing.
    fn setup_global(&self) -> VaultResult<()>;

    /// Prepare the persistent mountpoint for encryption metadata.
    fn setup_mount(&self) -> VaultResult<()>;

    /// List protectors and policies on the persistent mountpoint.
    fn mount_status(&self) -> VaultResult<StatusListing>;

    /// Query one directory; fails when the directory is not encrypted.
    fn path_status(&self, path: &Path) -> VaultResult<StatusListing>;

    /// Encrypt the empty directory `path` under a new raw-key protector named `label`.
    fn encrypt(&self, path: &Path, key_file: &Path, label: &str) -> VaultResult<()>;

    fn unlock(&self, path: &Path, key_file: &Path) -> VaultResult<()>;

    /// Re-wrap protector `protector_id` from `old_key_file` to `key_file`.
    fn change_passphrase(
        &self,
        protector_id: &str,
        key_file: &Path,
        old_key_file: &Path,
    ) -> VaultResult<()>;

    fn destroy_protector(&self, protector_id: &str) -> VaultResult<()>;

    fn destroy_policy(&self, policy_id: &str) -> VaultResult<()>;
}

/// Lets the lifecycle manager and the status resolver share one tool instance.
impl<T: EncryptionTool> EncryptionTool for Arc<T> {
    fn setup_global(&self) -> VaultResult<()> {
        (**self).setup_global()
    }

    fn setup_mount(&self) -> VaultResult<()> {
        (**self).setup_mount()
    }

    fn mount_status(&self) -> VaultResult<StatusListing> {
        (**self).mount_status()
    }

    fn path_status(&self, path: &Path) -> VaultResult<StatusListing> {
        (**self).path_status(path)
    }

    fn encrypt(&self, path: &Path, key_file: &Path, label: &str) -> VaultResult<()> {
        (**self).encrypt(path, key_file, label)
    }

    fn unlock(&self, path: &Path, key_file: &Path) -> VaultResult<()> {
        (**self).unlock(path, key_file)
    }

    fn change_passphrase(
        &self,
        protector_id: &str,
        key_file: &Path,
        old_key_file: &Path,
    ) -> VaultResult<()> {
        (**self).change_passphrase(protector_id, key_file, old_key_file)
    }

    fn destroy_protector(&self, protector_id: &str) -> VaultResult<()> {
        (**self).destroy_protector(protector_id)
    }

    fn destroy_policy(&self, policy_id: &str) -> VaultResult<()> {
        (**self).destroy_policy(policy_id)
    }
}

/// Makes unlocked keys visible to the session (user keyring into session keyring).
pub trait KeyringLinker {
    fn link_session_keyring(&self) -> VaultResult<()>;
}

/// Memory-only mounts used for key staging.
pub trait VolatileMount {
    fn mount(&self, dir: &Path) -> VaultResult<()>;
    fn unmount(&self, dir: &Path) -> VaultResult<()>;
}

/// Remote (controller-held) half of the vault key.
pub trait RemoteShareSource {
    fn remote_share(&self) -> VaultResult<SecretShare>;
}

/// Hardware-sealed half of the vault key.
pub trait HardwareShareSource {
    /// Whether a hardware security module is present on the device.
    fn present(&self) -> bool;

    fn hardware_share(&self) -> VaultResult<SecretShare>;
}

/// Destination for vault status records, keyed by vault name.
pub trait StatusPublisher {
    fn publish(&self, status: &VaultStatus) -> VaultResult<()>;
}

/// Provisioning for stores that use native filesystem encryption instead of fscrypt.
pub trait NativeVaultProvisioner {
    fn setup_native_vaults(&self) -> VaultResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn protector(id: &str, linked: bool, kind: ProtectorKind, label: &str) -> ProtectorEntry {
        ProtectorEntry {
            id: id.to_string(),
            linked,
            kind,
            label: Some(label.to_string()),
        }
    }

    #[test]
    fn raw_key_protector_skips_linked_and_other_kinds() {
        let listing = StatusListing {
            protectors: vec![
                protector("aa01", false, ProtectorKind::CustomPassphrase, "TheVaultKeyvault"),
                protector("aa02", true, ProtectorKind::RawKey, "TheVaultKeyvault"),
                protector("aa03", false, ProtectorKind::RawKey, "TheVaultKeyconfig"),
                protector("aa04", false, ProtectorKind::RawKey, "TheVaultKeyvault"),
            ],
            ..StatusListing::default()
        };
        assert_eq!(
            listing.raw_key_protector(Some("TheVaultKeyvault")).map(|p| p.id.as_str()),
            Some("aa04")
        );
        assert_eq!(
            listing.raw_key_protector(None).map(|p| p.id.as_str()),
            Some("aa03")
        );
        assert!(listing.raw_key_protector(Some("TheVaultKeyimg")).is_none());
    }

    #[test]
    fn policy_for_protector_matches_any_listed_protector() {
        let listing = StatusListing {
            policies: vec![PolicyEntry {
                id: "ff00".to_string(),
                unlocked: PolicyUnlock::No,
                protectors: vec!["aa01".to_string(), "aa02".to_string()],
            }],
            ..StatusListing::default()
        };
        assert_eq!(
            listing.policy_for_protector("aa02").map(|p| p.id.as_str()),
            Some("ff00")
        );
        assert!(listing.policy_for_protector("aa03").is_none());
    }
}
