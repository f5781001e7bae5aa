//! Vault key derivation from the hardware share and the remote share.

use crate::error::{VaultError, VaultResult};
use crate::keyfile::SecretShare;
use crate::provider::{HardwareShareSource, RemoteShareSource};
use log::{info, warn};
use std::fmt;
use std::sync::Arc;
use zeroize::Zeroizing;

pub const VAULT_KEY_LEN: usize = 32;
pub const VAULT_HALF_KEY_LEN: usize = 16;

/// Fixed-length vault key. Zeroed on drop; never printed.
pub struct KeyMaterial(Zeroizing<[u8; VAULT_KEY_LEN]>);

impl KeyMaterial {
    pub fn from_slice(bytes: &[u8]) -> VaultResult<Self> {
        if bytes.len() != VAULT_KEY_LEN {
            return Err(VaultError::InvalidKeyLength {
                expected: VAULT_KEY_LEN,
                actual: bytes.len(),
            });
        }
        let mut key = Zeroizing::new([0u8; VAULT_KEY_LEN]);
        key.copy_from_slice(bytes);
        Ok(Self(key))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0[..]
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyMaterial(<redacted>)")
    }
}

/// Combine two 32-byte shares: first half of `a`, second half of `b`.
///
/// Either half can be rotated on its own, which the protector migration relies on.
pub fn merge_vault_key_shares(a: &[u8], b: &[u8]) -> VaultResult<KeyMaterial> {
    for share in [a, b] {
        if share.len() != VAULT_KEY_LEN {
            return Err(VaultError::InvalidKeyLength {
                expected: VAULT_KEY_LEN,
                actual: share.len(),
            });
        }
    }

    let mut merged = Zeroizing::new([0u8; VAULT_KEY_LEN]);
    merged[..VAULT_HALF_KEY_LEN].copy_from_slice(&a[..VAULT_HALF_KEY_LEN]);
    merged[VAULT_HALF_KEY_LEN..].copy_from_slice(&b[VAULT_HALF_KEY_LEN..]);
    Ok(KeyMaterial(merged))
}

/// Stand-in for the controller-delivered share.
///
/// There is no secure channel to the controller yet, so every device gets the
/// same fixed value. Replace this source once the controller can deliver a
/// per-device share; nothing else in the crate assumes the value.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderCloudShare;

const PLACEHOLDER_CLOUD_SHARE: &[u8; VAULT_KEY_LEN] = b"foobarfoobarfoobarfoobarfoobarfo";

impl RemoteShareSource for PlaceholderCloudShare {
    fn remote_share(&self) -> VaultResult<SecretShare> {
        Ok(Zeroizing::new(PLACEHOLDER_CLOUD_SHARE.to_vec()))
    }
}

/// Outcome of a derivation. `hardware_error` is set when the hardware share
/// could not be read and `material` is the remote share alone.
#[derive(Debug)]
pub struct DerivedKey {
    pub material: KeyMaterial,
    pub hardware_error: Option<VaultError>,
}

impl DerivedKey {
    /// Accept only a full (hardware-combined) or explicitly cloud-only key.
    pub fn into_full(self) -> VaultResult<KeyMaterial> {
        match self.hardware_error {
            Some(err) => Err(err),
            None => Ok(self.material),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.hardware_error.is_some()
    }
}

/// Produces vault key material from the two share sources.
#[derive(Clone)]
pub struct KeyDeriver {
    remote: Arc<dyn RemoteShareSource>,
    hardware: Arc<dyn HardwareShareSource>,
}

impl KeyDeriver {
    pub fn new(remote: Arc<dyn RemoteShareSource>, hardware: Arc<dyn HardwareShareSource>) -> Self {
        Self { remote, hardware }
    }

    /// Derive the vault key. With `cloud_key_only` the hardware source is never contacted.
    pub fn derive_vault_key(&self, cloud_key_only: bool) -> VaultResult<DerivedKey> {
        let cloud_share = self.remote.remote_share()?;
        if cloud_key_only {
            info!("using cloud key share only");
            return Ok(DerivedKey {
                material: KeyMaterial::from_slice(&cloud_share)?,
                hardware_error: None,
            });
        }

        match self.hardware.hardware_share() {
            Ok(hardware_share) => {
                info!("merging hardware and cloud key shares");
                Ok(DerivedKey {
                    material: merge_vault_key_shares(&hardware_share, &cloud_share)?,
                    hardware_error: None,
                })
            }
            Err(err) => {
                warn!("hardware key share unavailable: {err}");
                Ok(DerivedKey {
                    material: KeyMaterial::from_slice(&cloud_share)?,
                    hardware_error: Some(err),
                })
            }
        }
    }
}
