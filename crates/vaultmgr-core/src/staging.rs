//! Memory-only key staging with guaranteed release.
//!
//! A [`StagedKey`] owns one staging directory for its whole lifetime: the
//! directory is created exclusively, so a second scope on the same path fails
//! instead of nesting. Dropping the guard erases the key file, unmounts the
//! tmpfs, and removes the directory, even when the caller bails out early.

use crate::error::{VaultError, VaultResult};
use crate::keyfile::{secure_erase_file, write_key_file};
use crate::keys::KeyDeriver;
use crate::provider::VolatileMount;
use log::{debug, error};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Stages derived keys for tool consumption.
#[derive(Clone)]
pub struct KeyStager {
    mounts: Arc<dyn VolatileMount>,
    deriver: KeyDeriver,
}

impl KeyStager {
    pub fn new(mounts: Arc<dyn VolatileMount>, deriver: KeyDeriver) -> Self {
        Self { mounts, deriver }
    }

    /// Create `dir`, mount it as tmpfs, derive the key, and write it to `file`.
    ///
    /// A degraded derivation (hardware share missing in full-key mode) fails
    /// the stage. Any step that fails releases what earlier steps acquired.
    pub fn stage(&self, cloud_key_only: bool, dir: &Path, file: &Path) -> VaultResult<StagedKey<'_>> {
        fs::create_dir(dir).map_err(|err| VaultError::staging(dir, format!("mkdir: {err}")))?;
        let mut staged = StagedKey {
            stager: self,
            dir: dir.to_path_buf(),
            file: file.to_path_buf(),
            mounted: false,
            written: false,
        };

        self.mounts.mount(dir).map_err(|err| {
            VaultError::staging(dir, format!("mount tmpfs: {err}"))
        })?;
        staged.mounted = true;

        let key = self.deriver.derive_vault_key(cloud_key_only)?.into_full()?;
        write_key_file(file, key.as_bytes())
            .map_err(|err| VaultError::staging(file, format!("write key: {err}")))?;
        staged.written = true;

        debug!(
            "staged {} key at {}",
            if cloud_key_only { "cloud-only" } else { "combined" },
            file.display()
        );
        Ok(staged)
    }

    /// Securely erase `file`, unmount `dir`, and remove it. Stops at the first failure.
    pub fn unstage(&self, dir: &Path, file: &Path) -> VaultResult<()> {
        self.release(dir, file, true, true)
    }

    fn release(&self, dir: &Path, file: &Path, mounted: bool, written: bool) -> VaultResult<()> {
        if written {
            secure_erase_file(file)
                .map_err(|err| VaultError::staging(file, format!("erase key: {err}")))?;
        }
        if mounted {
            self.mounts
                .unmount(dir)
                .map_err(|err| VaultError::staging(dir, format!("unmount: {err}")))?;
        }
        fs::remove_dir_all(dir).map_err(|err| VaultError::staging(dir, format!("rmdir: {err}")))?;
        Ok(())
    }
}

/// Active staging scope; released on drop.
pub struct StagedKey<'a> {
    stager: &'a KeyStager,
    dir: PathBuf,
    file: PathBuf,
    mounted: bool,
    written: bool,
}

impl StagedKey<'_> {
    pub fn key_file(&self) -> &Path {
        &self.file
    }
}

impl Drop for StagedKey<'_> {
    fn drop(&mut self) {
        if let Err(err) = self
            .stager
            .release(&self.dir, &self.file, self.mounted, self.written)
        {
            error!("failed to release staged key at {}: {err}", self.dir.display());
        }
    }
}
