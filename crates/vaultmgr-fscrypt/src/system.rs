//! Host-backed collaborators: the `fscrypt` CLI, `keyctl`, and tmpfs mounts.

use crate::command::{CommandRunner, Output};
use crate::parse::ListingParser;
use log::debug;
use std::path::Path;
use vaultmgr_core::config::VaultmgrConfig;
use vaultmgr_core::error::VaultResult;
use vaultmgr_core::provider::{EncryptionTool, KeyringLinker, StatusListing, VolatileMount};

/// `EncryptionTool` that shells out to the fscrypt binary.
#[derive(Debug, Clone)]
pub struct SystemFscrypt {
    runner: CommandRunner,
    mount_point: String,
    parser: ListingParser,
}

impl SystemFscrypt {
    pub fn new(binary: impl Into<std::path::PathBuf>, mount_point: impl Into<String>) -> VaultResult<Self> {
        Ok(Self {
            runner: CommandRunner::new(binary),
            mount_point: mount_point.into(),
            parser: ListingParser::new()?,
        })
    }

    pub fn from_config(config: &VaultmgrConfig) -> VaultResult<Self> {
        Self::new(&config.tool.fscrypt_path, config.mount_point())
    }

    fn run(&self, args: &[String]) -> VaultResult<Output> {
        debug!("{} {}", self.runner.binary().display(), args.join(" "));
        self.runner.run_checked(args)
    }

    fn status(&self, target: &str) -> VaultResult<StatusListing> {
        let out = self.run(&["status".to_string(), target.to_string()])?;
        Ok(self.parser.parse(&out.stdout))
    }

    /// `<mount>:<id>` reference used by the metadata subcommands.
    fn metadata_ref(&self, id: &str) -> String {
        format!("{}:{}", self.mount_point, id)
    }
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}

impl EncryptionTool for SystemFscrypt {
    fn setup_global(&self) -> VaultResult<()> {
        self.run(&["setup".into(), "--quiet".into()])?;
        Ok(())
    }

    fn setup_mount(&self) -> VaultResult<()> {
        self.run(&["setup".into(), self.mount_point.clone(), "--quiet".into()])?;
        Ok(())
    }

    fn mount_status(&self) -> VaultResult<StatusListing> {
        self.status(&self.mount_point)
    }

    fn path_status(&self, path: &Path) -> VaultResult<StatusListing> {
        self.status(&path_arg(path))
    }

    fn encrypt(&self, path: &Path, key_file: &Path, label: &str) -> VaultResult<()> {
        self.run(&[
            "encrypt".into(),
            path_arg(path),
            format!("--key={}", key_file.display()),
            "--source=raw_key".into(),
            format!("--name={label}"),
            "--user=root".into(),
        ])?;
        Ok(())
    }

    fn unlock(&self, path: &Path, key_file: &Path) -> VaultResult<()> {
        self.run(&[
            "unlock".into(),
            path_arg(path),
            format!("--key={}", key_file.display()),
            "--user=root".into(),
        ])?;
        Ok(())
    }

    fn change_passphrase(
        &self,
        protector_id: &str,
        key_file: &Path,
        old_key_file: &Path,
    ) -> VaultResult<()> {
        self.run(&[
            "metadata".into(),
            "change-passphrase".into(),
            format!("--key={}", key_file.display()),
            format!("--old-key={}", old_key_file.display()),
            "--source=raw_key".into(),
            format!("--protector={}", self.metadata_ref(protector_id)),
        ])?;
        Ok(())
    }

    fn destroy_protector(&self, protector_id: &str) -> VaultResult<()> {
        self.run(&[
            "metadata".into(),
            "destroy".into(),
            format!("--protector={}", self.metadata_ref(protector_id)),
            "--quiet".into(),
            "--force".into(),
        ])?;
        Ok(())
    }

    fn destroy_policy(&self, policy_id: &str) -> VaultResult<()> {
        self.run(&[
            "metadata".into(),
            "destroy".into(),
            format!("--policy={}", self.metadata_ref(policy_id)),
            "--quiet".into(),
            "--force".into(),
        ])?;
        Ok(())
    }
}

/// Links the user keyring into the session keyring via `keyctl link @u @s`.
#[derive(Debug, Clone)]
pub struct SystemKeyring {
    runner: CommandRunner,
}

impl SystemKeyring {
    pub fn new(binary: impl Into<std::path::PathBuf>) -> Self {
        Self {
            runner: CommandRunner::new(binary),
        }
    }

    pub fn from_config(config: &VaultmgrConfig) -> Self {
        Self::new(&config.tool.keyctl_path)
    }
}

impl KeyringLinker for SystemKeyring {
    fn link_session_keyring(&self) -> VaultResult<()> {
        self.runner.run_checked(&["link", "@u", "@s"])?;
        Ok(())
    }
}

/// Mounts staging directories as tmpfs so keys never reach persistent storage.
#[derive(Debug, Clone)]
pub struct TmpfsMount {
    mount: CommandRunner,
    umount: CommandRunner,
}

impl TmpfsMount {
    pub fn new(
        mount_binary: impl Into<std::path::PathBuf>,
        umount_binary: impl Into<std::path::PathBuf>,
    ) -> Self {
        Self {
            mount: CommandRunner::new(mount_binary),
            umount: CommandRunner::new(umount_binary),
        }
    }

    pub fn from_config(config: &VaultmgrConfig) -> Self {
        Self::new(&config.tool.mount_path, &config.tool.umount_path)
    }
}

impl VolatileMount for TmpfsMount {
    fn mount(&self, dir: &Path) -> VaultResult<()> {
        self.mount
            .run_checked(&["-t".to_string(), "tmpfs".into(), "tmpfs".into(), path_arg(dir)])?;
        Ok(())
    }

    fn unmount(&self, dir: &Path) -> VaultResult<()> {
        self.umount.run_checked(&[path_arg(dir)])?;
        Ok(())
    }
}
