//! TPM-sealed key share, obtained from an external helper.

use crate::command::CommandRunner;
use log::info;
use std::path::PathBuf;
use vaultmgr_core::config::VaultmgrConfig;
use vaultmgr_core::error::{VaultError, VaultResult};
use vaultmgr_core::keyfile::{decode_share_bytes, SecretShare};
use vaultmgr_core::provider::HardwareShareSource;

/// Runs the configured helper and decodes its stdout (32 raw bytes or 64
/// hex digits). Presence is decided by the TPM device node.
#[derive(Debug, Clone)]
pub struct TpmHelperShare {
    device: PathBuf,
    helper: Option<CommandRunner>,
    args: Vec<String>,
}

impl TpmHelperShare {
    pub fn new(device: impl Into<PathBuf>, helper: Option<PathBuf>, args: Vec<String>) -> Self {
        Self {
            device: device.into(),
            helper: helper.map(CommandRunner::new),
            args,
        }
    }

    pub fn from_config(config: &VaultmgrConfig) -> Self {
        let hw = &config.hardware;
        Self::new(
            &hw.tpm_device,
            hw.key_helper.as_ref().map(PathBuf::from),
            hw.key_helper_args.clone(),
        )
    }
}

impl HardwareShareSource for TpmHelperShare {
    fn present(&self) -> bool {
        self.device.exists()
    }

    fn hardware_share(&self) -> VaultResult<SecretShare> {
        let helper = self
            .helper
            .as_ref()
            .ok_or_else(|| VaultError::HardwareShare("no key helper configured".into()))?;
        let out = helper.run_secret(self.args.as_slice()).map_err(|err| {
            VaultError::HardwareShare(format!("{}: {err}", helper.binary().display()))
        })?;
        if out.status != 0 {
            return Err(VaultError::HardwareShare(format!(
                "{} exited with code {}: {}",
                helper.binary().display(),
                out.status,
                out.stderr.trim()
            )));
        }
        let share = decode_share_bytes(&helper.binary().display().to_string(), &out.stdout)?;
        info!("using TPM key");
        Ok(share)
    }
}
