use crate::error::{VaultError, VaultResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Locations of the external binaries vaultmgr drives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCfg {
    #[serde(default = "default_fscrypt_path")]
    pub fscrypt_path: String,

    /// Presence of this file means `fscrypt setup` has run on the device.
    #[serde(default = "default_fscrypt_conf")]
    pub fscrypt_conf: String,

    #[serde(default = "default_keyctl_path")]
    pub keyctl_path: String,

    #[serde(default = "default_mount_path")]
    pub mount_path: String,

    #[serde(default = "default_umount_path")]
    pub umount_path: String,
}

fn default_fscrypt_path() -> String {
    "/opt/zededa/bin/fscrypt".to_string()
}

fn default_fscrypt_conf() -> String {
    "/etc/fscrypt.conf".to_string()
}

fn default_keyctl_path() -> String {
    "/bin/keyctl".to_string()
}

fn default_mount_path() -> String {
    "/bin/mount".to_string()
}

fn default_umount_path() -> String {
    "/bin/umount".to_string()
}

impl Default for ToolCfg {
    fn default() -> Self {
        Self {
            fscrypt_path: default_fscrypt_path(),
            fscrypt_conf: default_fscrypt_conf(),
            keyctl_path: default_keyctl_path(),
            mount_path: default_mount_path(),
            umount_path: default_umount_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistCfg {
    /// Mountpoint of the persistent store; protector and policy IDs are scoped to it.
    #[serde(default = "default_persist_dir")]
    pub mount_point: String,

    #[serde(default = "default_persist_type_file")]
    pub type_file: String,
}

fn default_persist_dir() -> String {
    "/persist".to_string()
}

fn default_persist_type_file() -> String {
    "/run/eve.persist_type".to_string()
}

impl Default for PersistCfg {
    fn default() -> Self {
        Self {
            mount_point: default_persist_dir(),
            type_file: default_persist_type_file(),
        }
    }
}

/// One managed vault directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultPath {
    pub path: PathBuf,
    pub name: String,
    #[serde(default)]
    pub deprecated: bool,
}

impl VaultPath {
    pub fn new(path: impl Into<PathBuf>, name: impl Into<String>, deprecated: bool) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            deprecated,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultsCfg {
    /// Legacy vault kept for compatibility; only ever unlocked.
    #[serde(default = "default_legacy_vault")]
    pub legacy: VaultPath,

    #[serde(default = "default_config_vault")]
    pub config: VaultPath,

    #[serde(default = "default_app_vault")]
    pub app: VaultPath,

    #[serde(default = "default_protector_prefix")]
    pub protector_prefix: String,
}

fn default_legacy_vault() -> VaultPath {
    VaultPath::new("/persist/img", "Image Data Store", true)
}

fn default_config_vault() -> VaultPath {
    VaultPath::new("/persist/config", "Configuration Data Store", false)
}

fn default_app_vault() -> VaultPath {
    VaultPath::new("/persist/vault", "Application Data Store", false)
}

fn default_protector_prefix() -> String {
    "TheVaultKey".to_string()
}

impl Default for VaultsCfg {
    fn default() -> Self {
        Self {
            legacy: default_legacy_vault(),
            config: default_config_vault(),
            app: default_app_vault(),
            protector_prefix: default_protector_prefix(),
        }
    }
}

impl VaultsCfg {
    /// Vaults in provisioning order: legacy first, then configuration, then application data.
    pub fn provisioning_order(&self) -> [&VaultPath; 3] {
        [&self.legacy, &self.config, &self.app]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagingCfg {
    #[serde(default = "default_key_dir")]
    pub key_dir: PathBuf,

    /// Holds the key being replaced while a protector is migrated.
    #[serde(default = "default_old_key_dir")]
    pub old_key_dir: PathBuf,

    #[serde(default = "default_key_file_name")]
    pub key_file_name: String,
}

fn default_key_dir() -> PathBuf {
    PathBuf::from("/TmpVaultDir2")
}

fn default_old_key_dir() -> PathBuf {
    PathBuf::from("/TmpVaultDir1")
}

fn default_key_file_name() -> String {
    "protector.key".to_string()
}

impl Default for StagingCfg {
    fn default() -> Self {
        Self {
            key_dir: default_key_dir(),
            old_key_dir: default_old_key_dir(),
            key_file_name: default_key_file_name(),
        }
    }
}

impl StagingCfg {
    pub fn key_file(&self) -> PathBuf {
        self.key_dir.join(&self.key_file_name)
    }

    pub fn old_key_file(&self) -> PathBuf {
        self.old_key_dir.join(&self.key_file_name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardwareCfg {
    #[serde(default = "default_tpm_device")]
    pub tpm_device: String,

    /// Helper that prints the sealed vault share (raw or hex) on stdout.
    #[serde(default)]
    pub key_helper: Option<String>,

    #[serde(default)]
    pub key_helper_args: Vec<String>,
}

fn default_tpm_device() -> String {
    "/dev/tpmrm0".to_string()
}

impl Default for HardwareCfg {
    fn default() -> Self {
        Self {
            tpm_device: default_tpm_device(),
            key_helper: None,
            key_helper_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceCfg {
    #[serde(default = "default_agent_name")]
    pub agent_name: String,

    #[serde(default = "default_status_dir")]
    pub status_dir: String,

    #[serde(default = "default_global_config")]
    pub global_config: String,

    #[serde(default = "default_run_dir")]
    pub run_dir: String,

    #[serde(default = "default_still_running_secs")]
    pub still_running_secs: u64,

    #[serde(default = "default_config_poll_secs")]
    pub config_poll_secs: u64,
}

fn default_agent_name() -> String {
    "vaultmgr".to_string()
}

fn default_status_dir() -> String {
    "/run/vaultmgr/VaultStatus".to_string()
}

fn default_global_config() -> String {
    "/persist/status/zedagent/ConfigItemValueMap/global.json".to_string()
}

fn default_run_dir() -> String {
    "/run".to_string()
}

fn default_still_running_secs() -> u64 {
    15
}

fn default_config_poll_secs() -> u64 {
    5
}

impl Default for ServiceCfg {
    fn default() -> Self {
        Self {
            agent_name: default_agent_name(),
            status_dir: default_status_dir(),
            global_config: default_global_config(),
            run_dir: default_run_dir(),
            still_running_secs: default_still_running_secs(),
            config_poll_secs: default_config_poll_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VaultmgrConfig {
    #[serde(default)]
    pub tool: ToolCfg,

    #[serde(default)]
    pub persist: PersistCfg,

    #[serde(default)]
    pub vaults: VaultsCfg,

    #[serde(default)]
    pub staging: StagingCfg,

    #[serde(default)]
    pub hardware: HardwareCfg,

    #[serde(default)]
    pub service: ServiceCfg,

    /// Set from the `-d` command-line flag; wins over any configured log level.
    #[serde(skip)]
    pub debug_override: bool,

    #[serde(skip)]
    pub path: Option<PathBuf>,
}

impl VaultmgrConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> VaultResult<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let mut cfg = if matches!(path.extension().and_then(|ext| ext.to_str()), Some(ext) if ext.eq_ignore_ascii_case("toml"))
        {
            toml::from_str::<Self>(&contents)?
        } else {
            serde_yaml::from_str::<Self>(&contents)?
        };

        cfg.path = Some(path.to_path_buf());
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load `path` when present; an absent file means the built-in device layout.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> VaultResult<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            let cfg = Self::default();
            cfg.validate()?;
            Ok(cfg)
        }
    }

    pub fn validate(&self) -> VaultResult<()> {
        for vault in self.vaults.provisioning_order() {
            if !vault.path.is_absolute() {
                return Err(VaultError::InvalidConfig(format!(
                    "vault `{}` must use an absolute path (got {})",
                    vault.name,
                    vault.path.display()
                )));
            }
        }

        if self.staging.key_dir == self.staging.old_key_dir {
            return Err(VaultError::InvalidConfig(
                "staging.key_dir and staging.old_key_dir must differ".to_string(),
            ));
        }

        if self.staging.key_file_name.is_empty() || self.staging.key_file_name.contains('/') {
            return Err(VaultError::InvalidConfig(
                "staging.key_file_name must be a plain file name".to_string(),
            ));
        }

        if self.service.still_running_secs == 0 || self.service.config_poll_secs == 0 {
            return Err(VaultError::InvalidConfig(
                "service intervals must be positive".to_string(),
            ));
        }

        Ok(())
    }

    pub fn mount_point(&self) -> &str {
        &self.persist.mount_point
    }

    /// Protector label for a vault: the configured prefix plus the directory's base name.
    pub fn protector_label(&self, vault_path: &Path) -> String {
        let base = vault_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        format!("{}{}", self.vaults.protector_prefix, base)
    }

    pub fn still_running_interval(&self) -> Duration {
        Duration::from_secs(self.service.still_running_secs)
    }

    pub fn config_poll_interval(&self) -> Duration {
        Duration::from_secs(self.service.config_poll_secs.max(1))
    }

    pub fn pid_file(&self) -> PathBuf {
        Path::new(&self.service.run_dir).join(format!("{}.pid", self.service.agent_name))
    }

    pub fn touch_file(&self) -> PathBuf {
        Path::new(&self.service.run_dir).join(format!("{}.touch", self.service.agent_name))
    }
}
