//! Provisioning and service-mode orchestration.

use crate::config::VaultmgrConfig;
use crate::error::{VaultError, VaultResult};
use crate::logging;
use crate::provider::{EncryptionTool, NativeVaultProvisioner, StatusPublisher};
use crate::status::{StatusResolver, VaultStatus};
use crate::vault::{SetupOutcome, VaultManager};
use log::{error, info, warn, LevelFilter};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Filesystem backing the persistent store, as recorded at install time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistFsType {
    Ext4,
    Zfs,
    Unknown(String),
}

impl PersistFsType {
    pub fn from_token(token: &str) -> Self {
        match token.trim() {
            "ext4" => PersistFsType::Ext4,
            "zfs" => PersistFsType::Zfs,
            other => PersistFsType::Unknown(other.to_string()),
        }
    }

    /// Read the marker file; an unreadable marker means nothing to provision.
    pub fn read(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => Self::from_token(&contents),
            Err(err) => {
                warn!("unable to read persist type from {}: {err}", path.display());
                PersistFsType::Unknown(String::new())
            }
        }
    }
}

/// Per-vault results of a provisioning run.
#[derive(Debug, Default)]
pub struct ProvisionReport {
    pub outcomes: Vec<(PathBuf, SetupOutcome)>,
    pub failures: Vec<(PathBuf, VaultError)>,
}

impl ProvisionReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Native ZFS encryption is provisioned by the storage stack itself; vaultmgr
/// only recognises the trigger.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExternallyManagedZfs;

impl NativeVaultProvisioner for ExternallyManagedZfs {
    fn setup_native_vaults(&self) -> VaultResult<()> {
        info!("persist store uses native zfs encryption; vaults are managed by the zfs stack");
        Ok(())
    }
}

/// One-shot provisioning entry point (`setupVaults`).
///
/// Staging failures abort the run. Any other vault failure is recorded and
/// the remaining vaults are still set up.
pub fn setup_vaults<T: EncryptionTool>(
    manager: &VaultManager<T>,
    native: &dyn NativeVaultProvisioner,
) -> VaultResult<ProvisionReport> {
    let type_file = Path::new(&manager.config().persist.type_file);
    match PersistFsType::read(type_file) {
        PersistFsType::Ext4 => setup_vaults_on_ext4(manager),
        PersistFsType::Zfs => {
            native.setup_native_vaults()?;
            Ok(ProvisionReport::default())
        }
        PersistFsType::Unknown(token) => {
            info!("ignoring request to set up vaults on unsupported `{token}` filesystem");
            Ok(ProvisionReport::default())
        }
    }
}

/// Set up the legacy, configuration, and application vaults in that order.
pub fn setup_vaults_on_ext4<T: EncryptionTool>(
    manager: &VaultManager<T>,
) -> VaultResult<ProvisionReport> {
    manager.prepare_environment()?;

    let mut report = ProvisionReport::default();
    for vault in manager.config().vaults.provisioning_order() {
        match manager.setup_vault(&vault.path, vault.deprecated) {
            Ok(outcome) => {
                info!("vault {} ({}): {outcome:?}", vault.name, vault.path.display());
                report.outcomes.push((vault.path.clone(), outcome));
            }
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                error!(
                    "error setting up vault {} ({}): {err}",
                    vault.name,
                    vault.path.display()
                );
                report.failures.push((vault.path.clone(), err));
            }
        }
    }
    Ok(report)
}

/// Global configuration document delivered to the agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default)]
    pub log_level: Option<String>,

    #[serde(default)]
    pub agent_log_levels: HashMap<String, String>,
}

impl GlobalConfig {
    pub fn from_json(contents: &str) -> VaultResult<Self> {
        Ok(serde_json::from_str(contents)?)
    }

    /// Level for `agent`: agent-specific entry, then the default, then `info`.
    pub fn level_for(&self, agent: &str) -> LevelFilter {
        self.agent_log_levels
            .get(agent)
            .or(self.log_level.as_ref())
            .and_then(|name| logging::parse_level(name))
            .unwrap_or(LevelFilter::Info)
    }
}

/// Change notification from the configuration source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigEvent {
    Modified(GlobalConfig),
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServicePhase {
    WaitingForConfig,
    SteadyState,
}

/// Service-mode state machine: waits for the first configuration, then
/// publishes vault status until one publish succeeds.
pub struct VaultService<T: EncryptionTool, P: StatusPublisher> {
    config: std::sync::Arc<VaultmgrConfig>,
    resolver: StatusResolver<T>,
    publisher: P,
    phase: ServicePhase,
    level: LevelFilter,
    status_pending: bool,
}

impl<T: EncryptionTool, P: StatusPublisher> VaultService<T, P> {
    pub fn new(
        config: std::sync::Arc<VaultmgrConfig>,
        resolver: StatusResolver<T>,
        publisher: P,
    ) -> Self {
        let level = Self::effective_level(&config, None);
        Self {
            config,
            resolver,
            publisher,
            phase: ServicePhase::WaitingForConfig,
            level,
            status_pending: false,
        }
    }

    pub fn phase(&self) -> ServicePhase {
        self.phase
    }

    pub fn level(&self) -> LevelFilter {
        self.level
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    fn effective_level(config: &VaultmgrConfig, global: Option<&GlobalConfig>) -> LevelFilter {
        if config.debug_override {
            return LevelFilter::Debug;
        }
        global
            .map(|g| g.level_for(&config.service.agent_name))
            .unwrap_or(LevelFilter::Info)
    }

    /// Apply a configuration change. The first `Modified` event moves the
    /// service to steady state and publishes initial status. A failed publish
    /// stays pending for [`Self::publish_pending`].
    pub fn handle_config(&mut self, event: ConfigEvent) -> VaultResult<()> {
        let global = match &event {
            ConfigEvent::Modified(global) => Some(global),
            ConfigEvent::Deleted => None,
        };
        let level = Self::effective_level(&self.config, global);
        if level != self.level {
            info!("log level changed from {} to {}", self.level, level);
            self.level = level;
        }
        logging::set_level(level);

        if matches!(event, ConfigEvent::Modified(_)) && self.phase == ServicePhase::WaitingForConfig {
            info!("processed global config");
            self.phase = ServicePhase::SteadyState;
            self.status_pending = true;
            return self.publish_pending();
        }
        Ok(())
    }

    pub fn status_pending(&self) -> bool {
        self.status_pending
    }

    /// Publish initial status if it has not gone out yet.
    pub fn publish_pending(&mut self) -> VaultResult<()> {
        if !self.status_pending {
            return Ok(());
        }
        self.publish_initial_status()?;
        self.status_pending = false;
        Ok(())
    }

    /// Publish the application vault, then the configuration vault.
    pub fn publish_initial_status(&self) -> VaultResult<Vec<VaultStatus>> {
        let (status, detail) = self.resolver.fetch_status();
        let vaults = &self.config.vaults;
        let mut published = Vec::with_capacity(2);
        for vault in [&vaults.app, &vaults.config] {
            published.push(self.resolver.publish_vault_status(
                &self.publisher,
                &vault.name,
                &vault.path,
                status,
                &detail,
            )?);
        }
        Ok(published)
    }
}
