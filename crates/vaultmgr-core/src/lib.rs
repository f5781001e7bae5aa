pub mod config;
pub mod error;
pub mod keyfile;
pub mod keys;
pub mod logging;
pub mod protector;
pub mod provider;
pub mod service;
pub mod staging;
pub mod status;
pub mod supervision;
pub mod vault;

#[cfg(test)]
mod test_support;

pub use config::{VaultPath, VaultmgrConfig};
pub use error::{VaultError, VaultResult};
pub use keys::{DerivedKey, KeyDeriver, KeyMaterial, PlaceholderCloudShare};
pub use provider::{
    EncryptionTool, HardwareShareSource, KeyringLinker, NativeVaultProvisioner,
    RemoteShareSource, StatusListing, StatusPublisher, VolatileMount,
};
pub use service::{
    setup_vaults, ConfigEvent, ExternallyManagedZfs, GlobalConfig, PersistFsType,
    ProvisionReport, ServicePhase, VaultService,
};
pub use staging::{KeyStager, StagedKey};
pub use status::{DataSecAtRestStatus, JsonDirPublisher, StatusResolver, VaultStatus};
pub use vault::{SetupOutcome, VaultManager, VaultState};
