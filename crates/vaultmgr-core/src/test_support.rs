//! In-memory stand-ins for the encryption tool and keyring used by unit tests.

use crate::config::VaultmgrConfig;
use crate::error::{VaultError, VaultResult};
use crate::keys::tests::FixedHardware;
use crate::keys::{KeyDeriver, PlaceholderCloudShare};
use crate::provider::{
    EncryptionTool, KeyringLinker, PolicyEntry, PolicyUnlock, ProtectorEntry, ProtectorKind,
    StatusListing,
};
use crate::staging::tests::RecordingMount;
use crate::staging::KeyStager;
use crate::vault::VaultManager;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::{tempdir, TempDir};

pub(crate) const HARDWARE_SHARE: [u8; 32] = [0x33; 32];

struct FakeProtector {
    id: String,
    label: String,
    key: Vec<u8>,
}

struct FakePolicy {
    id: String,
    protector: String,
    dir: Option<PathBuf>,
}

#[derive(Default)]
pub(crate) struct FakeState {
    next_id: u32,
    protectors: Vec<FakeProtector>,
    policies: Vec<FakePolicy>,
    unlocked: HashSet<PathBuf>,
    calls: Vec<String>,
}

impl FakeState {
    fn next_hex(&mut self, width: usize) -> String {
        self.next_id += 1;
        format!("{:0width$x}", self.next_id, width = width)
    }
}

/// Simulates fscrypt: keys are compared against the staged key files at call time.
#[derive(Default)]
pub(crate) struct FakeTool {
    pub(crate) state: Mutex<FakeState>,
    pub mount_status_fails: bool,
}

fn tool_error(args: &str, output: &str) -> VaultError {
    VaultError::ExternalTool {
        tool: "fscrypt".into(),
        args: args.into(),
        status: 1,
        output: output.into(),
    }
}

impl FakeTool {
    pub(crate) fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub(crate) fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    /// Register an encrypted vault at `dir` whose protector wraps `key`.
    pub(crate) fn seed_vault(&self, dir: &Path, label: &str, key: &[u8]) -> (String, String) {
        let mut state = self.state.lock().unwrap();
        let protector = state.next_hex(16);
        let policy = state.next_hex(32);
        state.protectors.push(FakeProtector {
            id: protector.clone(),
            label: label.to_string(),
            key: key.to_vec(),
        });
        state.policies.push(FakePolicy {
            id: policy.clone(),
            protector: protector.clone(),
            dir: Some(dir.to_path_buf()),
        });
        (protector, policy)
    }

    /// Register a protector and policy left over from a vault directory that no longer exists.
    pub(crate) fn seed_orphan(&self, label: &str, with_policy: bool) -> String {
        let mut state = self.state.lock().unwrap();
        let protector = state.next_hex(16);
        state.protectors.push(FakeProtector {
            id: protector.clone(),
            label: label.to_string(),
            key: vec![0u8; 32],
        });
        if with_policy {
            let policy = state.next_hex(32);
            state.policies.push(FakePolicy {
                id: policy,
                protector: protector.clone(),
                dir: None,
            });
        }
        protector
    }

    pub(crate) fn protector_labels(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state.protectors.iter().map(|p| p.label.clone()).collect()
    }

    pub(crate) fn policy_count(&self) -> usize {
        self.state.lock().unwrap().policies.len()
    }

    pub(crate) fn protector_key(&self, label: &str) -> Option<Vec<u8>> {
        let state = self.state.lock().unwrap();
        state
            .protectors
            .iter()
            .find(|p| p.label == label)
            .map(|p| p.key.clone())
    }

    pub(crate) fn is_unlocked(&self, dir: &Path) -> bool {
        self.state.lock().unwrap().unlocked.contains(dir)
    }

    fn record(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }

    fn listing(state: &FakeState, policies: Vec<&FakePolicy>) -> StatusListing {
        let protectors = state
            .protectors
            .iter()
            .map(|p| ProtectorEntry {
                id: p.id.clone(),
                linked: false,
                kind: ProtectorKind::RawKey,
                label: Some(p.label.clone()),
            })
            .collect();
        let policies = policies
            .into_iter()
            .map(|p| PolicyEntry {
                id: p.id.clone(),
                unlocked: match &p.dir {
                    Some(dir) if state.unlocked.contains(dir) => PolicyUnlock::Yes,
                    _ => PolicyUnlock::No,
                },
                protectors: vec![p.protector.clone()],
            })
            .collect();
        StatusListing {
            protectors,
            policies,
            ..StatusListing::default()
        }
    }
}

impl EncryptionTool for FakeTool {
    fn setup_global(&self) -> VaultResult<()> {
        self.record("setup --quiet".into());
        Ok(())
    }

    fn setup_mount(&self) -> VaultResult<()> {
        self.record("setup /persist --quiet".into());
        Ok(())
    }

    fn mount_status(&self) -> VaultResult<StatusListing> {
        self.record("status /persist".into());
        if self.mount_status_fails {
            return Err(tool_error("status /persist", "filesystem not set up"));
        }
        let state = self.state.lock().unwrap();
        Ok(Self::listing(&state, state.policies.iter().collect()))
    }

    fn path_status(&self, path: &Path) -> VaultResult<StatusListing> {
        self.record(format!("status {}", path.display()));
        let state = self.state.lock().unwrap();
        let Some(policy) = state
            .policies
            .iter()
            .find(|p| p.dir.as_deref() == Some(path))
        else {
            return Err(tool_error(
                &format!("status {}", path.display()),
                &format!("\"{}\" is not encrypted", path.display()),
            ));
        };
        let mut listing = Self::listing(&state, vec![policy]);
        listing.protectors.retain(|p| p.id == policy.protector);
        listing.directory_policy = Some(policy.id.clone());
        listing.directory_unlocked = Some(listing.policies[0].unlocked.clone());
        Ok(listing)
    }

    fn encrypt(&self, path: &Path, key_file: &Path, label: &str) -> VaultResult<()> {
        self.record(format!("encrypt {} --name={label}", path.display()));
        let key = fs::read(key_file)?;
        if fs::read_dir(path)?.next().is_some() {
            return Err(tool_error("encrypt", "directory is not empty"));
        }
        let mut state = self.state.lock().unwrap();
        if state.protectors.iter().any(|p| p.label == label) {
            return Err(tool_error("encrypt", "protector name already in use"));
        }
        let protector = state.next_hex(16);
        let policy = state.next_hex(32);
        state.protectors.push(FakeProtector {
            id: protector.clone(),
            label: label.to_string(),
            key,
        });
        state.policies.push(FakePolicy {
            id: policy,
            protector,
            dir: Some(path.to_path_buf()),
        });
        state.unlocked.insert(path.to_path_buf());
        Ok(())
    }

    fn unlock(&self, path: &Path, key_file: &Path) -> VaultResult<()> {
        self.record(format!("unlock {}", path.display()));
        let key = fs::read(key_file)?;
        let mut state = self.state.lock().unwrap();
        let protector = state
            .policies
            .iter()
            .find(|p| p.dir.as_deref() == Some(path))
            .map(|p| p.protector.clone())
            .ok_or_else(|| tool_error("unlock", "not encrypted"))?;
        let matches = state
            .protectors
            .iter()
            .any(|p| p.id == protector && p.key == key);
        if !matches {
            return Err(tool_error("unlock", "incorrect key provided"));
        }
        state.unlocked.insert(path.to_path_buf());
        Ok(())
    }

    fn change_passphrase(
        &self,
        protector_id: &str,
        key_file: &Path,
        old_key_file: &Path,
    ) -> VaultResult<()> {
        self.record(format!("metadata change-passphrase {protector_id}"));
        let key = fs::read(key_file)?;
        let old_key = fs::read(old_key_file)?;
        let mut state = self.state.lock().unwrap();
        let protector = state
            .protectors
            .iter_mut()
            .find(|p| p.id == protector_id)
            .ok_or_else(|| tool_error("metadata change-passphrase", "protector not found"))?;
        if protector.key != old_key {
            return Err(tool_error("metadata change-passphrase", "incorrect old key"));
        }
        protector.key = key;
        Ok(())
    }

    fn destroy_protector(&self, protector_id: &str) -> VaultResult<()> {
        self.record(format!("metadata destroy --protector={protector_id}"));
        let mut state = self.state.lock().unwrap();
        let before = state.protectors.len();
        state.protectors.retain(|p| p.id != protector_id);
        if state.protectors.len() == before {
            return Err(tool_error("metadata destroy", "protector not found"));
        }
        Ok(())
    }

    fn destroy_policy(&self, policy_id: &str) -> VaultResult<()> {
        self.record(format!("metadata destroy --policy={policy_id}"));
        let mut state = self.state.lock().unwrap();
        let before = state.policies.len();
        state.policies.retain(|p| p.id != policy_id);
        if state.policies.len() == before {
            return Err(tool_error("metadata destroy", "policy not found"));
        }
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct CountingKeyring {
    pub links: AtomicUsize,
}

impl CountingKeyring {
    pub(crate) fn links(&self) -> usize {
        self.links.load(Ordering::SeqCst)
    }
}

impl KeyringLinker for CountingKeyring {
    fn link_session_keyring(&self) -> VaultResult<()> {
        self.links.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Everything a lifecycle test needs, rooted in one temporary directory.
pub(crate) struct Fixture {
    pub tmp: TempDir,
    pub manager: VaultManager<Arc<FakeTool>>,
    pub tool: Arc<FakeTool>,
    pub keyring: Arc<CountingKeyring>,
    pub mounts: Arc<RecordingMount>,
}

impl Fixture {
    pub(crate) fn new(hardware: Option<Vec<u8>>) -> Self {
        Self::with_tool(FakeTool::default(), hardware)
    }

    pub(crate) fn with_tool(tool: FakeTool, hardware: Option<Vec<u8>>) -> Self {
        let tmp = tempdir().unwrap();
        let mut config = VaultmgrConfig::default();
        config.staging.key_dir = tmp.path().join("TmpVaultDir2");
        config.staging.old_key_dir = tmp.path().join("TmpVaultDir1");
        config.vaults.legacy.path = tmp.path().join("persist/img");
        config.vaults.config.path = tmp.path().join("persist/config");
        config.vaults.app.path = tmp.path().join("persist/vault");
        config.tool.fscrypt_conf = tmp.path().join("fscrypt.conf").display().to_string();
        config.persist.type_file = tmp.path().join("persist_type").display().to_string();

        let tool = Arc::new(tool);
        let keyring = Arc::new(CountingKeyring::default());
        let mounts = Arc::new(RecordingMount::default());
        let deriver = KeyDeriver::new(
            Arc::new(PlaceholderCloudShare),
            Arc::new(FixedHardware::new(hardware)),
        );
        let stager = KeyStager::new(mounts.clone(), deriver);
        let manager = VaultManager::new(Arc::new(config), tool.clone(), keyring.clone(), stager);
        Self {
            tmp,
            manager,
            tool,
            keyring,
            mounts,
        }
    }

    pub(crate) fn path(&self, rel: &str) -> PathBuf {
        self.tmp.path().join(rel)
    }

    /// Number of tmpfs mounts opened so far.
    pub(crate) fn mounts_opened(&self) -> usize {
        self.mounts
            .events()
            .iter()
            .filter(|e| e.starts_with("mount "))
            .count()
    }

    pub(crate) fn mounts_closed(&self) -> usize {
        self.mounts
            .events()
            .iter()
            .filter(|e| e.starts_with("umount "))
            .count()
    }
}
