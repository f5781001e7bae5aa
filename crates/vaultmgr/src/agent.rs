//! Service-mode event loop.

use anyhow::{bail, Result};
use log::{error, info, warn};
use std::future::Future;
use std::path::PathBuf;
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use vaultmgr_core::provider::{EncryptionTool, StatusPublisher};
use vaultmgr_core::service::{ConfigEvent, VaultService};
use vaultmgr_core::supervision::touch_liveness;

/// Drive `service` from configuration events, touching `touch_file` and
/// retrying any unpublished status every `still_running`, until `shutdown`
/// resolves.
pub async fn run_agent<T, P, F>(
    service: &mut VaultService<T, P>,
    mut events: mpsc::Receiver<ConfigEvent>,
    touch_file: PathBuf,
    still_running: Duration,
    shutdown: F,
) -> Result<()>
where
    T: EncryptionTool,
    P: StatusPublisher,
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut ticker = interval(still_running);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        select! {
            _ = &mut shutdown => {
                info!("received shutdown signal");
                return Ok(());
            }
            _ = ticker.tick() => {
                if let Err(err) = touch_liveness(&touch_file) {
                    warn!("failed to touch {}: {err}", touch_file.display());
                }
                if let Err(err) = service.publish_pending() {
                    warn!("status still unpublished: {err}");
                }
            }
            event = events.recv() => {
                let Some(event) = event else {
                    bail!("global config watcher stopped");
                };
                if let Err(err) = service.handle_config(event) {
                    error!("failed to apply global config: {err}");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::tempdir;
    use tokio::sync::oneshot;
    use tokio::time::sleep;
    use vaultmgr_core::config::VaultmgrConfig;
    use vaultmgr_core::keyfile::SecretShare;
    use vaultmgr_core::provider::{HardwareShareSource, StatusListing};
    use vaultmgr_core::service::{GlobalConfig, ServicePhase};
    use vaultmgr_core::status::{DataSecAtRestStatus, JsonDirPublisher, StatusResolver};
    use vaultmgr_core::{VaultError, VaultResult};

    struct IdleTool;

    impl EncryptionTool for IdleTool {
        fn setup_global(&self) -> VaultResult<()> {
            Ok(())
        }
        fn setup_mount(&self) -> VaultResult<()> {
            Ok(())
        }
        fn mount_status(&self) -> VaultResult<StatusListing> {
            Ok(StatusListing::default())
        }
        fn path_status(&self, _path: &Path) -> VaultResult<StatusListing> {
            Ok(StatusListing::default())
        }
        fn encrypt(&self, _path: &Path, _key_file: &Path, _label: &str) -> VaultResult<()> {
            Ok(())
        }
        fn unlock(&self, _path: &Path, _key_file: &Path) -> VaultResult<()> {
            Ok(())
        }
        fn change_passphrase(&self, _id: &str, _key: &Path, _old: &Path) -> VaultResult<()> {
            Ok(())
        }
        fn destroy_protector(&self, _id: &str) -> VaultResult<()> {
            Ok(())
        }
        fn destroy_policy(&self, _id: &str) -> VaultResult<()> {
            Ok(())
        }
    }

    struct NoTpm;

    impl HardwareShareSource for NoTpm {
        fn present(&self) -> bool {
            false
        }
        fn hardware_share(&self) -> VaultResult<SecretShare> {
            Err(VaultError::HardwareShare("absent".into()))
        }
    }

    fn service(root: &Path) -> VaultService<IdleTool, JsonDirPublisher> {
        let mut config = VaultmgrConfig::default();
        config.tool.fscrypt_conf = root.join("fscrypt.conf").display().to_string();
        fs::write(&config.tool.fscrypt_conf, "{}").unwrap();
        config.service.status_dir = root.join("VaultStatus").display().to_string();
        let config = Arc::new(config);
        let resolver = StatusResolver::new(config.clone(), IdleTool, Arc::new(NoTpm));
        let publisher = JsonDirPublisher::new(&config.service.status_dir);
        VaultService::new(config, resolver, publisher)
    }

    #[tokio::test(start_paused = true)]
    async fn publishes_after_first_config_and_touches_until_shutdown() {
        let tmp = tempdir().unwrap();
        let mut svc = service(tmp.path());
        let touch = tmp.path().join("vaultmgr.touch");
        let (tx, rx) = mpsc::channel(4);
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let driver = async {
            sleep(Duration::from_secs(1)).await;
            tx.send(ConfigEvent::Modified(GlobalConfig::default()))
                .await
                .unwrap();
            sleep(Duration::from_secs(40)).await;
            stop_tx.send(()).unwrap();
        };
        let agent = run_agent(
            &mut svc,
            rx,
            touch.clone(),
            Duration::from_secs(15),
            async {
                let _ = stop_rx.await;
            },
        );

        let (result, ()) = tokio::join!(agent, driver);
        result.unwrap();

        assert_eq!(svc.phase(), ServicePhase::SteadyState);
        assert!(touch.exists());
        let app = svc.publisher().read("Application Data Store").unwrap();
        assert_eq!(app.status, DataSecAtRestStatus::Enabled);
        assert!(svc.publisher().read("Configuration Data Store").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn unpublished_status_is_retried_on_tick() {
        let tmp = tempdir().unwrap();
        let mut svc = service(tmp.path());
        let status_dir = tmp.path().join("VaultStatus");
        fs::write(&status_dir, "blocker").unwrap();
        let (tx, rx) = mpsc::channel(4);
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let driver = async {
            sleep(Duration::from_secs(1)).await;
            tx.send(ConfigEvent::Modified(GlobalConfig::default()))
                .await
                .unwrap();
            sleep(Duration::from_secs(5)).await;
            fs::remove_file(&status_dir).unwrap();
            sleep(Duration::from_secs(20)).await;
            stop_tx.send(()).unwrap();
        };
        let agent = run_agent(
            &mut svc,
            rx,
            tmp.path().join("vaultmgr.touch"),
            Duration::from_secs(15),
            async {
                let _ = stop_rx.await;
            },
        );

        let (result, ()) = tokio::join!(agent, driver);
        result.unwrap();

        assert_eq!(svc.phase(), ServicePhase::SteadyState);
        assert!(!svc.status_pending());
        assert!(svc.publisher().read("Application Data Store").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn closed_event_channel_is_an_error() {
        let tmp = tempdir().unwrap();
        let mut svc = service(tmp.path());
        let (tx, rx) = mpsc::channel(1);
        drop(tx);

        let result = run_agent(
            &mut svc,
            rx,
            tmp.path().join("vaultmgr.touch"),
            Duration::from_secs(15),
            std::future::pending(),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(svc.phase(), ServicePhase::WaitingForConfig);
    }
}
