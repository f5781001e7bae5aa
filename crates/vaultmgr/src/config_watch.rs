//! Polls the global configuration document and turns changes into events.

use log::{debug, warn};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use vaultmgr_core::service::{ConfigEvent, GlobalConfig};

/// Last observed state of the document.
#[derive(Debug, Default)]
pub struct WatchState {
    contents: Option<String>,
}

/// Compare the document against the last observation. Unparseable documents
/// are logged once and ignored.
pub fn poll_once(path: &Path, state: &mut WatchState) -> Option<ConfigEvent> {
    match fs::read_to_string(path) {
        Ok(contents) => {
            if state.contents.as_deref() == Some(contents.as_str()) {
                return None;
            }
            let parsed = GlobalConfig::from_json(&contents);
            state.contents = Some(contents);
            match parsed {
                Ok(global) => Some(ConfigEvent::Modified(global)),
                Err(err) => {
                    warn!("ignoring unparseable global config {}: {err}", path.display());
                    None
                }
            }
        }
        Err(err) => {
            if err.kind() != ErrorKind::NotFound {
                warn!("unable to read global config {}: {err}", path.display());
                return None;
            }
            state.contents.take().map(|_| ConfigEvent::Deleted)
        }
    }
}

/// Poll `path` every `period` until the receiving side goes away.
pub async fn watch_global_config(path: PathBuf, period: Duration, tx: mpsc::Sender<ConfigEvent>) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut state = WatchState::default();
    loop {
        ticker.tick().await;
        if let Some(event) = poll_once(&path, &mut state) {
            debug!("global config event: {event:?}");
            if tx.send(event).await.is_err() {
                debug!("config receiver closed; stopping watcher");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn reports_changes_and_deletion_only() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("global.json");
        let mut state = WatchState::default();

        assert_eq!(poll_once(&path, &mut state), None);

        fs::write(&path, r#"{"log_level":"debug"}"#).unwrap();
        let Some(ConfigEvent::Modified(global)) = poll_once(&path, &mut state) else {
            panic!("expected a modification event");
        };
        assert_eq!(global.log_level.as_deref(), Some("debug"));
        assert_eq!(poll_once(&path, &mut state), None);

        fs::remove_file(&path).unwrap();
        assert_eq!(poll_once(&path, &mut state), Some(ConfigEvent::Deleted));
        assert_eq!(poll_once(&path, &mut state), None);
    }

    #[test]
    fn unparseable_document_is_not_delivered() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("global.json");
        let mut state = WatchState::default();

        fs::write(&path, "{not json").unwrap();
        assert_eq!(poll_once(&path, &mut state), None);

        fs::write(&path, "{}").unwrap();
        assert_eq!(
            poll_once(&path, &mut state),
            Some(ConfigEvent::Modified(GlobalConfig::default()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn watcher_forwards_events() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("global.json");
        fs::write(&path, r#"{"agent_log_levels":{"vaultmgr":"warn"}}"#).unwrap();

        let (tx, mut rx) = mpsc::channel(4);
        let watcher = tokio::spawn(watch_global_config(path, Duration::from_secs(5), tx));

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, ConfigEvent::Modified(ref g) if g.agent_log_levels["vaultmgr"] == "warn"));

        drop(rx);
        watcher.abort();
    }
}
