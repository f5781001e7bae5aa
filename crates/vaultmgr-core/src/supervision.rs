//! Single-instance pid file and liveness touch file for service mode.

use crate::error::{VaultError, VaultResult};
use log::{debug, warn};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Exclusive claim on the agent's pid file; the file is removed on drop.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Record the current pid at `path`, refusing when another live process
    /// already holds it. A stale pid file is replaced.
    pub fn acquire(path: impl Into<PathBuf>) -> VaultResult<Self> {
        Self::acquire_with_proc(path, Path::new("/proc"))
    }

    pub(crate) fn acquire_with_proc(path: impl Into<PathBuf>, proc_root: &Path) -> VaultResult<Self> {
        let path = path.into();
        if let Ok(contents) = fs::read_to_string(&path) {
            if let Ok(pid) = contents.trim().parse::<u32>() {
                if proc_root.join(pid.to_string()).exists() {
                    return Err(VaultError::Supervision(format!(
                        "another instance is running with pid {pid} ({})",
                        path.display()
                    )));
                }
            }
            warn!("replacing stale pid file {}", path.display());
            fs::remove_file(&path)?;
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().write(true).create_new(true).open(&path)?;
        writeln!(file, "{}", std::process::id())?;
        debug!("wrote pid file {}", path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            warn!("failed to remove pid file {}: {err}", self.path.display());
        }
    }
}

/// Create `path` or bump its modification time so a watchdog sees progress.
pub fn touch_liveness(path: &Path) -> VaultResult<()> {
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)?;
    file.set_modified(SystemTime::now())?;
    Ok(())
}
