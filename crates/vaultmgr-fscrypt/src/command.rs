//! Spawns the host binaries (`fscrypt`, `keyctl`, `mount`) and captures what
//! they print. Calls block until the child exits.

use std::path::{Path, PathBuf};
use std::process::Command;
use vaultmgr_core::error::{VaultError, VaultResult};
use zeroize::Zeroizing;

/// Wraps one binary path used for a family of invocations.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    path: PathBuf,
}

/// Collected stdout, stderr, and exit status of a finished command.
#[derive(Debug)]
pub struct Output {
    pub stdout: String,
    pub stderr: String,
    pub status: i32,
}

/// Output of a command whose stdout carries key material.
pub struct SecretOutput {
    pub stdout: Zeroizing<Vec<u8>>,
    pub stderr: String,
    pub status: i32,
}

impl Output {
    /// Stdout followed by stderr, the way operators see it on a terminal.
    pub fn combined(&self) -> String {
        let mut text = self.stdout.clone();
        text.push_str(&self.stderr);
        text
    }
}

impl CommandRunner {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn binary(&self) -> &Path {
        &self.path
    }

    fn tool_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }

    fn spawn<S: AsRef<str>>(&self, args: &[S]) -> VaultResult<std::process::Output> {
        Command::new(&self.path)
            .args(args.iter().map(AsRef::as_ref))
            .output()
            .map_err(|err| {
                if err.kind() == std::io::ErrorKind::NotFound {
                    VaultError::NotFound(self.path.display().to_string())
                } else {
                    VaultError::Io(err)
                }
            })
    }

    /// Execute the binary with `args` and capture the result.
    pub fn run<S: AsRef<str>>(&self, args: &[S]) -> VaultResult<Output> {
        let output = self.spawn(args)?;
        Ok(Output {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            status: output.status.code().unwrap_or(-1),
        })
    }

    /// Capture stdout as raw bytes that are wiped when dropped.
    pub fn run_secret<S: AsRef<str>>(&self, args: &[S]) -> VaultResult<SecretOutput> {
        let output = self.spawn(args)?;
        Ok(SecretOutput {
            stdout: Zeroizing::new(output.stdout),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            status: output.status.code().unwrap_or(-1),
        })
    }

    /// Like [`run`](Self::run), but a non-zero exit becomes `ExternalTool`.
    pub fn run_checked<S: AsRef<str>>(&self, args: &[S]) -> VaultResult<Output> {
        let out = self.run(args)?;
        if out.status != 0 {
            return Err(VaultError::ExternalTool {
                tool: self.tool_name(),
                args: args
                    .iter()
                    .map(AsRef::as_ref)
                    .collect::<Vec<_>>()
                    .join(" "),
                status: out.status,
                output: out.combined(),
            });
        }
        Ok(out)
    }
}
