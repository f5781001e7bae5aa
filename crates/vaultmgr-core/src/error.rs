use std::path::PathBuf;
use thiserror::Error;

/// Result alias for core operations.
pub type VaultResult<T> = Result<T, VaultError>;

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("[VM1000] io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("[VM1001] toml config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("[VM1002] yaml config parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("[VM1003] json parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("[VM1100] configuration error: {0}")]
    InvalidConfig(String),

    #[error("[VM1200] key share must be {expected} bytes (got {actual})")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("[VM1201] hardware key share unavailable: {0}")]
    HardwareShare(String),

    #[error("[VM1202] remote key share unavailable: {0}")]
    RemoteShare(String),

    #[error("[VM1300] staging failure at {path}: {reason}")]
    Staging { path: PathBuf, reason: String },

    #[error("[VM2000] {tool} {args} exited with code {status}: {output}")]
    ExternalTool {
        tool: String,
        args: String,
        status: i32,
        output: String,
    },

    #[error("[VM2001] {0} not found")]
    NotFound(String),

    #[error("[VM3000] failed to publish status for {name}: {reason}")]
    Publish { name: String, reason: String },

    #[error("[VM3001] supervision error: {0}")]
    Supervision(String),
}

impl VaultError {
    pub fn code(&self) -> &'static str {
        match self {
            VaultError::Io(_) => "VM1000",
            VaultError::Toml(_) => "VM1001",
            VaultError::Yaml(_) => "VM1002",
            VaultError::Json(_) => "VM1003",
            VaultError::InvalidConfig(_) => "VM1100",
            VaultError::InvalidKeyLength { .. } => "VM1200",
            VaultError::HardwareShare(_) => "VM1201",
            VaultError::RemoteShare(_) => "VM1202",
            VaultError::Staging { .. } => "VM1300",
            VaultError::ExternalTool { .. } => "VM2000",
            VaultError::NotFound(_) => "VM2001",
            VaultError::Publish { .. } => "VM3000",
            VaultError::Supervision(_) => "VM3001",
        }
    }

    /// Staging failures leave no safe way to touch any vault, so they abort the run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, VaultError::Staging { .. })
    }

    pub(crate) fn staging(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        VaultError::Staging {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Captured stdout/stderr for tool failures, empty for everything else.
    pub fn tool_output(&self) -> &str {
        match self {
            VaultError::ExternalTool { output, .. } => output,
            _ => "",
        }
    }
}
