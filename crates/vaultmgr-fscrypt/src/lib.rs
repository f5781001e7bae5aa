//! System-backed collaborators for vaultmgr. `system` wraps the host binaries,
//! `hardware` talks to the TPM helper, and `command` and `parse` cover shell
//! integration details.

mod command;
mod hardware;
mod parse;
mod system;

pub use command::{CommandRunner, Output};
pub use hardware::TpmHelperShare;
pub use parse::ListingParser;
pub use system::{SystemFscrypt, SystemKeyring, TmpfsMount};
