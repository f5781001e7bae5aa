//! Key byte decoding plus the write/erase primitives used by key staging.

use crate::error::{VaultError, VaultResult};
use hex::FromHex;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use zeroize::Zeroizing;

/// One half of the vault key as delivered by a share source. Length is not
/// checked here; merging enforces it.
pub type SecretShare = Zeroizing<Vec<u8>>;

/// Owner-only mode for staged key files.
pub const KEY_FILE_MODE: u32 = 0o600;

/// Decode helper output into a share, accepting a 32-byte binary blob or a
/// 64-digit hex string (whitespace ignored).
pub fn decode_share_bytes(origin: &str, bytes: &[u8]) -> VaultResult<SecretShare> {
    if bytes.len() == 32 {
        return Ok(Zeroizing::new(bytes.to_vec()));
    }

    if bytes.is_empty() {
        return Err(invalid_share(origin, "no output"));
    }

    let mut filtered = Zeroizing::new(Vec::with_capacity(bytes.len()));
    for byte in bytes {
        if byte.is_ascii_whitespace() {
            continue;
        }
        if !byte.is_ascii_hexdigit() {
            return Err(invalid_share(
                origin,
                format!("found non-hex byte 0x{byte:02x}"),
            ));
        }
        filtered.push(*byte);
    }

    if filtered.len() != 64 {
        return Err(invalid_share(
            origin,
            format!(
                "hex share must contain exactly 64 hex digits (got {})",
                filtered.len()
            ),
        ));
    }

    let share = Vec::from_hex(&filtered[..])
        .map_err(|err| invalid_share(origin, format!("hex decode failed: {err}")))?;
    Ok(Zeroizing::new(share))
}

/// Create `path` with owner-only permissions and write `key` into it. The
/// file must not exist yet.
pub fn write_key_file(path: &Path, key: &[u8]) -> VaultResult<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(KEY_FILE_MODE)
        .open(path)?;
    file.write_all(key)?;
    file.sync_all()?;
    Ok(())
}

/// Overwrite the file's contents with zeros, flush, then unlink it.
pub fn secure_erase_file(path: &Path) -> VaultResult<()> {
    let len = fs::metadata(path)?.len() as usize;
    {
        let mut file = OpenOptions::new().write(true).open(path)?;
        file.write_all(&vec![0u8; len])?;
        file.sync_all()?;
    }
    fs::remove_file(path)?;
    Ok(())
}

fn invalid_share(origin: &str, reason: impl Into<String>) -> VaultError {
    VaultError::HardwareShare(format!("{origin}: {}", reason.into()))
}
