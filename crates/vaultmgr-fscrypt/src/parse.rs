//! Turns `fscrypt status` listings into a [`StatusListing`].
//!
//! A mountpoint listing carries a PROTECTOR table and a POLICY table. A
//! directory listing carries `Policy:` and `Unlocked:` lines followed by the
//! protectors of that policy.

use regex::Regex;
use vaultmgr_core::error::{VaultError, VaultResult};
use vaultmgr_core::provider::{
    PolicyEntry, PolicyUnlock, ProtectorEntry, ProtectorKind, StatusListing,
};

/// Compiled row patterns for status listings.
#[derive(Debug, Clone)]
pub struct ListingParser {
    protector_row: Regex,
    policy_row: Regex,
    labelled: Regex,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    None,
    Protectors,
    Policies,
}

pub(crate) fn parse_unlock(value: &str) -> PolicyUnlock {
    match value.trim() {
        "Yes" => PolicyUnlock::Yes,
        "No" => PolicyUnlock::No,
        other if other.starts_with("Partially") => PolicyUnlock::Partially,
        other => PolicyUnlock::Unknown(other.to_string()),
    }
}

impl ListingParser {
    pub fn new() -> VaultResult<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern)
                .map_err(|err| VaultError::InvalidConfig(format!("listing pattern: {err}")))
        };
        Ok(Self {
            protector_row: compile(r"^([[:xdigit:]]{16})\s+(No|Yes(?: \([^)]*\))?)\s+(.+?)\s*$")?,
            policy_row: compile(
                r"^([[:xdigit:]]{16,})\s+(Yes|No|Partially(?: \([^)]*\))?|\S+)\s+(.*?)\s*$",
            )?,
            labelled: compile(r#"^(raw key|custom) protector "(.*)"$"#)?,
        })
    }

    fn parse_description(&self, description: &str) -> (ProtectorKind, Option<String>) {
        if let Some(caps) = self.labelled.captures(description) {
            let kind = if &caps[1] == "raw key" {
                ProtectorKind::RawKey
            } else {
                ProtectorKind::CustomPassphrase
            };
            return (kind, Some(caps[2].to_string()));
        }
        if description.starts_with("login protector") {
            return (ProtectorKind::LoginPassphrase, None);
        }
        (ProtectorKind::Other(description.to_string()), None)
    }

    /// Parse the text printed by `fscrypt status <mount|path>`.
    pub fn parse(&self, output: &str) -> StatusListing {
        let mut listing = StatusListing::default();
        let mut section = Section::None;

        for line in output.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                section = Section::None;
                continue;
            }
            if trimmed.starts_with("PROTECTOR") && trimmed.contains("LINKED") {
                section = Section::Protectors;
                continue;
            }
            if trimmed.starts_with("POLICY") && trimmed.contains("UNLOCKED") {
                section = Section::Policies;
                continue;
            }
            if let Some(rest) = trimmed.strip_prefix("Policy:") {
                listing.directory_policy = Some(rest.trim().to_string());
                continue;
            }
            if let Some(rest) = trimmed.strip_prefix("Unlocked:") {
                listing.directory_unlocked = Some(parse_unlock(rest));
                continue;
            }

            match section {
                Section::Protectors => {
                    if let Some(caps) = self.protector_row.captures(trimmed) {
                        let (kind, label) = self.parse_description(&caps[3]);
                        listing.protectors.push(ProtectorEntry {
                            id: caps[1].to_string(),
                            linked: caps[2].starts_with("Yes"),
                            kind,
                            label,
                        });
                    }
                }
                Section::Policies => {
                    if let Some(caps) = self.policy_row.captures(trimmed) {
                        listing.policies.push(PolicyEntry {
                            id: caps[1].to_string(),
                            unlocked: parse_unlock(&caps[2]),
                            protectors: caps[3]
                                .split(',')
                                .map(str::trim)
                                .filter(|id| !id.is_empty())
                                .map(str::to_string)
                                .collect(),
                        });
                    }
                }
                Section::None => {}
            }
        }
        listing
    }
}
