use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::engine::MatrixLedger;
use crate::ledger::{Amount, VAULT};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SnapshotMetadata {
    /// Number of committed operations.
    pub height: u64,
}

/// Compact summary of a ledger, suitable for printing or comparing replicas.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub meta: SnapshotMetadata,
    pub users: usize,
    pub structure_width: u32,
    pub owner: Option<String>,
    #[serde(with = "crate::ledger::decimal_amount")]
    pub vault_balance: Amount,
    pub events: usize,
    pub state_root: String,
}

#[derive(Debug, Error)]
pub enum StateFileError {
    #[error("failed to access state file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed state file {path}: {source}")]
    Format {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("inconsistent state file {path}: {reason}")]
    Invalid { path: String, reason: String },
}

impl MatrixLedger {
    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            meta: self.meta().clone(),
            users: self.registry().len(),
            structure_width: self.structure_width(),
            owner: self.owner().cloned(),
            vault_balance: self.balances().vault_balance(),
            events: self.events().len(),
            state_root: hex::encode(state_root(self)),
        }
    }

    pub fn load(path: &Path) -> Result<Self, StateFileError> {
        let display = path.display().to_string();
        let raw = fs::read(path).map_err(|source| StateFileError::Io {
            path: display.clone(),
            source,
        })?;
        let ledger: Self = serde_json::from_slice(&raw).map_err(|source| StateFileError::Format {
            path: display.clone(),
            source,
        })?;
        ledger
            .check_integrity()
            .map_err(|reason| StateFileError::Invalid {
                path: display,
                reason,
            })?;
        Ok(ledger)
    }

    /// Structural checks for a ledger that did not come out of
    /// [`MatrixLedger::new`]. Chest schedules are already checked while
    /// deserializing.
    pub fn check_integrity(&self) -> Result<(), String> {
        if self.structure_width() == 0 {
            return Err("structure width is zero".into());
        }
        let registry = self.registry();
        registry.check_links()?;
        if self.owner().is_some_and(|owner| owner == VAULT) {
            return Err("owner is the vault account".into());
        }
        let mut descendants = vec![0u64; registry.len()];
        for (idx, user) in registry.iter().collect::<Vec<_>>().into_iter().rev() {
            if user.address == VAULT {
                return Err(format!("user {idx} is the vault account"));
            }
            if descendants[idx.0] != user.qualifying_count {
                return Err(format!(
                    "user {idx} counts {} registrations below it, tree has {}",
                    user.qualifying_count, descendants[idx.0]
                ));
            }
            if let Some(tier) = user.unlocked_tier {
                if tier >= self.chests().len() {
                    return Err(format!("user {idx} unlocked unknown chest {tier}"));
                }
            }
            if let Some(parent) = user.placement_parent {
                descendants[parent.0] += descendants[idx.0] + 1;
            }
        }
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<(), StateFileError> {
        let display = path.display().to_string();
        let encoded = serde_json::to_vec_pretty(self).map_err(|source| StateFileError::Format {
            path: display.clone(),
            source,
        })?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|source| StateFileError::Io {
                    path: display.clone(),
                    source,
                })?;
            }
        }
        fs::write(path, encoded).map_err(|source| StateFileError::Io {
            path: display,
            source,
        })
    }
}

/// Digest of one leaf. Every field is length-prefixed so adjacent fields
/// cannot trade bytes.
fn leaf(tag: &[u8], fields: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(tag);
    for field in fields {
        hasher.update((field.len() as u64).to_le_bytes());
        hasher.update(field);
    }
    hasher.finalize().into()
}

/// Merkle root over users, chests, balances and configuration.
pub fn state_root(ledger: &MatrixLedger) -> [u8; 32] {
    let registry = ledger.registry();
    let users = registry.iter().map(|(_, user)| {
        let parent = user
            .placement_parent
            .map(|idx| registry.get(idx).address.as_str())
            .unwrap_or_default();
        let unlocked = user.unlocked_tier.map_or(u64::MAX, |tier| tier as u64);
        leaf(
            b"user",
            &[
                user.address.as_bytes(),
                user.sponsor.as_deref().unwrap_or_default().as_bytes(),
                parent.as_bytes(),
                &user.qualifying_count.to_le_bytes(),
                &unlocked.to_le_bytes(),
            ],
        )
    });
    let chests = ledger.chests().iter().map(|tier| {
        leaf(
            b"chest",
            &[
                &(tier.index as u64).to_le_bytes(),
                &tier.price.to_le_bytes(),
                &tier.threshold.to_le_bytes(),
            ],
        )
    });
    let accounts = ledger
        .balances()
        .accounts()
        .iter()
        .map(|(account, balance)| {
            leaf(
                b"acct",
                &[account.as_bytes(), &balance.available.to_le_bytes()],
            )
        });
    let config = leaf(
        b"config",
        &[
            &ledger.structure_width().to_le_bytes(),
            ledger.owner().map(String::as_str).unwrap_or_default().as_bytes(),
        ],
    );

    let mut level: Vec<[u8; 32]> = users
        .chain(chests)
        .chain(accounts)
        .chain(std::iter::once(config))
        .collect();
    // An unpaired node moves up a level unchanged.
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| match pair {
                [left, right] => {
                    let mut hasher = Sha256::new();
                    hasher.update(b"node");
                    hasher.update(left);
                    hasher.update(right);
                    hasher.finalize().into()
                }
                _ => pair[0],
            })
            .collect();
    }
    level[0]
}
