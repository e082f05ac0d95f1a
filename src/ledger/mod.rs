use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::TransferError;

pub type Address = String;
pub type Amount = u128;

pub const NATIVE_SCALE: Amount = 1_000_000_000_000_000_000; // 1 native unit = 1e18 minimal units

/// Account that custodies registration fees and funds chest payouts.
pub const VAULT: &str = "ledger:vault";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AccountBalance {
    pub available: Amount,
    #[serde(default)]
    pub rejects_payments: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransferKind {
    Payment,
    Refund,
    ChestPayout { tier: usize },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transfer {
    pub from: Address,
    pub to: Address,
    pub amount: Amount,
    pub kind: TransferKind,
}

impl Transfer {
    pub fn payment(from: &Address, amount: Amount) -> Self {
        Self {
            from: from.clone(),
            to: VAULT.to_string(),
            amount,
            kind: TransferKind::Payment,
        }
    }

    pub fn refund(to: &Address, amount: Amount) -> Self {
        Self {
            from: VAULT.to_string(),
            to: to.clone(),
            amount,
            kind: TransferKind::Refund,
        }
    }

    pub fn chest_payout(to: &Address, amount: Amount, tier: usize) -> Self {
        Self {
            from: VAULT.to_string(),
            to: to.clone(),
            amount,
            kind: TransferKind::ChestPayout { tier },
        }
    }
}

/// Native-currency balances of every participant plus the ledger vault.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ValueLedger {
    accounts: BTreeMap<Address, AccountBalance>,
}

impl ValueLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance_of(&self, account: &str) -> Amount {
        self.accounts
            .get(account)
            .map(|balance| balance.available)
            .unwrap_or_default()
    }

    pub fn vault_balance(&self) -> Amount {
        self.balance_of(VAULT)
    }

    pub fn accounts(&self) -> &BTreeMap<Address, AccountBalance> {
        &self.accounts
    }

    /// Mints funds into an account. Used by the host to fund participants.
    pub fn credit(&mut self, account: &Address, amount: Amount) -> Result<(), TransferError> {
        let balance = self.accounts.entry(account.clone()).or_default();
        balance.available = balance
            .available
            .checked_add(amount)
            .ok_or_else(|| TransferError::Overflow(account.clone()))?;
        Ok(())
    }

    /// Marks an account as refusing inbound transfers, the way a contract
    /// without a payable fallback would.
    pub fn set_rejects_payments(&mut self, account: &Address, rejects: bool) {
        self.accounts.entry(account.clone()).or_default().rejects_payments = rejects;
    }

    /// Applies a batch of transfers in order. Either every transfer lands or
    /// no balance changes.
    pub fn settle(&mut self, batch: &[Transfer]) -> Result<(), TransferError> {
        let mut scratch: BTreeMap<Address, Amount> = BTreeMap::new();
        for transfer in batch {
            if transfer.amount == 0 {
                continue;
            }
            if self
                .accounts
                .get(&transfer.to)
                .map(|balance| balance.rejects_payments)
                .unwrap_or(false)
            {
                return Err(TransferError::RecipientRejected(transfer.to.clone()));
            }
            let available = *scratch
                .entry(transfer.from.clone())
                .or_insert_with(|| self.balance_of(&transfer.from));
            if available < transfer.amount {
                return Err(TransferError::InsufficientFunds {
                    account: transfer.from.clone(),
                    needed: transfer.amount,
                    available,
                });
            }
            scratch.insert(transfer.from.clone(), available - transfer.amount);
            let target = scratch
                .entry(transfer.to.clone())
                .or_insert_with(|| self.balance_of(&transfer.to));
            *target = target
                .checked_add(transfer.amount)
                .ok_or_else(|| TransferError::Overflow(transfer.to.clone()))?;
        }
        for (account, available) in scratch {
            self.accounts.entry(account).or_default().available = available;
        }
        debug!(transfers = batch.len(), "settled transfer batch");
        Ok(())
    }
}

/// Serializes an [`Amount`] as a decimal string. Needed wherever an amount
/// sits inside a tagged enum or a `serde_json::Value`, neither of which holds
/// integers above `u64`.
pub mod decimal_amount {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    use super::Amount;

    pub fn serialize<S>(value: &Amount, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Amount, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        encoded.parse().map_err(D::Error::custom)
    }
}
