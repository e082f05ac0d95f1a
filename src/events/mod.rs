use serde::{Deserialize, Serialize};

use crate::ledger::{Address, Amount};

/// Notifications published by committed ledger operations. Rejected or
/// rolled-back operations publish nothing.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    Joined {
        user: Address,
        sponsor: Address,
    },
    ChestUnlocked {
        beneficiary: Address,
        tier: usize,
    },
    PriceUpdated {
        tier: usize,
        #[serde(with = "crate::ledger::decimal_amount")]
        price: Amount,
    },
    StructureWidthUpdated {
        width: u32,
    },
    OwnershipTransferred {
        previous: Address,
        new_owner: Option<Address>,
    },
}

impl LedgerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LedgerEvent::Joined { .. } => "Joined",
            LedgerEvent::ChestUnlocked { .. } => "ChestUnlocked",
            LedgerEvent::PriceUpdated { .. } => "PriceUpdated",
            LedgerEvent::StructureWidthUpdated { .. } => "StructureWidthUpdated",
            LedgerEvent::OwnershipTransferred { .. } => "OwnershipTransferred",
        }
    }
}
