use thiserror::Error;

use crate::ledger::{Address, Amount};

/// Canonical error type returned by every ledger operation.
///
/// Any error aborts the enclosing operation; state, balances and the event
/// log are left exactly as they were before the call.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    /// A non-administrator attempted an administrator-only operation.
    #[error("caller {caller} is not the owner")]
    Unauthorized { caller: Address },

    /// The request was rejected before any state was touched.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A payout, refund or payment could not be delivered.
    #[error("transfer failed: {0}")]
    Transfer(#[from] TransferError),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("insufficient payment: required {required}, paid {paid}")]
    InsufficientPayment { required: Amount, paid: Amount },
    #[error("referrer should be registered already: {sponsor}")]
    UnregisteredSponsor { sponsor: Address },
    #[error("chest total is {total}, index {index} out of range")]
    TierOutOfRange { index: usize, total: usize },
    #[error("unknown user {0}")]
    UnknownUser(Address),
    #[error("no free placement slot below {sponsor}")]
    NoFreeSlot { sponsor: Address },
    #[error("chest {tier} for {beneficiary} unlocked out of order, expected {expected}")]
    OutOfOrderUnlock {
        beneficiary: Address,
        tier: usize,
        expected: usize,
    },
    #[error("structure width must be at least 1")]
    ZeroWidth,
    #[error("invalid chest schedule: {0}")]
    InvalidSchedule(String),
    #[error("admin address must not be empty")]
    EmptyAdmin,
    #[error("address {0} is reserved for the ledger vault")]
    ReservedAddress(Address),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransferError {
    #[error("insufficient funds in account {account}: needed {needed}, available {available}")]
    InsufficientFunds {
        account: Address,
        needed: Amount,
        available: Amount,
    },
    #[error("recipient {0} rejects payments")]
    RecipientRejected(Address),
    #[error("balance overflow crediting {0}")]
    Overflow(Address),
}

pub type LedgerResult<T> = Result<T, LedgerError>;
