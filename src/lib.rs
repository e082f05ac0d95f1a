//! Matrix referral ledger.
//!
//! Users register under a sponsor and are placed into a capacity-bounded
//! placement tree. Every registration counts towards each placement ancestor,
//! and an ancestor whose count reaches the next chest threshold is paid that
//! chest's price exactly once.
//!
//! * [`chest`]: ordered chest tiers with administrator-set prices.
//! * [`registry`]: arena of user records.
//! * [`placement`]: placement policies and ancestor counting.
//! * [`payout`]: sequential chest unlocks.
//! * [`engine`]: [`MatrixLedger`], the atomic aggregate behind every operation.
//! * [`ledger`]: native-currency balances and transfer batches.
//! * [`access`]: administrator capability.
//! * [`snapshot`]: state digest and JSON persistence.

pub mod access;
pub mod chest;
pub mod config;
pub mod engine;
pub mod events;
pub mod ledger;
pub mod payout;
pub mod placement;
pub mod registry;
pub mod snapshot;

mod error;

pub use access::{AccessControl, Ownership};
pub use chest::{ChestTable, Tier};
pub use config::LedgerConfig;
pub use engine::{JoinReceipt, MatrixLedger};
pub use error::{LedgerError, LedgerResult, TransferError, ValidationError};
pub use events::LedgerEvent;
pub use ledger::{Address, Amount};
pub use placement::{LevelOrder, PlacementPolicy, PlacementStrategy, ReverseLevelOrder};
