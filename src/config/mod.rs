use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chest::{geometric_thresholds, ChestTable};
use crate::error::ValidationError;
use crate::ledger::{Address, Amount, NATIVE_SCALE, VAULT};
use crate::placement::PlacementStrategy;

pub const DEFAULT_CHEST_COUNT: usize = 7;
pub const DEFAULT_STRUCTURE_WIDTH: u32 = 3;
pub const FIRST_CHEST_PRICE: Amount = NATIVE_SCALE / 20; // 0.05 native units

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

/// Construction parameters of a ledger.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LedgerConfig {
    /// Administrator and placement root.
    pub admin: Address,
    pub structure_width: u32,
    pub chest_prices: Vec<Amount>,
    /// Explicit unlock thresholds. Derived from the width when absent.
    pub thresholds: Option<Vec<u64>>,
    pub placement: PlacementStrategy,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            admin: "owner".to_string(),
            structure_width: DEFAULT_STRUCTURE_WIDTH,
            chest_prices: default_prices(DEFAULT_CHEST_COUNT),
            thresholds: None,
            placement: PlacementStrategy::default(),
        }
    }
}

/// Prices starting at [`FIRST_CHEST_PRICE`] and doubling per chest,
/// saturating at `Amount::MAX`.
pub fn default_prices(count: usize) -> Vec<Amount> {
    std::iter::successors(Some(FIRST_CHEST_PRICE), |price| Some(price.saturating_mul(2)))
        .take(count)
        .collect()
}

impl LedgerConfig {
    pub fn with_admin(admin: impl Into<Address>) -> Self {
        Self {
            admin: admin.into(),
            ..Self::default()
        }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: display.clone(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: display,
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.structure_width == 0 {
            return Err(ValidationError::ZeroWidth);
        }
        if self.admin.is_empty() {
            return Err(ValidationError::EmptyAdmin);
        }
        if self.admin == VAULT {
            return Err(ValidationError::ReservedAddress(self.admin.clone()));
        }
        self.chest_table().map(|_| ())
    }

    pub fn chest_table(&self) -> Result<ChestTable, ValidationError> {
        let thresholds = match &self.thresholds {
            Some(explicit) => explicit.clone(),
            None => geometric_thresholds(self.structure_width, self.chest_prices.len())?,
        };
        ChestTable::new(&self.chest_prices, &thresholds)
    }
}
