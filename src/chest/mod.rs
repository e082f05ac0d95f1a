use serde::{Deserialize, Serialize};
use tracing::info;

use crate::access::AccessControl;
use crate::error::{LedgerResult, ValidationError};
use crate::ledger::{Address, Amount};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tier {
    pub index: usize,
    pub price: Amount,
    pub threshold: u64,
}

/// Ordered chest tiers. The tier count and thresholds are fixed at
/// construction; only prices move afterwards. Deserialization goes through
/// [`ChestTable::new`], so a stored table obeys the same rules.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "Vec<Tier>", into = "Vec<Tier>")]
pub struct ChestTable {
    tiers: Vec<Tier>,
}

impl ChestTable {
    pub fn new(prices: &[Amount], thresholds: &[u64]) -> Result<Self, ValidationError> {
        if prices.is_empty() {
            return Err(ValidationError::InvalidSchedule(
                "at least one chest is required".into(),
            ));
        }
        if prices.len() != thresholds.len() {
            return Err(ValidationError::InvalidSchedule(format!(
                "{} prices for {} thresholds",
                prices.len(),
                thresholds.len()
            )));
        }
        if thresholds[0] == 0 {
            return Err(ValidationError::InvalidSchedule(
                "first threshold must be positive".into(),
            ));
        }
        if thresholds.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(ValidationError::InvalidSchedule(
                "thresholds must be strictly increasing".into(),
            ));
        }
        let tiers = prices
            .iter()
            .zip(thresholds)
            .enumerate()
            .map(|(index, (price, threshold))| Tier {
                index,
                price: *price,
                threshold: *threshold,
            })
            .collect();
        Ok(Self { tiers })
    }

    /// Thresholds `width^1, width^2, ...`: a chest unlocks when the matrix
    /// below its owner is full down to the matching depth.
    pub fn geometric(width: u32, prices: &[Amount]) -> Result<Self, ValidationError> {
        let thresholds = geometric_thresholds(width, prices.len())?;
        Self::new(prices, &thresholds)
    }

    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tier> {
        self.tiers.iter()
    }

    pub fn tier(&self, index: usize) -> Result<&Tier, ValidationError> {
        self.tiers
            .get(index)
            .ok_or(ValidationError::TierOutOfRange {
                index,
                total: self.tiers.len(),
            })
    }

    /// Registration fee. Tier 0 always exists.
    pub fn entry_price(&self) -> Amount {
        self.tiers[0].price
    }

    pub fn set_price(
        &mut self,
        access: &dyn AccessControl,
        caller: &Address,
        index: usize,
        price: Amount,
    ) -> LedgerResult<()> {
        access.ensure_admin(caller)?;
        let total = self.tiers.len();
        let tier = self
            .tiers
            .get_mut(index)
            .ok_or(ValidationError::TierOutOfRange { index, total })?;
        tier.price = price;
        info!(tier = index, price, "chest price updated");
        Ok(())
    }
}

impl TryFrom<Vec<Tier>> for ChestTable {
    type Error = ValidationError;

    fn try_from(tiers: Vec<Tier>) -> Result<Self, Self::Error> {
        if let Some((position, tier)) = tiers
            .iter()
            .enumerate()
            .find(|(position, tier)| tier.index != *position)
        {
            return Err(ValidationError::InvalidSchedule(format!(
                "tier at position {position} is labelled {}",
                tier.index
            )));
        }
        let prices: Vec<Amount> = tiers.iter().map(|tier| tier.price).collect();
        let thresholds: Vec<u64> = tiers.iter().map(|tier| tier.threshold).collect();
        Self::new(&prices, &thresholds)
    }
}

impl From<ChestTable> for Vec<Tier> {
    fn from(table: ChestTable) -> Self {
        table.tiers
    }
}

pub fn geometric_thresholds(width: u32, count: usize) -> Result<Vec<u64>, ValidationError> {
    if width < 2 {
        return Err(ValidationError::InvalidSchedule(format!(
            "geometric thresholds need width >= 2, got {width}"
        )));
    }
    let mut thresholds = Vec::with_capacity(count);
    let mut next = u64::from(width);
    for _ in 0..count {
        thresholds.push(next);
        next = next.checked_mul(u64::from(width)).ok_or_else(|| {
            ValidationError::InvalidSchedule("threshold overflows u64".into())
        })?;
    }
    Ok(thresholds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::Ownership;
    use crate::error::LedgerError;

    fn table() -> ChestTable {
        ChestTable::geometric(3, &[50, 100, 200, 400, 800, 1_600, 3_200]).unwrap()
    }

    #[test]
    fn geometric_schedule_matches_width_powers() {
        let chests = table();
        let thresholds: Vec<u64> = chests.iter().map(|t| t.threshold).collect();
        assert_eq!(thresholds, vec![3, 9, 27, 81, 243, 729, 2_187]);
        assert_eq!(chests.tier(1).unwrap().threshold, 9);
    }

    #[test]
    fn rejects_non_increasing_thresholds() {
        let err = ChestTable::new(&[1, 2, 3], &[3, 3, 9]).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidSchedule(_)));
        assert!(ChestTable::new(&[1, 2], &[3]).is_err());
        assert!(ChestTable::new(&[], &[]).is_err());
    }

    #[test]
    fn owner_sets_price() {
        let access = Ownership::new("bob".into());
        let mut chests = table();
        chests.set_price(&access, &"bob".into(), 0, 100).unwrap();
        assert_eq!(chests.tier(0).unwrap().price, 100);
        assert_eq!(chests.entry_price(), 100);
    }

    #[test]
    fn non_owner_cannot_set_price() {
        let access = Ownership::new("bob".into());
        let mut chests = table();
        let err = chests.set_price(&access, &"alice".into(), 0, 100).unwrap_err();
        assert!(matches!(err, LedgerError::Unauthorized { .. }));
        assert_eq!(chests.tier(0).unwrap().price, 50);
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let access = Ownership::new("bob".into());
        let mut chests = table();
        let err = chests.set_price(&access, &"bob".into(), 8, 100).unwrap_err();
        assert_eq!(
            err,
            LedgerError::Validation(ValidationError::TierOutOfRange { index: 8, total: 7 })
        );
        assert!(err.to_string().starts_with("chest total is 7"));
    }

    #[test]
    fn stored_tables_are_revalidated() {
        let encoded = serde_json::to_string(&table()).unwrap();
        let decoded: ChestTable = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, table());

        let falling = r#"[{"index":0,"price":1,"threshold":3},{"index":1,"price":2,"threshold":2}]"#;
        assert!(serde_json::from_str::<ChestTable>(falling).is_err());
        assert!(serde_json::from_str::<ChestTable>("[]").is_err());
        let mislabelled = r#"[{"index":1,"price":1,"threshold":3}]"#;
        assert!(serde_json::from_str::<ChestTable>(mislabelled).is_err());
    }
}
