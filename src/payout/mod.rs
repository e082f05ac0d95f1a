use serde::{Deserialize, Serialize};

use crate::chest::ChestTable;
use crate::error::ValidationError;
use crate::ledger::{Address, Amount, Transfer};
use crate::registry::{UserIdx, UserRegistry};

/// One chest crossing owed to a beneficiary.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Unlock {
    pub beneficiary: UserIdx,
    pub address: Address,
    pub tier: usize,
    /// Price of the chest at the moment of unlocking.
    pub amount: Amount,
}

impl Unlock {
    pub fn transfer(&self) -> Transfer {
        Transfer::chest_payout(&self.address, self.amount, self.tier)
    }
}

pub struct PayoutDispatcher<'a> {
    chests: &'a ChestTable,
    registry: &'a UserRegistry,
}

impl<'a> PayoutDispatcher<'a> {
    pub fn new(chests: &'a ChestTable, registry: &'a UserRegistry) -> Self {
        Self { chests, registry }
    }

    /// Chests that `ancestors` have newly earned with their current counts.
    /// Each beneficiary's unlocks are consecutive, starting right above its
    /// highest paid chest.
    pub fn plan(&self, ancestors: &[UserIdx]) -> Vec<Unlock> {
        let mut unlocks = Vec::new();
        for idx in ancestors {
            let user = self.registry.get(*idx);
            let mut next = user.next_tier();
            while let Ok(tier) = self.chests.tier(next) {
                if user.qualifying_count < tier.threshold {
                    break;
                }
                unlocks.push(Unlock {
                    beneficiary: *idx,
                    address: user.address.clone(),
                    tier: next,
                    amount: tier.price,
                });
                next += 1;
            }
        }
        unlocks
    }
}

/// Records `unlock` against its beneficiary. The tier must be the one right
/// above the beneficiary's highest paid chest.
pub(crate) fn apply(registry: &mut UserRegistry, unlock: &Unlock) -> Result<(), ValidationError> {
    let user = registry.get_mut(unlock.beneficiary);
    let expected = user.next_tier();
    if unlock.tier != expected {
        return Err(ValidationError::OutOfOrderUnlock {
            beneficiary: user.address.clone(),
            tier: unlock.tier,
            expected,
        });
    }
    user.unlocked_tier = Some(unlock.tier);
    Ok(())
}

/// Reverses [`apply`] for the same unlock.
pub(crate) fn revert(registry: &mut UserRegistry, unlock: &Unlock) {
    let user = registry.get_mut(unlock.beneficiary);
    if user.unlocked_tier == Some(unlock.tier) {
        user.unlocked_tier = unlock.tier.checked_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::User;

    fn registry_with_count(count: u64, unlocked: Option<usize>) -> UserRegistry {
        let mut registry = UserRegistry::new("root".into());
        let root = registry.root();
        let user = registry.get_mut(root);
        user.qualifying_count = count;
        user.unlocked_tier = unlocked;
        registry
    }

    fn chests() -> ChestTable {
        ChestTable::new(&[10, 20, 40], &[3, 4, 5]).unwrap()
    }

    #[test]
    fn nothing_due_below_threshold() {
        let registry = registry_with_count(2, None);
        let chests = chests();
        let plan = PayoutDispatcher::new(&chests, &registry).plan(&[registry.root()]);
        assert!(plan.is_empty());
    }

    #[test]
    fn crossings_are_planned_in_order_without_skipping() {
        let registry = registry_with_count(5, None);
        let chests = chests();
        let plan = PayoutDispatcher::new(&chests, &registry).plan(&[registry.root()]);
        let tiers: Vec<usize> = plan.iter().map(|u| u.tier).collect();
        assert_eq!(tiers, vec![0, 1, 2]);
        assert_eq!(plan[1].amount, 20);
    }

    #[test]
    fn paid_tiers_are_not_planned_again() {
        let registry = registry_with_count(4, Some(0));
        let chests = chests();
        let plan = PayoutDispatcher::new(&chests, &registry).plan(&[registry.root()]);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].tier, 1);
    }

    #[test]
    fn apply_enforces_sequence_and_revert_restores() {
        let mut registry = registry_with_count(5, None);
        let root = registry.root();
        let skip = Unlock {
            beneficiary: root,
            address: "root".into(),
            tier: 1,
            amount: 20,
        };
        assert!(matches!(
            apply(&mut registry, &skip),
            Err(ValidationError::OutOfOrderUnlock { expected: 0, .. })
        ));
        let first = Unlock { tier: 0, ..skip };
        apply(&mut registry, &first).unwrap();
        assert_eq!(registry.get(root).unlocked_tier, Some(0));
        assert!(apply(&mut registry, &first).is_err());
        revert(&mut registry, &first);
        assert_eq!(registry.get(root), &User { qualifying_count: 5, ..User::root("root".into()) });
    }
}
