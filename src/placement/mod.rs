//! Capacity-bounded placement tree.
//!
//! A registrant names a sponsor, but is attached under whichever node of the
//! sponsor's subtree the active [`PlacementPolicy`] picks. The structure width
//! caps the number of direct children any node may receive. Every ancestor of
//! a new node, up to the root, gets one more qualifying registration.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::registry::{User, UserIdx, UserRegistry};

/// Chooses the node that absorbs the next registrant.
pub trait PlacementPolicy {
    /// Returns a node in the subtree rooted at `anchor` with fewer than
    /// `width` children, or `None` if the policy finds none.
    fn select(&self, registry: &UserRegistry, anchor: UserIdx, width: u32) -> Option<UserIdx>;
}

/// Shallowest level first; within a level the most recently attached node
/// is tried first.
///
/// With width 3 the sponsor fills its own three slots, then the third child
/// receives the next three registrants, then the second child, then the first.
#[derive(Clone, Copy, Debug, Default)]
pub struct ReverseLevelOrder;

/// Plain breadth-first: shallowest level first, earliest node first.
#[derive(Clone, Copy, Debug, Default)]
pub struct LevelOrder;

fn has_capacity(user: &User, width: u32) -> bool {
    user.children.len() < width as usize
}

fn next_level(registry: &UserRegistry, level: &[UserIdx]) -> Vec<UserIdx> {
    level
        .iter()
        .flat_map(|idx| registry.get(*idx).children.iter().copied())
        .collect()
}

impl PlacementPolicy for ReverseLevelOrder {
    fn select(&self, registry: &UserRegistry, anchor: UserIdx, width: u32) -> Option<UserIdx> {
        let mut level = vec![anchor];
        while !level.is_empty() {
            if let Some(found) = level
                .iter()
                .rev()
                .find(|idx| has_capacity(registry.get(**idx), width))
            {
                return Some(*found);
            }
            level = next_level(registry, &level);
        }
        None
    }
}

impl PlacementPolicy for LevelOrder {
    fn select(&self, registry: &UserRegistry, anchor: UserIdx, width: u32) -> Option<UserIdx> {
        let mut level = vec![anchor];
        while !level.is_empty() {
            if let Some(found) = level
                .iter()
                .find(|idx| has_capacity(registry.get(**idx), width))
            {
                return Some(*found);
            }
            level = next_level(registry, &level);
        }
        None
    }
}

/// Serializable selector for the built-in policies.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlacementStrategy {
    #[default]
    ReverseLevelOrder,
    LevelOrder,
}

impl PlacementPolicy for PlacementStrategy {
    fn select(&self, registry: &UserRegistry, anchor: UserIdx, width: u32) -> Option<UserIdx> {
        match self {
            PlacementStrategy::ReverseLevelOrder => ReverseLevelOrder.select(registry, anchor, width),
            PlacementStrategy::LevelOrder => LevelOrder.select(registry, anchor, width),
        }
    }
}

pub struct PlacementTree;

impl PlacementTree {
    /// Picks the placement parent for a registrant crediting `sponsor`.
    pub fn place(
        registry: &UserRegistry,
        sponsor: &str,
        width: u32,
        policy: &dyn PlacementPolicy,
    ) -> Result<UserIdx, ValidationError> {
        if width == 0 {
            return Err(ValidationError::ZeroWidth);
        }
        let anchor = registry
            .lookup(sponsor)
            .ok_or_else(|| ValidationError::UnregisteredSponsor {
                sponsor: sponsor.to_string(),
            })?;
        policy
            .select(registry, anchor, width)
            .ok_or_else(|| ValidationError::NoFreeSlot {
                sponsor: sponsor.to_string(),
            })
    }

    /// Attaches `user` under `parent` and credits every ancestor. Returns the
    /// new slot and its ancestor chain, nearest first.
    pub(crate) fn attach(
        registry: &mut UserRegistry,
        parent: UserIdx,
        mut user: User,
    ) -> (UserIdx, Vec<UserIdx>) {
        user.placement_parent = Some(parent);
        let idx = registry.insert(user);
        registry.get_mut(parent).children.push(idx);
        let ancestors = registry.ancestors(idx);
        for ancestor in &ancestors {
            let record = registry.get_mut(*ancestor);
            record.qualifying_count += 1;
        }
        (idx, ancestors)
    }

    /// Undoes the most recent [`PlacementTree::attach`].
    pub(crate) fn detach(registry: &mut UserRegistry, idx: UserIdx) {
        debug_assert_eq!(idx.0 + 1, registry.len(), "only the newest node can be detached");
        for ancestor in registry.ancestors(idx) {
            let record = registry.get_mut(ancestor);
            record.qualifying_count -= 1;
        }
        if let Some(parent) = registry.get(idx).placement_parent {
            registry.get_mut(parent).children.retain(|child| *child != idx);
        }
        registry.remove_last();
    }

    /// User at `slot` among the nodes `depth + 1` edges below `user`, in
    /// registration order.
    pub fn downline_at(
        registry: &UserRegistry,
        user: UserIdx,
        depth: usize,
        slot: usize,
    ) -> Option<UserIdx> {
        let mut level = registry.get(user).children.clone();
        for _ in 0..depth {
            if level.is_empty() {
                return None;
            }
            level = next_level(registry, &level);
        }
        level.sort_by_key(|idx| registry.get(*idx).joined_seq);
        level.get(slot).copied()
    }
}
