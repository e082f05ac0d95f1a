use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ledger::Address;

/// Stable arena slot of a registered user. Slot 0 is the placement root.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UserIdx(pub usize);

impl fmt::Display for UserIdx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub address: Address,
    /// Referrer named at registration. `None` only for the root.
    pub sponsor: Option<Address>,
    /// Node this user hangs under in the placement tree.
    pub placement_parent: Option<UserIdx>,
    pub children: Vec<UserIdx>,
    pub qualifying_count: u64,
    /// Highest chest already paid out to this user.
    pub unlocked_tier: Option<usize>,
    pub joined_seq: u64,
}

impl User {
    pub fn root(address: Address) -> Self {
        Self {
            address,
            sponsor: None,
            placement_parent: None,
            children: Vec::new(),
            qualifying_count: 0,
            unlocked_tier: None,
            joined_seq: 0,
        }
    }

    /// Chest the user is working towards next.
    pub fn next_tier(&self) -> usize {
        self.unlocked_tier.map_or(0, |tier| tier + 1)
    }

    /// Number of chests unlocked so far.
    pub fn level(&self) -> usize {
        self.next_tier()
    }
}

/// Arena of user records. Records are never removed except to undo the most
/// recent insertion during a rollback.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserRegistry {
    users: Vec<User>,
    by_address: BTreeMap<Address, UserIdx>,
}

impl UserRegistry {
    pub fn new(root: Address) -> Self {
        let mut by_address = BTreeMap::new();
        by_address.insert(root.clone(), UserIdx(0));
        Self {
            users: vec![User::root(root)],
            by_address,
        }
    }

    pub fn root(&self) -> UserIdx {
        UserIdx(0)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn lookup(&self, address: &str) -> Option<UserIdx> {
        self.by_address.get(address).copied()
    }

    pub fn contains(&self, address: &str) -> bool {
        self.by_address.contains_key(address)
    }

    pub fn user(&self, address: &str) -> Option<&User> {
        self.lookup(address).map(|idx| self.get(idx))
    }

    /// Panics on an index that did not come from this registry.
    pub fn get(&self, idx: UserIdx) -> &User {
        &self.users[idx.0]
    }

    pub(crate) fn get_mut(&mut self, idx: UserIdx) -> &mut User {
        &mut self.users[idx.0]
    }

    pub fn iter(&self) -> impl Iterator<Item = (UserIdx, &User)> {
        self.users
            .iter()
            .enumerate()
            .map(|(slot, user)| (UserIdx(slot), user))
    }

    pub fn next_seq(&self) -> u64 {
        self.users.len() as u64
    }

    pub(crate) fn insert(&mut self, user: User) -> UserIdx {
        let idx = UserIdx(self.users.len());
        self.by_address.insert(user.address.clone(), idx);
        self.users.push(user);
        idx
    }

    pub(crate) fn remove_last(&mut self) -> Option<User> {
        if self.users.len() <= 1 {
            return None;
        }
        let user = self.users.pop()?;
        self.by_address.remove(&user.address);
        Some(user)
    }

    /// Confirms that every stored index points into the arena, that the
    /// address index agrees with the records and that parent and child links
    /// mirror each other with only the root lacking a parent.
    pub fn check_links(&self) -> Result<(), String> {
        if self.users.is_empty() {
            return Err("registry has no root".into());
        }
        if self.by_address.len() != self.users.len() {
            return Err(format!(
                "{} addresses indexed for {} users",
                self.by_address.len(),
                self.users.len()
            ));
        }
        let in_bounds = |idx: UserIdx| idx.0 < self.users.len();
        for (idx, user) in self.iter() {
            if self.lookup(&user.address) != Some(idx) {
                return Err(format!("address {} is not indexed at {idx}", user.address));
            }
            match user.placement_parent {
                None if idx != self.root() => {
                    return Err(format!("user {idx} has no placement parent"));
                }
                Some(parent) if !in_bounds(parent) || parent.0 >= idx.0 => {
                    return Err(format!("user {idx} has invalid parent {parent}"));
                }
                Some(parent) if !self.get(parent).children.contains(&idx) => {
                    return Err(format!("user {idx} is missing from the children of {parent}"));
                }
                _ => {}
            }
            for child in &user.children {
                if !in_bounds(*child) || self.get(*child).placement_parent != Some(idx) {
                    return Err(format!("user {idx} lists foreign child {child}"));
                }
            }
        }
        Ok(())
    }

    /// Placement ancestors of `idx`, nearest first, ending at the root.
    pub fn ancestors(&self, idx: UserIdx) -> Vec<UserIdx> {
        let mut chain = Vec::new();
        let mut cursor = self.get(idx).placement_parent;
        while let Some(parent) = cursor {
            chain.push(parent);
            cursor = self.get(parent).placement_parent;
        }
        chain
    }
}
