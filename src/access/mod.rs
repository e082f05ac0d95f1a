//! Administrator capability checks.
//!
//! The ledger never decides on its own who may reconfigure it. Mutators that
//! change chest prices or the structure width receive an [`AccessControl`]
//! capability and consult it before touching any state.

use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, LedgerResult};
use crate::ledger::Address;

pub trait AccessControl {
    fn is_admin(&self, caller: &Address) -> bool;

    fn ensure_admin(&self, caller: &Address) -> LedgerResult<()> {
        if self.is_admin(caller) {
            Ok(())
        } else {
            Err(LedgerError::Unauthorized {
                caller: caller.clone(),
            })
        }
    }
}

/// Single transferable administrator identity.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ownership {
    owner: Option<Address>,
}

impl Ownership {
    pub fn new(owner: Address) -> Self {
        Self { owner: Some(owner) }
    }

    pub fn owner(&self) -> Option<&Address> {
        self.owner.as_ref()
    }

    /// Hands the capability to `new_owner`. Returns the previous owner.
    pub fn transfer(&mut self, caller: &Address, new_owner: Address) -> LedgerResult<Address> {
        self.ensure_admin(caller)?;
        let previous = self.owner.replace(new_owner);
        Ok(previous.unwrap_or_default())
    }

    /// Drops the capability for good; every gated call fails afterwards.
    pub fn renounce(&mut self, caller: &Address) -> LedgerResult<Address> {
        self.ensure_admin(caller)?;
        Ok(self.owner.take().unwrap_or_default())
    }
}

impl AccessControl for Ownership {
    fn is_admin(&self, caller: &Address) -> bool {
        self.owner.as_ref() == Some(caller)
    }
}
