//! Registration engine and the ledger aggregate it mutates.
//!
//! [`MatrixLedger`] owns every piece of state: the user arena, the chest
//! table, the structure width, balances and the event log. Each public
//! mutator is atomic. A registration first commits placement, counts and
//! unlock indices, then settles its transfer batch; if settlement fails the
//! commit is undone from the same plan and nothing is published.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::access::{AccessControl, Ownership};
use crate::chest::{ChestTable, Tier};
use crate::config::LedgerConfig;
use crate::error::{LedgerError, LedgerResult, ValidationError};
use crate::events::LedgerEvent;
use crate::ledger::{Address, Amount, Transfer, ValueLedger, VAULT};
use crate::payout::{self, PayoutDispatcher, Unlock};
use crate::placement::{PlacementStrategy, PlacementTree};
use crate::registry::{User, UserIdx, UserRegistry};
use crate::snapshot::SnapshotMetadata;

/// Outcome of a successful [`MatrixLedger::join`].
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct JoinReceipt {
    pub user: Address,
    /// Sponsor on record, which for a repeat registration is the original one.
    pub sponsor: Option<Address>,
    pub placement_parent: Option<Address>,
    pub rejoined: bool,
    pub charged: Amount,
    pub refunded: Amount,
    pub unlocks: Vec<Unlock>,
    pub events: Vec<LedgerEvent>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MatrixLedger {
    meta: SnapshotMetadata,
    ownership: Ownership,
    chests: ChestTable,
    structure_width: u32,
    placement: PlacementStrategy,
    registry: UserRegistry,
    balances: ValueLedger,
    events: Vec<LedgerEvent>,
}

impl MatrixLedger {
    /// Builds a ledger whose administrator is also the placement root.
    pub fn new(config: &LedgerConfig) -> LedgerResult<Self> {
        config.validate()?;
        let chests = config.chest_table()?;
        info!(
            admin = %config.admin,
            width = config.structure_width,
            chests = chests.len(),
            placement = ?config.placement,
            "ledger created"
        );
        Ok(Self {
            meta: SnapshotMetadata::default(),
            ownership: Ownership::new(config.admin.clone()),
            chests,
            structure_width: config.structure_width,
            placement: config.placement,
            registry: UserRegistry::new(config.admin.clone()),
            balances: ValueLedger::new(),
            events: Vec::new(),
        })
    }

    /// Registers `caller` under `sponsor`, paying `paid` into the vault.
    ///
    /// The entry price is kept and any excess is refunded in the same
    /// operation. A caller that is already registered keeps its sponsor and
    /// placement; the call only settles the payment and refund.
    pub fn join(
        &mut self,
        caller: &Address,
        sponsor: &Address,
        paid: Amount,
    ) -> LedgerResult<JoinReceipt> {
        for address in [caller, sponsor] {
            if address == VAULT {
                return Err(ValidationError::ReservedAddress(address.clone()).into());
            }
        }
        let entry = self.chests.entry_price();
        if paid < entry {
            debug!(caller = %caller, paid, required = entry, "join rejected: insufficient payment");
            return Err(ValidationError::InsufficientPayment {
                required: entry,
                paid,
            }
            .into());
        }
        if self.registry.contains(caller) {
            return self.rejoin(caller, paid, entry);
        }

        let parent = PlacementTree::place(
            &self.registry,
            sponsor,
            self.structure_width,
            &self.placement,
        )?;
        let user = User {
            address: caller.clone(),
            sponsor: Some(sponsor.clone()),
            placement_parent: None,
            children: Vec::new(),
            qualifying_count: 0,
            unlocked_tier: None,
            joined_seq: self.registry.next_seq(),
        };
        let (idx, ancestors) = PlacementTree::attach(&mut self.registry, parent, user);
        let unlocks = PayoutDispatcher::new(&self.chests, &self.registry).plan(&ancestors);
        for (applied, unlock) in unlocks.iter().enumerate() {
            if let Err(err) = payout::apply(&mut self.registry, unlock) {
                self.rollback(idx, &unlocks[..applied]);
                return Err(err.into());
            }
        }

        let refund = paid - entry;
        let mut batch = vec![Transfer::payment(caller, paid)];
        if refund > 0 {
            batch.push(Transfer::refund(caller, refund));
        }
        batch.extend(unlocks.iter().map(Unlock::transfer));
        if let Err(err) = self.balances.settle(&batch) {
            warn!(caller = %caller, sponsor = %sponsor, error = %err, "join rolled back");
            self.rollback(idx, &unlocks);
            return Err(err.into());
        }

        let mut events = vec![LedgerEvent::Joined {
            user: caller.clone(),
            sponsor: sponsor.clone(),
        }];
        events.extend(unlocks.iter().map(|unlock| LedgerEvent::ChestUnlocked {
            beneficiary: unlock.address.clone(),
            tier: unlock.tier,
        }));
        let parent_address = self.registry.get(parent).address.clone();
        self.commit(&events);
        for unlock in &unlocks {
            info!(beneficiary = %unlock.address, tier = unlock.tier, amount = unlock.amount, "chest unlocked");
        }
        info!(
            user = %caller,
            sponsor = %sponsor,
            parent = %parent_address,
            refunded = refund,
            "user joined"
        );

        Ok(JoinReceipt {
            user: caller.clone(),
            sponsor: Some(sponsor.clone()),
            placement_parent: Some(parent_address),
            rejoined: false,
            charged: entry,
            refunded: refund,
            unlocks,
            events,
        })
    }

    fn rejoin(&mut self, caller: &Address, paid: Amount, entry: Amount) -> LedgerResult<JoinReceipt> {
        let refund = paid - entry;
        let mut batch = vec![Transfer::payment(caller, paid)];
        if refund > 0 {
            batch.push(Transfer::refund(caller, refund));
        }
        self.balances.settle(&batch)?;
        self.commit(&[]);

        let record = self
            .registry
            .user(caller)
            .ok_or_else(|| ValidationError::UnknownUser(caller.clone()))?;
        let parent = record
            .placement_parent
            .map(|idx| self.registry.get(idx).address.clone());
        info!(user = %caller, refunded = refund, "repeat registration kept original sponsor");
        Ok(JoinReceipt {
            user: caller.clone(),
            sponsor: record.sponsor.clone(),
            placement_parent: parent,
            rejoined: true,
            charged: entry,
            refunded: refund,
            unlocks: Vec::new(),
            events: Vec::new(),
        })
    }

    fn rollback(&mut self, idx: UserIdx, applied: &[Unlock]) {
        for unlock in applied.iter().rev() {
            payout::revert(&mut self.registry, unlock);
        }
        PlacementTree::detach(&mut self.registry, idx);
    }

    fn commit(&mut self, events: &[LedgerEvent]) {
        self.events.extend_from_slice(events);
        self.meta.height += 1;
    }

    pub fn set_price(&mut self, caller: &Address, tier: usize, price: Amount) -> LedgerResult<()> {
        self.chests.set_price(&self.ownership, caller, tier, price)?;
        self.commit(&[LedgerEvent::PriceUpdated { tier, price }]);
        Ok(())
    }

    /// Changes the child capacity used by future placements only.
    pub fn set_structure_width(&mut self, caller: &Address, width: u32) -> LedgerResult<()> {
        self.ownership.ensure_admin(caller)?;
        if width == 0 {
            return Err(ValidationError::ZeroWidth.into());
        }
        self.structure_width = width;
        info!(width, "structure width updated");
        self.commit(&[LedgerEvent::StructureWidthUpdated { width }]);
        Ok(())
    }

    pub fn transfer_ownership(&mut self, caller: &Address, new_owner: &Address) -> LedgerResult<()> {
        self.ownership.ensure_admin(caller)?;
        if new_owner.is_empty() {
            return Err(ValidationError::EmptyAdmin.into());
        }
        if new_owner == VAULT {
            return Err(ValidationError::ReservedAddress(new_owner.clone()).into());
        }
        let previous = self.ownership.transfer(caller, new_owner.clone())?;
        info!(previous = %previous, new_owner = %new_owner, "ownership transferred");
        self.commit(&[LedgerEvent::OwnershipTransferred {
            previous,
            new_owner: Some(new_owner.clone()),
        }]);
        Ok(())
    }

    pub fn renounce_ownership(&mut self, caller: &Address) -> LedgerResult<()> {
        let previous = self.ownership.renounce(caller)?;
        warn!(previous = %previous, "ownership renounced");
        self.commit(&[LedgerEvent::OwnershipTransferred {
            previous,
            new_owner: None,
        }]);
        Ok(())
    }

    /// Host-side funding of a participant's balance.
    pub fn fund(&mut self, account: &Address, amount: Amount) -> LedgerResult<()> {
        self.balances.credit(account, amount)?;
        debug!(account = %account, amount, "account funded");
        Ok(())
    }

    pub fn set_rejects_payments(&mut self, account: &Address, rejects: bool) {
        self.balances.set_rejects_payments(account, rejects);
    }

    fn registered(&self, user: &str) -> LedgerResult<&User> {
        self.registry
            .user(user)
            .ok_or_else(|| ValidationError::UnknownUser(user.to_string()).into())
    }

    pub fn sponsor_of(&self, user: &str) -> LedgerResult<Option<Address>> {
        Ok(self.registered(user)?.sponsor.clone())
    }

    pub fn placement_parent_of(&self, user: &str) -> LedgerResult<Option<Address>> {
        Ok(self
            .registered(user)?
            .placement_parent
            .map(|idx| self.registry.get(idx).address.clone()))
    }

    pub fn unlocked_tier_of(&self, user: &str) -> LedgerResult<Option<usize>> {
        Ok(self.registered(user)?.unlocked_tier)
    }

    /// Number of chests the user has unlocked.
    pub fn level(&self, user: &str) -> LedgerResult<usize> {
        Ok(self.registered(user)?.level())
    }

    pub fn qualifying_count_of(&self, user: &str) -> LedgerResult<u64> {
        Ok(self.registered(user)?.qualifying_count)
    }

    pub fn tier(&self, index: usize) -> LedgerResult<Tier> {
        Ok(self.chests.tier(index)?.clone())
    }

    pub fn downline_at(&self, user: &str, depth: usize, slot: usize) -> LedgerResult<Option<Address>> {
        let idx = self
            .registry
            .lookup(user)
            .ok_or_else(|| LedgerError::from(ValidationError::UnknownUser(user.to_string())))?;
        Ok(PlacementTree::downline_at(&self.registry, idx, depth, slot)
            .map(|found| self.registry.get(found).address.clone()))
    }

    pub fn is_registered(&self, user: &str) -> bool {
        self.registry.contains(user)
    }

    pub fn is_admin(&self, caller: &Address) -> bool {
        self.ownership.is_admin(caller)
    }

    pub fn owner(&self) -> Option<&Address> {
        self.ownership.owner()
    }

    pub fn structure_width(&self) -> u32 {
        self.structure_width
    }

    pub fn placement(&self) -> PlacementStrategy {
        self.placement
    }

    pub fn chests(&self) -> &ChestTable {
        &self.chests
    }

    pub fn registry(&self) -> &UserRegistry {
        &self.registry
    }

    pub fn balances(&self) -> &ValueLedger {
        &self.balances
    }

    pub fn balance_of(&self, account: &str) -> Amount {
        self.balances.balance_of(account)
    }

    pub fn events(&self) -> &[LedgerEvent] {
        &self.events
    }

    pub fn meta(&self) -> &SnapshotMetadata {
        &self.meta
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransferError;

    const PRICE: Amount = 50;

    fn ledger() -> MatrixLedger {
        let config = LedgerConfig {
            admin: "bob".into(),
            chest_prices: vec![PRICE, 100, 200, 400, 800, 1_600, 3_200],
            ..LedgerConfig::default()
        };
        MatrixLedger::new(&config).unwrap()
    }

    fn funded(ledger: &mut MatrixLedger, names: &[&str]) {
        for name in names {
            ledger.fund(&name.to_string(), 10_000).unwrap();
        }
    }

    #[test]
    fn join_records_sponsor_and_emits_joined() {
        let mut ledger = ledger();
        funded(&mut ledger, &["alice"]);
        let receipt = ledger.join(&"alice".into(), &"bob".into(), PRICE).unwrap();
        assert_eq!(receipt.placement_parent.as_deref(), Some("bob"));
        assert_eq!(ledger.sponsor_of("alice").unwrap().as_deref(), Some("bob"));
        assert_eq!(
            ledger.events(),
            &[LedgerEvent::Joined {
                user: "alice".into(),
                sponsor: "bob".into()
            }]
        );
        assert_eq!(ledger.meta().height, 1);
    }

    #[test]
    fn third_registration_unlocks_first_chest() {
        let mut ledger = ledger();
        funded(&mut ledger, &["alice", "mike", "tony", "jacy"]);
        ledger.join(&"alice".into(), &"bob".into(), PRICE).unwrap();
        ledger.join(&"mike".into(), &"bob".into(), PRICE).unwrap();
        let receipt = ledger.join(&"tony".into(), &"bob".into(), PRICE).unwrap();
        assert_eq!(receipt.unlocks.len(), 1);
        assert_eq!(ledger.balance_of("bob"), PRICE);
        assert_eq!(ledger.unlocked_tier_of("bob").unwrap(), Some(0));
        assert_eq!(ledger.balance_of(VAULT), 2 * PRICE);

        let receipt = ledger.join(&"jacy".into(), &"bob".into(), PRICE).unwrap();
        assert!(receipt.unlocks.is_empty());
        assert_eq!(ledger.unlocked_tier_of("bob").unwrap(), Some(0));
        assert_eq!(ledger.level("bob").unwrap(), 1);
    }

    #[test]
    fn overpayment_is_refunded() {
        let mut ledger = ledger();
        funded(&mut ledger, &["alice"]);
        let receipt = ledger.join(&"alice".into(), &"bob".into(), 1_000).unwrap();
        assert_eq!(receipt.refunded, 1_000 - PRICE);
        assert_eq!(ledger.balance_of("alice"), 10_000 - PRICE);
    }

    #[test]
    fn insufficient_payment_changes_nothing() {
        let mut ledger = ledger();
        funded(&mut ledger, &["alice"]);
        let before = ledger.clone();
        let err = ledger.join(&"alice".into(), &"bob".into(), PRICE - 1).unwrap_err();
        assert_eq!(
            err,
            LedgerError::Validation(ValidationError::InsufficientPayment {
                required: PRICE,
                paid: PRICE - 1
            })
        );
        assert_eq!(ledger, before);
    }

    #[test]
    fn unregistered_sponsor_changes_nothing() {
        let mut ledger = ledger();
        funded(&mut ledger, &["alice"]);
        let before = ledger.clone();
        let err = ledger.join(&"alice".into(), &"mike".into(), PRICE).unwrap_err();
        assert!(err.to_string().contains("referrer should be registered already"));
        assert_eq!(ledger, before);
    }

    #[test]
    fn rejoin_keeps_sponsor_and_refunds_excess() {
        let mut ledger = ledger();
        funded(&mut ledger, &["alice", "mike"]);
        ledger.join(&"alice".into(), &"bob".into(), PRICE).unwrap();
        ledger.join(&"mike".into(), &"bob".into(), PRICE).unwrap();
        let balance = ledger.balance_of("alice");
        let receipt = ledger.join(&"alice".into(), &"mike".into(), 3 * PRICE).unwrap();
        assert!(receipt.rejoined);
        assert_eq!(receipt.sponsor.as_deref(), Some("bob"));
        assert_eq!(ledger.sponsor_of("alice").unwrap().as_deref(), Some("bob"));
        assert_eq!(ledger.placement_parent_of("alice").unwrap().as_deref(), Some("bob"));
        assert_eq!(ledger.balance_of("alice"), balance - PRICE);
        assert_eq!(ledger.qualifying_count_of("bob").unwrap(), 2);
        assert_eq!(ledger.events().len(), 2);
    }

    #[test]
    fn failed_payout_rolls_back_registration() {
        let mut ledger = ledger();
        funded(&mut ledger, &["alice", "mike", "tony"]);
        ledger.join(&"alice".into(), &"bob".into(), PRICE).unwrap();
        ledger.join(&"mike".into(), &"bob".into(), PRICE).unwrap();
        ledger.set_rejects_payments(&"bob".into(), true);
        let before = ledger.clone();

        let err = ledger.join(&"tony".into(), &"bob".into(), PRICE).unwrap_err();
        assert_eq!(
            err,
            LedgerError::Transfer(TransferError::RecipientRejected("bob".into()))
        );
        assert_eq!(ledger, before);
        assert!(!ledger.is_registered("tony"));
        assert_eq!(ledger.unlocked_tier_of("bob").unwrap(), None);

        ledger.set_rejects_payments(&"bob".into(), false);
        ledger.join(&"tony".into(), &"bob".into(), PRICE).unwrap();
        assert_eq!(ledger.unlocked_tier_of("bob").unwrap(), Some(0));
    }

    #[test]
    fn payout_uses_price_at_unlock_time() {
        let mut ledger = ledger();
        funded(&mut ledger, &["alice", "mike", "tony"]);
        ledger.join(&"alice".into(), &"bob".into(), PRICE).unwrap();
        ledger.join(&"mike".into(), &"bob".into(), PRICE).unwrap();
        ledger.set_price(&"bob".into(), 0, 60).unwrap();
        ledger.join(&"tony".into(), &"bob".into(), 60).unwrap();
        assert_eq!(ledger.balance_of("bob"), 60);
        assert_eq!(ledger.balance_of(VAULT), 2 * PRICE);
    }

    #[test]
    fn admin_operations_are_gated() {
        let mut ledger = ledger();
        let before = ledger.clone();
        assert!(matches!(
            ledger.set_price(&"alice".into(), 0, 1),
            Err(LedgerError::Unauthorized { .. })
        ));
        assert!(matches!(
            ledger.set_structure_width(&"alice".into(), 4),
            Err(LedgerError::Unauthorized { .. })
        ));
        assert_eq!(ledger, before);

        ledger.set_structure_width(&"bob".into(), 4).unwrap();
        assert_eq!(ledger.structure_width(), 4);
        assert_eq!(
            ledger.set_structure_width(&"bob".into(), 0),
            Err(LedgerError::Validation(ValidationError::ZeroWidth))
        );
    }

    #[test]
    fn ownership_moves_admin_rights() {
        let mut ledger = ledger();
        ledger.transfer_ownership(&"bob".into(), &"alice".into()).unwrap();
        assert!(ledger.is_admin(&"alice".into()));
        assert!(ledger.set_price(&"bob".into(), 0, 1).is_err());
        ledger.renounce_ownership(&"alice".into()).unwrap();
        assert!(ledger.owner().is_none());
        assert!(ledger.set_structure_width(&"alice".into(), 5).is_err());
    }

    #[test]
    fn vault_cannot_register_or_sponsor() {
        let mut ledger = ledger();
        funded(&mut ledger, &["alice", "mike"]);
        ledger.join(&"alice".into(), &"bob".into(), PRICE).unwrap();
        let before = ledger.clone();

        let vault: Address = VAULT.into();
        assert_eq!(
            ledger.join(&vault, &"bob".into(), PRICE),
            Err(LedgerError::Validation(ValidationError::ReservedAddress(vault.clone())))
        );
        assert_eq!(
            ledger.join(&"mike".into(), &vault, PRICE),
            Err(LedgerError::Validation(ValidationError::ReservedAddress(vault.clone())))
        );
        assert_eq!(ledger, before);
        assert!(!ledger.is_registered(VAULT));
        assert_eq!(ledger.balance_of(VAULT), PRICE);
    }

    #[test]
    fn ownership_cannot_move_to_vault() {
        let mut ledger = ledger();
        let err = ledger
            .transfer_ownership(&"bob".into(), &VAULT.into())
            .unwrap_err();
        assert_eq!(
            err,
            LedgerError::Validation(ValidationError::ReservedAddress(VAULT.into()))
        );
        assert!(ledger.is_admin(&"bob".into()));
        assert!(ledger
            .transfer_ownership(&"alice".into(), &VAULT.into())
            .is_err());
    }

    #[test]
    fn vault_cannot_administer_a_new_ledger() {
        let config = LedgerConfig::with_admin(VAULT);
        assert_eq!(
            MatrixLedger::new(&config).unwrap_err(),
            LedgerError::Validation(ValidationError::ReservedAddress(VAULT.into()))
        );
    }
}
