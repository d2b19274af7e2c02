//! Deferred actions
//!
//! Some actions of the bond manager cannot be done at the time they are requested. Changing the
//! resolving list or white list is only allowed while the link layer is idle, and bonds are only
//! erased while there are no active links. These actions are kept in a [`DeferredActions`] set and
//! run once their preconditions are met.

use crate::address::{AddressType, BluetoothDeviceAddress};

/// An action that waits for its precondition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredAction {
    /// Erase every bond
    EraseAll,
    /// Erase the bond of an identity
    Erase(BluetoothDeviceAddress, AddressType),
    /// Start the next queued pairing
    StartNextPairing,
    /// Rebuild the controller's resolving list
    RebuildResolvingList,
    /// Rebuild the controller's white list
    SyncWhiteList,
}

impl DeferredAction {
    fn requires_no_links(&self) -> bool {
        matches!(self, DeferredAction::EraseAll | DeferredAction::Erase(..))
    }

    fn requires_idle_link_layer(&self) -> bool {
        matches!(self, DeferredAction::RebuildResolvingList | DeferredAction::SyncWhiteList)
    }

    /// Ready actions are run in the order of their priority
    fn priority(&self) -> u8 {
        match self {
            DeferredAction::EraseAll | DeferredAction::Erase(..) => 0,
            DeferredAction::StartNextPairing => 1,
            DeferredAction::RebuildResolvingList => 2,
            DeferredAction::SyncWhiteList => 3,
        }
    }
}

/// A set of deferred actions
#[derive(Debug, Default)]
pub struct DeferredActions {
    actions: Vec<DeferredAction>,
}

impl DeferredActions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule an action
    ///
    /// Scheduling an action that is already pending does nothing. Erasing every bond replaces any
    /// pending erase of a single bond.
    pub fn schedule(&mut self, action: DeferredAction) {
        let erase_all_pending = self.is_pending(DeferredAction::EraseAll);

        if self.is_pending(action) || (matches!(action, DeferredAction::Erase(..)) && erase_all_pending) {
            return;
        }

        if action == DeferredAction::EraseAll {
            self.actions.retain(|pending| !matches!(pending, DeferredAction::Erase(..)));
        }

        log::trace!("(BM) deferred {:?}", action);

        self.actions.push(action);
    }

    pub fn is_pending(&self, action: DeferredAction) -> bool {
        self.actions.contains(&action)
    }

    /// Check if any erase is pending
    pub fn is_erase_pending(&self) -> bool {
        self.actions.iter().any(|action| action.requires_no_links())
    }

    /// Remove and return every action whose precondition is met
    ///
    /// `no_links` is whether there are no active links and `idle` is whether the link layer is
    /// idle. The returned actions are ordered by priority.
    pub fn take_ready(&mut self, no_links: bool, idle: bool) -> Vec<DeferredAction> {
        let mut ready = Vec::new();

        self.actions.retain(|action| {
            let is_ready = (no_links || !action.requires_no_links()) && (idle || !action.requires_idle_link_layer());

            if is_ready {
                ready.push(*action);
            }

            !is_ready
        });

        ready.sort_by_key(DeferredAction::priority);

        ready
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}
