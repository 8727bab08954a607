//! Registry of the addresses enrolled in the universal income.
//!
//! Registration is backed by an external proof-of-humanity oracle. The ledger
//! only records which addresses are registered, and the removals the oracle
//! reported that still have to be written into a block.

use crate::crypto::Address;
use crate::error::ChainError;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// The proof-of-humanity oracle.
pub trait HumansManager: Send + Sync {
    fn is_registered(&self, address: &str) -> Result<bool, ChainError>;
}

/// Bookkeeping of registered addresses, as seen by the ledger.
pub trait AddressesManager: Send + Sync {
    fn clear(&self);
    fn copy(&self) -> Box<dyn AddressesManager>;
    /// The addresses of `addresses` that are not registered yet.
    fn filter(&self, addresses: &[Address]) -> Vec<Address>;
    fn is_registered(&self, address: &str) -> bool;
    /// Removals pending inclusion in a block.
    fn removed_addresses(&self) -> Vec<Address>;
    fn update(&self, added: &[Address], removed: &[Address]);
    /// Checks the registration changes a neighbor block claims against the oracle.
    fn verify(&self, added: &[Address], removed: &[Address]) -> Result<(), ChainError>;
}

#[derive(Debug, Clone, Default)]
struct AddressesRegistryInner {
    registered: HashSet<Address>,
    removed: Vec<Address>,
}

pub struct AddressesRegistry {
    humans_manager: Arc<dyn HumansManager>,
    inner: RwLock<AddressesRegistryInner>,
    /// Oracle answers cached until the next synchronization.
    temporary: Mutex<HashMap<Address, bool>>,
}

impl AddressesRegistry {
    pub fn new(humans_manager: Arc<dyn HumansManager>) -> Self {
        AddressesRegistry {
            humans_manager,
            inner: RwLock::new(AddressesRegistryInner::default()),
            temporary: Mutex::new(HashMap::new()),
        }
    }

    /// Queues the registered addresses the oracle no longer recognises for removal.
    pub fn synchronize(&self, _timestamp: i64) {
        let registered: Vec<Address> = self.inner.read().registered.iter().cloned().collect();
        let mut revoked = Vec::new();
        for address in registered {
            match self.humans_manager.is_registered(&address) {
                Ok(false) => revoked.push(address),
                Ok(true) => {}
                Err(e) => debug!("failed to get proof of humanity for address {}: {}", address, e),
            }
        }
        {
            let mut inner = self.inner.write();
            for address in revoked {
                if !inner.removed.contains(&address) {
                    inner.removed.push(address);
                }
            }
        }
        self.temporary.lock().clear();
    }

    /// Oracle answer for `address`, cached. `None` when the oracle failed.
    fn is_human(&self, address: &str) -> Option<bool> {
        if let Some(is_human) = self.temporary.lock().get(address) {
            return Some(*is_human);
        }
        match self.humans_manager.is_registered(address) {
            Ok(is_human) => {
                self.temporary.lock().insert(address.to_string(), is_human);
                Some(is_human)
            }
            Err(e) => {
                debug!("failed to get proof of humanity for address {}: {}", address, e);
                None
            }
        }
    }
}

impl AddressesManager for AddressesRegistry {
    fn clear(&self) {
        *self.inner.write() = AddressesRegistryInner::default();
        self.temporary.lock().clear();
    }

    fn copy(&self) -> Box<dyn AddressesManager> {
        Box::new(AddressesRegistry {
            humans_manager: self.humans_manager.clone(),
            inner: RwLock::new(self.inner.read().clone()),
            temporary: Mutex::new(HashMap::new()),
        })
    }

    fn filter(&self, addresses: &[Address]) -> Vec<Address> {
        let inner = self.inner.read();
        addresses
            .iter()
            .filter(|address| !inner.registered.contains(*address))
            .cloned()
            .collect()
    }

    fn is_registered(&self, address: &str) -> bool {
        self.inner.read().registered.contains(address)
    }

    fn removed_addresses(&self) -> Vec<Address> {
        self.inner.read().removed.clone()
    }

    fn update(&self, added: &[Address], removed: &[Address]) {
        let mut inner = self.inner.write();
        for address in removed {
            inner.removed.retain(|pending| pending != address);
            inner.registered.remove(address);
        }
        for address in added {
            inner.registered.insert(address.clone());
        }
    }

    fn verify(&self, added: &[Address], removed: &[Address]) -> Result<(), ChainError> {
        for address in removed {
            if self.is_registered(address) && self.is_human(address) == Some(true) {
                return Err(ChainError::RegistrationConflict(format!(
                    "a removed address is registered: {}",
                    address
                )));
            }
        }
        for address in added {
            if !self.is_registered(address) && self.is_human(address) == Some(false) {
                return Err(ChainError::RegistrationConflict(format!(
                    "an added address is not registered: {}",
                    address
                )));
            }
        }
        Ok(())
    }
}
