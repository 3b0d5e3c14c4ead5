//! Bounded, mutex-guarded collection of per-interface client state.
//!
//! All interface mutation goes through one lock. Accessors hand out clones;
//! read-modify-write happens inside `update` closures, and callers run
//! collaborator side effects only after the lock is released.

use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

use crate::config::InterfaceConfig;
use crate::interface::Interface;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Interface store is full ({0} interfaces)")]
    Full(usize),
    #[error("Interface {0} already exists")]
    Exists(u32),
    #[error("No such interface: {0}")]
    NotFound(u32),
}

pub struct InterfaceStore {
    inner: Mutex<HashMap<u32, Interface>>,
    max: usize,
}

impl InterfaceStore {
    /// Capacity is fixed for the lifetime of the store.
    pub fn new(max: usize) -> Self {
        Self {
            inner: Mutex::new(HashMap::with_capacity(max)),
            max,
        }
    }

    pub fn create(&self, cfg: &InterfaceConfig) -> Result<(), StoreError> {
        let mut map = self.inner.lock().unwrap();
        if map.contains_key(&cfg.ifindex) {
            return Err(StoreError::Exists(cfg.ifindex));
        }
        if map.len() >= self.max {
            return Err(StoreError::Full(self.max));
        }
        map.insert(cfg.ifindex, Interface::new(cfg));
        Ok(())
    }

    pub fn get(&self, ifindex: u32) -> Option<Interface> {
        self.inner.lock().unwrap().get(&ifindex).cloned()
    }

    /// Insert or replace a whole interface, respecting capacity.
    pub fn set(&self, intf: Interface) -> Result<(), StoreError> {
        let mut map = self.inner.lock().unwrap();
        if !map.contains_key(&intf.ifindex) && map.len() >= self.max {
            return Err(StoreError::Full(self.max));
        }
        map.insert(intf.ifindex, intf);
        Ok(())
    }

    pub fn delete(&self, ifindex: u32) -> Option<Interface> {
        self.inner.lock().unwrap().remove(&ifindex)
    }

    /// Snapshot of the managed interface indexes, in ascending order.
    pub fn indexes(&self) -> Vec<u32> {
        let mut v: Vec<u32> = self.inner.lock().unwrap().keys().copied().collect();
        v.sort_unstable();
        v
    }

    /// Run one read-modify-write step under the lock.
    pub fn update<R>(&self, ifindex: u32, f: impl FnOnce(&mut Interface) -> R) -> Option<R> {
        self.inner.lock().unwrap().get_mut(&ifindex).map(f)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ClientState;

    fn cfg(ifindex: u32) -> InterfaceConfig {
        InterfaceConfig {
            ifindex,
            mac: [2, 0, 0, 0, 0, ifindex as u8],
            stateless: false,
        }
    }

    #[test]
    fn test_create_get_delete() {
        let store = InterfaceStore::new(4);
        store.create(&cfg(10)).unwrap();
        assert_eq!(store.get(10).unwrap().ifindex, 10);
        assert!(store.get(11).is_none());
        assert!(store.delete(10).is_some());
        assert!(store.get(10).is_none());
    }

    #[test]
    fn test_capacity_enforced() {
        let store = InterfaceStore::new(2);
        store.create(&cfg(1)).unwrap();
        store.create(&cfg(2)).unwrap();
        assert_eq!(store.create(&cfg(3)), Err(StoreError::Full(2)));
        // Deleting frees a slot.
        store.delete(1);
        store.create(&cfg(3)).unwrap();
    }

    #[test]
    fn test_duplicate_create_rejected() {
        let store = InterfaceStore::new(4);
        store.create(&cfg(1)).unwrap();
        assert_eq!(store.create(&cfg(1)), Err(StoreError::Exists(1)));
    }

    #[test]
    fn test_update_mutates_in_place() {
        let store = InterfaceStore::new(4);
        store.create(&cfg(1)).unwrap();
        let out = store.update(1, |intf| {
            intf.state = ClientState::Solicit;
            intf.ifindex
        });
        assert_eq!(out, Some(1));
        assert_eq!(store.get(1).unwrap().state, ClientState::Solicit);
        assert!(store.update(9, |_| ()).is_none());
    }

    #[test]
    fn test_indexes_sorted() {
        let store = InterfaceStore::new(8);
        for i in [5, 1, 3] {
            store.create(&cfg(i)).unwrap();
        }
        assert_eq!(store.indexes(), vec![1, 3, 5]);
    }
}
