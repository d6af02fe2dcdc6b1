//! In-process claim store.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use conduit_types::StageKey;

use crate::claim::{AgentId, ClaimStore};
use crate::error::{self, StateError};

/// Claim store shared by agents within a single process.
#[derive(Debug, Default)]
pub struct InMemoryClaimStore {
    claims: Mutex<HashMap<StageKey, AgentId>>,
}

impl InMemoryClaimStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> error::Result<MutexGuard<'_, HashMap<StageKey, AgentId>>> {
        self.claims.lock().map_err(|_| StateError::LockPoisoned)
    }

    /// Number of keys currently claimed.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::LockPoisoned`] if the lock was poisoned.
    pub fn len(&self) -> error::Result<usize> {
        Ok(self.lock()?.len())
    }

    /// # Errors
    ///
    /// Returns [`StateError::LockPoisoned`] if the lock was poisoned.
    pub fn is_empty(&self) -> error::Result<bool> {
        Ok(self.lock()?.is_empty())
    }
}

impl ClaimStore for InMemoryClaimStore {
    fn claim(&self, key: &StageKey, owner: &AgentId) -> error::Result<bool> {
        let mut claims = self.lock()?;
        let holder = claims.entry(key.clone()).or_insert_with(|| owner.clone());
        Ok(holder == owner)
    }

    fn release(&self, key: &StageKey) -> error::Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }

    fn owner(&self, key: &StageKey) -> error::Result<Option<AgentId>> {
        Ok(self.lock()?.get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn first_claimant_wins() {
        let store = InMemoryClaimStore::new();
        let key = StageKey::new("g1", 0);
        assert!(store.claim(&key, &AgentId::new("a")).unwrap());
        assert!(!store.claim(&key, &AgentId::new("b")).unwrap());
        assert_eq!(store.owner(&key).unwrap(), Some(AgentId::new("a")));
    }

    #[test]
    fn claim_is_reentrant_for_owner() {
        let store = InMemoryClaimStore::new();
        let key = StageKey::new("g1", 0);
        let a = AgentId::new("a");
        assert!(store.claim(&key, &a).unwrap());
        assert!(store.claim(&key, &a).unwrap());
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn release_frees_the_key() {
        let store = InMemoryClaimStore::new();
        let key = StageKey::new("g1", 2);
        store.claim(&key, &AgentId::new("a")).unwrap();
        store.release(&key).unwrap();
        assert_eq!(store.owner(&key).unwrap(), None);
        assert!(store.claim(&key, &AgentId::new("b")).unwrap());

        // Releasing twice is harmless.
        store.release(&StageKey::new("g1", 9)).unwrap();
        store.release(&StageKey::new("g1", 9)).unwrap();
    }

    #[test]
    fn concurrent_claims_have_one_winner() {
        let store = Arc::new(InMemoryClaimStore::new());
        let key = StageKey::new("race", 1);
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                let key = key.clone();
                std::thread::spawn(move || store.claim(&key, &AgentId::new(format!("a{i}"))).unwrap())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
