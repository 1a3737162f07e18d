//! Per-session suppression of repeat recognition events.

use crate::types::IdentityId;
use std::collections::HashSet;

/// Identities that already produced a recognition event this session.
///
/// Never persisted. Midnight rollover is not detected here: callers reset
/// the cache when they begin a new day's session.
#[derive(Debug, Default, Clone)]
pub struct DedupCache {
    emitted: HashSet<IdentityId>,
}

impl DedupCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if no event has been emitted for `id` since the last reset.
    pub fn should_emit(&self, id: IdentityId) -> bool {
        !self.emitted.contains(&id)
    }

    pub fn mark_emitted(&mut self, id: IdentityId) {
        self.emitted.insert(id);
    }

    /// Check and mark in one step. Returns true if the caller should emit.
    pub fn claim(&mut self, id: IdentityId) -> bool {
        if !self.should_emit(id) {
            return false;
        }
        self.mark_emitted(id);
        true
    }

    /// Forget `id` so its next match emits again. Returns false if `id` had
    /// not been emitted.
    pub fn release(&mut self, id: IdentityId) -> bool {
        self.emitted.remove(&id)
    }

    pub fn reset(&mut self) {
        self.emitted.clear();
    }

    /// Number of distinct identities emitted since the last reset.
    pub fn len(&self) -> usize {
        self.emitted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.emitted.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emits_once_per_identity() {
        let mut cache = DedupCache::new();
        let emitted = (0..10).filter(|_| cache.claim(42)).count();
        assert_eq!(emitted, 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_identities_are_independent() {
        let mut cache = DedupCache::new();
        assert!(cache.claim(1));
        assert!(cache.claim(2));
        assert!(!cache.claim(1));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_release_reopens_one_identity() {
        let mut cache = DedupCache::new();
        assert!(cache.claim(1));
        assert!(cache.claim(2));
        assert!(cache.release(1));
        assert!(!cache.release(1));
        assert!(cache.claim(1));
        assert!(!cache.claim(2));
    }

    #[test]
    fn test_reset_allows_emit_again() {
        let mut cache = DedupCache::new();
        cache.mark_emitted(5);
        assert!(!cache.should_emit(5));
        cache.reset();
        assert!(cache.is_empty());
        assert!(cache.should_emit(5));
    }
}
