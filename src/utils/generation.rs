use std::collections::HashMap;
use std::hash::Hash;

/// Hands out monotonically increasing tokens per key. A load records the
/// token it started with and may only apply its result while that token is
/// still current, so a late response cannot overwrite newer state.
#[derive(Debug)]
pub struct Generations<K> {
    next: u64,
    current: HashMap<K, u64>,
}

impl<K: Eq + Hash> Default for Generations<K> {
    fn default() -> Self {
        Self {
            next: 0,
            current: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash> Generations<K> {
    pub fn begin(&mut self, key: K) -> u64 {
        self.next += 1;
        self.current.insert(key, self.next);
        self.next
    }

    pub fn is_current(&self, key: &K, token: u64) -> bool {
        self.current.get(key) == Some(&token)
    }

    pub fn invalidate(&mut self, key: &K) {
        self.current.remove(key);
    }

    /// Tokens are never reused, so everything handed out so far goes stale
    pub fn invalidate_all(&mut self) {
        self.current.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_newer_token_supersedes_older() {
        let mut generations = Generations::default();
        let first = generations.begin("community");
        let second = generations.begin("community");
        assert!(!generations.is_current(&"community", first));
        assert!(generations.is_current(&"community", second));
    }

    #[test]
    fn test_keys_are_independent() {
        let mut generations = Generations::default();
        let a = generations.begin("a");
        let b = generations.begin("b");
        assert!(generations.is_current(&"a", a));
        assert!(generations.is_current(&"b", b));
    }

    #[test]
    fn test_invalidate_all_never_revives_tokens() {
        let mut generations = Generations::default();
        let old = generations.begin(());
        generations.invalidate_all();
        assert!(!generations.is_current(&(), old));
        let fresh = generations.begin(());
        assert_ne!(old, fresh);
        assert!(generations.is_current(&(), fresh));
    }
}
