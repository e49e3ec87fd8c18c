use moka::sync::Cache;
use std::time::Duration;

/// Online/offline status per user id, as last reported by the server.
/// Entries expire after the TTL and the whole map is dropped on reconnect.
#[derive(Clone, Debug)]
pub struct PresenceCache {
    cache: Cache<String, bool>,
}

impl PresenceCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(100_000)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub fn set(&self, user_id: &str, online: bool) {
        self.cache.insert(user_id.to_string(), online);
    }

    pub fn get(&self, user_id: &str) -> Option<bool> {
        self.cache.get(user_id)
    }

    pub fn online_users(&self) -> Vec<String> {
        let mut users: Vec<String> = self
            .cache
            .iter()
            .filter(|(_, online)| *online)
            .map(|(user_id, _)| user_id.as_ref().clone())
            .collect();
        users.sort();
        users
    }

    pub fn clear(&self) {
        self.cache.invalidate_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_updates_overwrite() {
        let presence = PresenceCache::new(Duration::from_secs(60));
        presence.set("u1", true);
        presence.set("u2", true);
        presence.set("u1", false);
        assert_eq!(presence.get("u1"), Some(false));
        assert_eq!(presence.online_users(), vec!["u2".to_string()]);
    }

    #[test]
    fn test_clear_forgets_everyone() {
        let presence = PresenceCache::new(Duration::from_secs(60));
        presence.set("u1", true);
        presence.clear();
        assert_eq!(presence.get("u1"), None);
    }
}
