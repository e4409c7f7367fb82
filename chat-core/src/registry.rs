//! In-memory channel membership: authoritative for live presence, not for
//! persistence. A username appears in at most one channel's set at a time.

use std::collections::{HashMap, HashSet};

use tokio::sync::Mutex;

#[derive(Default)]
pub struct ChannelRegistry {
    inner: Mutex<HashMap<String, HashSet<String>>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes `username` from whatever channel it currently occupies, if
    /// any, returning that channel's name.
    pub async fn leave_any(&self, username: &str) -> Option<String> {
        let mut guard = self.inner.lock().await;
        Self::remove_from_any(&mut guard, username)
    }

    /// Removes `username` from `channel` specifically. Returns whether it
    /// was present.
    pub async fn leave(&self, channel: &str, username: &str) -> bool {
        let mut guard = self.inner.lock().await;
        let Some(members) = guard.get_mut(channel) else {
            return false;
        };
        let removed = members.remove(username);
        if members.is_empty() {
            guard.remove(channel);
        }
        removed
    }

    /// Moves `username` into `channel`, first vacating whatever channel it
    /// previously occupied (membership is exclusive). Returns the channel
    /// it was removed from, if any and different from `channel`.
    pub async fn join(&self, channel: &str, username: &str) -> Option<String> {
        let mut guard = self.inner.lock().await;
        let previous = Self::remove_from_any(&mut guard, username);
        guard
            .entry(channel.to_string())
            .or_default()
            .insert(username.to_string());
        previous.filter(|p| p != channel)
    }

    fn remove_from_any(
        guard: &mut HashMap<String, HashSet<String>>,
        username: &str,
    ) -> Option<String> {
        let mut left = None;
        guard.retain(|channel, members| {
            if members.remove(username) {
                left = Some(channel.clone());
            }
            !members.is_empty()
        });
        left
    }

    pub async fn members(&self, channel: &str) -> Vec<String> {
        let guard = self.inner.lock().await;
        guard
            .get(channel)
            .map(|set| {
                let mut v: Vec<String> = set.iter().cloned().collect();
                v.sort();
                v
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn join_then_rejoin_is_exclusive() {
        let registry = ChannelRegistry::new();
        registry.join("general", "alice").await;
        registry.join("random", "alice").await;

        assert!(registry.members("general").await.is_empty());
        assert_eq!(registry.members("random").await, vec!["alice".to_string()]);
    }

    #[tokio::test]
    async fn leave_any_reports_the_vacated_channel() {
        let registry = ChannelRegistry::new();
        registry.join("general", "bob").await;
        let left = registry.leave_any("bob").await;
        assert_eq!(left, Some("general".to_string()));
        assert!(registry.members("general").await.is_empty());
    }

    #[tokio::test]
    async fn leave_any_is_noop_for_unknown_user() {
        let registry = ChannelRegistry::new();
        assert_eq!(registry.leave_any("nobody").await, None);
    }

    #[tokio::test]
    async fn leave_specific_channel_mismatch_does_nothing() {
        let registry = ChannelRegistry::new();
        registry.join("general", "carol").await;
        let removed = registry.leave("random", "carol").await;
        assert!(!removed);
        assert_eq!(registry.members("general").await, vec!["carol".to_string()]);
    }
}
