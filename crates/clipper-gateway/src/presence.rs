//! Who is in a channel right now
//!
//! Entries carry a last-seen stamp. Hubs refresh the entries of their live
//! connections on every maintenance tick, so anything not refreshed within
//! the TTL belongs to a connection that died without a clean unregister and
//! is hidden from snapshots until the next sweep drops it.

use std::collections::HashMap;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use uuid::Uuid;

use clipper_types::models::{ChannelId, UserIdentity};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceStatus {
    Online,
    Typing,
}

/// One user in a channel's snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentUser {
    pub user_id: Uuid,
    pub username: String,
    pub status: PresenceStatus,
}

#[derive(Debug, Clone)]
struct Entry {
    username: String,
    last_seen: Instant,
    typing_until: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.last_seen) < ttl
    }

    fn status(&self, now: Instant) -> PresenceStatus {
        match self.typing_until {
            Some(until) if until > now => PresenceStatus::Typing,
            _ => PresenceStatus::Online,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SweepReport {
    pub expired: usize,
    pub channels_dropped: usize,
}

pub struct PresenceTracker {
    channels: DashMap<ChannelId, HashMap<Uuid, Entry>>,
    ttl: Duration,
    typing_ttl: Duration,
}

impl PresenceTracker {
    pub fn new(ttl: Duration, typing_ttl: Duration) -> Self {
        Self {
            channels: DashMap::new(),
            ttl,
            typing_ttl,
        }
    }

    /// Idempotent. Refreshes the entry if the user is already present.
    pub fn mark_online(&self, channel_id: &ChannelId, user: &UserIdentity) {
        let now = Instant::now();
        let mut members = self.channels.entry(channel_id.clone()).or_default();
        members
            .entry(user.user_id)
            .and_modify(|entry| {
                entry.last_seen = now;
                entry.username.clone_from(&user.username);
            })
            .or_insert_with(|| Entry {
                username: user.username.clone(),
                last_seen: now,
                typing_until: None,
            });
    }

    /// Idempotent. Returns whether an entry was removed.
    pub fn mark_offline(&self, channel_id: &ChannelId, user_id: Uuid) -> bool {
        let removed = match self.channels.get_mut(channel_id) {
            Some(mut members) => members.remove(&user_id).is_some(),
            None => return false,
        };
        self.channels.remove_if(channel_id, |_, members| members.is_empty());
        removed
    }

    /// Sets the typing flag for `typing_ttl`. No-op for users not online.
    pub fn mark_typing(&self, channel_id: &ChannelId, user_id: Uuid) -> bool {
        let now = Instant::now();
        let Some(mut members) = self.channels.get_mut(channel_id) else {
            return false;
        };
        match members.get_mut(&user_id) {
            Some(entry) => {
                entry.last_seen = now;
                entry.typing_until = Some(now + self.typing_ttl);
                true
            }
            None => false,
        }
    }

    pub fn status(&self, channel_id: &ChannelId, user_id: Uuid) -> Option<PresenceStatus> {
        let now = Instant::now();
        let members = self.channels.get(channel_id)?;
        let entry = members.get(&user_id)?;
        entry.is_live(now, self.ttl).then(|| entry.status(now))
    }

    /// Live members of a channel, ordered by username.
    pub fn snapshot(&self, channel_id: &ChannelId) -> Vec<PresentUser> {
        let now = Instant::now();
        let Some(members) = self.channels.get(channel_id) else {
            return Vec::new();
        };

        let mut users: Vec<PresentUser> = members
            .iter()
            .filter(|(_, entry)| entry.is_live(now, self.ttl))
            .map(|(user_id, entry)| PresentUser {
                user_id: *user_id,
                username: entry.username.clone(),
                status: entry.status(now),
            })
            .collect();
        users.sort_by(|a, b| a.username.cmp(&b.username).then(a.user_id.cmp(&b.user_id)));
        users
    }

    /// Heartbeat for users that still hold a live connection.
    pub fn refresh<'a>(&self, channel_id: &ChannelId, user_ids: impl IntoIterator<Item = &'a Uuid>) {
        let now = Instant::now();
        let Some(mut members) = self.channels.get_mut(channel_id) else {
            return;
        };
        for user_id in user_ids {
            if let Some(entry) = members.get_mut(user_id) {
                entry.last_seen = now;
            }
        }
    }

    /// Drop expired entries and empty channels.
    pub fn sweep(&self) -> SweepReport {
        let now = Instant::now();
        let mut report = SweepReport::default();

        self.channels.retain(|_, members| {
            let before = members.len();
            members.retain(|_, entry| entry.is_live(now, self.ttl));
            report.expired += before - members.len();
            if members.is_empty() {
                report.channels_dropped += 1;
                false
            } else {
                true
            }
        });

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> PresenceTracker {
        PresenceTracker::new(Duration::from_secs(90), Duration::from_secs(3))
    }

    fn user(name: &str) -> UserIdentity {
        UserIdentity::new(Uuid::new_v4(), name)
    }

    #[tokio::test(start_paused = true)]
    async fn test_online_offline_idempotent() {
        let presence = tracker();
        let channel = ChannelId::from("general");
        let alice = user("alice");

        presence.mark_online(&channel, &alice);
        presence.mark_online(&channel, &alice);
        assert_eq!(presence.snapshot(&channel).len(), 1);

        assert!(presence.mark_offline(&channel, alice.user_id));
        assert!(!presence.mark_offline(&channel, alice.user_id));
        assert!(presence.snapshot(&channel).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_typing_flag_expires() {
        let presence = tracker();
        let channel = ChannelId::from("general");
        let bob = user("bob");

        presence.mark_online(&channel, &bob);
        assert!(presence.mark_typing(&channel, bob.user_id));
        assert_eq!(presence.status(&channel, bob.user_id), Some(PresenceStatus::Typing));

        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(presence.status(&channel, bob.user_id), Some(PresenceStatus::Online));
    }

    #[tokio::test(start_paused = true)]
    async fn test_typing_requires_presence() {
        let presence = tracker();
        let channel = ChannelId::from("general");
        assert!(!presence.mark_typing(&channel, Uuid::new_v4()));
        assert!(presence.snapshot(&channel).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrefreshed_entries_expire() {
        let presence = tracker();
        let channel = ChannelId::from("general");
        let alive = user("alive");
        let ghost = user("ghost");

        presence.mark_online(&channel, &alive);
        presence.mark_online(&channel, &ghost);

        tokio::time::advance(Duration::from_secs(60)).await;
        presence.refresh(&channel, [&alive.user_id]);

        tokio::time::advance(Duration::from_secs(60)).await;
        let snapshot = presence.snapshot(&channel);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].user_id, alive.user_id);

        let report = presence.sweep();
        assert_eq!(report.expired, 1);
        assert_eq!(report.channels_dropped, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_drops_empty_channels() {
        let presence = tracker();
        let channel = ChannelId::from("quiet");
        presence.mark_online(&channel, &user("carol"));

        tokio::time::advance(Duration::from_secs(120)).await;
        let report = presence.sweep();
        assert_eq!(report, SweepReport { expired: 1, channels_dropped: 1 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_is_sorted() {
        let presence = tracker();
        let channel = ChannelId::from("general");
        presence.mark_online(&channel, &user("zed"));
        presence.mark_online(&channel, &user("amy"));

        let names: Vec<_> = presence
            .snapshot(&channel)
            .into_iter()
            .map(|u| u.username)
            .collect();
        assert_eq!(names, ["amy", "zed"]);
    }
}
