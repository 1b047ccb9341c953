use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// A connection that has not heartbeated for this long no longer counts as
/// online, even if the socket never said goodbye.
pub const ONLINE_WINDOW_SECS: i64 = 60;

/// A user is "active" (in a match, reporting) only while heartbeats keep
/// flagging activity; the flag decays faster than presence itself.
pub const ACTIVE_WINDOW_SECS: i64 = 30;

#[derive(Debug, Clone)]
struct Session {
    user_id: String,
    last_seen: DateTime<Utc>,
    last_activity: Option<DateTime<Utc>>,
}

/// One user's aggregated presence across all of their live connections.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEntry {
    pub user_id: String,
    pub is_online: bool,
    pub is_active: bool,
    pub connection_count: usize,
    pub last_seen: DateTime<Utc>,
}

/// Tracks who is connected right now, keyed by connection so a user on two
/// devices stays online until the last one drops.
///
/// Everything lives in memory; a restart simply starts presence from empty and
/// clients re-announce on reconnect.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    sessions: RwLock<HashMap<Uuid, Session>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new connection for `user_id` and returns its connection id.
    pub async fn connect(&self, user_id: &str) -> Uuid {
        let conn_id = Uuid::new_v4();
        let mut sessions = self.sessions.write().await;
        sessions.insert(
            conn_id,
            Session {
                user_id: user_id.to_string(),
                last_seen: Utc::now(),
                last_activity: None,
            },
        );
        debug!("Presence: {} connected as {}", user_id, conn_id);
        conn_id
    }

    /// Refreshes a connection's liveness. `active` marks the user as doing
    /// something, not merely having a tab open. Unknown connection ids are
    /// ignored; the client will reconnect if its session was swept.
    pub async fn heartbeat(&self, conn_id: Uuid, active: bool) {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(&conn_id) {
            let now = Utc::now();
            session.last_seen = now;
            if active {
                session.last_activity = Some(now);
            }
        }
    }

    /// Drops a connection. The user goes offline the moment their last
    /// connection disconnects, without waiting for the online window.
    pub async fn disconnect(&self, conn_id: Uuid) {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.remove(&conn_id) {
            debug!("Presence: {} disconnected ({})", session.user_id, conn_id);
        }
    }

    /// Everyone currently known, aggregated per user and sorted by user id.
    pub async fn snapshot(&self) -> Vec<PresenceEntry> {
        self.snapshot_at(Utc::now()).await
    }

    /// [`Self::snapshot`] with an explicit clock, so window behavior is
    /// testable without sleeping.
    pub async fn snapshot_at(&self, now: DateTime<Utc>) -> Vec<PresenceEntry> {
        let online_cutoff = now - Duration::seconds(ONLINE_WINDOW_SECS);
        let active_cutoff = now - Duration::seconds(ACTIVE_WINDOW_SECS);

        let sessions = self.sessions.read().await;
        let mut by_user: HashMap<&str, PresenceEntry> = HashMap::new();
        for session in sessions.values() {
            let entry = by_user
                .entry(session.user_id.as_str())
                .or_insert_with(|| PresenceEntry {
                    user_id: session.user_id.clone(),
                    is_online: false,
                    is_active: false,
                    connection_count: 0,
                    last_seen: session.last_seen,
                });
            entry.connection_count += 1;
            entry.is_online |= session.last_seen > online_cutoff;
            entry.is_active |= session
                .last_activity
                .map_or(false, |at| at > active_cutoff);
            entry.last_seen = entry.last_seen.max(session.last_seen);
        }

        let mut entries: Vec<PresenceEntry> = by_user.into_values().collect();
        entries.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        entries
    }

    /// Removes connections that outlived the online window without a
    /// heartbeat. Run periodically so dead sockets do not accumulate.
    pub async fn sweep(&self) -> usize {
        let cutoff = Utc::now() - Duration::seconds(ONLINE_WINDOW_SECS);
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| s.last_seen > cutoff);
        let swept = before - sessions.len();
        if swept > 0 {
            debug!("Presence: swept {} stale connections", swept);
        }
        swept
    }
}
