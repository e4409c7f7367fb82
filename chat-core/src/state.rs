//! Shared application state: the storage handle plus the two in-memory
//! registries every connection handler dispatches against.

use std::sync::Arc;

use tracing::warn;

use chat_common::protocol::{PresenceStatus, ServerMessage};
use chat_db::Store;

use crate::connections::{ConnectionHandle, ConnectionRegistry};
use crate::registry::ChannelRegistry;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub connections: Arc<ConnectionRegistry>,
    pub channels: Arc<ChannelRegistry>,
}

impl AppState {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            connections: Arc::new(ConnectionRegistry::new()),
            channels: Arc::new(ChannelRegistry::new()),
        }
    }

    /// Sends `msg` to every connection in `targets` other than `exclude`
    /// (if given). Peers whose send fails are treated as disconnected:
    /// removed from both registries and announced as offline, without
    /// aborting delivery to the rest.
    pub async fn fan_out(
        &self,
        targets: Vec<Arc<ConnectionHandle>>,
        msg: &ServerMessage,
        exclude: Option<u64>,
    ) {
        for handle in targets {
            if Some(handle.id) == exclude {
                continue;
            }
            if let Err(error) = handle.send(msg).await {
                warn!(conn_id = handle.id, %error, "fan-out send failed, dropping peer");
                self.cleanup_connection(&handle).await;
            }
        }
    }

    /// Fans out to every connection whose username the channel registry
    /// currently lists as a member of `channel` — the registry, not each
    /// connection's own cached `current_channel`, is authoritative for
    /// who receives channel broadcasts. `exclude`, when given, names a
    /// connection id to skip (the originator of a `user_joined`-style
    /// announcement, which the source addresses via `exclude=conn`).
    pub async fn broadcast_channel(&self, channel: &str, msg: &ServerMessage, exclude: Option<u64>) {
        let members = self.channels.members(channel).await;
        let mut targets = Vec::with_capacity(members.len());
        for username in members {
            if let Some(handle) = self.connections.find_by_username(&username).await {
                targets.push(handle);
            }
        }
        self.fan_out(targets, msg, exclude).await;
    }

    pub async fn broadcast_all(&self, msg: &ServerMessage, exclude: Option<u64>) {
        let targets = self.connections.snapshot_authenticated().await;
        self.fan_out(targets, msg, exclude).await;
    }

    /// Removes a connection from the live set and the channel registry,
    /// and announces its departure. Idempotent: safe to call more than
    /// once for the same handle (e.g. once from a failed fan-out send and
    /// once from the owning task's own close path — only the first call
    /// observes channel membership to announce).
    pub async fn cleanup_connection(&self, handle: &ConnectionHandle) {
        if self.connections.remove(handle.id).await.is_none() {
            return;
        }

        let meta = handle.meta().await;
        let Some(username) = meta.username else {
            return;
        };

        if let Some(channel) = self.channels.leave_any(&username).await {
            self.broadcast_channel(
                &channel,
                &ServerMessage::UserLeft {
                    channel,
                    username: username.clone(),
                },
                None,
            )
            .await;
        }

        self.broadcast_all(
            &ServerMessage::StatusChange {
                username,
                status: PresenceStatus::Offline,
            },
            None,
        )
        .await;
    }
}
