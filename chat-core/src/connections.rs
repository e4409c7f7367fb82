//! The live-connections map: the authority on which connections exist and
//! are reachable right now. Holds one [`ConnectionHandle`] per accepted
//! socket; connection handlers look themselves up here to participate in
//! fan-out and are removed here exactly once, on close.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::AsyncWrite;
use tokio::sync::Mutex;

use chat_common::error::ChatError;
use chat_common::protocol::ServerMessage;

use crate::codec;

pub type ConnId = u64;

#[derive(Debug, Clone, Default)]
pub struct ConnectionMeta {
    pub username: Option<String>,
    pub user_id: Option<i64>,
    pub current_channel: Option<String>,
}

/// One live socket. The write half is behind its own mutex so a fan-out
/// send from another task and a direct reply from this connection's own
/// handler task never interleave their frame bytes.
pub struct ConnectionHandle {
    pub id: ConnId,
    pub peer_addr: SocketAddr,
    write_half: Mutex<Box<dyn AsyncWrite + Unpin + Send>>,
    meta: Mutex<ConnectionMeta>,
}

impl ConnectionHandle {
    pub fn new(id: ConnId, peer_addr: SocketAddr, write_half: Box<dyn AsyncWrite + Unpin + Send>) -> Self {
        Self {
            id,
            peer_addr,
            write_half: Mutex::new(write_half),
            meta: Mutex::new(ConnectionMeta::default()),
        }
    }

    pub async fn send(&self, msg: &ServerMessage) -> Result<(), ChatError> {
        let mut write_half = self.write_half.lock().await;
        codec::write_frame(&mut *write_half, msg).await
    }

    pub async fn meta(&self) -> ConnectionMeta {
        self.meta.lock().await.clone()
    }

    pub async fn set_authenticated(&self, username: String, user_id: i64) {
        let mut meta = self.meta.lock().await;
        meta.username = Some(username);
        meta.user_id = Some(user_id);
    }

    pub async fn set_current_channel(&self, channel: Option<String>) {
        self.meta.lock().await.current_channel = channel;
    }

    pub async fn is_authenticated(&self) -> bool {
        self.meta.lock().await.username.is_some()
    }
}

#[derive(Default)]
pub struct ConnectionRegistry {
    next_id: AtomicU64,
    inner: Mutex<HashMap<ConnId, Arc<ConnectionHandle>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> ConnId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub async fn insert(&self, handle: Arc<ConnectionHandle>) {
        self.inner.lock().await.insert(handle.id, handle);
    }

    pub async fn remove(&self, id: ConnId) -> Option<Arc<ConnectionHandle>> {
        self.inner.lock().await.remove(&id)
    }

    /// All currently authenticated connections, snapshotted under the lock
    /// and released before any I/O is performed on them.
    pub async fn snapshot_authenticated(&self) -> Vec<Arc<ConnectionHandle>> {
        let guard = self.inner.lock().await;
        let mut out = Vec::with_capacity(guard.len());
        for handle in guard.values() {
            if handle.is_authenticated().await {
                out.push(handle.clone());
            }
        }
        out
    }

    /// Number of live connections, used by shutdown to wait for the
    /// accept loop's spawned tasks to drain.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn find_by_username(&self, username: &str) -> Option<Arc<ConnectionHandle>> {
        let guard = self.inner.lock().await;
        for handle in guard.values() {
            let meta = handle.meta().await;
            if let Some(existing) = &meta.username {
                if existing.eq_ignore_ascii_case(username) {
                    return Some(handle.clone());
                }
            }
        }
        None
    }
}
