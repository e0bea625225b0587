//! In-memory registry of live sessions, one per account.

use std::{collections::HashMap, fmt, sync::Arc};

use {tokio::sync::RwLock, tracing::debug};

use crate::{client::WhatsAppClient, device_store::DeviceStore};

/// A live protocol client paired with the storage it was built on.
#[derive(Clone)]
pub struct Session {
    pub account_id: String,
    pub client: Arc<dyn WhatsAppClient>,
    pub store: Arc<DeviceStore>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("account_id", &self.account_id)
            .field("connected", &self.client.is_connected())
            .field("logged_in", &self.client.is_logged_in())
            .field("store", &self.store.dir())
            .finish()
    }
}

/// Concurrent account id → session map.
///
/// Reads take the shared lock. `set` and `remove` take the exclusive lock and
/// keep it while the outgoing client disconnects, so no reader can obtain a
/// session that is being torn down.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` means the account has no initialized session.
    pub async fn get(&self, account_id: &str) -> Option<Session> {
        self.sessions.read().await.get(account_id).cloned()
    }

    pub async fn contains(&self, account_id: &str) -> bool {
        self.sessions.read().await.contains_key(account_id)
    }

    /// Insert or replace the session for `session.account_id`. A replaced
    /// client is disconnected before the lock is released.
    pub async fn set(&self, session: Session) {
        let mut sessions = self.sessions.write().await;
        let account_id = session.account_id.clone();
        if let Some(previous) = sessions.insert(account_id.clone(), session) {
            debug!(account_id = %account_id, "replacing registered session");
            previous.client.disconnect().await;
        }
    }

    /// Disconnect and evict the session. Returns `false` if there was none.
    pub async fn remove(&self, account_id: &str) -> bool {
        let mut sessions = self.sessions.write().await;
        let Some(session) = sessions.get(account_id) else {
            return false;
        };
        session.client.disconnect().await;
        sessions.remove(account_id);
        debug!(account_id, "session removed");
        true
    }

    /// Point-in-time copy of every session.
    pub async fn list(&self) -> Vec<Session> {
        self.sessions.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Disconnect and drop every session.
    pub async fn clear(&self) {
        let mut sessions = self.sessions.write().await;
        for (account_id, session) in sessions.drain() {
            debug!(account_id = %account_id, "disconnecting session");
            session.client.disconnect().await;
        }
    }
}
