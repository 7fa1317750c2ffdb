use crate::id_types::{ConnectionId, UserId};
use crate::types::{SessionByConnectionId, SessionByUserId};
use crate::user_session::UserSession;
use std::sync::Arc;
use tracing::{debug, warn};

/// Process-wide session index, keyed both by transport connection and by the
/// server-assigned user id. The connection key is what the disconnect path
/// has; the user key is what signaling frames carry.
#[derive(Default)]
pub struct UserRegistry {
    by_connection_id: SessionByConnectionId,
    by_user_id: SessionByUserId,
}

impl UserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, connection_id: ConnectionId, session: Arc<UserSession>) {
        debug!(connection_id = %connection_id, user_id = %session.user_id(), "registering session");
        self.by_user_id
            .insert(session.user_id().clone(), session.clone());
        self.by_connection_id.insert(connection_id, session);
    }

    pub fn by_connection_id(&self, connection_id: &ConnectionId) -> Option<Arc<UserSession>> {
        self.by_connection_id
            .get(connection_id)
            .map(|e| e.value().clone())
    }

    pub fn by_user_id(&self, user_id: &UserId) -> Option<Arc<UserSession>> {
        self.by_user_id.get(user_id).map(|e| e.value().clone())
    }

    /// Drops both index entries for the connection and returns the session
    /// that was bound to it, if any. A connection that never joined a room
    /// has no entry; that is normal on early disconnects.
    pub fn remove_by_connection_id(
        &self,
        connection_id: &ConnectionId,
    ) -> Option<Arc<UserSession>> {
        match self.by_connection_id.remove(connection_id) {
            Some((_, session)) => {
                self.by_user_id.remove(session.user_id());
                debug!(connection_id = %connection_id, user_id = %session.user_id(),
                    "removed session from registry");
                Some(session)
            }
            None => {
                warn!(connection_id = %connection_id, "no session registered for connection");
                None
            }
        }
    }

    pub fn session_count(&self) -> usize {
        self.by_connection_id.len()
    }
}
