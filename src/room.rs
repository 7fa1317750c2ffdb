use crate::errors::SignalingError;
use crate::id_types::{RoomId, UserId};
use crate::media::MediaPipeline;
use crate::protocol::{Participant, ServerMessage};
use crate::user_session::UserSession;
use dashmap::DashMap;
use rand::Rng;
use std::sync::Arc;
use std::sync::RwLock;
use tracing::{debug, info, warn};

/// One active call: the concurrent membership map, the current room leader,
/// and the shared media pipeline.
///
/// The `ops` mutex serializes compound operations (membership mutation plus
/// the broadcast that announces it) per room; unrelated rooms stay fully
/// independent. Plain lookups go straight to the concurrent map.
pub struct Room {
    room_id: RoomId,
    pipeline: Arc<dyn MediaPipeline>,
    participants: DashMap<UserId, Arc<UserSession>>,
    leader: RwLock<Participant>,
    ops: tokio::sync::Mutex<()>,
}

impl Room {
    pub fn new(room_id: RoomId, pipeline: Arc<dyn MediaPipeline>, leader: Participant) -> Self {
        info!(room_id = %room_id, leader = %leader.user_id, "room created");
        Room {
            room_id,
            pipeline,
            participants: DashMap::new(),
            leader: RwLock::new(leader),
            ops: tokio::sync::Mutex::new(()),
        }
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn pipeline(&self) -> &Arc<dyn MediaPipeline> {
        &self.pipeline
    }

    /// Serializes this room's compound membership+broadcast operations.
    /// Never hold the guard across media-engine awaits.
    pub async fn lock_ops(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.ops.lock().await
    }

    /// Membership snapshot. The map itself is live; the returned vector is
    /// consistent at some point in time, which is all broadcasts need.
    pub fn participants(&self) -> Vec<Arc<UserSession>> {
        self.participants.iter().map(|e| e.value().clone()).collect()
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn get_participant(&self, user_id: &UserId) -> Option<Arc<UserSession>> {
        self.participants.get(user_id).map(|e| e.value().clone())
    }

    pub fn add_participant(&self, participant: Arc<UserSession>) {
        debug!(room_id = %self.room_id, user_id = %participant.user_id(), "adding participant");
        self.participants
            .insert(participant.user_id().clone(), participant);
    }

    /// Removes a member. A non-member id is a reported error, not a silent
    /// no-op: callers rely on it to catch logic bugs.
    pub fn remove_participant(
        &self,
        user_id: &UserId,
    ) -> Result<Arc<UserSession>, SignalingError> {
        match self.participants.remove(user_id) {
            Some((_, session)) => Ok(session),
            None => Err(SignalingError::ParticipantNotFound(user_id.clone())),
        }
    }

    /// Uniform choice among current members; `None` when the room is empty.
    pub fn random_participant(&self) -> Option<Arc<UserSession>> {
        let keys: Vec<UserId> = self.participants.iter().map(|e| e.key().clone()).collect();
        if keys.is_empty() {
            return None;
        }
        let idx = rand::thread_rng().gen_range(0..keys.len());
        // The chosen member can vanish between snapshot and lookup; the
        // caller runs under the room op lock, so in practice it does not.
        self.get_participant(&keys[idx])
    }

    pub fn leader(&self) -> Participant {
        self.leader
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn change_leader(&self, new_leader: Participant) {
        info!(room_id = %self.room_id, leader = %new_leader.user_id, "room leader changed");
        let mut leader = self.leader.write().unwrap_or_else(|e| e.into_inner());
        *leader = new_leader;
    }

    /// Tears the room down: tells every remaining member the room is
    /// closing, releases their media, then releases the shared pipeline.
    pub async fn close(&self) {
        let members = self.participants();
        self.participants.clear();

        let closing_frame = ServerMessage::ExitRoom {
            user_id: None,
            user_name: None,
        };
        for member in members {
            member.close().await;
            if let Err(e) = member.send(&closing_frame) {
                debug!(room_id = %self.room_id, user_id = %member.user_id(), error = %e,
                    "member could not be told the room is closing");
            }
        }

        if let Err(e) = self.pipeline.release().await {
            warn!(room_id = %self.room_id, error = %e, "could not release media pipeline");
        }
        debug!(room_id = %self.room_id, "room closed");
    }
}
