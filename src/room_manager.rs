use crate::errors::SignalingError;
use crate::id_types::{RoomId, UserId};
use crate::media::MediaEngine;
use crate::metrics;
use crate::protocol::{Participant, ServerMessage};
use crate::room::Room;
use crate::room_id_gen::RoomIdGenerator;
use crate::types::{OutboundSender, RoomMap};
use crate::user_session::UserSession;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Process-wide room registry and the join/create/leave orchestration.
///
/// Registry mutations are atomic per key; everything that couples a room's
/// membership to a broadcast runs under that room's op lock, so two rooms
/// never wait on each other. Media-engine awaits happen outside any lock.
pub struct RoomManager {
    rooms: RoomMap,
    room_ids: RoomIdGenerator,
    media: Arc<dyn MediaEngine>,
}

impl RoomManager {
    pub fn new(media: Arc<dyn MediaEngine>, room_ids: RoomIdGenerator) -> Self {
        RoomManager {
            rooms: DashMap::new(),
            room_ids,
            media,
        }
    }

    pub fn get_room(&self, room_id: &RoomId) -> Result<Arc<Room>, SignalingError> {
        self.rooms
            .get(room_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| SignalingError::RoomNotFound(room_id.clone()))
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Creates a room with the caller as sole participant and leader, and
    /// answers the creator (only) with `roomCreated`.
    pub async fn create_room(
        &self,
        user_name: &str,
        audio_on: bool,
        video_on: bool,
        outbound: OutboundSender,
    ) -> Result<Arc<UserSession>, SignalingError> {
        let room_id = self.room_ids.generate()?;

        let pipeline = match self.media.create_pipeline().await {
            Ok(p) => p,
            Err(e) => {
                self.room_ids.retire(&room_id);
                return Err(e.into());
            }
        };

        let user_id = UserId::from(Uuid::new_v4().to_string());
        info!(room_id = %room_id, user_id = %user_id, user_name = %user_name, "creating room");

        let session = match UserSession::connect(
            user_name,
            room_id.clone(),
            user_id.clone(),
            audio_on,
            video_on,
            outbound,
            pipeline.clone(),
        )
        .await
        {
            Ok(s) => s,
            Err(e) => {
                self.room_ids.retire(&room_id);
                if let Err(release_err) = pipeline.release().await {
                    warn!(room_id = %room_id, error = %release_err, "pipeline release after failed create");
                }
                return Err(e);
            }
        };

        let creator = session.participant();
        let room = Arc::new(Room::new(room_id.clone(), pipeline, creator.clone()));
        room.add_participant(session.clone());
        self.rooms.insert(room_id.clone(), room);

        metrics::SIGNALING_ACTIVE_ROOMS.inc();
        metrics::SIGNALING_ACTIVE_SESSIONS.inc();
        metrics::SIGNALING_ROOMS_CREATED_TOTAL.inc();

        let reply = ServerMessage::RoomCreated {
            room_id: room_id.as_ref().to_string(),
            user_id,
            user_name: user_name.to_string(),
            creator,
            audio_on,
            video_on,
        };
        if let Err(e) = session.send(&reply) {
            warn!(room_id = %room_id, error = %e, "creator could not be answered");
        }

        Ok(session)
    }

    /// Adds a participant to an existing room: announces the newcomer to the
    /// current members (best effort), then hands the newcomer the roster and
    /// the current leader.
    pub async fn join_room(
        &self,
        user_name: &str,
        room_id: &str,
        audio_on: bool,
        video_on: bool,
        outbound: OutboundSender,
    ) -> Result<Arc<UserSession>, SignalingError> {
        let room = self.get_room(&RoomId::from(room_id))?;

        let user_id = UserId::from(Uuid::new_v4().to_string());
        info!(room_id = %room_id, user_id = %user_id, user_name = %user_name, "joining room");

        let session = UserSession::connect(
            user_name,
            room.room_id().clone(),
            user_id.clone(),
            audio_on,
            video_on,
            outbound,
            room.pipeline().clone(),
        )
        .await?;

        {
            let _guard = room.lock_ops().await;

            let announcement = ServerMessage::SendExistingUsers {
                user_id: user_id.clone(),
                user_name: user_name.to_string(),
            };
            for member in room.participants() {
                if let Err(e) = member.send(&announcement) {
                    debug!(room_id = %room_id, user_id = %member.user_id(), error = %e,
                        "member could not be notified of the new participant");
                }
            }

            room.add_participant(session.clone());

            let roster: Vec<Participant> = room
                .participants()
                .iter()
                .filter(|p| p.user_id() != session.user_id())
                .map(|p| p.participant())
                .collect();
            let reply = ServerMessage::NewUserJoined {
                user_id,
                user_name: user_name.to_string(),
                participants: roster,
                creator: room.leader(),
            };
            if let Err(e) = session.send(&reply) {
                warn!(room_id = %room_id, error = %e, "joining participant could not be answered");
            }
        }

        metrics::SIGNALING_ACTIVE_SESSIONS.inc();
        Ok(session)
    }

    /// Removes a participant from its room, with `exitRoom` broadcast,
    /// best-effort channel cancellation toward the departed id, leader
    /// succession, and room teardown when the last member leaves.
    ///
    /// Defensive by contract: this is also the abrupt-disconnect path, so a
    /// missing room or an already-removed member ends with the session's
    /// media released, never with an error escaping to the caller.
    pub async fn leave_room(&self, session: &Arc<UserSession>) {
        let departed_id = session.user_id().clone();
        let departed_name = session.user_name();

        let room = match self.get_room(session.room_id()) {
            Ok(room) => room,
            Err(_) => {
                warn!(room_id = %session.room_id(), user_id = %departed_id,
                    "leaving a room no longer in the registry");
                session.close().await;
                metrics::SIGNALING_ACTIVE_SESSIONS.dec();
                return;
            }
        };

        debug!(room_id = %room.room_id(), user_id = %departed_id, "leaving room");

        let remaining = {
            let _guard = room.lock_ops().await;

            if let Err(e) = room.remove_participant(&departed_id) {
                warn!(room_id = %room.room_id(), user_id = %departed_id, error = %e,
                    "leave for a participant not in the room");
                drop(_guard);
                session.close().await;
                metrics::SIGNALING_ACTIVE_SESSIONS.dec();
                return;
            }

            let remaining = room.participants();

            let left_frame = ServerMessage::ExitRoom {
                user_id: Some(departed_id.clone()),
                user_name: Some(departed_name.clone()),
            };
            let mut unnotified = Vec::new();
            for member in &remaining {
                if member.send(&left_frame).is_err() {
                    unnotified.push(member.user_id().clone());
                }
            }
            if !unnotified.is_empty() {
                debug!(room_id = %room.room_id(), ?unnotified,
                    "members could not be notified of the departure");
            }

            if room.leader().user_id == departed_id && !remaining.is_empty() {
                if let Some(new_leader) = room.random_participant() {
                    let leader = new_leader.participant();
                    room.change_leader(leader.clone());
                    let frame = ServerMessage::CreatorChanged { creator: leader };
                    for member in &remaining {
                        if let Err(e) = member.send(&frame) {
                            debug!(room_id = %room.room_id(), user_id = %member.user_id(),
                                error = %e, "member could not be told about the new leader");
                        }
                    }
                }
            }

            remaining
        };

        // Media work happens outside the room op lock.
        for member in &remaining {
            member.cancel_video_from(&departed_id).await;
        }
        session.close().await;
        metrics::SIGNALING_ACTIVE_SESSIONS.dec();

        if room.is_empty() {
            self.remove_room(&room).await;
        }
    }

    async fn remove_room(&self, room: &Arc<Room>) {
        self.rooms.remove(room.room_id());
        self.room_ids.retire(room.room_id());
        metrics::SIGNALING_ACTIVE_ROOMS.dec();
        room.close().await;
        info!(room_id = %room.room_id(), "room removed and closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::testing::RecordingMediaEngine;
    use tokio::sync::mpsc;

    fn manager(engine: &RecordingMediaEngine) -> RoomManager {
        RoomManager::new(Arc::new(engine.clone()), RoomIdGenerator::new())
    }

    fn channel() -> (OutboundSender, mpsc::Receiver<Arc<String>>) {
        mpsc::channel(32)
    }

    fn next_json(rx: &mut mpsc::Receiver<Arc<String>>) -> serde_json::Value {
        serde_json::from_str(&rx.try_recv().expect("expected a frame")).unwrap()
    }

    #[tokio::test]
    async fn test_create_room_sets_creator_as_leader() {
        let engine = RecordingMediaEngine::new();
        let mgr = manager(&engine);
        let (tx, mut rx) = channel();

        let alice = mgr.create_room("alice", true, true, tx).await.unwrap();

        let room = mgr.get_room(alice.room_id()).unwrap();
        assert_eq!(room.participant_count(), 1);
        assert_eq!(room.leader().user_id, *alice.user_id());

        let v = next_json(&mut rx);
        assert_eq!(v["action"], "roomCreated");
        assert_eq!(v["userName"], "alice");
        assert_eq!(v["creator"]["userName"], "alice");
        assert_eq!(v["roomId"].as_str().unwrap().len(), 6);
    }

    #[tokio::test]
    async fn test_join_unknown_room_fails() {
        let engine = RecordingMediaEngine::new();
        let mgr = manager(&engine);
        let (tx, _rx) = channel();

        let err = mgr
            .join_room("bob", "999999", true, true, tx)
            .await
            .unwrap_err();
        assert!(matches!(err, SignalingError::RoomNotFound(_)));
    }

    #[tokio::test]
    async fn test_join_announces_and_returns_roster() {
        let engine = RecordingMediaEngine::new();
        let mgr = manager(&engine);
        let (alice_tx, mut alice_rx) = channel();
        let (bob_tx, mut bob_rx) = channel();

        let alice = mgr.create_room("alice", true, true, alice_tx).await.unwrap();
        let _ = next_json(&mut alice_rx); // roomCreated

        let bob = mgr
            .join_room("bob", alice.room_id().as_ref(), true, false, bob_tx)
            .await
            .unwrap();

        // Existing member learns about bob.
        let v = next_json(&mut alice_rx);
        assert_eq!(v["action"], "sendExistingUsers");
        assert_eq!(v["userName"], "bob");
        assert_eq!(v["userId"], bob.user_id().as_ref());

        // Bob gets the roster without himself, and the current leader.
        let v = next_json(&mut bob_rx);
        assert_eq!(v["action"], "newUserJoined");
        let roster = v["participants"].as_array().unwrap();
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0]["userName"], "alice");
        assert_eq!(v["creator"]["userId"], alice.user_id().as_ref());
    }

    #[tokio::test]
    async fn test_leave_broadcasts_exit_and_keeps_room() {
        let engine = RecordingMediaEngine::new();
        let mgr = manager(&engine);
        let (alice_tx, _alice_rx) = channel();
        let (bob_tx, mut bob_rx) = channel();

        let alice = mgr.create_room("alice", true, true, alice_tx).await.unwrap();
        let room_id = alice.room_id().clone();
        let _bob = mgr
            .join_room("bob", room_id.as_ref(), true, true, bob_tx)
            .await
            .unwrap();
        let _ = next_json(&mut bob_rx); // newUserJoined

        mgr.leave_room(&alice).await;

        let room = mgr.get_room(&room_id).unwrap();
        assert_eq!(room.participant_count(), 1);

        let v = next_json(&mut bob_rx);
        assert_eq!(v["action"], "exitRoom");
        assert_eq!(v["userId"], alice.user_id().as_ref());
        assert_eq!(v["userName"], "alice");
    }

    #[tokio::test]
    async fn test_leader_departure_elects_remaining_member_once() {
        let engine = RecordingMediaEngine::new();
        let mgr = manager(&engine);
        let (alice_tx, _alice_rx) = channel();
        let (bob_tx, mut bob_rx) = channel();
        let (carol_tx, mut carol_rx) = channel();

        let alice = mgr.create_room("alice", true, true, alice_tx).await.unwrap();
        let room_id = alice.room_id().clone();
        let bob = mgr
            .join_room("bob", room_id.as_ref(), true, true, bob_tx)
            .await
            .unwrap();
        let carol = mgr
            .join_room("carol", room_id.as_ref(), true, true, carol_tx)
            .await
            .unwrap();
        // Drain join traffic.
        while bob_rx.try_recv().is_ok() {}
        while carol_rx.try_recv().is_ok() {}

        mgr.leave_room(&alice).await;

        let room = mgr.get_room(&room_id).unwrap();
        let new_leader = room.leader();
        assert_ne!(new_leader.user_id, *alice.user_id());
        assert!(
            new_leader.user_id == *bob.user_id() || new_leader.user_id == *carol.user_id(),
            "leader must come from the remaining set"
        );

        // Each remaining member sees exitRoom then exactly one creatorChanged.
        for rx in [&mut bob_rx, &mut carol_rx] {
            let v = next_json(rx);
            assert_eq!(v["action"], "exitRoom");
            let v = next_json(rx);
            assert_eq!(v["action"], "creatorChanged");
            assert_eq!(v["creator"]["userId"], new_leader.user_id.as_ref());
            assert!(rx.try_recv().is_err(), "no duplicate creatorChanged");
        }
    }

    #[tokio::test]
    async fn test_non_leader_departure_keeps_leader() {
        let engine = RecordingMediaEngine::new();
        let mgr = manager(&engine);
        let (alice_tx, mut alice_rx) = channel();
        let (bob_tx, _bob_rx) = channel();

        let alice = mgr.create_room("alice", true, true, alice_tx).await.unwrap();
        let bob = mgr
            .join_room("bob", alice.room_id().as_ref(), true, true, bob_tx)
            .await
            .unwrap();
        while alice_rx.try_recv().is_ok() {}

        mgr.leave_room(&bob).await;

        let room = mgr.get_room(alice.room_id()).unwrap();
        assert_eq!(room.leader().user_id, *alice.user_id());

        let v = next_json(&mut alice_rx);
        assert_eq!(v["action"], "exitRoom");
        assert!(alice_rx.try_recv().is_err(), "no creatorChanged expected");
    }

    #[tokio::test]
    async fn test_last_leave_removes_room_and_retires_id() {
        let engine = RecordingMediaEngine::new();
        let mgr = manager(&engine);
        let (tx, _rx) = channel();

        let alice = mgr.create_room("alice", true, true, tx).await.unwrap();
        let room_id = alice.room_id().clone();
        assert_eq!(mgr.room_ids.issued_count(), 1);

        mgr.leave_room(&alice).await;

        assert!(matches!(
            mgr.get_room(&room_id),
            Err(SignalingError::RoomNotFound(_))
        ));
        assert_eq!(mgr.room_count(), 0);
        assert_eq!(mgr.room_ids.issued_count(), 0, "room id must be retired");
    }

    #[tokio::test]
    async fn test_double_leave_is_tolerated() {
        let engine = RecordingMediaEngine::new();
        let mgr = manager(&engine);
        let (alice_tx, _alice_rx) = channel();
        let (bob_tx, _bob_rx) = channel();

        let alice = mgr.create_room("alice", true, true, alice_tx).await.unwrap();
        let _bob = mgr
            .join_room("bob", alice.room_id().as_ref(), true, true, bob_tx)
            .await
            .unwrap();

        mgr.leave_room(&alice).await;
        // Explicit exit raced with the disconnect path: second call no-ops.
        mgr.leave_room(&alice).await;

        let room = mgr.get_room(alice.room_id()).unwrap();
        assert_eq!(room.participant_count(), 1);
    }

    #[tokio::test]
    async fn test_leader_invariant_across_transitions() {
        let engine = RecordingMediaEngine::new();
        let mgr = manager(&engine);
        let (alice_tx, _a) = channel();
        let (bob_tx, _b) = channel();
        let (carol_tx, _c) = channel();

        let alice = mgr.create_room("alice", true, true, alice_tx).await.unwrap();
        let room_id = alice.room_id().clone();

        let assert_leader_is_member = |mgr: &RoomManager, room_id: &RoomId| {
            let room = mgr.get_room(room_id).unwrap();
            let leader = room.leader();
            assert!(
                room.get_participant(&leader.user_id).is_some(),
                "leader {} must be a current member",
                leader.user_id
            );
        };

        assert_leader_is_member(&mgr, &room_id);
        let bob = mgr
            .join_room("bob", room_id.as_ref(), true, true, bob_tx)
            .await
            .unwrap();
        assert_leader_is_member(&mgr, &room_id);
        let _carol = mgr
            .join_room("carol", room_id.as_ref(), true, true, carol_tx)
            .await
            .unwrap();
        assert_leader_is_member(&mgr, &room_id);

        mgr.leave_room(&alice).await;
        assert_leader_is_member(&mgr, &room_id);
        mgr.leave_room(&bob).await;
        assert_leader_is_member(&mgr, &room_id);
    }
}
