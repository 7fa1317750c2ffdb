use crate::errors::SignalingError;
use crate::id_types::{RoomId, UserId};
use crate::media::{MediaEndpoint, MediaPipeline};
use crate::metrics;
use crate::protocol::{IceCandidate, Participant, ServerMessage};
use crate::room::Room;
use crate::types::OutboundSender;
use dashmap::DashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::sync::RwLock;
use tracing::{debug, info, warn};

/// One connected participant, bound to exactly one room for its lifetime.
///
/// Owns the outbound frame channel and the per-peer media endpoints: one
/// outgoing endpoint (this user's own stream) and a lazily grown map of
/// incoming endpoints, one per remote peer currently being viewed. The
/// `room_id` is set at construction and never reassigned; changing rooms
/// means a logically new session.
pub struct UserSession {
    user_id: UserId,
    user_name: RwLock<String>,
    room_id: RoomId,
    audio_on: AtomicBool,
    video_on: AtomicBool,
    outbound: OutboundSender,
    pipeline: Arc<dyn MediaPipeline>,
    outgoing_media: Arc<dyn MediaEndpoint>,
    incoming_media_by_user_id: DashMap<UserId, Arc<dyn MediaEndpoint>>,
}

/// Serializes `msg` and pushes it into `outbound` without blocking. Used from
/// the engine's candidate callback, which must not await.
fn push_frame(outbound: &OutboundSender, user_id: &UserId, msg: &ServerMessage) {
    let json = match serde_json::to_string(msg) {
        Ok(json) => json,
        Err(e) => {
            warn!(user_id = %user_id, error = %e, "failed to serialize outbound frame");
            return;
        }
    };
    if outbound.try_send(Arc::new(json)).is_err() {
        metrics::SIGNALING_DELIVERY_FAILURES_TOTAL.inc();
        debug!(user_id = %user_id, "outbound channel full or closed, frame dropped");
    }
}

impl UserSession {
    /// Creates the session and allocates its outgoing media endpoint on the
    /// room's pipeline. Candidates discovered on that endpoint are pushed to
    /// the client as `onIceCandidate` frames carrying this user's own id.
    pub async fn connect(
        user_name: &str,
        room_id: RoomId,
        user_id: UserId,
        audio_on: bool,
        video_on: bool,
        outbound: OutboundSender,
        pipeline: Arc<dyn MediaPipeline>,
    ) -> Result<Arc<Self>, SignalingError> {
        let cb_outbound = outbound.clone();
        let cb_user_id = user_id.clone();
        let outgoing_media = pipeline
            .create_endpoint(Arc::new(move |candidate| {
                let msg = ServerMessage::OnIceCandidate {
                    user_id: cb_user_id.clone(),
                    user_name: None,
                    candidate,
                };
                push_frame(&cb_outbound, &cb_user_id, &msg);
            }))
            .await?;

        Ok(Arc::new(UserSession {
            user_id,
            user_name: RwLock::new(user_name.to_string()),
            room_id,
            audio_on: AtomicBool::new(audio_on),
            video_on: AtomicBool::new(video_on),
            outbound,
            pipeline,
            outgoing_media,
            incoming_media_by_user_id: DashMap::new(),
        }))
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn user_name(&self) -> String {
        self.user_name
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn audio_on(&self) -> bool {
        self.audio_on.load(Ordering::Relaxed)
    }

    pub fn video_on(&self) -> bool {
        self.video_on.load(Ordering::Relaxed)
    }

    /// Immutable presence snapshot for rosters and leader announcements.
    pub fn participant(&self) -> Participant {
        Participant {
            user_id: self.user_id.clone(),
            user_name: self.user_name(),
        }
    }

    /// Serializes one frame and pushes it to this session's transport.
    /// The per-connection drain task is the only socket writer, so frames
    /// from concurrent broadcasts never interleave on the wire.
    pub fn send(&self, msg: &ServerMessage) -> Result<(), SignalingError> {
        let json = serde_json::to_string(msg).map_err(SignalingError::MalformedMessage)?;
        debug!(user_id = %self.user_id, "sending frame");
        self.outbound
            .try_send(Arc::new(json))
            .map_err(|_| {
                metrics::SIGNALING_DELIVERY_FAILURES_TOTAL.inc();
                SignalingError::Delivery {
                    user_id: self.user_id.clone(),
                }
            })
    }

    /// Resolves the media endpoint receiving from `sender`, creating it on
    /// first use. Loopback (sender == self) uses the outgoing endpoint.
    async fn endpoint_for(
        self: &Arc<Self>,
        sender: &Arc<UserSession>,
    ) -> Result<Arc<dyn MediaEndpoint>, SignalingError> {
        if sender.user_id == self.user_id {
            debug!(user_id = %self.user_id, "configuring loopback");
            return Ok(self.outgoing_media.clone());
        }

        // Clone out of the map guard before any await.
        let existing = self
            .incoming_media_by_user_id
            .get(&sender.user_id)
            .map(|e| e.value().clone());
        let endpoint = match existing {
            Some(existing) => existing,
            None => {
                debug!(
                    user_id = %self.user_id,
                    peer = %sender.user_id,
                    "creating incoming endpoint"
                );
                let cb_outbound = self.outbound.clone();
                let cb_self_id = self.user_id.clone();
                let cb_sender_id = sender.user_id.clone();
                let cb_sender_name = sender.user_name();
                let created = self
                    .pipeline
                    .create_endpoint(Arc::new(move |candidate| {
                        let msg = ServerMessage::OnIceCandidate {
                            user_id: cb_sender_id.clone(),
                            user_name: Some(cb_sender_name.clone()),
                            candidate,
                        };
                        push_frame(&cb_outbound, &cb_self_id, &msg);
                    }))
                    .await?;

                // Two concurrent receiveVideoFrom calls for the same peer may
                // both reach here; the map decides the winner and the loser's
                // endpoint is released instead of leaking.
                match self
                    .incoming_media_by_user_id
                    .entry(sender.user_id.clone())
                {
                    dashmap::mapref::entry::Entry::Occupied(occupied) => {
                        let winner = occupied.get().clone();
                        drop(occupied);
                        if let Err(e) = created.release().await {
                            warn!(user_id = %self.user_id, peer = %sender.user_id, error = %e,
                                "could not release duplicate incoming endpoint");
                        }
                        winner
                    }
                    dashmap::mapref::entry::Entry::Vacant(vacant) => {
                        vacant.insert(created.clone());
                        created
                    }
                }
            }
        };

        sender.outgoing_media.connect(&endpoint).await?;
        Ok(endpoint)
    }

    /// Negotiates a one-way media view of `sender`: processes the offer on
    /// the (possibly new) incoming endpoint, replies with the answer, then
    /// starts ICE gathering. Idempotent per (receiver, sender) pair.
    pub async fn receive_video_from(
        self: &Arc<Self>,
        sender: &Arc<UserSession>,
        sdp_offer: &str,
    ) -> Result<(), SignalingError> {
        info!(
            user_id = %self.user_id,
            peer = %sender.user_id,
            room_id = %self.room_id,
            "connecting media view"
        );

        let endpoint = self.endpoint_for(sender).await?;
        let sdp_answer = endpoint.process_offer(sdp_offer).await?;

        self.send(&ServerMessage::ReceiveVideoFrom {
            user_id: sender.user_id.clone(),
            user_name: sender.user_name(),
            sdp_answer,
        })
        .unwrap_or_else(|e| debug!(user_id = %self.user_id, error = %e, "answer not delivered"));

        endpoint.gather_candidates().await?;
        Ok(())
    }

    /// Removes and releases the incoming endpoint for `sender_user_id`.
    /// Missing endpoint is logged, not an error: a cancel can race the
    /// channel's creation or repeat after a leave.
    pub async fn cancel_video_from(&self, sender_user_id: &UserId) {
        match self.incoming_media_by_user_id.remove(sender_user_id) {
            Some((_, endpoint)) => {
                debug!(user_id = %self.user_id, peer = %sender_user_id, "releasing incoming endpoint");
                if let Err(e) = endpoint.release().await {
                    warn!(user_id = %self.user_id, peer = %sender_user_id, error = %e,
                        "could not release incoming endpoint");
                }
            }
            None => {
                warn!(user_id = %self.user_id, peer = %sender_user_id,
                    "cancel for a peer with no incoming endpoint");
            }
        }
    }

    /// Routes a remote candidate: to the outgoing endpoint when the target
    /// is this session itself, otherwise to the incoming endpoint for the
    /// target peer. A candidate arriving before its endpoint exists is
    /// dropped; the race with channel creation is expected.
    pub async fn add_candidate(
        &self,
        candidate: IceCandidate,
        target_user_id: &UserId,
    ) -> Result<(), SignalingError> {
        if *target_user_id == self.user_id {
            self.outgoing_media.add_ice_candidate(candidate).await?;
            return Ok(());
        }

        let endpoint = self
            .incoming_media_by_user_id
            .get(target_user_id)
            .map(|e| e.value().clone());
        match endpoint {
            Some(endpoint) => endpoint.add_ice_candidate(candidate).await?,
            None => {
                debug!(user_id = %self.user_id, target = %target_user_id,
                    "dropping candidate: no endpoint for target yet");
            }
        }
        Ok(())
    }

    /// Point-to-point chat: the frame is delivered to both ends so the
    /// sender's own UI can render its outbound message.
    pub fn send_chat(self: &Arc<Self>, sender: &Arc<UserSession>, message: &str) {
        let frame = ServerMessage::SendChat {
            sender_id: sender.user_id.clone(),
            sender_name: sender.user_name(),
            receiver_id: Some(self.user_id.clone()),
            receiver_name: Some(self.user_name()),
            message: message.to_string(),
            is_send_to_all: false,
            receiver: None,
        };
        deliver_to_both_ends(sender, self, &frame);
    }

    pub fn send_emoji(self: &Arc<Self>, sender: &Arc<UserSession>, emoji: &str) {
        let frame = ServerMessage::SendEmoji {
            sender_id: sender.user_id.clone(),
            sender_name: sender.user_name(),
            receiver_id: Some(self.user_id.clone()),
            receiver_name: Some(self.user_name()),
            emoji: emoji.to_string(),
            is_send_to_all: false,
            receiver: None,
        };
        deliver_to_both_ends(sender, self, &frame);
    }

    /// Broadcast chat: one frame per recipient (sender excluded), then a
    /// summary frame back to the sender naming everyone addressed. A failed
    /// delivery never blocks the remaining recipients.
    pub fn send_chat_to_all(
        sender: &Arc<UserSession>,
        recipients: &[Arc<UserSession>],
        message: &str,
    ) {
        let mut received_members = Vec::new();
        for recipient in recipients {
            if recipient.user_id == sender.user_id {
                continue;
            }
            let frame = ServerMessage::SendChat {
                sender_id: sender.user_id.clone(),
                sender_name: sender.user_name(),
                receiver_id: Some(recipient.user_id.clone()),
                receiver_name: Some(recipient.user_name()),
                message: message.to_string(),
                is_send_to_all: true,
                receiver: None,
            };
            match recipient.send(&frame) {
                Ok(()) => received_members.push(recipient.participant()),
                Err(e) => warn!(recipient = %recipient.user_id, error = %e, "chat broadcast delivery failed"),
            }
        }

        let summary = ServerMessage::SendChat {
            sender_id: sender.user_id.clone(),
            sender_name: sender.user_name(),
            receiver_id: None,
            receiver_name: None,
            message: message.to_string(),
            is_send_to_all: true,
            receiver: Some(received_members),
        };
        if let Err(e) = sender.send(&summary) {
            warn!(sender = %sender.user_id, error = %e, "chat summary delivery failed");
        }
    }

    pub fn send_emoji_to_all(
        sender: &Arc<UserSession>,
        recipients: &[Arc<UserSession>],
        emoji: &str,
    ) {
        let mut received_members = Vec::new();
        for recipient in recipients {
            if recipient.user_id == sender.user_id {
                continue;
            }
            let frame = ServerMessage::SendEmoji {
                sender_id: sender.user_id.clone(),
                sender_name: sender.user_name(),
                receiver_id: Some(recipient.user_id.clone()),
                receiver_name: Some(recipient.user_name()),
                emoji: emoji.to_string(),
                is_send_to_all: true,
                receiver: None,
            };
            match recipient.send(&frame) {
                Ok(()) => received_members.push(recipient.participant()),
                Err(e) => warn!(recipient = %recipient.user_id, error = %e, "emoji broadcast delivery failed"),
            }
        }

        let summary = ServerMessage::SendEmoji {
            sender_id: sender.user_id.clone(),
            sender_name: sender.user_name(),
            receiver_id: None,
            receiver_name: None,
            emoji: emoji.to_string(),
            is_send_to_all: true,
            receiver: Some(received_members),
        };
        if let Err(e) = sender.send(&summary) {
            warn!(sender = %sender.user_id, error = %e, "emoji summary delivery failed");
        }
    }

    /// Renames this participant and announces the new name to the room.
    pub fn change_name(&self, new_name: &str, room: &Room) {
        {
            let mut name = self.user_name.write().unwrap_or_else(|e| e.into_inner());
            *name = new_name.to_string();
        }
        info!(user_id = %self.user_id, new_name = %new_name, "participant renamed");

        let frame = ServerMessage::ChangeName {
            user_id: self.user_id.clone(),
            new_name: new_name.to_string(),
        };
        broadcast_best_effort(&room.participants(), &frame);
    }

    pub fn change_audio_state(&self, recipients: &[Arc<UserSession>], audio_on: bool) {
        self.audio_on.store(audio_on, Ordering::Relaxed);
        let frame = ServerMessage::AudioStateChange {
            user_id: self.user_id.clone(),
            audio_on,
        };
        broadcast_best_effort(recipients, &frame);
    }

    pub fn change_video_state(&self, recipients: &[Arc<UserSession>], video_on: bool) {
        self.video_on.store(video_on, Ordering::Relaxed);
        let frame = ServerMessage::VideoStateChange {
            user_id: self.user_id.clone(),
            video_on,
        };
        broadcast_best_effort(recipients, &frame);
    }

    /// Releases every incoming endpoint and the outgoing endpoint. Every
    /// release is attempted; failures are logged and do not stop the rest.
    pub async fn close(&self) {
        let incoming: Vec<(UserId, Arc<dyn MediaEndpoint>)> = self
            .incoming_media_by_user_id
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        self.incoming_media_by_user_id.clear();

        for (peer_id, endpoint) in incoming {
            if let Err(e) = endpoint.release().await {
                warn!(user_id = %self.user_id, peer = %peer_id, error = %e,
                    "could not release incoming endpoint");
            }
        }

        if let Err(e) = self.outgoing_media.release().await {
            warn!(user_id = %self.user_id, error = %e, "could not release outgoing endpoint");
        }
    }

    #[cfg(test)]
    pub(crate) fn has_incoming_endpoint_for(&self, peer: &UserId) -> bool {
        self.incoming_media_by_user_id.contains_key(peer)
    }
}

fn deliver_to_both_ends(sender: &Arc<UserSession>, receiver: &UserSession, frame: &ServerMessage) {
    if let Err(e) = sender.send(frame) {
        warn!(user_id = %sender.user_id, error = %e, "echo to sender failed");
    }
    if receiver.user_id != sender.user_id {
        if let Err(e) = receiver.send(frame) {
            warn!(user_id = %receiver.user_id, error = %e, "delivery to receiver failed");
        }
    }
}

fn broadcast_best_effort(recipients: &[Arc<UserSession>], frame: &ServerMessage) {
    for recipient in recipients {
        if let Err(e) = recipient.send(frame) {
            warn!(recipient = %recipient.user_id(), error = %e, "broadcast delivery failed");
        }
    }
}

// Sessions are map keys and roster members; identity is (user, room).
impl PartialEq for UserSession {
    fn eq(&self, other: &Self) -> bool {
        self.user_id == other.user_id && self.room_id == other.room_id
    }
}

impl Eq for UserSession {}

impl Hash for UserSession {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.user_id.hash(state);
        self.room_id.hash(state);
    }
}

impl std::fmt::Debug for UserSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserSession")
            .field("user_id", &self.user_id)
            .field("user_name", &self.user_name())
            .field("room_id", &self.room_id)
            .finish()
    }
}
