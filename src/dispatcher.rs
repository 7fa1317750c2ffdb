use crate::errors::SignalingError;
use crate::id_types::{ConnectionId, UserId};
use crate::metrics;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::room_manager::RoomManager;
use crate::types::OutboundSender;
use crate::user_registry::UserRegistry;
use crate::user_session::UserSession;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Stateless router from inbound frames to room/session operations.
///
/// The transport hands every text frame here together with the connection id
/// and the connection's outbound channel; the dispatcher owns parsing, the
/// registry lookups, and the decision whether a failure goes back to the
/// client as an `error` frame or only into the log.
pub struct SignalingDispatcher {
    room_manager: Arc<RoomManager>,
    registry: Arc<UserRegistry>,
}

fn event_label(msg: &ClientMessage) -> &'static str {
    match msg {
        ClientMessage::CreateRoom { .. } => "createRoom",
        ClientMessage::JoinRoom { .. } => "joinRoom",
        ClientMessage::OnIceCandidate { .. } => "onIceCandidate",
        ClientMessage::ReceiveVideoFrom { .. } => "receiveVideoFrom",
        ClientMessage::ExitRoom => "exitRoom",
        ClientMessage::SendChat { .. } => "sendChat",
        ClientMessage::SendEmoji { .. } => "sendEmoji",
        ClientMessage::ChangeName { .. } => "changeName",
        ClientMessage::AudioStateChange { .. } => "audioStateChange",
        ClientMessage::VideoStateChange { .. } => "videoStateChange",
        ClientMessage::Unknown => "unknown",
    }
}

/// Best-effort `error` frame straight onto the connection's channel. Used
/// when there may be no session yet to send through.
fn send_error_frame(outbound: &OutboundSender, message: String) {
    let frame = ServerMessage::Error { message };
    match serde_json::to_string(&frame) {
        Ok(json) => {
            if outbound.try_send(Arc::new(json)).is_err() {
                metrics::SIGNALING_DELIVERY_FAILURES_TOTAL.inc();
            }
        }
        Err(e) => error!(error = %e, "could not serialize error frame"),
    }
}

impl SignalingDispatcher {
    pub fn new(room_manager: Arc<RoomManager>, registry: Arc<UserRegistry>) -> Self {
        SignalingDispatcher {
            room_manager,
            registry,
        }
    }

    /// Entry point for one inbound text frame.
    pub async fn handle_frame(
        &self,
        connection_id: &ConnectionId,
        raw: &str,
        outbound: &OutboundSender,
    ) {
        let msg: ClientMessage = match serde_json::from_str(raw) {
            Ok(msg) => msg,
            Err(e) => {
                metrics::SIGNALING_PROTOCOL_ERRORS_TOTAL.inc();
                let err = SignalingError::MalformedMessage(e);
                warn!(connection_id = %connection_id, error = %err, "rejecting inbound frame");
                send_error_frame(outbound, err.to_string());
                return;
            }
        };

        let label = event_label(&msg);
        metrics::SIGNALING_EVENTS_TOTAL.with_label_values(&[label]).inc();
        debug!(connection_id = %connection_id, event = label, "dispatching frame");

        if let Err(e) = self.route(connection_id, msg, outbound).await {
            if e.is_client_facing() {
                warn!(connection_id = %connection_id, event = label, error = %e,
                    "event failed, answering client");
                send_error_frame(outbound, e.to_string());
            } else {
                error!(connection_id = %connection_id, event = label, error = %e, "event failed");
            }
        }
    }

    /// Transport closed without (or after) an explicit `exitRoom`. Always
    /// safe to call; an unbound connection is a no-op.
    pub async fn handle_disconnect(&self, connection_id: &ConnectionId) {
        debug!(connection_id = %connection_id, "connection closed");
        if let Some(session) = self.registry.remove_by_connection_id(connection_id) {
            self.room_manager.leave_room(&session).await;
        }
    }

    async fn route(
        &self,
        connection_id: &ConnectionId,
        msg: ClientMessage,
        outbound: &OutboundSender,
    ) -> Result<(), SignalingError> {
        match msg {
            ClientMessage::CreateRoom {
                user_name,
                audio_on,
                video_on,
            } => {
                // A connection still bound to a room leaves it first; the
                // client skipped its exitRoom.
                if let Some(stale) = self.registry.remove_by_connection_id(connection_id) {
                    warn!(connection_id = %connection_id, user_id = %stale.user_id(),
                        "createRoom while still in a room, leaving first");
                    self.room_manager.leave_room(&stale).await;
                }
                let session = self
                    .room_manager
                    .create_room(&user_name, audio_on, video_on, outbound.clone())
                    .await?;
                self.registry.register(connection_id.clone(), session);
                Ok(())
            }

            ClientMessage::JoinRoom {
                user_name,
                room_id,
                audio_on,
                video_on,
            } => {
                if let Some(stale) = self.registry.remove_by_connection_id(connection_id) {
                    warn!(connection_id = %connection_id, user_id = %stale.user_id(),
                        "joinRoom while still in a room, leaving first");
                    self.room_manager.leave_room(&stale).await;
                }
                let session = self
                    .room_manager
                    .join_room(&user_name, &room_id, audio_on, video_on, outbound.clone())
                    .await?;
                self.registry.register(connection_id.clone(), session);
                Ok(())
            }

            ClientMessage::OnIceCandidate { user_id, candidate } => {
                let session = self.acting_session(connection_id)?;
                session.add_candidate(candidate, &user_id).await
            }

            ClientMessage::ReceiveVideoFrom { user_id, sdp_offer } => {
                let session = self.acting_session(connection_id)?;
                let sender = self.peer_in_same_room(&session, &user_id)?;
                session.receive_video_from(&sender, &sdp_offer).await
            }

            ClientMessage::ExitRoom => {
                let session = self
                    .registry
                    .remove_by_connection_id(connection_id)
                    .ok_or(SignalingError::NotInRoom)?;
                self.room_manager.leave_room(&session).await;
                Ok(())
            }

            ClientMessage::SendChat {
                sender_id,
                receiver_id,
                message,
                is_send_to_all,
            } => {
                let sender = self.sender_session(connection_id, &sender_id)?;
                if is_send_to_all {
                    let room = self.room_manager.get_room(sender.room_id())?;
                    UserSession::send_chat_to_all(&sender, &room.participants(), &message);
                    Ok(())
                } else {
                    let receiver = self.required_receiver(&sender, receiver_id)?;
                    receiver.send_chat(&sender, &message);
                    Ok(())
                }
            }

            ClientMessage::SendEmoji {
                sender_id,
                receiver_id,
                emoji,
                is_send_to_all,
            } => {
                let sender = self.sender_session(connection_id, &sender_id)?;
                if is_send_to_all {
                    let room = self.room_manager.get_room(sender.room_id())?;
                    UserSession::send_emoji_to_all(&sender, &room.participants(), &emoji);
                    Ok(())
                } else {
                    let receiver = self.required_receiver(&sender, receiver_id)?;
                    receiver.send_emoji(&sender, &emoji);
                    Ok(())
                }
            }

            ClientMessage::ChangeName { user_id, new_name } => {
                let session = self.sender_session(connection_id, &user_id)?;
                let room = self.room_manager.get_room(session.room_id())?;
                session.change_name(&new_name, &room);
                Ok(())
            }

            ClientMessage::AudioStateChange { user_id, audio_on } => {
                let session = self.sender_session(connection_id, &user_id)?;
                let room = self.room_manager.get_room(session.room_id())?;
                session.change_audio_state(&room.participants(), audio_on);
                Ok(())
            }

            ClientMessage::VideoStateChange { user_id, video_on } => {
                let session = self.sender_session(connection_id, &user_id)?;
                let room = self.room_manager.get_room(session.room_id())?;
                session.change_video_state(&room.participants(), video_on);
                Ok(())
            }

            ClientMessage::Unknown => {
                debug!(connection_id = %connection_id, "ignoring unrecognized eventId");
                Ok(())
            }
        }
    }

    fn acting_session(
        &self,
        connection_id: &ConnectionId,
    ) -> Result<Arc<UserSession>, SignalingError> {
        self.registry
            .by_connection_id(connection_id)
            .ok_or(SignalingError::NotInRoom)
    }

    /// Resolves the session a frame claims to act as, and pins it to the
    /// connection actually sending the frame: a client can only speak for
    /// the session its own transport is bound to.
    fn sender_session(
        &self,
        connection_id: &ConnectionId,
        claimed_user_id: &UserId,
    ) -> Result<Arc<UserSession>, SignalingError> {
        let session = self.acting_session(connection_id)?;
        if session.user_id() != claimed_user_id {
            warn!(connection_id = %connection_id, claimed = %claimed_user_id,
                actual = %session.user_id(), "frame claims a foreign sender id");
            return Err(SignalingError::ParticipantNotFound(claimed_user_id.clone()));
        }
        Ok(session)
    }

    /// Point-to-point delivery requires the receiver to exist and share the
    /// sender's room.
    fn required_receiver(
        &self,
        sender: &Arc<UserSession>,
        receiver_id: Option<UserId>,
    ) -> Result<Arc<UserSession>, SignalingError> {
        let receiver_id = match receiver_id {
            Some(id) => id,
            None => {
                return Err(SignalingError::MalformedMessage(serde::de::Error::custom(
                    "point-to-point frame without receiverId",
                )))
            }
        };
        self.peer_in_same_room(sender, &receiver_id)
    }

    fn peer_in_same_room(
        &self,
        session: &Arc<UserSession>,
        peer_id: &UserId,
    ) -> Result<Arc<UserSession>, SignalingError> {
        let room = self.room_manager.get_room(session.room_id())?;
        room.get_participant(peer_id)
            .ok_or_else(|| SignalingError::ParticipantNotFound(peer_id.clone()))
    }
}
