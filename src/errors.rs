use crate::id_types::{RoomId, UserId};
use thiserror::Error;

/// Error taxonomy for the signaling core.
///
/// `RoomNotFound`, `CapacityExhausted` and `MalformedMessage` are answered to
/// the offending client; `ParticipantNotFound` signals a logic bug and is
/// reported, never swallowed; `Delivery` is always non-fatal and only ever
/// logged. None of these may take the process down.
#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("room {0} not found")]
    RoomNotFound(RoomId),

    #[error("user {0} is not a participant of the room")]
    ParticipantNotFound(UserId),

    #[error("room id space exhausted, no new rooms can be created")]
    CapacityExhausted,

    #[error("malformed message: {0}")]
    MalformedMessage(#[source] serde_json::Error),

    /// The connection sent an in-room event before creating or joining a
    /// room, or after leaving one.
    #[error("connection is not bound to a room")]
    NotInRoom,

    #[error("could not deliver frame to user {user_id}")]
    Delivery { user_id: UserId },

    /// Opaque failure from the external media-negotiation engine.
    #[error("media engine failure: {0}")]
    Media(#[from] anyhow::Error),
}

impl SignalingError {
    /// Whether the dispatcher should answer the client with an `error` frame.
    /// Delivery failures are per-recipient and already logged at the source.
    pub fn is_client_facing(&self) -> bool {
        matches!(
            self,
            SignalingError::RoomNotFound(_)
                | SignalingError::CapacityExhausted
                | SignalingError::MalformedMessage(_)
                | SignalingError::ParticipantNotFound(_)
                | SignalingError::NotInRoom
        )
    }
}
