use crate::id_types::{ConnectionId, RoomId, UserId};
use crate::room::Room;
use crate::user_session::UserSession;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// One pre-serialized outbound frame. `Arc<String>` so broadcast fan-out to
/// many recipients shares a single serialization.
pub type OutboundFrame = Arc<String>;

/// Handle to one connection's outbound channel. A single task drains the
/// receiving end to the socket, so writes to one transport never interleave.
pub type OutboundSender = mpsc::Sender<OutboundFrame>;

/// Thread-safe registry map: room id -> room
pub type RoomMap = DashMap<RoomId, Arc<Room>>;

/// Thread-safe registry map: user id -> live session
pub type SessionByUserId = DashMap<UserId, Arc<UserSession>>;

/// Thread-safe registry map: transport connection id -> live session
pub type SessionByConnectionId = DashMap<ConnectionId, Arc<UserSession>>;
