use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// A strongly typed identifier for a Room.
/// Wraps an `Arc<String>` for cheap cloning.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub Arc<String>);

/// A strongly typed identifier for a User.
/// Wraps an `Arc<String>` for cheap cloning.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub Arc<String>);

/// A strongly typed identifier for one transport connection.
/// Distinct from [`UserId`]: a connection exists before the client joins a
/// room and is the key the registry uses on disconnect.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub Arc<String>);

impl ConnectionId {
    pub fn new() -> Self {
        ConnectionId(Arc::new(Uuid::new_v4().to_string()))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

// Implement Display for easy logging
impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Implement conversion from String/&str
impl From<String> for RoomId {
    fn from(s: String) -> Self {
        RoomId(Arc::new(s))
    }
}

impl From<&str> for RoomId {
    fn from(s: &str) -> Self {
        RoomId(Arc::new(s.to_string()))
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        UserId(Arc::new(s))
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        UserId(Arc::new(s.to_string()))
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        ConnectionId(Arc::new(s))
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        ConnectionId(Arc::new(s.to_string()))
    }
}

// Helper for referencing the inner string
impl AsRef<str> for RoomId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for UserId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ConnectionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
