//! Wire protocol for the signaling channel.
//!
//! One JSON object per frame. Inbound frames are discriminated by `eventId`,
//! outbound frames by `action`. Field names are part of the client contract
//! and must not change.

use crate::id_types::UserId;
use serde::{Deserialize, Serialize};

/// Immutable presence snapshot of one participant, embedded in rosters and
/// leader announcements. Not the live session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub user_id: UserId,
    pub user_name: String,
}

/// An ICE candidate as carried on the wire, opaque to this core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_mid: String,
    pub sdp_m_line_index: u32,
}

/// Client -> server frames, tagged by `eventId`.
///
/// A recognized event with missing or ill-typed fields is a parse error
/// (surfaced as `MalformedMessage`); an unrecognized `eventId` deserializes
/// into `Unknown` and is ignored by the dispatcher.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "eventId", rename_all = "camelCase")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    CreateRoom {
        user_name: String,
        audio_on: bool,
        video_on: bool,
    },
    #[serde(rename_all = "camelCase")]
    JoinRoom {
        user_name: String,
        room_id: String,
        audio_on: bool,
        video_on: bool,
    },
    #[serde(rename_all = "camelCase")]
    OnIceCandidate {
        /// Target channel: the session's own id for the outgoing channel,
        /// a peer id for an incoming channel.
        user_id: UserId,
        candidate: IceCandidate,
    },
    #[serde(rename_all = "camelCase")]
    ReceiveVideoFrom {
        /// The peer whose video is requested.
        user_id: UserId,
        sdp_offer: String,
    },
    ExitRoom,
    #[serde(rename_all = "camelCase")]
    SendChat {
        sender_id: UserId,
        #[serde(default)]
        receiver_id: Option<UserId>,
        message: String,
        is_send_to_all: bool,
    },
    #[serde(rename_all = "camelCase")]
    SendEmoji {
        sender_id: UserId,
        #[serde(default)]
        receiver_id: Option<UserId>,
        emoji: String,
        is_send_to_all: bool,
    },
    #[serde(rename_all = "camelCase")]
    ChangeName { user_id: UserId, new_name: String },
    #[serde(rename_all = "camelCase")]
    AudioStateChange { user_id: UserId, audio_on: bool },
    #[serde(rename_all = "camelCase")]
    VideoStateChange { user_id: UserId, video_on: bool },
    /// Catch-all for unrecognized `eventId`s; ignored, never an error.
    #[serde(other)]
    Unknown,
}

/// Server -> client frames, tagged by `action`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    RoomCreated {
        room_id: String,
        user_id: UserId,
        user_name: String,
        creator: Participant,
        audio_on: bool,
        video_on: bool,
    },
    /// Presence broadcast to existing members carrying the new member's
    /// identity. (The name is historical; it announces the newcomer.)
    #[serde(rename_all = "camelCase")]
    SendExistingUsers { user_id: UserId, user_name: String },
    /// Reply to the joining member: current roster (excluding itself) and
    /// the current room leader.
    #[serde(rename_all = "camelCase")]
    NewUserJoined {
        user_id: UserId,
        user_name: String,
        participants: Vec<Participant>,
        creator: Participant,
    },
    #[serde(rename_all = "camelCase")]
    OnIceCandidate {
        user_id: UserId,
        #[serde(skip_serializing_if = "Option::is_none")]
        user_name: Option<String>,
        candidate: IceCandidate,
    },
    #[serde(rename_all = "camelCase")]
    ReceiveVideoFrom {
        user_id: UserId,
        user_name: String,
        sdp_answer: String,
    },
    /// Broadcast when a member leaves; sent bare (no ids) when the room
    /// itself is closing.
    #[serde(rename_all = "camelCase")]
    ExitRoom {
        #[serde(skip_serializing_if = "Option::is_none")]
        user_id: Option<UserId>,
        #[serde(skip_serializing_if = "Option::is_none")]
        user_name: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    CreatorChanged { creator: Participant },
    #[serde(rename_all = "camelCase")]
    SendChat {
        sender_id: UserId,
        sender_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        receiver_id: Option<UserId>,
        #[serde(skip_serializing_if = "Option::is_none")]
        receiver_name: Option<String>,
        message: String,
        is_send_to_all: bool,
        /// Present only on the summary frame sent back to a broadcast's
        /// sender: the members that were addressed.
        #[serde(skip_serializing_if = "Option::is_none")]
        receiver: Option<Vec<Participant>>,
    },
    #[serde(rename_all = "camelCase")]
    SendEmoji {
        sender_id: UserId,
        sender_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        receiver_id: Option<UserId>,
        #[serde(skip_serializing_if = "Option::is_none")]
        receiver_name: Option<String>,
        emoji: String,
        is_send_to_all: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        receiver: Option<Vec<Participant>>,
    },
    #[serde(rename_all = "camelCase")]
    ChangeName { user_id: UserId, new_name: String },
    #[serde(rename_all = "camelCase")]
    AudioStateChange { user_id: UserId, audio_on: bool },
    #[serde(rename_all = "camelCase")]
    VideoStateChange { user_id: UserId, video_on: bool },
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_create_room() {
        let raw = r#"{"eventId":"createRoom","userName":"alice","audioOn":true,"videoOn":false}"#;
        let msg: ClientMessage = serde_json::from_str(raw).unwrap();
        match msg {
            ClientMessage::CreateRoom {
                user_name,
                audio_on,
                video_on,
            } => {
                assert_eq!(user_name, "alice");
                assert!(audio_on);
                assert!(!video_on);
            }
            other => panic!("wrong variant: {:?}", other),
        }
    }

    #[test]
    fn test_parse_exit_room_bare() {
        let raw = r#"{"eventId":"exitRoom"}"#;
        let msg: ClientMessage = serde_json::from_str(raw).unwrap();
        assert!(matches!(msg, ClientMessage::ExitRoom));
    }

    #[test]
    fn test_parse_ice_candidate() {
        let raw = r#"{"eventId":"onIceCandidate","userId":"u1",
            "candidate":{"candidate":"candidate:1 1 UDP 1 10.0.0.1 5000 typ host","sdpMid":"0","sdpMLineIndex":0}}"#;
        let msg: ClientMessage = serde_json::from_str(raw).unwrap();
        match msg {
            ClientMessage::OnIceCandidate { user_id, candidate } => {
                assert_eq!(user_id.as_ref(), "u1");
                assert_eq!(candidate.sdp_mid, "0");
                assert_eq!(candidate.sdp_m_line_index, 0);
            }
            other => panic!("wrong variant: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_event_id_is_ignored_variant() {
        let raw = r#"{"eventId":"totallyNewThing","whatever":42}"#;
        let msg: ClientMessage = serde_json::from_str(raw).unwrap();
        assert!(matches!(msg, ClientMessage::Unknown));
    }

    #[test]
    fn test_missing_field_is_error() {
        // joinRoom without roomId must not silently parse
        let raw = r#"{"eventId":"joinRoom","userName":"bob","audioOn":true,"videoOn":true}"#;
        assert!(serde_json::from_str::<ClientMessage>(raw).is_err());
    }

    #[test]
    fn test_room_created_wire_shape() {
        let msg = ServerMessage::RoomCreated {
            room_id: "000123".to_string(),
            user_id: "u1".into(),
            user_name: "alice".to_string(),
            creator: Participant {
                user_id: "u1".into(),
                user_name: "alice".to_string(),
            },
            audio_on: true,
            video_on: true,
        };
        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["action"], "roomCreated");
        assert_eq!(json["roomId"], "000123");
        assert_eq!(json["creator"]["userId"], "u1");
        assert_eq!(json["audioOn"], true);
    }

    #[test]
    fn test_exit_room_bare_omits_ids() {
        let msg = ServerMessage::ExitRoom {
            user_id: None,
            user_name: None,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"action":"exitRoom"}"#);
    }

    #[test]
    fn test_chat_summary_has_receiver_list() {
        let msg = ServerMessage::SendChat {
            sender_id: "u1".into(),
            sender_name: "alice".to_string(),
            receiver_id: None,
            receiver_name: None,
            message: "hi all".to_string(),
            is_send_to_all: true,
            receiver: Some(vec![Participant {
                user_id: "u2".into(),
                user_name: "bob".to_string(),
            }]),
        };
        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["action"], "sendChat");
        assert_eq!(json["isSendToAll"], true);
        assert_eq!(json["receiver"][0]["userName"], "bob");
        assert!(json.get("receiverId").is_none());
    }
}
