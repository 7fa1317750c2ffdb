pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod id_types;
pub mod logging;
pub mod media;
pub mod metrics;
pub mod protocol;
pub mod room;
pub mod room_id_gen;
pub mod room_manager;
pub mod server;
pub mod types;
pub mod user_registry;
pub mod user_session;

pub use dispatcher::SignalingDispatcher;
pub use errors::SignalingError;
pub use media::{MediaEndpoint, MediaEngine, MediaPipeline, NullMediaEngine};
pub use room::Room;
pub use room_id_gen::RoomIdGenerator;
pub use room_manager::RoomManager;
pub use types::{OutboundFrame, OutboundSender};
pub use user_registry::UserRegistry;
pub use user_session::UserSession;
