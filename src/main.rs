use signal_core::{
    config, logging, metrics, NullMediaEngine, RoomIdGenerator, RoomManager, SignalingDispatcher,
    UserRegistry,
};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = config::validate_env()?;
    logging::init(&config.rust_log);
    metrics::register_metrics();

    // No negotiation backend wired in the standalone binary; the media
    // engine is an injected collaborator, see `media::MediaEngine`.
    let room_manager = Arc::new(RoomManager::new(
        Arc::new(NullMediaEngine),
        RoomIdGenerator::new(),
    ));
    let registry = Arc::new(UserRegistry::new());
    let dispatcher = Arc::new(SignalingDispatcher::new(room_manager, registry));

    info!(port = config.signal_port, "starting signaling server");
    signal_core::server::serve(dispatcher, config.signal_port).await;
    Ok(())
}
