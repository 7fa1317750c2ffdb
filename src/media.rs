//! Boundary to the external media-negotiation engine.
//!
//! The engine owns actual audio/video transport, SDP offer/answer and ICE;
//! this core only holds opaque pipeline/endpoint handles and reacts to the
//! candidate-discovered callback. Engine calls are potentially slow, so
//! callers must not hold room or registry locks across these awaits.

use crate::protocol::IceCandidate;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Invoked by the engine whenever a local ICE candidate is discovered on an
/// endpoint. Must be cheap and non-blocking; implementations push a frame
/// into the session's outbound channel.
pub type IceCandidateCallback = Arc<dyn Fn(IceCandidate) + Send + Sync>;

#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Allocates the shared per-room media pipeline.
    async fn create_pipeline(&self) -> Result<Arc<dyn MediaPipeline>>;
}

#[async_trait]
pub trait MediaPipeline: Send + Sync {
    /// Allocates one per-direction, per-peer media endpoint on this
    /// pipeline, wiring the candidate-discovered callback.
    async fn create_endpoint(
        &self,
        on_ice_candidate: IceCandidateCallback,
    ) -> Result<Arc<dyn MediaEndpoint>>;

    async fn release(&self) -> Result<()>;
}

#[async_trait]
pub trait MediaEndpoint: Send + Sync {
    /// Processes a remote SDP offer and returns the engine's answer.
    async fn process_offer(&self, sdp_offer: &str) -> Result<String>;

    /// Starts ICE gathering; discovered candidates arrive via the callback
    /// registered at creation.
    async fn gather_candidates(&self) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Connects this endpoint's media output into `sink`.
    async fn connect(&self, sink: &Arc<dyn MediaEndpoint>) -> Result<()>;

    async fn release(&self) -> Result<()>;
}

/// Engine stub for deployments and tests with no negotiation backend wired:
/// answers echo the offer, candidates are accepted and dropped, connect and
/// release are no-ops. Signaling traffic still flows end to end.
#[derive(Debug, Default)]
pub struct NullMediaEngine;

#[derive(Debug, Default)]
struct NullPipeline;

#[derive(Debug, Default)]
struct NullEndpoint;

#[async_trait]
impl MediaEngine for NullMediaEngine {
    async fn create_pipeline(&self) -> Result<Arc<dyn MediaPipeline>> {
        Ok(Arc::new(NullPipeline))
    }
}

#[async_trait]
impl MediaPipeline for NullPipeline {
    async fn create_endpoint(
        &self,
        _on_ice_candidate: IceCandidateCallback,
    ) -> Result<Arc<dyn MediaEndpoint>> {
        Ok(Arc::new(NullEndpoint))
    }

    async fn release(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl MediaEndpoint for NullEndpoint {
    async fn process_offer(&self, sdp_offer: &str) -> Result<String> {
        Ok(sdp_offer.to_string())
    }

    async fn gather_candidates(&self) -> Result<()> {
        Ok(())
    }

    async fn add_ice_candidate(&self, _candidate: IceCandidate) -> Result<()> {
        Ok(())
    }

    async fn connect(&self, _sink: &Arc<dyn MediaEndpoint>) -> Result<()> {
        Ok(())
    }

    async fn release(&self) -> Result<()> {
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_null_engine_round_trip() {
        let engine = NullMediaEngine;
        let pipeline = engine.create_pipeline().await.unwrap();
        let endpoint = pipeline
            .create_endpoint(Arc::new(|_c| {}))
            .await
            .unwrap();

        let answer = endpoint.process_offer("v=0 fake-offer").await.unwrap();
        assert_eq!(answer, "v=0 fake-offer");
        endpoint.gather_candidates().await.unwrap();
        endpoint.release().await.unwrap();
        pipeline.release().await.unwrap();
    }
}
