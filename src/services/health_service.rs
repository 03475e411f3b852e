use tracing::warn;

use crate::{
    dao::store::TourneyStore, dto::health::HealthResponse, queue::VoteQueue, state::SharedState,
};

/// Probe the store and the queue and report the combined status.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    let store_ok = match state.store().health_check().await {
        Ok(()) => true,
        Err(err) => {
            warn!(error = %err, "storage health check failed");
            false
        }
    };

    let queue_health = match state.queue().health().await {
        Ok(health) => Some(health),
        Err(err) => {
            warn!(error = %err, "queue health check failed");
            None
        }
    };

    if store_ok && queue_health.is_some() {
        HealthResponse::ok(queue_health)
    } else {
        HealthResponse::degraded(queue_health)
    }
}
