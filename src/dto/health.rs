use serde::Serialize;
use utoipa::ToSchema;

use crate::queue::QueueHealth;

/// Health response returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Health status ("ok" or "degraded").
    pub status: String,
    /// Queue partition depths, when the queue responded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue: Option<QueueHealth>,
}

impl HealthResponse {
    /// Create a health response indicating the system is operational.
    pub fn ok(queue: Option<QueueHealth>) -> Self {
        Self {
            status: "ok".to_string(),
            queue,
        }
    }

    /// Create a health response indicating a backend is unreachable.
    pub fn degraded(queue: Option<QueueHealth>) -> Self {
        Self {
            status: "degraded".to_string(),
            queue,
        }
    }
}
