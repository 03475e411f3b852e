use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::queue::QueueHealth;

/// Result of a completed drain cycle.
#[derive(Debug, Serialize, ToSchema)]
pub struct DrainReport {
    /// Always `true` for a completed cycle; per-event failures are counted,
    /// not fatal.
    pub ok: bool,
    /// Events applied to the vote table and acknowledged.
    pub processed: u64,
    /// Events that failed this cycle and were requeued or dead-lettered.
    pub failed: u64,
    /// Orphaned in-flight events returned to pending before the batch.
    pub recovered: u64,
    /// Queue depths after the cycle.
    pub health: QueueHealth,
    /// When the cycle finished, RFC 3339.
    pub checked_at: String,
}

/// Returned when a job invocation deliberately did nothing.
#[derive(Debug, Serialize, ToSchema)]
pub struct JobSkipped {
    /// Always `true`; a skip is an expected outcome, not a failure.
    pub ok: bool,
    /// Marker distinguishing the skip shape from a report.
    pub skipped: bool,
    /// Why the invocation did no work.
    pub reason: String,
}

impl JobSkipped {
    /// Build a skip response with the given reason.
    pub fn because(reason: impl Into<String>) -> Self {
        Self {
            ok: true,
            skipped: true,
            reason: reason.into(),
        }
    }
}

/// Body accepted by the slot advancement trigger.
#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
pub struct AdvanceRequest {
    /// Explicit season to advance. Takes precedence over `genre`.
    pub season_id: Option<Uuid>,
    /// Genre track whose active season should advance.
    #[validate(length(min = 1, max = 64))]
    pub genre: Option<String>,
}

/// Result of a successful slot advancement.
#[derive(Debug, Serialize, ToSchema)]
pub struct AdvanceReport {
    /// Always `true` for a completed advancement.
    pub ok: bool,
    /// Present and `true` when the season just finished.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished: Option<bool>,
    /// Position of the slot that was locked.
    pub current_slot_locked: u32,
    /// Clip that won the locked slot.
    pub winner_clip_id: Uuid,
    /// Position of the slot opened next, absent when the season finished.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_slot_position: Option<u32>,
    /// Present and `true` when the next slot has no clips yet and opened as
    /// waiting-for-clips.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub waiting_for_clips: Option<bool>,
    /// Clips eliminated by this advancement.
    pub clips_eliminated: u64,
    /// Voting deadline of the next slot, RFC 3339, when it opened as voting.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voting_ends_at: Option<String>,
}
