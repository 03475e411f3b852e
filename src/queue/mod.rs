//! Durable, at-least-once vote event queue.
//!
//! Vote intents are buffered here by the intake path and drained into the
//! vote table by the periodic processor. Events move between three
//! partitions (pending, in-flight, dead-letter) and an event id lives in
//! exactly one partition at a time. Delivery is at-least-once: after orphan
//! recovery or a retry the processor can see the same event again, so every
//! write derived from an event must be idempotent.

#[cfg(feature = "memory-store")]
pub mod memory;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

/// Result alias for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Error raised by queue backends.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The queue backend could not be reached.
    #[error("queue unavailable: {message}")]
    Unavailable {
        /// Human-readable description of the failing operation.
        message: String,
        /// Underlying backend error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Whether a queued event adds or removes a vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteDirection {
    /// Cast a vote for the clip.
    Up,
    /// Withdraw a previously cast vote.
    Down,
}

/// Mutable envelope carried alongside an event.
///
/// Everything except `retry_count` is immutable after enqueue.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VoteEventMetadata {
    /// Authenticated user behind the vote, when known.
    pub user_id: Option<Uuid>,
    /// Vote weight; `None` means the default weight of 1.
    pub weight: Option<u32>,
    /// Slot position the clip competed in when the vote was cast.
    pub slot_position: Option<u32>,
    /// Whether the intake path flagged the vote for review.
    pub flagged: bool,
    /// How many times the event has been requeued after a failure.
    pub retry_count: u32,
}

/// A vote intent waiting to be applied to the vote table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteEvent {
    /// Queue-side identifier; partition membership is keyed on this.
    pub id: Uuid,
    /// Identifier assigned by the intake path.
    pub vote_id: Uuid,
    /// Clip the vote applies to.
    pub clip_id: Uuid,
    /// Opaque key identifying the voter.
    pub voter_key: String,
    /// Whether the vote is being cast or withdrawn.
    pub direction: VoteDirection,
    /// When the intent was recorded upstream.
    pub timestamp: OffsetDateTime,
    /// Mutable envelope.
    pub metadata: VoteEventMetadata,
}

impl VoteEvent {
    /// Effective vote weight, defaulting to 1 when unspecified.
    pub fn weight(&self) -> u32 {
        self.metadata.weight.unwrap_or(1)
    }
}

/// A terminally failed event parked with its failure context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEvent {
    /// The event as it looked on its final attempt.
    pub event: VoteEvent,
    /// Error message from the last failed attempt.
    pub last_error: String,
    /// Total delivery attempts before parking.
    pub attempts: u32,
    /// When the event was dead-lettered.
    pub dead_lettered_at: OffsetDateTime,
}

/// Snapshot of queue depths used by the health endpoint and drain results.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct QueueHealth {
    /// Events ready to pop.
    pub pending_depth: u64,
    /// Events popped but not yet acknowledged.
    pub in_flight_depth: u64,
    /// Events parked after exhausting their retry budget.
    pub dead_letter_depth: u64,
    /// When a drain cycle last completed, RFC 3339.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_processed_at: Option<String>,
}

/// Abstraction over the durable vote event queue.
pub trait VoteQueue: Send + Sync {
    /// Append an event to the pending partition.
    fn push(&self, event: VoteEvent) -> BoxFuture<'static, QueueResult<()>>;

    /// Move up to `max` pending events to in-flight, stamping each with a
    /// visibility deadline, and return them in enqueue order.
    fn pop_batch(
        &self,
        max: usize,
        visibility: Duration,
    ) -> BoxFuture<'static, QueueResult<Vec<VoteEvent>>>;

    /// Remove successfully processed events from in-flight. Returns how many
    /// were actually removed (already-recovered orphans are not counted).
    fn acknowledge(&self, ids: Vec<Uuid>) -> BoxFuture<'static, QueueResult<u64>>;

    /// Requeue a failed in-flight event: remove the in-flight copy and
    /// reinsert it as pending with `retry_count` incremented, as one atomic
    /// move so the event is never in neither partition.
    fn retry(&self, event: VoteEvent) -> BoxFuture<'static, QueueResult<()>>;

    /// Park a terminally failed event in the dead-letter partition, removing
    /// its in-flight copy.
    fn move_to_dead_letter(
        &self,
        event: VoteEvent,
        error: String,
        attempts: u32,
    ) -> BoxFuture<'static, QueueResult<()>>;

    /// Return in-flight events whose visibility deadline passed without an
    /// acknowledgment to the pending partition. Returns the count recovered.
    fn recover_orphans(&self, now: OffsetDateTime) -> BoxFuture<'static, QueueResult<u64>>;

    /// Snapshot the partition depths.
    fn health(&self) -> BoxFuture<'static, QueueResult<QueueHealth>>;

    /// Record the completion time of a drain cycle.
    fn record_processed(&self, at: OffsetDateTime) -> BoxFuture<'static, QueueResult<()>>;
}
