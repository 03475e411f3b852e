//! Persisted entities for seasons, slots, clips, votes, and leases.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;
use uuid::Uuid;

/// Lifecycle of a season.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SeasonStatus {
    /// Season is being set up and is not yet accepting clips or votes.
    Draft,
    /// Season is running; exactly one of its slots can be voting at a time.
    Active,
    /// Season completed; its last slot is locked.
    Finished,
}

/// Lifecycle of a slot within a season.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    /// Slot has not been reached yet.
    Upcoming,
    /// Slot is open but has no competing clips, so it cannot accept votes.
    WaitingForClips,
    /// Slot is accepting votes for its clips.
    Voting,
    /// Slot is closed with a winner recorded. Terminal.
    Locked,
}

/// Lifecycle of a clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ClipStatus {
    /// Submitted but not yet admitted into its slot.
    Pending,
    /// Competing in its slot.
    Active,
    /// Won its slot. Terminal.
    Locked,
    /// Lost its slot or its season ended. Terminal.
    Eliminated,
    /// Rejected by moderation. Terminal.
    Rejected,
}

/// Why a clip was eliminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EliminationReason {
    /// Another clip won the slot.
    Lost,
    /// The season finished while the clip was still active.
    SeasonEnded,
}

/// A tournament season: an ordered sequence of slots on one genre track.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeasonEntity {
    /// Unique season identifier.
    pub id: Uuid,
    /// Genre track this season belongs to.
    pub genre: String,
    /// Current season status.
    pub status: SeasonStatus,
    /// Number of slots the season runs before finishing.
    pub total_slots: u32,
}

/// One sequential round of a season.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotEntity {
    /// Unique slot identifier.
    pub id: Uuid,
    /// Season this slot belongs to.
    pub season_id: Uuid,
    /// 1-based position within the season.
    pub position: u32,
    /// Current slot status.
    pub status: SlotStatus,
    /// Winning clip, set exactly once when the slot locks.
    pub winner_clip_id: Option<Uuid>,
    /// When voting opened for this slot.
    pub voting_started_at: Option<OffsetDateTime>,
    /// When the voting window closes.
    pub voting_ends_at: Option<OffsetDateTime>,
    /// Length of the voting window in hours.
    pub voting_duration_hours: u32,
}

/// A submitted clip competing in one slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipEntity {
    /// Unique clip identifier.
    pub id: Uuid,
    /// Season the clip was submitted to.
    pub season_id: Uuid,
    /// Slot position the clip competes in.
    pub slot_position: u32,
    /// Current clip status.
    pub status: ClipStatus,
    /// Raw number of votes received.
    pub vote_count: u64,
    /// Vote aggregate with per-vote weights applied.
    pub weighted_score: f64,
    /// Engagement score tracked alongside votes.
    pub hype_score: f64,
    /// Submission time, used as the final ranking tie-break.
    pub created_at: OffsetDateTime,
    /// Why the clip was eliminated, if it was.
    pub eliminated_reason: Option<EliminationReason>,
    /// When the clip was eliminated, if it was.
    pub eliminated_at: Option<OffsetDateTime>,
}

/// A durable vote row, unique on `(clip_id, voter_key)`.
///
/// The uniqueness constraint is the idempotency anchor that makes
/// at-least-once queue delivery safe: replaying an already-stored pair
/// inserts nothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteRecordEntity {
    /// Clip the vote applies to.
    pub clip_id: Uuid,
    /// Opaque key identifying the voter.
    pub voter_key: String,
    /// Vote weight, defaulting to 1.
    pub weight: u32,
    /// When the vote row was written.
    pub created_at: OffsetDateTime,
}

/// A lease row backing the distributed lock, unique on `job_name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseEntity {
    /// Logical job the lease serializes (e.g. `process_vote_queue`).
    pub job_name: String,
    /// Fencing token proving which holder may release the lease.
    pub lease_id: Uuid,
    /// When the lease was acquired.
    pub acquired_at: OffsetDateTime,
    /// When the lease self-expires and may be garbage collected.
    pub expires_at: OffsetDateTime,
}
