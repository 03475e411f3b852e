//! Abstraction over the transactional table store backing the tournament.

use futures::future::BoxFuture;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::dao::{
    models::{
        ClipEntity, EliminationReason, LeaseEntity, SeasonEntity, SeasonStatus, SlotEntity,
        SlotStatus, VoteRecordEntity,
    },
    storage::StorageResult,
};

/// Abstraction over the persistence layer for seasons, slots, clips, votes,
/// and the lease table.
///
/// The store is trusted to enforce two constraints the application relies on:
/// the unique index on `(clip_id, voter_key)` in the vote table and the
/// unique index on `job_name` in the lease table.
pub trait TourneyStore: Send + Sync {
    // Lease table.

    /// Delete any lease rows for `job_name` whose expiry has passed.
    /// Returns the number of rows removed.
    fn delete_expired_leases(
        &self,
        job_name: String,
        now: OffsetDateTime,
    ) -> BoxFuture<'static, StorageResult<u64>>;

    /// Insert a lease row, unique on `job_name`. Returns `false` when a row
    /// already exists (another holder won the race), `true` on success.
    fn insert_lease(&self, lease: LeaseEntity) -> BoxFuture<'static, StorageResult<bool>>;

    /// Delete the lease for `job_name` only if its fencing token matches.
    /// Returns `false` when the token did not match a current row.
    fn delete_lease_if(
        &self,
        job_name: String,
        lease_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<bool>>;

    // Vote table.

    /// Insert vote rows, silently skipping any that collide with an existing
    /// `(clip_id, voter_key)` pair. Returns the number actually inserted.
    fn insert_votes_ignoring_duplicates(
        &self,
        rows: Vec<VoteRecordEntity>,
    ) -> BoxFuture<'static, StorageResult<u64>>;

    /// Delete the vote row for `(clip_id, voter_key)` (an unvote). Returns
    /// `false` when no such row existed.
    fn delete_vote(
        &self,
        clip_id: Uuid,
        voter_key: String,
    ) -> BoxFuture<'static, StorageResult<bool>>;

    // Seasons and slots.

    /// List seasons with `Active` status, optionally restricted to a genre.
    fn find_active_seasons(
        &self,
        genre: Option<String>,
    ) -> BoxFuture<'static, StorageResult<Vec<SeasonEntity>>>;

    /// Fetch a season by id.
    fn find_season(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<SeasonEntity>>>;

    /// Update a season's status.
    fn set_season_status(
        &self,
        id: Uuid,
        status: SeasonStatus,
    ) -> BoxFuture<'static, StorageResult<()>>;

    /// Find the single slot in a season with `Voting` status, if any.
    fn find_voting_slot(
        &self,
        season_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<SlotEntity>>>;

    /// Fetch a slot by season and position.
    fn find_slot(
        &self,
        season_id: Uuid,
        position: u32,
    ) -> BoxFuture<'static, StorageResult<Option<SlotEntity>>>;

    /// Conditionally lock a slot: set status to `Locked` and record the
    /// winner in a single update guarded by `status == Voting`. Returns
    /// `false` when the guard failed (another instance advanced first).
    fn lock_slot_if_voting(
        &self,
        slot_id: Uuid,
        winner_clip_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<bool>>;

    /// Transition a slot to a new status, setting or clearing its voting
    /// window fields.
    fn open_slot(
        &self,
        slot_id: Uuid,
        status: SlotStatus,
        voting_started_at: Option<OffsetDateTime>,
        voting_ends_at: Option<OffsetDateTime>,
    ) -> BoxFuture<'static, StorageResult<()>>;

    // Clips.

    /// Fetch a clip by id.
    fn find_clip(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<ClipEntity>>>;

    /// List `Active` clips competing in the given slot position of a season.
    /// Ordering is left to the caller.
    fn list_active_clips(
        &self,
        season_id: Uuid,
        slot_position: u32,
    ) -> BoxFuture<'static, StorageResult<Vec<ClipEntity>>>;

    /// Count clips of any status submitted for the given slot position.
    fn count_clips_for_position(
        &self,
        season_id: Uuid,
        slot_position: u32,
    ) -> BoxFuture<'static, StorageResult<u64>>;

    /// Mark a clip as the locked winner of its slot.
    fn mark_clip_locked(&self, clip_id: Uuid) -> BoxFuture<'static, StorageResult<()>>;

    /// Eliminate the given clips with a reason and timestamp. Returns the
    /// number of clips transitioned.
    fn eliminate_clips(
        &self,
        clip_ids: Vec<Uuid>,
        reason: EliminationReason,
        at: OffsetDateTime,
    ) -> BoxFuture<'static, StorageResult<u64>>;

    /// Eliminate every remaining `Active` clip in a season. Returns the
    /// number of clips transitioned.
    fn eliminate_active_clips_in_season(
        &self,
        season_id: Uuid,
        reason: EliminationReason,
        at: OffsetDateTime,
    ) -> BoxFuture<'static, StorageResult<u64>>;

    /// Cheap reachability probe used by the health endpoint.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
}
