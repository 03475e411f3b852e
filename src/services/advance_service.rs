//! Tournament slot advancement: close the voting slot, pick the winner,
//! eliminate the losers, and open the next slot or finish the season.
//!
//! The whole operation runs under the `auto-advance` lease, and the slot
//! lock itself is a conditioned update guarded on the slot still being in
//! voting. The conditioned update is the second line of defense: even if
//! two holders overlap after a TTL blowout, only one of them can flip the
//! slot, and the other observes a conflict.

use futures::future::BoxFuture;
use time::OffsetDateTime;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    breaker::CircuitBreaker,
    dao::models::{
        ClipEntity, ClipStatus, EliminationReason, SeasonEntity, SeasonStatus, SlotEntity,
        SlotStatus,
    },
    dao::storage::StorageResult,
    dao::store::TourneyStore,
    dto::{
        jobs::{AdvanceReport, AdvanceRequest, JobSkipped},
        rfc3339,
    },
    error::ServiceError,
    lock::AUTO_ADVANCE_JOB,
    state::SharedState,
};

/// Outcome of one advancement invocation.
#[derive(Debug)]
pub enum AdvanceOutcome {
    /// The voting slot was locked and the season moved forward.
    Completed(AdvanceReport),
    /// The rollout switch is off; nothing was touched.
    Skipped(JobSkipped),
}

/// Advance the target season by one slot.
pub async fn advance(
    state: &SharedState,
    request: AdvanceRequest,
) -> Result<AdvanceOutcome, ServiceError> {
    if !state.config().slot_advance_enabled {
        return Ok(AdvanceOutcome::Skipped(JobSkipped::because(
            "slot advancement disabled",
        )));
    }

    let Some(guard) = state
        .lock()
        .try_acquire(AUTO_ADVANCE_JOB, state.config().lock_ttl())
        .await?
    else {
        return Err(ServiceError::Conflict(
            "another instance is advancing the tournament".into(),
        ));
    };

    let outcome = advance_locked(state, request).await;

    if let Err(err) = state.lock().release(&guard).await {
        warn!(error = %err, "failed to release advancement lease");
    }

    outcome
}

/// Run a store call through the store circuit breaker.
async fn guarded<T>(
    breaker: &CircuitBreaker,
    call: BoxFuture<'static, StorageResult<T>>,
) -> Result<T, ServiceError> {
    breaker.execute(|| call).await.map_err(ServiceError::from)
}

async fn advance_locked(
    state: &SharedState,
    request: AdvanceRequest,
) -> Result<AdvanceOutcome, ServiceError> {
    let store = state.store();
    let breaker = state.store_breaker();
    let season = resolve_season(state, &request).await?;

    let Some(slot) = guarded(breaker, store.find_voting_slot(season.id)).await? else {
        return Err(ServiceError::NotFound(format!(
            "season `{}` has no slot in voting",
            season.id
        )));
    };

    let mut clips = guarded(breaker, store.list_active_clips(season.id, slot.position)).await?;
    if clips.is_empty() {
        return Err(ServiceError::NotFound(format!(
            "slot {} has no active clips to rank",
            slot.position
        )));
    }

    // One deterministic sort decides the whole ranking; resolving ties with
    // follow-up queries would race against concurrent vote writes.
    clips.sort_by(compare_ranking);
    let winner = clips.remove(0);
    let losers = clips;

    if !guarded(breaker, store.lock_slot_if_voting(slot.id, winner.id)).await? {
        // Zero rows affected: another instance advanced this slot first.
        return Err(ServiceError::Conflict(format!(
            "slot {} was already locked by a concurrent advancement",
            slot.position
        )));
    }

    // Everything past the conditioned update is permanent tournament
    // history. Failures here are fatal: the slot is locked but the clip
    // writes may be missing, and an operator has to retry after inspection.
    finish_advancement(state, &season, &slot, winner, losers)
        .await
        .map_err(|err| match err {
            ServiceError::StorageUnavailable(_)
            | ServiceError::CircuitOpen(_)
            | ServiceError::NotFound(_) => {
                error!(
                    slot = slot.position,
                    error = %err,
                    "slot locked but follow-up writes failed; manual retry required"
                );
                ServiceError::Fatal(format!(
                    "slot {} locked but follow-up writes failed: {err}",
                    slot.position
                ))
            }
            other => other,
        })
}

async fn finish_advancement(
    state: &SharedState,
    season: &SeasonEntity,
    slot: &SlotEntity,
    winner: ClipEntity,
    losers: Vec<ClipEntity>,
) -> Result<AdvanceOutcome, ServiceError> {
    let store = state.store();
    let breaker = state.store_breaker();
    let now = OffsetDateTime::now_utc();

    guarded(breaker, store.mark_clip_locked(winner.id)).await?;

    // Verify the winner write landed before recording eliminations; a slot
    // pointing at an unlocked winner would corrupt the bracket.
    let locked = guarded(breaker, store.find_clip(winner.id))
        .await?
        .is_some_and(|clip| clip.status == ClipStatus::Locked);
    if !locked {
        return Err(ServiceError::Fatal(format!(
            "winner clip `{}` did not transition to locked",
            winner.id
        )));
    }

    let loser_ids: Vec<Uuid> = losers.iter().map(|clip| clip.id).collect();
    let mut clips_eliminated = guarded(
        breaker,
        store.eliminate_clips(loser_ids, EliminationReason::Lost, now),
    )
    .await?;

    if slot.position >= season.total_slots {
        guarded(
            breaker,
            store.set_season_status(season.id, SeasonStatus::Finished),
        )
        .await?;
        clips_eliminated += guarded(
            breaker,
            store.eliminate_active_clips_in_season(season.id, EliminationReason::SeasonEnded, now),
        )
        .await?;

        info!(
            season = %season.id,
            slot = slot.position,
            winner = %winner.id,
            clips_eliminated,
            "season finished"
        );
        return Ok(AdvanceOutcome::Completed(AdvanceReport {
            ok: true,
            finished: Some(true),
            current_slot_locked: slot.position,
            winner_clip_id: winner.id,
            next_slot_position: None,
            waiting_for_clips: None,
            clips_eliminated,
            voting_ends_at: None,
        }));
    }

    let next_position = slot.position + 1;
    let Some(next_slot) = guarded(breaker, store.find_slot(season.id, next_position)).await? else {
        return Err(ServiceError::Fatal(format!(
            "season `{}` is missing the slot row for position {next_position}",
            season.id
        )));
    };

    let has_clips = guarded(
        breaker,
        store.count_clips_for_position(season.id, next_position),
    )
    .await?
        > 0;

    let (waiting_for_clips, voting_ends_at) = if has_clips {
        let ends_at = now + state.config().voting_duration();
        guarded(
            breaker,
            store.open_slot(next_slot.id, SlotStatus::Voting, Some(now), Some(ends_at)),
        )
        .await?;
        (None, Some(ends_at))
    } else {
        // No competitors yet: the slot cannot accept votes, so it waits and
        // is promoted to voting when the first clip arrives.
        guarded(
            breaker,
            store.open_slot(next_slot.id, SlotStatus::WaitingForClips, None, None),
        )
        .await?;
        (Some(true), None)
    };

    info!(
        season = %season.id,
        slot = slot.position,
        winner = %winner.id,
        next = next_position,
        waiting = waiting_for_clips.unwrap_or(false),
        clips_eliminated,
        "slot advanced"
    );
    Ok(AdvanceOutcome::Completed(AdvanceReport {
        ok: true,
        finished: None,
        current_slot_locked: slot.position,
        winner_clip_id: winner.id,
        next_slot_position: Some(next_position),
        waiting_for_clips,
        clips_eliminated,
        voting_ends_at: voting_ends_at.map(rfc3339),
    }))
}

/// Promote a waiting-for-clips slot to voting once its first clip exists.
///
/// Called out-of-band by the clip submission path rather than the scheduled
/// advancement.
pub async fn open_waiting_slot(
    state: &SharedState,
    season_id: Uuid,
    position: u32,
) -> Result<OffsetDateTime, ServiceError> {
    let store = state.store();
    let breaker = state.store_breaker();

    let Some(slot) = guarded(breaker, store.find_slot(season_id, position)).await? else {
        return Err(ServiceError::NotFound(format!(
            "slot {position} not found in season `{season_id}`"
        )));
    };
    if slot.status != SlotStatus::WaitingForClips {
        return Err(ServiceError::Conflict(format!(
            "slot {position} is not waiting for clips"
        )));
    }
    if guarded(breaker, store.count_clips_for_position(season_id, position)).await? == 0 {
        return Err(ServiceError::InvalidInput(format!(
            "slot {position} still has no clips"
        )));
    }

    let now = OffsetDateTime::now_utc();
    let ends_at = now + state.config().voting_duration();
    guarded(
        breaker,
        store.open_slot(slot.id, SlotStatus::Voting, Some(now), Some(ends_at)),
    )
    .await?;
    Ok(ends_at)
}

/// Resolve which season this invocation advances.
async fn resolve_season(
    state: &SharedState,
    request: &AdvanceRequest,
) -> Result<SeasonEntity, ServiceError> {
    let store = state.store();
    let breaker = state.store_breaker();

    if let Some(season_id) = request.season_id {
        let Some(season) = guarded(breaker, store.find_season(season_id)).await? else {
            return Err(ServiceError::NotFound(format!(
                "season `{season_id}` not found"
            )));
        };
        if season.status != SeasonStatus::Active {
            return Err(ServiceError::InvalidInput(format!(
                "season `{season_id}` is not active"
            )));
        }
        return Ok(season);
    }

    let mut seasons = guarded(breaker, store.find_active_seasons(request.genre.clone())).await?;
    match seasons.len() {
        0 => Err(ServiceError::NotFound("no active season".into())),
        1 => Ok(seasons.remove(0)),
        // Multiple active tracks and no disambiguation: refuse to guess.
        _ => Err(ServiceError::InvalidInput(
            "multiple seasons are active; pass a season id or genre".into(),
        )),
    }
}

/// Ranking order: weighted score descending, then vote count descending,
/// then earliest submission first.
fn compare_ranking(a: &ClipEntity, b: &ClipEntity) -> std::cmp::Ordering {
    b.weighted_score
        .partial_cmp(&a.weighted_score)
        .unwrap_or(std::cmp::Ordering::Equal)
        .then_with(|| b.vote_count.cmp(&a.vote_count))
        .then_with(|| a.created_at.cmp(&b.created_at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use time::Duration;

    use crate::{
        breaker::BreakerState,
        config::AppConfig,
        dao::{
            memory::MemoryStore,
            models::{LeaseEntity, VoteRecordEntity},
            storage::StorageError,
        },
        queue::memory::MemoryVoteQueue,
        state::AppState,
    };

    struct Fixture {
        state: SharedState,
        store: Arc<MemoryStore>,
        season_id: Uuid,
    }

    fn clip(
        season_id: Uuid,
        position: u32,
        weighted_score: f64,
        vote_count: u64,
        created_at: OffsetDateTime,
    ) -> ClipEntity {
        ClipEntity {
            id: Uuid::new_v4(),
            season_id,
            slot_position: position,
            status: ClipStatus::Active,
            vote_count,
            weighted_score,
            hype_score: 0.0,
            created_at,
            eliminated_reason: None,
            eliminated_at: None,
        }
    }

    fn slot(season_id: Uuid, position: u32, status: SlotStatus) -> SlotEntity {
        SlotEntity {
            id: Uuid::new_v4(),
            season_id,
            position,
            status,
            winner_clip_id: None,
            voting_started_at: None,
            voting_ends_at: None,
            voting_duration_hours: 24,
        }
    }

    /// A season with slot 1 voting and the remaining slots upcoming.
    fn fixture(total_slots: u32) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryVoteQueue::new());
        let season_id = Uuid::new_v4();

        store.put_season(SeasonEntity {
            id: season_id,
            genre: "electronic".into(),
            status: SeasonStatus::Active,
            total_slots,
        });
        store.put_slot(slot(season_id, 1, SlotStatus::Voting));
        for position in 2..=total_slots {
            store.put_slot(slot(season_id, position, SlotStatus::Upcoming));
        }

        let state = AppState::new(store.clone(), queue, AppConfig::default());
        Fixture {
            state,
            store,
            season_id,
        }
    }

    /// Store wrapper that can refuse season reads or report the voting slot
    /// as already taken, for exercising the failure branches. Shares tables
    /// with the wrapped [`MemoryStore`].
    struct StubStore {
        inner: MemoryStore,
        seasons_down: Arc<AtomicBool>,
        slot_taken: Arc<AtomicBool>,
    }

    impl TourneyStore for StubStore {
        fn delete_expired_leases(
            &self,
            job_name: String,
            now: OffsetDateTime,
        ) -> BoxFuture<'static, crate::dao::storage::StorageResult<u64>> {
            self.inner.delete_expired_leases(job_name, now)
        }

        fn insert_lease(
            &self,
            lease: LeaseEntity,
        ) -> BoxFuture<'static, crate::dao::storage::StorageResult<bool>> {
            self.inner.insert_lease(lease)
        }

        fn delete_lease_if(
            &self,
            job_name: String,
            lease_id: Uuid,
        ) -> BoxFuture<'static, crate::dao::storage::StorageResult<bool>> {
            self.inner.delete_lease_if(job_name, lease_id)
        }

        fn insert_votes_ignoring_duplicates(
            &self,
            rows: Vec<VoteRecordEntity>,
        ) -> BoxFuture<'static, crate::dao::storage::StorageResult<u64>> {
            self.inner.insert_votes_ignoring_duplicates(rows)
        }

        fn delete_vote(
            &self,
            clip_id: Uuid,
            voter_key: String,
        ) -> BoxFuture<'static, crate::dao::storage::StorageResult<bool>> {
            self.inner.delete_vote(clip_id, voter_key)
        }

        fn find_active_seasons(
            &self,
            genre: Option<String>,
        ) -> BoxFuture<'static, crate::dao::storage::StorageResult<Vec<SeasonEntity>>> {
            if self.seasons_down.load(Ordering::SeqCst) {
                return Box::pin(async {
                    Err(StorageError::unavailable(
                        "season lookup failed".into(),
                        std::io::Error::other("connection reset"),
                    ))
                });
            }
            self.inner.find_active_seasons(genre)
        }

        fn find_season(
            &self,
            id: Uuid,
        ) -> BoxFuture<'static, crate::dao::storage::StorageResult<Option<SeasonEntity>>> {
            self.inner.find_season(id)
        }

        fn set_season_status(
            &self,
            id: Uuid,
            status: SeasonStatus,
        ) -> BoxFuture<'static, crate::dao::storage::StorageResult<()>> {
            self.inner.set_season_status(id, status)
        }

        fn find_voting_slot(
            &self,
            season_id: Uuid,
        ) -> BoxFuture<'static, crate::dao::storage::StorageResult<Option<SlotEntity>>> {
            self.inner.find_voting_slot(season_id)
        }

        fn find_slot(
            &self,
            season_id: Uuid,
            position: u32,
        ) -> BoxFuture<'static, crate::dao::storage::StorageResult<Option<SlotEntity>>> {
            self.inner.find_slot(season_id, position)
        }

        fn lock_slot_if_voting(
            &self,
            slot_id: Uuid,
            winner_clip_id: Uuid,
        ) -> BoxFuture<'static, crate::dao::storage::StorageResult<bool>> {
            if self.slot_taken.load(Ordering::SeqCst) {
                return Box::pin(async { Ok(false) });
            }
            self.inner.lock_slot_if_voting(slot_id, winner_clip_id)
        }

        fn open_slot(
            &self,
            slot_id: Uuid,
            status: SlotStatus,
            voting_started_at: Option<OffsetDateTime>,
            voting_ends_at: Option<OffsetDateTime>,
        ) -> BoxFuture<'static, crate::dao::storage::StorageResult<()>> {
            self.inner
                .open_slot(slot_id, status, voting_started_at, voting_ends_at)
        }

        fn find_clip(
            &self,
            id: Uuid,
        ) -> BoxFuture<'static, crate::dao::storage::StorageResult<Option<ClipEntity>>> {
            self.inner.find_clip(id)
        }

        fn list_active_clips(
            &self,
            season_id: Uuid,
            slot_position: u32,
        ) -> BoxFuture<'static, crate::dao::storage::StorageResult<Vec<ClipEntity>>> {
            self.inner.list_active_clips(season_id, slot_position)
        }

        fn count_clips_for_position(
            &self,
            season_id: Uuid,
            slot_position: u32,
        ) -> BoxFuture<'static, crate::dao::storage::StorageResult<u64>> {
            self.inner.count_clips_for_position(season_id, slot_position)
        }

        fn mark_clip_locked(
            &self,
            clip_id: Uuid,
        ) -> BoxFuture<'static, crate::dao::storage::StorageResult<()>> {
            self.inner.mark_clip_locked(clip_id)
        }

        fn eliminate_clips(
            &self,
            clip_ids: Vec<Uuid>,
            reason: EliminationReason,
            at: OffsetDateTime,
        ) -> BoxFuture<'static, crate::dao::storage::StorageResult<u64>> {
            self.inner.eliminate_clips(clip_ids, reason, at)
        }

        fn eliminate_active_clips_in_season(
            &self,
            season_id: Uuid,
            reason: EliminationReason,
            at: OffsetDateTime,
        ) -> BoxFuture<'static, crate::dao::storage::StorageResult<u64>> {
            self.inner
                .eliminate_active_clips_in_season(season_id, reason, at)
        }

        fn health_check(&self) -> BoxFuture<'static, crate::dao::storage::StorageResult<()>> {
            self.inner.health_check()
        }
    }

    fn report(outcome: AdvanceOutcome) -> AdvanceReport {
        match outcome {
            AdvanceOutcome::Completed(report) => report,
            other => panic!("expected completed advancement, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn ties_break_by_earliest_submission() {
        let fx = fixture(2);
        let now = OffsetDateTime::now_utc();

        // A and B tie on both scores; A was submitted first. C trails on
        // weighted score despite more votes.
        let a = clip(fx.season_id, 1, 10.0, 5, now - Duration::hours(2));
        let b = clip(fx.season_id, 1, 10.0, 5, now - Duration::hours(1));
        let c = clip(fx.season_id, 1, 9.0, 9, now - Duration::hours(3));
        let a_id = a.id;
        let b_id = b.id;
        fx.store.put_clip(a);
        fx.store.put_clip(b);
        fx.store.put_clip(c);

        let report = report(advance(&fx.state, AdvanceRequest::default()).await.unwrap());
        assert_eq!(report.winner_clip_id, a_id);
        assert_eq!(report.current_slot_locked, 1);
        assert_eq!(report.clips_eliminated, 2);

        let winner = fx.store.find_clip(a_id).await.unwrap().unwrap();
        assert_eq!(winner.status, ClipStatus::Locked);
        let loser = fx.store.find_clip(b_id).await.unwrap().unwrap();
        assert_eq!(loser.status, ClipStatus::Eliminated);
        assert_eq!(loser.eliminated_reason, Some(EliminationReason::Lost));
    }

    #[tokio::test]
    async fn next_slot_with_clips_opens_as_voting() {
        let fx = fixture(3);
        let now = OffsetDateTime::now_utc();
        fx.store.put_clip(clip(fx.season_id, 1, 5.0, 3, now));
        fx.store.put_clip(clip(fx.season_id, 2, 1.0, 0, now));

        let report = report(advance(&fx.state, AdvanceRequest::default()).await.unwrap());
        assert_eq!(report.next_slot_position, Some(2));
        assert!(report.waiting_for_clips.is_none());
        assert!(report.voting_ends_at.is_some());

        let next = fx
            .store
            .find_slot(fx.season_id, 2)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(next.status, SlotStatus::Voting);
        assert!(next.voting_ends_at.is_some());
    }

    #[tokio::test]
    async fn next_slot_without_clips_waits() {
        let fx = fixture(3);
        fx.store
            .put_clip(clip(fx.season_id, 1, 5.0, 3, OffsetDateTime::now_utc()));

        let report = report(advance(&fx.state, AdvanceRequest::default()).await.unwrap());
        assert_eq!(report.next_slot_position, Some(2));
        assert_eq!(report.waiting_for_clips, Some(true));
        assert!(report.voting_ends_at.is_none());

        let next = fx
            .store
            .find_slot(fx.season_id, 2)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(next.status, SlotStatus::WaitingForClips);
        assert!(next.voting_ends_at.is_none());
    }

    #[tokio::test]
    async fn last_slot_finishes_the_season_and_sweeps_active_clips() {
        let fx = fixture(1);
        let now = OffsetDateTime::now_utc();
        fx.store.put_clip(clip(fx.season_id, 1, 5.0, 3, now));
        // A straggler clip for a later position that never opened.
        let straggler = clip(fx.season_id, 4, 0.0, 0, now);
        let straggler_id = straggler.id;
        fx.store.put_clip(straggler);

        let report = report(advance(&fx.state, AdvanceRequest::default()).await.unwrap());
        assert_eq!(report.finished, Some(true));
        assert!(report.next_slot_position.is_none());

        let season = fx
            .store
            .find_season(fx.season_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(season.status, SeasonStatus::Finished);

        let swept = fx.store.find_clip(straggler_id).await.unwrap().unwrap();
        assert_eq!(swept.status, ClipStatus::Eliminated);
        assert_eq!(
            swept.eliminated_reason,
            Some(EliminationReason::SeasonEnded)
        );
    }

    #[tokio::test]
    async fn held_lock_is_reported_as_conflict() {
        let fx = fixture(2);
        fx.store
            .put_clip(clip(fx.season_id, 1, 5.0, 3, OffsetDateTime::now_utc()));

        let guard = fx
            .state
            .lock()
            .try_acquire(AUTO_ADVANCE_JOB, Duration::seconds(30))
            .await
            .unwrap()
            .unwrap();

        let err = advance(&fx.state, AdvanceRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));

        fx.state.lock().release(&guard).await.unwrap();
    }

    #[tokio::test]
    async fn no_voting_slot_is_not_found() {
        let fx = fixture(2);
        fx.store
            .put_clip(clip(fx.season_id, 1, 5.0, 3, OffsetDateTime::now_utc()));

        report(advance(&fx.state, AdvanceRequest::default()).await.unwrap());

        // Slot 2 is waiting for clips, so a second advance finds no voting
        // slot rather than advancing again.
        let err = advance(&fx.state, AdvanceRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn ambiguous_active_seasons_are_rejected() {
        let fx = fixture(2);
        fx.store.put_season(SeasonEntity {
            id: Uuid::new_v4(),
            genre: "hiphop".into(),
            status: SeasonStatus::Active,
            total_slots: 2,
        });
        fx.store
            .put_clip(clip(fx.season_id, 1, 5.0, 3, OffsetDateTime::now_utc()));

        let err = advance(&fx.state, AdvanceRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));

        // Naming the genre disambiguates.
        let request = AdvanceRequest {
            season_id: None,
            genre: Some("electronic".into()),
        };
        report(advance(&fx.state, request).await.unwrap());
    }

    #[tokio::test]
    async fn lost_conditioned_update_is_reported_as_conflict() {
        let mem = MemoryStore::new();
        let season_id = Uuid::new_v4();
        mem.put_season(SeasonEntity {
            id: season_id,
            genre: "electronic".into(),
            status: SeasonStatus::Active,
            total_slots: 2,
        });
        mem.put_slot(slot(season_id, 1, SlotStatus::Voting));
        mem.put_slot(slot(season_id, 2, SlotStatus::Upcoming));
        let contender = clip(season_id, 1, 5.0, 3, OffsetDateTime::now_utc());
        let contender_id = contender.id;
        mem.put_clip(contender);

        // Zero rows from the conditioned update: another instance got there
        // between the ranking read and the lock write.
        let store = Arc::new(StubStore {
            inner: mem.clone(),
            seasons_down: Arc::new(AtomicBool::new(false)),
            slot_taken: Arc::new(AtomicBool::new(true)),
        });
        let state = AppState::new(store, Arc::new(MemoryVoteQueue::new()), AppConfig::default());

        let err = advance(&state, AdvanceRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));

        // Nothing past the guard ran: the would-be winner stays active.
        let untouched = mem.find_clip(contender_id).await.unwrap().unwrap();
        assert_eq!(untouched.status, ClipStatus::Active);

        // The loser of the race released its lease, so a retry can acquire.
        let guard = state
            .lock()
            .try_acquire(AUTO_ADVANCE_JOB, Duration::seconds(30))
            .await
            .unwrap();
        assert!(guard.is_some());
    }

    #[tokio::test]
    async fn repeated_store_failures_open_the_circuit() {
        let store = Arc::new(StubStore {
            inner: MemoryStore::new(),
            seasons_down: Arc::new(AtomicBool::new(true)),
            slot_taken: Arc::new(AtomicBool::new(false)),
        });
        let state = AppState::new(store, Arc::new(MemoryVoteQueue::new()), AppConfig::default());

        // Default breaker threshold is five consecutive failures.
        for _ in 0..5 {
            let err = advance(&state, AdvanceRequest::default())
                .await
                .unwrap_err();
            assert!(matches!(err, ServiceError::StorageUnavailable(_)));
        }
        assert_eq!(state.store_breaker().state(), BreakerState::Open);

        let err = advance(&state, AdvanceRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::CircuitOpen(_)));
    }

    #[tokio::test]
    async fn waiting_slot_promotes_once_a_clip_arrives() {
        let fx = fixture(3);
        fx.store
            .put_clip(clip(fx.season_id, 1, 5.0, 3, OffsetDateTime::now_utc()));
        report(advance(&fx.state, AdvanceRequest::default()).await.unwrap());

        // Still no clips: promotion is refused.
        let err = open_waiting_slot(&fx.state, fx.season_id, 2)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));

        fx.store
            .put_clip(clip(fx.season_id, 2, 0.0, 0, OffsetDateTime::now_utc()));
        open_waiting_slot(&fx.state, fx.season_id, 2).await.unwrap();

        let slot = fx
            .store
            .find_slot(fx.season_id, 2)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(slot.status, SlotStatus::Voting);
    }
}
