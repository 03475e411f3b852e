//! In-memory reference backend for [`TourneyStore`].
//!
//! Stands in for the relational store in local runs and tests. The unique
//! indexes the application relies on (`(clip_id, voter_key)` on votes,
//! `job_name` on leases) are enforced through the map entry API so inserts
//! stay atomic per key.

use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};
use futures::future::BoxFuture;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::dao::{
    models::{
        ClipEntity, ClipStatus, EliminationReason, LeaseEntity, SeasonEntity, SeasonStatus,
        SlotEntity, SlotStatus, VoteRecordEntity,
    },
    storage::{StorageError, StorageResult},
    store::TourneyStore,
};

#[derive(Default)]
struct Tables {
    leases: DashMap<String, LeaseEntity>,
    votes: DashMap<(Uuid, String), VoteRecordEntity>,
    seasons: DashMap<Uuid, SeasonEntity>,
    slots: DashMap<Uuid, SlotEntity>,
    clips: DashMap<Uuid, ClipEntity>,
}

/// In-memory [`TourneyStore`] implementation.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Tables>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a season row. Used when bootstrapping local runs and tests.
    pub fn put_season(&self, season: SeasonEntity) {
        self.tables.seasons.insert(season.id, season);
    }

    /// Seed a slot row.
    pub fn put_slot(&self, slot: SlotEntity) {
        self.tables.slots.insert(slot.id, slot);
    }

    /// Seed a clip row.
    pub fn put_clip(&self, clip: ClipEntity) {
        self.tables.clips.insert(clip.id, clip);
    }

    /// Number of vote rows currently stored.
    pub fn vote_count(&self) -> usize {
        self.tables.votes.len()
    }

    /// Look up a vote row by its unique key.
    pub fn find_vote(&self, clip_id: Uuid, voter_key: &str) -> Option<VoteRecordEntity> {
        self.tables
            .votes
            .get(&(clip_id, voter_key.to_owned()))
            .map(|row| row.clone())
    }
}

impl TourneyStore for MemoryStore {
    fn delete_expired_leases(
        &self,
        job_name: String,
        now: OffsetDateTime,
    ) -> BoxFuture<'static, StorageResult<u64>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let removed = tables
                .leases
                .remove_if(&job_name, |_, lease| lease.expires_at <= now);
            Ok(u64::from(removed.is_some()))
        })
    }

    fn insert_lease(&self, lease: LeaseEntity) -> BoxFuture<'static, StorageResult<bool>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            match tables.leases.entry(lease.job_name.clone()) {
                Entry::Occupied(_) => Ok(false),
                Entry::Vacant(slot) => {
                    slot.insert(lease);
                    Ok(true)
                }
            }
        })
    }

    fn delete_lease_if(
        &self,
        job_name: String,
        lease_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let removed = tables
                .leases
                .remove_if(&job_name, |_, lease| lease.lease_id == lease_id);
            Ok(removed.is_some())
        })
    }

    fn insert_votes_ignoring_duplicates(
        &self,
        rows: Vec<VoteRecordEntity>,
    ) -> BoxFuture<'static, StorageResult<u64>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let mut inserted = 0;
            for row in rows {
                match tables.votes.entry((row.clip_id, row.voter_key.clone())) {
                    Entry::Occupied(_) => {}
                    Entry::Vacant(slot) => {
                        slot.insert(row);
                        inserted += 1;
                    }
                }
            }
            Ok(inserted)
        })
    }

    fn delete_vote(
        &self,
        clip_id: Uuid,
        voter_key: String,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let tables = self.tables.clone();
        Box::pin(async move { Ok(tables.votes.remove(&(clip_id, voter_key)).is_some()) })
    }

    fn find_active_seasons(
        &self,
        genre: Option<String>,
    ) -> BoxFuture<'static, StorageResult<Vec<SeasonEntity>>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let seasons = tables
                .seasons
                .iter()
                .filter(|entry| entry.status == SeasonStatus::Active)
                .filter(|entry| genre.as_deref().is_none_or(|g| entry.genre == g))
                .map(|entry| entry.clone())
                .collect();
            Ok(seasons)
        })
    }

    fn find_season(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<SeasonEntity>>> {
        let tables = self.tables.clone();
        Box::pin(async move { Ok(tables.seasons.get(&id).map(|entry| entry.clone())) })
    }

    fn set_season_status(
        &self,
        id: Uuid,
        status: SeasonStatus,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            match tables.seasons.get_mut(&id) {
                Some(mut season) => {
                    season.status = status;
                    Ok(())
                }
                None => Err(StorageError::NotFound(format!("season `{id}`"))),
            }
        })
    }

    fn find_voting_slot(
        &self,
        season_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<SlotEntity>>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let slot = tables
                .slots
                .iter()
                .find(|entry| entry.season_id == season_id && entry.status == SlotStatus::Voting)
                .map(|entry| entry.clone());
            Ok(slot)
        })
    }

    fn find_slot(
        &self,
        season_id: Uuid,
        position: u32,
    ) -> BoxFuture<'static, StorageResult<Option<SlotEntity>>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let slot = tables
                .slots
                .iter()
                .find(|entry| entry.season_id == season_id && entry.position == position)
                .map(|entry| entry.clone());
            Ok(slot)
        })
    }

    fn lock_slot_if_voting(
        &self,
        slot_id: Uuid,
        winner_clip_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            // The entry guard keeps the status check and the write atomic,
            // mirroring a conditioned UPDATE.
            let Some(mut slot) = tables.slots.get_mut(&slot_id) else {
                return Ok(false);
            };
            if slot.status != SlotStatus::Voting {
                return Ok(false);
            }
            slot.status = SlotStatus::Locked;
            slot.winner_clip_id = Some(winner_clip_id);
            Ok(true)
        })
    }

    fn open_slot(
        &self,
        slot_id: Uuid,
        status: SlotStatus,
        voting_started_at: Option<OffsetDateTime>,
        voting_ends_at: Option<OffsetDateTime>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            match tables.slots.get_mut(&slot_id) {
                Some(mut slot) => {
                    slot.status = status;
                    slot.voting_started_at = voting_started_at;
                    slot.voting_ends_at = voting_ends_at;
                    Ok(())
                }
                None => Err(StorageError::NotFound(format!("slot `{slot_id}`"))),
            }
        })
    }

    fn find_clip(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<ClipEntity>>> {
        let tables = self.tables.clone();
        Box::pin(async move { Ok(tables.clips.get(&id).map(|entry| entry.clone())) })
    }

    fn list_active_clips(
        &self,
        season_id: Uuid,
        slot_position: u32,
    ) -> BoxFuture<'static, StorageResult<Vec<ClipEntity>>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let clips = tables
                .clips
                .iter()
                .filter(|entry| {
                    entry.season_id == season_id
                        && entry.slot_position == slot_position
                        && entry.status == ClipStatus::Active
                })
                .map(|entry| entry.clone())
                .collect();
            Ok(clips)
        })
    }

    fn count_clips_for_position(
        &self,
        season_id: Uuid,
        slot_position: u32,
    ) -> BoxFuture<'static, StorageResult<u64>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let count = tables
                .clips
                .iter()
                .filter(|entry| {
                    entry.season_id == season_id && entry.slot_position == slot_position
                })
                .count();
            Ok(count as u64)
        })
    }

    fn mark_clip_locked(&self, clip_id: Uuid) -> BoxFuture<'static, StorageResult<()>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            match tables.clips.get_mut(&clip_id) {
                Some(mut clip) => {
                    clip.status = ClipStatus::Locked;
                    Ok(())
                }
                None => Err(StorageError::NotFound(format!("clip `{clip_id}`"))),
            }
        })
    }

    fn eliminate_clips(
        &self,
        clip_ids: Vec<Uuid>,
        reason: EliminationReason,
        at: OffsetDateTime,
    ) -> BoxFuture<'static, StorageResult<u64>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let mut eliminated = 0;
            for clip_id in clip_ids {
                if let Some(mut clip) = tables.clips.get_mut(&clip_id)
                    && clip.status == ClipStatus::Active
                {
                    clip.status = ClipStatus::Eliminated;
                    clip.eliminated_reason = Some(reason);
                    clip.eliminated_at = Some(at);
                    eliminated += 1;
                }
            }
            Ok(eliminated)
        })
    }

    fn eliminate_active_clips_in_season(
        &self,
        season_id: Uuid,
        reason: EliminationReason,
        at: OffsetDateTime,
    ) -> BoxFuture<'static, StorageResult<u64>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let mut eliminated = 0;
            for mut entry in tables.clips.iter_mut() {
                if entry.season_id == season_id && entry.status == ClipStatus::Active {
                    entry.status = ClipStatus::Eliminated;
                    entry.eliminated_reason = Some(reason);
                    entry.eliminated_at = Some(at);
                    eliminated += 1;
                }
            }
            Ok(eliminated)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    fn vote(clip_id: Uuid, voter: &str) -> VoteRecordEntity {
        VoteRecordEntity {
            clip_id,
            voter_key: voter.into(),
            weight: 1,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[tokio::test]
    async fn duplicate_votes_are_ignored() {
        let store = MemoryStore::new();
        let clip = Uuid::new_v4();

        let inserted = store
            .insert_votes_ignoring_duplicates(vec![vote(clip, "a"), vote(clip, "a")])
            .await
            .unwrap();
        assert_eq!(inserted, 1);

        let inserted = store
            .insert_votes_ignoring_duplicates(vec![vote(clip, "a"), vote(clip, "b")])
            .await
            .unwrap();
        assert_eq!(inserted, 1);
        assert_eq!(store.vote_count(), 2);
    }

    #[tokio::test]
    async fn lease_insert_is_unique_per_job() {
        let store = MemoryStore::new();
        let now = OffsetDateTime::now_utc();
        let lease = |id: Uuid| LeaseEntity {
            job_name: "drain".into(),
            lease_id: id,
            acquired_at: now,
            expires_at: now + time::Duration::seconds(30),
        };

        let first = Uuid::new_v4();
        assert!(store.insert_lease(lease(first)).await.unwrap());
        assert!(!store.insert_lease(lease(Uuid::new_v4())).await.unwrap());

        // Wrong fencing token leaves the row in place.
        assert!(
            !store
                .delete_lease_if("drain".into(), Uuid::new_v4())
                .await
                .unwrap()
        );
        assert!(store.delete_lease_if("drain".into(), first).await.unwrap());
    }

    #[tokio::test]
    async fn updates_on_missing_rows_surface_not_found() {
        let store = MemoryStore::new();

        assert!(matches!(
            store.mark_clip_locked(Uuid::new_v4()).await,
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            store
                .open_slot(Uuid::new_v4(), SlotStatus::Voting, None, None)
                .await,
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            store
                .set_season_status(Uuid::new_v4(), SeasonStatus::Finished)
                .await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn conditioned_slot_lock_fires_once() {
        let store = MemoryStore::new();
        let season_id = Uuid::new_v4();
        let slot_id = Uuid::new_v4();
        store.put_slot(SlotEntity {
            id: slot_id,
            season_id,
            position: 1,
            status: SlotStatus::Voting,
            winner_clip_id: None,
            voting_started_at: None,
            voting_ends_at: None,
            voting_duration_hours: 24,
        });

        let winner = Uuid::new_v4();
        assert!(store.lock_slot_if_voting(slot_id, winner).await.unwrap());
        assert!(
            !store
                .lock_slot_if_voting(slot_id, Uuid::new_v4())
                .await
                .unwrap()
        );

        let slot = store.find_slot(season_id, 1).await.unwrap().unwrap();
        assert_eq!(slot.status, SlotStatus::Locked);
        assert_eq!(slot.winner_clip_id, Some(winner));
    }
}
