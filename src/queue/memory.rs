//! In-memory [`VoteQueue`] backend.
//!
//! All three partitions live behind one mutex so every operation that moves
//! an event between partitions is a single critical section. That is what
//! upholds the exactly-one-partition invariant, including the atomic
//! requeue performed by [`VoteQueue::retry`].

use std::sync::Arc;

use futures::future::BoxFuture;
use indexmap::IndexMap;
use time::{Duration, OffsetDateTime};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::queue::{
    DeadLetterEvent, QueueHealth, QueueResult, VoteEvent, VoteQueue,
};

struct InFlightEvent {
    event: VoteEvent,
    visibility_deadline: OffsetDateTime,
}

#[derive(Default)]
struct Partitions {
    pending: IndexMap<Uuid, VoteEvent>,
    in_flight: IndexMap<Uuid, InFlightEvent>,
    dead_letter: IndexMap<Uuid, DeadLetterEvent>,
    last_processed_at: Option<OffsetDateTime>,
}

/// In-memory vote event queue.
#[derive(Clone, Default)]
pub struct MemoryVoteQueue {
    partitions: Arc<Mutex<Partitions>>,
}

impl MemoryVoteQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a parked dead-letter entry by event id.
    pub async fn dead_letter_entry(&self, id: Uuid) -> Option<DeadLetterEvent> {
        let partitions = self.partitions.lock().await;
        partitions.dead_letter.get(&id).cloned()
    }
}

impl VoteQueue for MemoryVoteQueue {
    fn push(&self, event: VoteEvent) -> BoxFuture<'static, QueueResult<()>> {
        let partitions = self.partitions.clone();
        Box::pin(async move {
            let mut partitions = partitions.lock().await;
            partitions.pending.insert(event.id, event);
            Ok(())
        })
    }

    fn pop_batch(
        &self,
        max: usize,
        visibility: Duration,
    ) -> BoxFuture<'static, QueueResult<Vec<VoteEvent>>> {
        let partitions = self.partitions.clone();
        Box::pin(async move {
            let mut partitions = partitions.lock().await;
            let deadline = OffsetDateTime::now_utc() + visibility;

            let mut batch = Vec::new();
            while batch.len() < max {
                let Some((id, event)) = partitions.pending.shift_remove_index(0) else {
                    break;
                };
                partitions.in_flight.insert(
                    id,
                    InFlightEvent {
                        event: event.clone(),
                        visibility_deadline: deadline,
                    },
                );
                batch.push(event);
            }
            Ok(batch)
        })
    }

    fn acknowledge(&self, ids: Vec<Uuid>) -> BoxFuture<'static, QueueResult<u64>> {
        let partitions = self.partitions.clone();
        Box::pin(async move {
            let mut partitions = partitions.lock().await;
            let mut removed = 0;
            for id in ids {
                if partitions.in_flight.shift_remove(&id).is_some() {
                    removed += 1;
                }
            }
            Ok(removed)
        })
    }

    fn retry(&self, mut event: VoteEvent) -> BoxFuture<'static, QueueResult<()>> {
        let partitions = self.partitions.clone();
        Box::pin(async move {
            let mut partitions = partitions.lock().await;
            partitions.in_flight.shift_remove(&event.id);
            event.metadata.retry_count += 1;
            partitions.pending.insert(event.id, event);
            Ok(())
        })
    }

    fn move_to_dead_letter(
        &self,
        event: VoteEvent,
        error: String,
        attempts: u32,
    ) -> BoxFuture<'static, QueueResult<()>> {
        let partitions = self.partitions.clone();
        Box::pin(async move {
            let mut partitions = partitions.lock().await;
            partitions.in_flight.shift_remove(&event.id);
            partitions.pending.shift_remove(&event.id);
            partitions.dead_letter.insert(
                event.id,
                DeadLetterEvent {
                    event,
                    last_error: error,
                    attempts,
                    dead_lettered_at: OffsetDateTime::now_utc(),
                },
            );
            Ok(())
        })
    }

    fn recover_orphans(&self, now: OffsetDateTime) -> BoxFuture<'static, QueueResult<u64>> {
        let partitions = self.partitions.clone();
        Box::pin(async move {
            let mut partitions = partitions.lock().await;
            let expired: Vec<Uuid> = partitions
                .in_flight
                .iter()
                .filter(|(_, entry)| entry.visibility_deadline <= now)
                .map(|(id, _)| *id)
                .collect();

            let mut recovered = 0;
            for id in expired {
                if let Some(entry) = partitions.in_flight.shift_remove(&id) {
                    partitions.pending.insert(id, entry.event);
                    recovered += 1;
                }
            }
            Ok(recovered)
        })
    }

    fn health(&self) -> BoxFuture<'static, QueueResult<QueueHealth>> {
        let partitions = self.partitions.clone();
        Box::pin(async move {
            let partitions = partitions.lock().await;
            let last_processed_at = partitions.last_processed_at.and_then(|at| {
                at.format(&time::format_description::well_known::Rfc3339).ok()
            });
            Ok(QueueHealth {
                pending_depth: partitions.pending.len() as u64,
                in_flight_depth: partitions.in_flight.len() as u64,
                dead_letter_depth: partitions.dead_letter.len() as u64,
                last_processed_at,
            })
        })
    }

    fn record_processed(&self, at: OffsetDateTime) -> BoxFuture<'static, QueueResult<()>> {
        let partitions = self.partitions.clone();
        Box::pin(async move {
            let mut partitions = partitions.lock().await;
            partitions.last_processed_at = Some(at);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{VoteDirection, VoteEventMetadata};

    fn event(clip_id: Uuid, voter: &str) -> VoteEvent {
        VoteEvent {
            id: Uuid::new_v4(),
            vote_id: Uuid::new_v4(),
            clip_id,
            voter_key: voter.into(),
            direction: VoteDirection::Up,
            timestamp: OffsetDateTime::now_utc(),
            metadata: VoteEventMetadata::default(),
        }
    }

    #[tokio::test]
    async fn pop_moves_events_to_in_flight() {
        let queue = MemoryVoteQueue::new();
        let clip = Uuid::new_v4();
        for voter in ["a", "b", "c"] {
            queue.push(event(clip, voter)).await.unwrap();
        }

        let batch = queue.pop_batch(2, Duration::seconds(60)).await.unwrap();
        assert_eq!(batch.len(), 2);

        let health = queue.health().await.unwrap();
        assert_eq!(health.pending_depth, 1);
        assert_eq!(health.in_flight_depth, 2);

        let acked = queue
            .acknowledge(batch.iter().map(|e| e.id).collect())
            .await
            .unwrap();
        assert_eq!(acked, 2);
        assert_eq!(queue.health().await.unwrap().in_flight_depth, 0);
    }

    #[tokio::test]
    async fn orphans_return_to_pending_after_deadline() {
        let queue = MemoryVoteQueue::new();
        queue.push(event(Uuid::new_v4(), "a")).await.unwrap();

        let batch = queue.pop_batch(10, Duration::seconds(5)).await.unwrap();
        assert_eq!(batch.len(), 1);

        // Before the deadline nothing is recovered.
        let recovered = queue
            .recover_orphans(OffsetDateTime::now_utc())
            .await
            .unwrap();
        assert_eq!(recovered, 0);

        let later = OffsetDateTime::now_utc() + Duration::seconds(10);
        let recovered = queue.recover_orphans(later).await.unwrap();
        assert_eq!(recovered, 1);

        let health = queue.health().await.unwrap();
        assert_eq!(health.pending_depth, 1);
        assert_eq!(health.in_flight_depth, 0);
    }

    #[tokio::test]
    async fn retry_is_a_single_move_with_incremented_count() {
        let queue = MemoryVoteQueue::new();
        queue.push(event(Uuid::new_v4(), "a")).await.unwrap();

        let batch = queue.pop_batch(1, Duration::seconds(60)).await.unwrap();
        let popped = batch.into_iter().next().unwrap();
        queue.retry(popped.clone()).await.unwrap();

        let health = queue.health().await.unwrap();
        assert_eq!(health.pending_depth, 1);
        assert_eq!(health.in_flight_depth, 0);

        let again = queue
            .pop_batch(1, Duration::seconds(60))
            .await
            .unwrap()
            .into_iter()
            .next()
            .unwrap();
        assert_eq!(again.id, popped.id);
        assert_eq!(again.metadata.retry_count, 1);
    }

    #[tokio::test]
    async fn dead_letter_is_terminal_and_exclusive() {
        let queue = MemoryVoteQueue::new();
        let ev = event(Uuid::new_v4(), "a");
        let id = ev.id;
        queue.push(ev).await.unwrap();

        let popped = queue
            .pop_batch(1, Duration::seconds(60))
            .await
            .unwrap()
            .into_iter()
            .next()
            .unwrap();
        queue
            .move_to_dead_letter(popped, "store rejected row".into(), 3)
            .await
            .unwrap();

        let health = queue.health().await.unwrap();
        assert_eq!(health.pending_depth, 0);
        assert_eq!(health.in_flight_depth, 0);
        assert_eq!(health.dead_letter_depth, 1);

        let parked = queue.dead_letter_entry(id).await.unwrap();
        assert_eq!(parked.attempts, 3);
        assert_eq!(parked.last_error, "store rejected row");
    }
}
