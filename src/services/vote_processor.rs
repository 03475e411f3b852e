//! Periodic drain of the vote event queue into the vote table.
//!
//! The drain runs under the `process_vote_queue` lease so only one instance
//! works the queue at a time. Delivery from the queue is at-least-once, so
//! every write here is idempotent: upvotes are duplicate-ignoring inserts
//! keyed on `(clip_id, voter_key)` and downvotes are deletes of that key.
//! Acknowledgment happens only after the store confirmed the mutation.

use futures::future::BoxFuture;
use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    breaker::{BreakerError, CircuitBreaker},
    dao::{models::VoteRecordEntity, store::TourneyStore},
    dto::{
        jobs::{DrainReport, JobSkipped},
        rfc3339,
    },
    error::ServiceError,
    lock::PROCESS_VOTE_QUEUE_JOB,
    queue::{QueueResult, VoteDirection, VoteEvent, VoteQueue},
    state::SharedState,
};

/// Outcome of one drain invocation.
#[derive(Debug)]
pub enum DrainOutcome {
    /// A batch was processed.
    Completed(DrainReport),
    /// The invocation deliberately did nothing.
    Skipped(JobSkipped),
}

/// Run one drain cycle: recover orphans, pop a batch, apply it to the vote
/// table, acknowledge successes, and requeue or dead-letter failures.
pub async fn drain(state: &SharedState) -> Result<DrainOutcome, ServiceError> {
    if !state.config().queue_drain_enabled {
        return Ok(DrainOutcome::Skipped(JobSkipped::because(
            "queue drain disabled",
        )));
    }

    let Some(guard) = state
        .lock()
        .try_acquire(PROCESS_VOTE_QUEUE_JOB, state.config().lock_ttl())
        .await?
    else {
        // Another instance is draining; expected under concurrency.
        return Ok(DrainOutcome::Skipped(JobSkipped::because(
            "lock held by another instance",
        )));
    };

    let outcome = drain_locked(state).await;

    // The lease is released even when the cycle failed; a leaked lease would
    // otherwise stall draining until the TTL expires.
    if let Err(err) = state.lock().release(&guard).await {
        warn!(error = %err, "failed to release drain lease");
    }

    outcome
}

/// Run a queue call through the queue circuit breaker.
async fn guarded<T>(
    breaker: &CircuitBreaker,
    call: BoxFuture<'static, QueueResult<T>>,
) -> Result<T, ServiceError> {
    breaker.execute(|| call).await.map_err(ServiceError::from)
}

async fn drain_locked(state: &SharedState) -> Result<DrainOutcome, ServiceError> {
    let config = state.config();
    let queue = state.queue();
    let breaker = state.queue_breaker();

    let recovered = {
        let queue = queue.clone();
        match breaker
            .execute(move || queue.recover_orphans(OffsetDateTime::now_utc()))
            .await
        {
            Ok(count) => count,
            Err(BreakerError::Open { .. }) => {
                return Ok(DrainOutcome::Skipped(JobSkipped::because(
                    "queue circuit open",
                )));
            }
            Err(BreakerError::Inner(err)) => return Err(err.into()),
        }
    };
    if recovered > 0 {
        info!(recovered, "returned orphaned events to pending");
    }

    let batch = {
        let queue = queue.clone();
        let max = config.queue_batch_size;
        let visibility = config.visibility_timeout();
        match breaker.execute(move || queue.pop_batch(max, visibility)).await {
            Ok(batch) => batch,
            Err(BreakerError::Open { .. }) => {
                return Ok(DrainOutcome::Skipped(JobSkipped::because(
                    "queue circuit open",
                )));
            }
            Err(BreakerError::Inner(err)) => return Err(err.into()),
        }
    };
    if batch.is_empty() {
        return Ok(DrainOutcome::Skipped(JobSkipped::because("queue empty")));
    }

    let (applied, failures) = apply_batch(state, batch).await;
    let processed = applied.len() as u64;
    let failed = failures.len() as u64;

    // Acknowledge only what the store durably confirmed. If the ack itself
    // fails the events stay in flight and orphan recovery redelivers them;
    // the idempotent writes make that safe.
    if let Err(err) = guarded(breaker, queue.acknowledge(applied)).await {
        warn!(error = %err, "failed to acknowledge processed events; they will be redelivered");
    }

    for (event, error) in failures {
        let attempts = event.metadata.retry_count + 1;
        if attempts >= config.max_retries {
            warn!(
                event_id = %event.id,
                attempts,
                error = %error,
                "retry budget exhausted; dead-lettering event"
            );
            guarded(breaker, queue.move_to_dead_letter(event, error, attempts)).await?;
        } else {
            guarded(breaker, queue.retry(event)).await?;
        }
    }

    let checked_at = OffsetDateTime::now_utc();
    guarded(breaker, queue.record_processed(checked_at)).await?;
    let health = guarded(breaker, queue.health()).await?;

    info!(processed, failed, recovered, "drain cycle completed");
    Ok(DrainOutcome::Completed(DrainReport {
        ok: true,
        processed,
        failed,
        recovered,
        health,
        checked_at: rfc3339(checked_at),
    }))
}

/// Apply a popped batch to the vote table. Returns the ids of events whose
/// store mutation succeeded and the events that failed with their errors.
///
/// Failures are isolated at the event boundary so one bad row cannot fail
/// the whole batch.
async fn apply_batch(
    state: &SharedState,
    batch: Vec<VoteEvent>,
) -> (Vec<Uuid>, Vec<(VoteEvent, String)>) {
    let store = state.store();
    let db_batch_size = state.config().db_batch_size;

    let mut applied = Vec::new();
    let mut failures = Vec::new();

    let (upvotes, downvotes): (Vec<_>, Vec<_>) = batch
        .into_iter()
        .partition(|event| event.direction == VoteDirection::Up);

    for chunk in upvotes.chunks(db_batch_size) {
        let rows = chunk.iter().map(vote_row).collect::<Vec<_>>();
        match store.insert_votes_ignoring_duplicates(rows).await {
            Ok(_) => applied.extend(chunk.iter().map(|event| event.id)),
            Err(err) => {
                // Retry the rows individually to isolate the bad one(s).
                warn!(
                    size = chunk.len(),
                    error = %err,
                    "vote sub-batch failed; retrying rows individually"
                );
                for event in chunk {
                    match store
                        .insert_votes_ignoring_duplicates(vec![vote_row(event)])
                        .await
                    {
                        Ok(_) => applied.push(event.id),
                        Err(err) => failures.push((event.clone(), err.to_string())),
                    }
                }
            }
        }
    }

    for event in downvotes {
        match store
            .delete_vote(event.clip_id, event.voter_key.clone())
            .await
        {
            // A missing row just means there was nothing to unvote.
            Ok(_) => applied.push(event.id),
            Err(err) => {
                let message = err.to_string();
                failures.push((event, message));
            }
        }
    }

    (applied, failures)
}

fn vote_row(event: &VoteEvent) -> VoteRecordEntity {
    VoteRecordEntity {
        clip_id: event.clip_id,
        voter_key: event.voter_key.clone(),
        weight: event.weight(),
        created_at: event.timestamp,
    }
}
