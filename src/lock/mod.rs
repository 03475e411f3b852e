//! Lease-based distributed lock over the shared lease table.
//!
//! Acquisition is delete-expired-then-insert-unique: expired rows for the
//! job are garbage collected first, then a unique insert on `job_name`
//! decides the race atomically. There is no read-then-write window. A
//! conflict means another instance holds the job and is an expected
//! outcome, not an error. The lease id acts as a fencing token so a
//! late-finishing holder cannot release a newer holder's lease.
//!
//! The TTL must exceed the worst-case duration of the protected operation
//! plus clock skew; when it does not, two holders can briefly overlap, so
//! protected operations carry their own idempotency guard as well.

use std::sync::Arc;

use time::{Duration, OffsetDateTime};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::dao::{models::LeaseEntity, storage::StorageResult, store::TourneyStore};

/// Job name serializing queue drain cycles.
pub const PROCESS_VOTE_QUEUE_JOB: &str = "process_vote_queue";
/// Job name serializing slot advancement.
pub const AUTO_ADVANCE_JOB: &str = "auto-advance";

/// Proof of lock ownership handed back by a successful acquire.
#[derive(Debug, Clone)]
pub struct LeaseGuard {
    /// Job the lease serializes.
    pub job_name: String,
    /// Fencing token for release.
    pub lease_id: Uuid,
    /// When the lease self-expires.
    pub expires_at: OffsetDateTime,
}

/// Lease lock backed by the store's lease table.
#[derive(Clone)]
pub struct LeaseLock {
    store: Arc<dyn TourneyStore>,
}

impl LeaseLock {
    /// Create a lock handle over the given store.
    pub fn new(store: Arc<dyn TourneyStore>) -> Self {
        Self { store }
    }

    /// Try to acquire the lease for `job_name` for `ttl`.
    ///
    /// Returns `Ok(None)` when another instance already holds a live lease.
    pub async fn try_acquire(
        &self,
        job_name: &str,
        ttl: Duration,
    ) -> StorageResult<Option<LeaseGuard>> {
        let now = OffsetDateTime::now_utc();

        let swept = self
            .store
            .delete_expired_leases(job_name.to_owned(), now)
            .await?;
        if swept > 0 {
            warn!(job = job_name, swept, "garbage collected abandoned lease");
        }

        let lease = LeaseEntity {
            job_name: job_name.to_owned(),
            lease_id: Uuid::new_v4(),
            acquired_at: now,
            expires_at: now + ttl,
        };

        if self.store.insert_lease(lease.clone()).await? {
            debug!(job = job_name, lease_id = %lease.lease_id, "lease acquired");
            Ok(Some(LeaseGuard {
                job_name: lease.job_name,
                lease_id: lease.lease_id,
                expires_at: lease.expires_at,
            }))
        } else {
            debug!(job = job_name, "lease held by another instance");
            Ok(None)
        }
    }

    /// Release a held lease. A non-matching fencing token is logged and
    /// ignored: it means the lease expired and was taken over, and the newer
    /// holder's row must stay.
    pub async fn release(&self, guard: &LeaseGuard) -> StorageResult<()> {
        let released = self
            .store
            .delete_lease_if(guard.job_name.clone(), guard.lease_id)
            .await?;
        if released {
            debug!(job = %guard.job_name, lease_id = %guard.lease_id, "lease released");
        } else {
            warn!(
                job = %guard.job_name,
                lease_id = %guard.lease_id,
                "lease already expired or replaced; leaving newer lease in place"
            );
        }
        Ok(())
    }
}
