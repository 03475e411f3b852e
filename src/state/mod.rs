//! Shared application state wiring the store, queue, lock, and breaker.

use std::sync::Arc;

use tracing::info;

use crate::{
    breaker::{BreakerConfig, CircuitBreaker},
    config::AppConfig,
    dao::store::TourneyStore,
    lock::LeaseLock,
    queue::VoteQueue,
};

/// Shared handle to the application state.
pub type SharedState = Arc<AppState>;

/// Central application state holding the explicit, passed-in dependencies of
/// the job services. No module-level mutable state exists in this crate.
pub struct AppState {
    store: Arc<dyn TourneyStore>,
    queue: Arc<dyn VoteQueue>,
    lock: LeaseLock,
    config: AppConfig,
    queue_breaker: CircuitBreaker,
    store_breaker: CircuitBreaker,
}

impl AppState {
    /// Assemble the state from its backends, wrapped in an [`Arc`] so axum
    /// handlers can clone it cheaply.
    pub fn new(
        store: Arc<dyn TourneyStore>,
        queue: Arc<dyn VoteQueue>,
        config: AppConfig,
    ) -> SharedState {
        let lock = LeaseLock::new(store.clone());
        let queue_breaker = CircuitBreaker::new("vote-queue", BreakerConfig::default())
            .with_observer(|from, to| {
                info!(?from, ?to, breaker = "vote-queue", "circuit state changed");
            });
        let store_breaker = CircuitBreaker::new("tourney-store", BreakerConfig::default())
            .with_observer(|from, to| {
                info!(?from, ?to, breaker = "tourney-store", "circuit state changed");
            });

        Arc::new(Self {
            store,
            queue,
            lock,
            config,
            queue_breaker,
            store_breaker,
        })
    }

    /// Handle to the table store.
    pub fn store(&self) -> Arc<dyn TourneyStore> {
        self.store.clone()
    }

    /// Handle to the vote event queue.
    pub fn queue(&self) -> Arc<dyn VoteQueue> {
        self.queue.clone()
    }

    /// The lease lock over the store's lease table.
    pub fn lock(&self) -> &LeaseLock {
        &self.lock
    }

    /// Runtime configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Circuit breaker guarding the queue backend.
    pub fn queue_breaker(&self) -> &CircuitBreaker {
        &self.queue_breaker
    }

    /// Circuit breaker guarding the table store.
    pub fn store_breaker(&self) -> &CircuitBreaker {
        &self.store_breaker
    }
}
