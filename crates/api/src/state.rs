//! Shared application state for the Axum API server.

use std::sync::Arc;

use herald_common::config::AppConfig;
use herald_engine::commands::CommandHandler;
use herald_engine::dispatcher::AlertDispatcher;
use herald_engine::rooms::RoomTracker;
use herald_engine::store::ProjectStore;
use herald_notifier::{DeliveryQueue, WorkerStats};

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ProjectStore>,
    pub tracker: RoomTracker,
    pub queue: DeliveryQueue,
    pub dispatcher: AlertDispatcher,
    pub commands: CommandHandler,
    pub worker_stats: Arc<WorkerStats>,
    pub config: AppConfig,
}

impl AppState {
    /// Wire the engine around `store` and `queue`.
    ///
    /// `worker_stats` comes from the delivery worker draining `queue`.
    pub fn new(
        store: Arc<ProjectStore>,
        queue: DeliveryQueue,
        worker_stats: Arc<WorkerStats>,
        config: AppConfig,
    ) -> Self {
        let tracker = RoomTracker::new(Arc::clone(&store));
        let dispatcher = AlertDispatcher::new(Arc::clone(&store), tracker.clone(), queue.clone());
        let commands = CommandHandler::new(
            Arc::clone(&store),
            tracker.clone(),
            config.admin_users.clone(),
        );

        Self {
            store,
            tracker,
            queue,
            dispatcher,
            commands,
            worker_stats,
            config,
        }
    }
}
