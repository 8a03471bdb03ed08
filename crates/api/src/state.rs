use std::sync::Arc;

use crate::config::AppConfig;
use crate::engine::queue::RunQueue;
use crate::engine::scheduler::SchedulerHandle;
use crate::ws::WsManager;
use tempo_events::EventBus;

/// Shared application state available to all Axum handlers via
/// `State<AppState>`. Cheaply cloneable: everything is behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: tempo_db::DbPool,
    /// Server configuration.
    pub config: Arc<AppConfig>,
    /// WebSocket connection manager.
    pub ws_manager: Arc<WsManager>,
    /// Centralized event bus.
    pub event_bus: Arc<EventBus>,
    /// Bounded run queue feeding the worker pool.
    pub run_queue: RunQueue,
    /// Command channel into the trigger scheduler.
    pub scheduler: SchedulerHandle,
}
