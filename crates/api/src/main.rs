use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderName, Method};
use axum::routing::get;
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tempo_api::config::AppConfig;
use tempo_api::engine::queue::RunQueue;
use tempo_api::engine::runner::RunContext;
use tempo_api::engine::scheduler::TriggerScheduler;
use tempo_api::engine::{reconcile_abandoned_runs, worker};
use tempo_api::state::AppState;
use tempo_api::{background, routes, ws};
use tempo_events::{EmailConfig, EmailDelivery, EventBus};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tempo_api=debug,tempo_core=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = Arc::new(AppConfig::from_env());
    tracing::info!(
        host = %config.host,
        port = config.port,
        data_path = %config.data_path.display(),
        "Loaded server configuration"
    );

    // --- Database ---
    let pool = tempo_db::create_pool(&config.database_path())
        .await
        .expect("Failed to open catalog database");
    tracing::info!("Database pool created");

    tempo_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    background::seed::seed(&pool, &config)
        .await
        .expect("Failed to seed admin user and settings");

    // --- Orphan reconciliation ---
    // Must finish before workers start so a stale `running` record from
    // an unclean shutdown can never block new runs.
    reconcile_abandoned_runs(&pool)
        .await
        .expect("Failed to reconcile abandoned runs");

    // --- Event bus ---
    let event_bus = Arc::new(EventBus::default());

    // --- Email (optional) ---
    let mailer = EmailConfig::from_env().map(|cfg| {
        tracing::info!(host = %cfg.smtp_host, "SMTP delivery configured");
        Arc::new(EmailDelivery::new(cfg))
    });

    // --- WebSocket manager + heartbeat ---
    let ws_manager = Arc::new(ws::WsManager::new());
    let heartbeat_handle = ws::start_heartbeat(Arc::clone(&ws_manager));

    // --- Run queue + worker pool ---
    let (run_queue, queue_rx) = RunQueue::new(config.run_queue_capacity);
    let run_ctx = RunContext {
        pool: pool.clone(),
        config: Arc::clone(&config),
        bus: Arc::clone(&event_bus),
        mailer,
    };
    let workers_cancel = tokio_util::sync::CancellationToken::new();
    let worker_handles = worker::spawn_pool(
        config.worker_count,
        queue_rx,
        run_ctx,
        workers_cancel.clone(),
    );
    tracing::info!(
        workers = config.worker_count,
        queue_capacity = config.run_queue_capacity,
        "Worker pool started"
    );

    // --- Trigger scheduler ---
    let (scheduler, scheduler_handle) =
        TriggerScheduler::new(pool.clone(), run_queue.clone(), Arc::clone(&event_bus));
    let scheduler_cancel = tokio_util::sync::CancellationToken::new();
    let scheduler_task = tokio::spawn(scheduler.run(scheduler_cancel.clone()));

    // --- Log retention ---
    let retention_cancel = tokio_util::sync::CancellationToken::new();
    let retention_task = tokio::spawn(background::retention::run(
        pool.clone(),
        retention_cancel.clone(),
    ));

    // --- App state ---
    let state = AppState {
        pool,
        config: Arc::clone(&config),
        ws_manager: Arc::clone(&ws_manager),
        event_bus: Arc::clone(&event_bus),
        run_queue,
        scheduler: scheduler_handle,
    };

    // --- CORS ---
    let cors = build_cors_layer(&config);

    // --- Request ID header name ---
    let request_id_header = HeaderName::from_static("x-request-id");

    // --- Router ---
    let app = Router::new()
        .nest("/api", routes::api_routes())
        .route("/ws", get(ws::ws_handler))
        // -- Middleware stack (applied bottom-up) --
        .layer(CatchPanicLayer::new())
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.request_timeout_secs,
        )))
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
        .layer(cors)
        .with_state(state);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    // Stop arming new timers before draining workers.
    scheduler_cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), scheduler_task).await;
    tracing::info!("Trigger scheduler stopped");

    retention_cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), retention_task).await;

    // Workers finish (or time out) their current runs.
    workers_cancel.cancel();
    for handle in worker_handles {
        let _ = tokio::time::timeout(Duration::from_secs(30), handle).await;
    }
    tracing::info!("Worker pool drained");

    let ws_count = ws_manager.connection_count().await;
    tracing::info!(ws_count, "Closing remaining WebSocket connections");
    ws_manager.shutdown_all().await;

    heartbeat_handle.abort();
    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server
/// shuts down cleanly whether stopped interactively or by a process
/// supervisor.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}

/// Build the CORS middleware layer from server configuration.
///
/// Panics at startup if any configured origin is invalid; we want
/// misconfiguration to fail fast.
fn build_cors_layer(config: &AppConfig) -> CorsLayer {
    let origins: Vec<_> = config
        .cors_origins
        .iter()
        .map(|o| {
            o.parse()
                .unwrap_or_else(|e| panic!("Invalid CORS origin '{o}': {e}"))
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::PATCH,
        ])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_credentials(true)
        .max_age(Duration::from_secs(3600))
}
