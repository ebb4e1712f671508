mod api;
mod auth;
mod board;
mod persist;
mod report;
mod session;
mod sync;
mod wire;

use auth::{AppState, SharedState};
use axum::{
    routing::{get, post},
    Router,
};
use board::Board;
use session::Session;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Runtime knobs, environment-driven with sane defaults.
struct Config {
    bind: SocketAddr,
    store_path: String,
    session_path: String,
    poll_ms: u64,
}

impl Config {
    fn from_env() -> Self {
        let bind = std::env::var("SKUBOARD_BIND")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));
        let store_path =
            std::env::var("SKUBOARD_STORE").unwrap_or_else(|_| "board.redb".to_string());
        let session_path =
            std::env::var("SKUBOARD_SESSION").unwrap_or_else(|_| "session".to_string());
        let poll_ms = std::env::var("SKUBOARD_POLL_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1000);
        Config {
            bind,
            store_path,
            session_path,
            poll_ms,
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();

    // ── Boot the board ─────────────────────────────────────────
    let store = persist::Store::open(&config.store_path).expect("failed to open store");

    if let Some(admin) = store
        .ensure_default_admin()
        .expect("failed to seed default admin")
    {
        info!(login = %admin.login, "created default admin account (admin / admin)");
    }

    // The initial load is the one read that must succeed; there is no stale
    // state to degrade to yet.
    let mut board = Board::new();
    board.replace_users(store.list_users().expect("failed to load users"));
    board.replace_tasks(store.list_tasks().expect("failed to load tasks"));
    info!(
        users = board.users.len(),
        tasks = board.tasks.len(),
        active = board.active_task_count(),
        "board loaded"
    );

    // ── Shared state ───────────────────────────────────────────
    let (notify_tx, _) = broadcast::channel::<String>(256);
    let state: SharedState = Arc::new(AppState {
        board: RwLock::new(board),
        store,
        session: Session::at(&config.session_path),
        notify_tx,
    });

    // ── Polling synchronizer ───────────────────────────────────
    tokio::spawn(sync::run(
        state.clone(),
        sync::SyncOptions {
            period: Duration::from_millis(config.poll_ms),
            ..Default::default()
        },
    ));

    // ── Router ─────────────────────────────────────────────────
    let app = Router::new()
        // Auth + local session flag
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/register", post(auth::register))
        // Board snapshot (polled) and lifecycle commands
        .route("/api/board", get(api::board_snapshot))
        .route("/api/command", post(api::command))
        // Profiles and admin
        .route("/api/profile", post(api::update_profile))
        .route("/api/profile/comment", post(api::add_profile_comment))
        .route("/api/admin/ban", post(api::ban_user))
        // Reports
        .route("/api/report/days", get(api::report_days))
        .route("/api/report/registry", get(api::report_registry))
        .route("/api/report/registry.csv", get(api::report_registry_csv))
        .route("/api/report/user.txt", get(api::report_user_text))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // ── Start ──────────────────────────────────────────────────
    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .expect("failed to bind");
    info!(addr = %config.bind, "skuboard server running");

    axum::serve(listener, app).await.expect("server error");
}
