use crate::board::{Actor, Board, BoardError, Role, User};
use crate::persist::Store;
use crate::session::Session;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, SaltString},
    Argon2, PasswordHasher, PasswordVerifier,
};
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};
use uuid::Uuid;

// ── Shared state ───────────────────────────────────────────────

pub struct AppState {
    pub board: RwLock<Board>,
    pub store: Store,
    pub session: Session,
    pub notify_tx: tokio::sync::broadcast::Sender<String>,
}

pub type SharedState = Arc<AppState>;

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

// ── Request/response types ─────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub login: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub login: String,
    pub display_name: String,
    pub role: Role,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub login: String,
    pub display_name: String,
    pub role: Role,
    pub is_admin: bool,
}

impl From<&User> for UserResponse {
    fn from(u: &User) -> Self {
        UserResponse {
            id: u.id,
            login: u.login.clone(),
            display_name: u.display_name.clone(),
            role: u.role,
            is_admin: u.is_admin,
        }
    }
}

// ── Password helpers ───────────────────────────────────────────

pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)?
        .to_string())
}

fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

// ── Session resolution ─────────────────────────────────────────

/// The caller behind the local session flag, resolved to an Actor once.
/// Lifecycle handlers never re-derive authorization past this point.
pub fn session_actor(state: &AppState) -> Result<Actor, (StatusCode, String)> {
    let id = state
        .session
        .current_user()
        .ok_or((StatusCode::UNAUTHORIZED, "not logged in".to_string()))?;
    let board = state.board.read().unwrap();
    let user = board
        .users
        .get(&id)
        .ok_or((StatusCode::UNAUTHORIZED, "session user unknown".to_string()))?;
    Ok(Actor {
        id: user.id,
        can_manage: user.can_manage(),
    })
}

// ── Handlers ───────────────────────────────────────────────────

pub async fn login(
    State(state): State<SharedState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<UserResponse>, (StatusCode, String)> {
    let now = now_ms();

    let user = {
        let mut board = state.board.write().unwrap();
        let found = board
            .user_by_login(&payload.login)
            .ok_or((StatusCode::UNAUTHORIZED, "Invalid credentials".to_string()))?;

        if !verify_password(&payload.password, &found.password_hash) {
            return Err((StatusCode::UNAUTHORIZED, "Invalid credentials".to_string()));
        }

        let id = found.id;
        let user = board.users.get_mut(&id).ok_or((
            StatusCode::INTERNAL_SERVER_ERROR,
            "user vanished mid-login".to_string(),
        ))?;
        user.online_since_ms = Some(now);
        user.last_active_ms = Some(now);
        user.clone()
    };

    // Optimistic apply is done; a failed write is reconciled by the next poll.
    if let Err(e) = state.store.upsert_user(&user) {
        warn!(error = %e, "failed to persist login stamp");
    }
    if let Err(e) = state.session.set_current_user(Some(user.id)) {
        warn!(error = %e, "failed to write session flag");
    }
    info!(login = %user.login, "user logged in");

    Ok(Json(UserResponse::from(&user)))
}

pub async fn logout(State(state): State<SharedState>) -> impl IntoResponse {
    if let Err(e) = state.session.set_current_user(None) {
        warn!(error = %e, "failed to clear session flag");
    }
    StatusCode::OK
}

pub async fn register(
    State(state): State<SharedState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<Json<UserResponse>, (StatusCode, String)> {
    let password_hash = hash_password(&payload.password)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let user = User {
        id: Uuid::new_v4(),
        login: payload.login,
        display_name: payload.display_name,
        role: payload.role,
        password_hash,
        is_admin: false,
        bio: None,
        profile_comments: Vec::new(),
        online_since_ms: None,
        last_active_ms: None,
    };

    {
        let mut board = state.board.write().unwrap();
        board.register_user(user.clone()).map_err(|e| match e {
            BoardError::LoginTaken => (StatusCode::CONFLICT, e.to_string()),
            other => (StatusCode::BAD_REQUEST, other.to_string()),
        })?;
    }

    if let Err(e) = state.store.upsert_user(&user) {
        warn!(error = %e, "failed to persist new user");
    }
    info!(login = %user.login, "user registered");

    Ok(Json(UserResponse::from(&user)))
}

// ── Tests ──────────────────────────────────────────────────────
