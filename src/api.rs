//! HTTP handlers for the board and the reports.
//!
//! The command path is: lock, apply, persist with a logged (not surfaced)
//! failure, broadcast. The in-memory board is updated before the store write
//! is even attempted (optimistic local apply); the polling synchronizer
//! re-converges on the store's copy afterwards.

use crate::auth::{now_ms, session_actor, SharedState};
use crate::board::{BoardError, Command, Event, Task, User};
use crate::report::{self, DateRange, ReportTarget};
use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

// ── Snapshot ───────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct TaskView {
    #[serde(flatten)]
    pub task: Task,
    /// Cached total clamped to the quantity: what a progress bar shows.
    pub completed_display: u32,
    /// Stored seconds plus the open tracking interval, recomputed per read.
    pub time_spent_display_seconds: i64,
}

#[derive(Debug, Serialize)]
pub struct RosterEntry {
    #[serde(flatten)]
    pub user: User,
    pub online: bool,
    pub presence: String,
}

#[derive(Debug, Serialize)]
pub struct BoardSnapshot {
    pub revision: u64,
    pub active_tasks: usize,
    pub users: Vec<RosterEntry>,
    pub tasks: Vec<TaskView>,
}

/// Full board snapshot for the polling clients.
pub async fn board_snapshot(State(state): State<SharedState>) -> Json<BoardSnapshot> {
    let now = now_ms();
    let board = state.board.read().unwrap();

    let tasks = board
        .tasks
        .values()
        .map(|t| TaskView {
            completed_display: t.display_completed_sku(),
            time_spent_display_seconds: t.effective_time_spent(now),
            task: t.clone(),
        })
        .collect();

    let users = board
        .users
        .values()
        .map(|u| RosterEntry {
            online: u.is_online(now),
            presence: u.presence_label(now),
            user: u.clone(),
        })
        .collect();

    Json(BoardSnapshot {
        revision: board.revision,
        active_tasks: board.active_task_count(),
        users,
        tasks,
    })
}

// ── Commands ───────────────────────────────────────────────────

fn reject(err: BoardError) -> (StatusCode, String) {
    let code = match err {
        BoardError::TaskNotFound | BoardError::UserNotFound => StatusCode::NOT_FOUND,
        BoardError::InvalidTransition | BoardError::LoginTaken => StatusCode::CONFLICT,
        BoardError::NotPermitted => StatusCode::FORBIDDEN,
        BoardError::InvalidCount | BoardError::UnknownBarcode | BoardError::EmptyText => {
            StatusCode::BAD_REQUEST
        }
    };
    (code, err.to_string())
}

/// Apply a lifecycle command as the session user.
pub async fn command(
    State(state): State<SharedState>,
    Json(cmd): Json<Command>,
) -> Result<Json<Event>, (StatusCode, String)> {
    let actor = session_actor(&state)?;
    let now = now_ms();

    // Apply under the write lock; the board is authoritative from here on.
    let (event, touched) = {
        let mut board = state.board.write().unwrap();
        let event = board.apply(cmd, actor, now).map_err(reject)?;
        let touched = board.tasks.get(&event.task_id()).cloned();
        (event, touched)
    };

    // Fire-and-forget store write: a failure is logged, never rolled back.
    match (&event, touched) {
        (Event::TaskDeleted { task_id, .. }, _) => {
            if let Err(e) = state.store.delete_task(*task_id) {
                warn!(task = %task_id, error = %e, "task delete write failed");
            }
        }
        (_, Some(task)) => {
            if let Err(e) = state.store.upsert_task(&task) {
                warn!(task = %task.id, error = %e, "task write failed");
            }
        }
        _ => {}
    }

    if let Some(note) = event.notification() {
        // No subscribers is fine; notifications are best-effort.
        let _ = state.notify_tx.send(note);
    }

    Ok(Json(event))
}

// ── Users ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ProfileUpdate {
    pub display_name: Option<String>,
    pub bio: Option<String>,
}

/// Edit the session user's own profile.
pub async fn update_profile(
    State(state): State<SharedState>,
    Json(update): Json<ProfileUpdate>,
) -> Result<StatusCode, (StatusCode, String)> {
    let actor = session_actor(&state)?;

    let user = {
        let mut board = state.board.write().unwrap();
        let user = board
            .users
            .get_mut(&actor.id)
            .ok_or(reject(BoardError::UserNotFound))?;
        if let Some(name) = update.display_name {
            user.display_name = name;
        }
        if let Some(bio) = update.bio {
            user.bio = Some(bio);
        }
        user.clone()
    };

    if let Err(e) = state.store.upsert_user(&user) {
        warn!(user = %user.id, error = %e, "profile write failed");
    }
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
pub struct ProfileComment {
    pub user_id: Uuid,
    pub text: String,
}

/// Leave a comment on another user's profile. Append-only, like task comments.
pub async fn add_profile_comment(
    State(state): State<SharedState>,
    Json(payload): Json<ProfileComment>,
) -> Result<StatusCode, (StatusCode, String)> {
    let actor = session_actor(&state)?;
    let text = payload.text.trim().to_string();
    if text.is_empty() {
        return Err(reject(BoardError::EmptyText));
    }

    let user = {
        let mut board = state.board.write().unwrap();
        let user = board
            .users
            .get_mut(&payload.user_id)
            .ok_or(reject(BoardError::UserNotFound))?;
        user.profile_comments.push(crate::board::Comment {
            id: Uuid::new_v4(),
            author_id: actor.id,
            text,
            timestamp_ms: now_ms(),
        });
        user.clone()
    };

    if let Err(e) = state.store.upsert_user(&user) {
        warn!(user = %user.id, error = %e, "profile comment write failed");
    }
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
pub struct BanRequest {
    pub user_id: Uuid,
}

/// Admin ban: the one path that removes a user record.
pub async fn ban_user(
    State(state): State<SharedState>,
    Json(payload): Json<BanRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    let actor = session_actor(&state)?;
    if !actor.can_manage {
        return Err(reject(BoardError::NotPermitted));
    }
    if payload.user_id == actor.id {
        return Err((
            StatusCode::BAD_REQUEST,
            "cannot ban yourself".to_string(),
        ));
    }

    {
        let mut board = state.board.write().unwrap();
        if board.users.remove(&payload.user_id).is_none() {
            return Err(reject(BoardError::UserNotFound));
        }
    }

    if let Err(e) = state.store.delete_user(payload.user_id) {
        warn!(user = %payload.user_id, error = %e, "ban write failed");
    }
    Ok(StatusCode::NO_CONTENT)
}

// ── Reports ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ReportQuery {
    /// Absent means the all-users view.
    pub user: Option<Uuid>,
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Viewer's UTC offset in minutes; bucketing follows *their* midnight.
    #[serde(default)]
    pub tz_offset_minutes: i32,
}

impl ReportQuery {
    fn target(&self) -> ReportTarget {
        match self.user {
            Some(id) => ReportTarget::User(id),
            None => ReportTarget::All,
        }
    }

    fn range(&self) -> Result<DateRange, (StatusCode, String)> {
        if self.start > self.end {
            return Err((
                StatusCode::BAD_REQUEST,
                "start must not be after end".to_string(),
            ));
        }
        Ok(DateRange {
            start: self.start,
            end: self.end,
        })
    }

    fn tz(&self) -> Result<FixedOffset, (StatusCode, String)> {
        FixedOffset::east_opt(self.tz_offset_minutes * 60).ok_or((
            StatusCode::BAD_REQUEST,
            "tz offset out of range".to_string(),
        ))
    }
}

#[derive(Debug, Serialize)]
pub struct DaysReport {
    pub buckets: Vec<report::DayBucket>,
    pub total_sku: i64,
    pub business_days: i64,
    pub target_sku: i64,
    pub progress_percent: f64,
    pub closed_tasks: usize,
}

/// Day-bucketed breakdown plus the KPI summary for the range.
pub async fn report_days(
    State(state): State<SharedState>,
    Query(query): Query<ReportQuery>,
) -> Result<Json<DaysReport>, (StatusCode, String)> {
    let range = query.range()?;
    let tz = query.tz()?;
    let board = state.board.read().unwrap();
    let tasks: Vec<Task> = board.tasks.values().cloned().collect();

    let buckets = report::day_buckets(&tasks, query.target(), range, tz);
    let total_sku: i64 = buckets.iter().map(|b| b.total_sku).sum();
    let target_sku = report::kpi_target(range);

    Ok(Json(DaysReport {
        total_sku,
        business_days: report::business_days(range),
        target_sku,
        progress_percent: report::kpi_progress(total_sku, target_sku),
        closed_tasks: report::closed_task_count(&tasks, query.target(), range, tz),
        buckets,
    }))
}

/// Flat per-ledger-entry registry.
pub async fn report_registry(
    State(state): State<SharedState>,
    Query(query): Query<ReportQuery>,
) -> Result<Json<Vec<report::RegistryRow>>, (StatusCode, String)> {
    let range = query.range()?;
    let tz = query.tz()?;
    let board = state.board.read().unwrap();
    let tasks: Vec<Task> = board.tasks.values().cloned().collect();
    let users: Vec<User> = board.users.values().cloned().collect();

    Ok(Json(report::registry_rows(
        &tasks,
        &users,
        query.target(),
        range,
        tz,
    )))
}

/// The registry as a downloadable spreadsheet (CSV).
pub async fn report_registry_csv(
    State(state): State<SharedState>,
    Query(query): Query<ReportQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let range = query.range()?;
    let tz = query.tz()?;
    let csv = {
        let board = state.board.read().unwrap();
        let tasks: Vec<Task> = board.tasks.values().cloned().collect();
        let users: Vec<User> = board.users.values().cloned().collect();
        report::registry_csv(&report::registry_rows(
            &tasks,
            &users,
            query.target(),
            range,
            tz,
        ))
    };

    Ok((
        [(header::CONTENT_TYPE, "text/csv; charset=utf-8")],
        csv,
    ))
}

/// The per-user breakdown as a printable text report.
pub async fn report_user_text(
    State(state): State<SharedState>,
    Query(query): Query<ReportQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let user_id = query.user.ok_or((
        StatusCode::BAD_REQUEST,
        "user is required for the personal report".to_string(),
    ))?;
    let range = query.range()?;
    let tz = query.tz()?;

    let text = {
        let board = state.board.read().unwrap();
        let name = board
            .users
            .get(&user_id)
            .map(|u| u.display_name.clone())
            .ok_or((StatusCode::NOT_FOUND, "user not found".to_string()))?;
        let tasks: Vec<Task> = board.tasks.values().cloned().collect();
        let buckets = report::day_buckets(&tasks, ReportTarget::User(user_id), range, tz);
        report::user_report_text(&name, range, &buckets)
    };

    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        text,
    ))
}
