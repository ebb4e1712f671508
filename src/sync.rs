//! Polling synchronizer.
//!
//! One cooperative task owns the refresh loop: every tick it re-reads the
//! store and replaces the in-memory collections wholesale. Ticks run strictly
//! one after another and missed ticks are skipped, so a slow store response
//! can never stack a second fetch behind the first. A failed read logs and
//! leaves the previous (stale) state in place: degraded, never crashed.
//!
//! Elapsed time on Doing tasks is a display concern (see Task::
//! effective_time_spent); the only durable writes here are the periodic
//! tracking flushes that bound how much accrued time a crash can lose.

use crate::auth::{now_ms, SharedState};
use crate::board::{Status, Task};
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
    /// Base tick period for the live board.
    pub period: Duration,
    /// Refresh the roster and heartbeat the session user every Nth tick.
    pub roster_every: u64,
    /// Durably flush open tracking intervals every Nth tick.
    pub flush_every: u64,
}

impl Default for SyncOptions {
    fn default() -> Self {
        SyncOptions {
            period: Duration::from_secs(1),
            roster_every: 5,
            flush_every: 60,
        }
    }
}

pub async fn run(state: SharedState, opts: SyncOptions) {
    let mut ticker = interval(opts.period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut tick: u64 = 0;
    loop {
        ticker.tick().await;
        tick += 1;
        tick_once(&state, tick, &opts);
    }
}

/// One poll cycle. Synchronous on purpose: the next tick cannot start until
/// this one has fully resolved.
pub fn tick_once(state: &SharedState, tick: u64, opts: &SyncOptions) {
    let now = now_ms();

    match state.store.list_tasks() {
        Ok(tasks) => state.board.write().unwrap().replace_tasks(tasks),
        Err(e) => warn!(error = %e, "task refresh failed, serving stale state"),
    }

    if tick % opts.roster_every == 0 {
        match state.store.list_users() {
            Ok(users) => state.board.write().unwrap().replace_users(users),
            Err(e) => warn!(error = %e, "roster refresh failed, serving stale state"),
        }

        if let Some(id) = state.session.current_user() {
            if let Err(e) = state.store.touch_user_activity(id, now) {
                warn!(error = %e, "activity heartbeat failed");
            }
        }
    }

    if tick % opts.flush_every == 0 {
        flush_tracking(state, now);
    }
}

/// Fold every open tracking interval into time_spent_seconds, rebase the
/// start to now, and persist. Accrual on leaving Doing still happens in the
/// lifecycle engine; this only bounds loss while a task stays Doing.
fn flush_tracking(state: &SharedState, now_ms: i64) {
    let flushed: Vec<Task> = {
        let mut board = state.board.write().unwrap();
        let mut flushed = Vec::new();
        for task in board.tasks.values_mut() {
            if task.status != Status::Doing {
                continue;
            }
            if let Some(start) = task.last_tracking_start_ms {
                task.time_spent_seconds += (now_ms - start).max(0) / 1000;
                task.last_tracking_start_ms = Some(now_ms);
                flushed.push(task.clone());
            }
        }
        flushed
    };

    for task in &flushed {
        if let Err(e) = state.store.upsert_task(task) {
            warn!(task = %task.id, error = %e, "tracking flush write failed");
        }
    }
    if !flushed.is_empty() {
        debug!(count = flushed.len(), "flushed open tracking intervals");
    }
}

// ── Tests ──────────────────────────────────────────────────────
