use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

// ── Entity types ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Role {
    Developer = 0,
    Manager = 1,
    TeamLead = 2,
    Designer = 3,
    Photographer = 4,
    Retoucher = 5,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Category {
    Photo = 0,
    Retouch = 1,
    Infographic = 2,
    Project = 3,
}

/// Pricing tier. Only meaningful on Infographic tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Tariff {
    Lite = 0,
    Standard = 1,
    Premium = 2,
}

/// Task status lifecycle:
///
/// Queue → Doing → {Partial, Done}
/// Doing ↔ Slacking (manager interruption)
/// any non-terminal → Canceled, restorable back to Queue
///
/// Done and Canceled are terminal; Canceled → Queue via Restore is the one
/// deliberate escape hatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Status {
    Queue = 0,
    Doing = 1,
    Slacking = 2,
    Partial = 3,
    Done = 4,
    Canceled = 5,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Done | Status::Canceled)
    }
}

/// One ledger entry: who completed how many units, when.
/// count is negative only when a barcode completion is undone.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SkuLog {
    pub timestamp_ms: i64,
    pub count: i64,
    pub user_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: Uuid,
    pub author_id: Uuid,
    pub text: String,
    pub timestamp_ms: i64,
}

/// How long since the last heartbeat a user still counts as online.
pub const ONLINE_WINDOW_MS: i64 = 5 * 60 * 1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub login: String,
    pub display_name: String,
    pub role: Role,
    #[serde(skip_serializing)]
    #[serde(default)]
    pub password_hash: String,
    pub is_admin: bool,
    pub bio: Option<String>,
    pub profile_comments: Vec<Comment>,
    pub online_since_ms: Option<i64>,
    pub last_active_ms: Option<i64>,
}

impl User {
    /// The one authorization predicate. Managers, developers and admins can
    /// interrupt, archive and complete on behalf of anyone.
    pub fn can_manage(&self) -> bool {
        self.is_admin || matches!(self.role, Role::Manager | Role::Developer)
    }

    pub fn is_online(&self, now_ms: i64) -> bool {
        self.last_active_ms
            .map_or(false, |t| now_ms - t < ONLINE_WINDOW_MS)
    }

    /// Roster label derived from heartbeats. Duration-based so it reads the
    /// same in every timezone.
    pub fn presence_label(&self, now_ms: i64) -> String {
        if self.is_online(now_ms) {
            match self.online_since_ms {
                Some(since) => format!("online for {}", fmt_ago(now_ms - since)),
                None => "online".to_string(),
            }
        } else {
            match self.last_active_ms {
                None => "never seen".to_string(),
                Some(last) => format!("active {} ago", fmt_ago(now_ms - last)),
            }
        }
    }
}

fn fmt_ago(delta_ms: i64) -> String {
    let mins = (delta_ms / 60_000).max(0);
    if mins < 60 {
        format!("{mins}m")
    } else if mins < 24 * 60 {
        format!("{}h", mins / 60)
    } else {
        format!("{}d", mins / (24 * 60))
    }
}

/// A task: the unit of distributed studio work.
///
/// sku_history is the single source of truth for "who did how much, when";
/// completed_sku caches max(0, Σ count) and is recomputed by every mutation.
/// last_tracking_start_ms is Some only while status is Doing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub status: Status,
    pub category: Category,
    pub tariff: Option<Tariff>,
    pub is_first_party: bool,
    pub sku_quantity: u32,
    pub completed_sku: i64,
    pub sku_history: Vec<SkuLog>,
    pub product_id: Option<String>,
    pub barcodes: Vec<String>,
    pub completed_barcodes: Vec<String>,
    pub source_link: Option<String>,
    pub result_link: Option<String>,
    pub assignee_ids: Vec<Uuid>,
    pub creator_id: Uuid,
    pub deadline: NaiveDate,
    pub time_spent_seconds: i64,
    pub last_tracking_start_ms: Option<i64>,
    pub completed_at_ms: Option<i64>,
    pub created_at_ms: i64,
    pub comments: Vec<Comment>,
}

impl Task {
    pub fn is_assignee(&self, user_id: Uuid) -> bool {
        self.assignee_ids.contains(&user_id)
    }

    pub fn history_sum(&self) -> i64 {
        self.sku_history.iter().map(|l| l.count).sum()
    }

    /// Cached total clamped to the quantity for presentation. The raw ledger
    /// is never clamped.
    pub fn display_completed_sku(&self) -> u32 {
        self.completed_sku.clamp(0, self.sku_quantity as i64) as u32
    }

    /// Stored seconds plus the open tracking interval, for display only.
    pub fn effective_time_spent(&self, now_ms: i64) -> i64 {
        match (self.status, self.last_tracking_start_ms) {
            (Status::Doing, Some(start)) => {
                self.time_spent_seconds + ((now_ms - start).max(0) / 1000)
            }
            _ => self.time_spent_seconds,
        }
    }

    /// Fold the open tracking interval into time_spent_seconds and stop the
    /// clock. Called on every transition that leaves Doing, so accrued time
    /// is durable before the status changes.
    fn freeze_tracking(&mut self, now_ms: i64) {
        if let Some(start) = self.last_tracking_start_ms.take() {
            self.time_spent_seconds += (now_ms - start).max(0) / 1000;
        }
    }
}

// ── Commands (caller → engine) ────────────────────────────────

/// A command is something a caller wants to happen to the board.
/// The engine validates it, applies it, and returns an Event (or an error).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Command {
    CreateTask {
        title: Option<String>,
        description: String,
        category: Category,
        tariff: Option<Tariff>,
        is_first_party: bool,
        sku_quantity: u32,
        product_id: Option<String>,
        barcodes: Vec<String>,
        source_link: Option<String>,
        assignee_ids: Vec<Uuid>,
        deadline: NaiveDate,
    },
    Start {
        task_id: Uuid,
    },
    MarkSlacking {
        task_id: Uuid,
    },
    CompleteFully {
        task_id: Uuid,
        /// May be backdated: "what day did you actually finish this".
        completion_date_ms: i64,
    },
    CompletePartial {
        task_id: Uuid,
        count: i64,
        completion_date_ms: i64,
    },
    ToggleBarcodeUnit {
        task_id: Uuid,
        barcode: String,
    },
    Archive {
        task_id: Uuid,
    },
    Delete {
        task_id: Uuid,
    },
    Restore {
        task_id: Uuid,
    },
    AddComment {
        task_id: Uuid,
        text: String,
    },
}

// ── Events (engine → collaborators) ───────────────────────────

/// What actually happened. Carries the board revision it was applied at and
/// enough context to render a notification without another lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    TaskCreated {
        revision: u64,
        task: Task,
    },
    WorkStarted {
        revision: u64,
        task_id: Uuid,
        title: String,
        actor_name: String,
    },
    SlackingMarked {
        revision: u64,
        task_id: Uuid,
        title: String,
    },
    TaskCompleted {
        revision: u64,
        task_id: Uuid,
        title: String,
        completed_at_ms: i64,
    },
    SkuSubmitted {
        revision: u64,
        task_id: Uuid,
        title: String,
        actor_name: String,
        count: i64,
        finished: bool,
    },
    BarcodeToggled {
        revision: u64,
        task_id: Uuid,
        barcode: String,
        undone: bool,
        status: Status,
    },
    TaskArchived {
        revision: u64,
        task_id: Uuid,
        title: String,
    },
    TaskDeleted {
        revision: u64,
        task_id: Uuid,
    },
    TaskRestored {
        revision: u64,
        task_id: Uuid,
        title: String,
    },
    CommentAdded {
        revision: u64,
        task_id: Uuid,
        comment: Comment,
    },
}

impl Event {
    /// The task the event is about.
    pub fn task_id(&self) -> Uuid {
        match self {
            Event::TaskCreated { task, .. } => task.id,
            Event::WorkStarted { task_id, .. }
            | Event::SlackingMarked { task_id, .. }
            | Event::TaskCompleted { task_id, .. }
            | Event::SkuSubmitted { task_id, .. }
            | Event::BarcodeToggled { task_id, .. }
            | Event::TaskArchived { task_id, .. }
            | Event::TaskDeleted { task_id, .. }
            | Event::TaskRestored { task_id, .. }
            | Event::CommentAdded { task_id, .. } => *task_id,
        }
    }

    /// Human-readable notification line, if this event warrants one.
    /// Delivery is the collaborators' problem; nothing here is persisted.
    pub fn notification(&self) -> Option<String> {
        match self {
            Event::TaskCreated { task, .. } => Some(format!(
                "New task assigned ({} SKU): {}",
                task.sku_quantity, task.title
            )),
            Event::WorkStarted {
                title, actor_name, ..
            } => Some(format!("@{actor_name} started work on \"{title}\"")),
            Event::TaskCompleted { title, .. } => Some(format!("Task \"{title}\" completed!")),
            Event::SkuSubmitted {
                title,
                actor_name,
                count,
                ..
            } => Some(format!("{actor_name} submitted {count} SKU on \"{title}\"")),
            Event::TaskArchived { title, .. } => {
                Some(format!("Task \"{title}\" moved to archive"))
            }
            Event::TaskRestored { .. } => {
                Some("Task restored from archive to queue".to_string())
            }
            Event::SlackingMarked { .. }
            | Event::BarcodeToggled { .. }
            | Event::TaskDeleted { .. }
            | Event::CommentAdded { .. } => None,
        }
    }
}

// ── Errors ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoardError {
    TaskNotFound,
    UserNotFound,
    /// The operation is not valid from the task's current status.
    /// The task is left untouched.
    InvalidTransition,
    NotPermitted,
    InvalidCount,
    UnknownBarcode,
    EmptyText,
    LoginTaken,
}

impl std::fmt::Display for BoardError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            BoardError::TaskNotFound => "task not found",
            BoardError::UserNotFound => "user not found",
            BoardError::InvalidTransition => "operation not valid from the current status",
            BoardError::NotPermitted => "not permitted for this user",
            BoardError::InvalidCount => "count must be positive",
            BoardError::UnknownBarcode => "barcode does not belong to this task",
            BoardError::EmptyText => "text must not be empty",
            BoardError::LoginTaken => "login already taken",
        };
        f.write_str(msg)
    }
}

/// Resolved caller identity. Built once per request from the session user;
/// the engine never re-derives authorization.
#[derive(Debug, Clone, Copy)]
pub struct Actor {
    pub id: Uuid,
    pub can_manage: bool,
}

// ── The Board ──────────────────────────────────────────────────

/// The in-memory view of users and tasks. Loaded from the store on boot,
/// replaced wholesale by the polling synchronizer, and mutated only through
/// apply(). Every lifecycle change goes through that one codepath.
#[derive(Debug, Clone, PartialEq)]
pub struct Board {
    pub users: HashMap<Uuid, User>,
    pub tasks: HashMap<Uuid, Task>,
    pub revision: u64,
}

impl Board {
    pub fn new() -> Self {
        Board {
            users: HashMap::new(),
            tasks: HashMap::new(),
            revision: 0,
        }
    }

    /// Add a user, enforcing the unique-login invariant.
    pub fn register_user(&mut self, user: User) -> Result<(), BoardError> {
        if self.users.values().any(|u| u.login == user.login) {
            return Err(BoardError::LoginTaken);
        }
        self.users.insert(user.id, user);
        Ok(())
    }

    pub fn user_by_login(&self, login: &str) -> Option<&User> {
        self.users.values().find(|u| u.login == login)
    }

    /// Tasks still in play, for the roster badge.
    pub fn active_task_count(&self) -> usize {
        self.tasks
            .values()
            .filter(|t| !t.status.is_terminal())
            .count()
    }

    /// Wholesale replacement from a fresh store read (poll cycle).
    pub fn replace_tasks(&mut self, tasks: Vec<Task>) {
        self.tasks = tasks.into_iter().map(|t| (t.id, t)).collect();
    }

    pub fn replace_users(&mut self, users: Vec<User>) {
        self.users = users.into_iter().map(|u| (u.id, u)).collect();
    }

    fn actor_name(&self, id: Uuid) -> String {
        self.users
            .get(&id)
            .map(|u| u.display_name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    /// Apply a command to the board. Returns the resulting Event on success.
    /// A rejected command changes nothing.
    pub fn apply(&mut self, cmd: Command, actor: Actor, now_ms: i64) -> Result<Event, BoardError> {
        match cmd {
            Command::CreateTask {
                title,
                description,
                category,
                tariff,
                is_first_party,
                sku_quantity,
                product_id,
                barcodes,
                source_link,
                assignee_ids,
                deadline,
            } => {
                // A barcode list wins over the stated quantity: one unit per code.
                let sku_quantity = if barcodes.is_empty() {
                    sku_quantity.max(1)
                } else {
                    barcodes.len() as u32
                };
                let assignee_ids = if assignee_ids.is_empty() {
                    vec![actor.id]
                } else {
                    assignee_ids
                };
                let id = Uuid::new_v4();
                let task = Task {
                    id,
                    title: title.unwrap_or_else(|| format!("Request #{}", &id.simple().to_string()[..6])),
                    description,
                    status: Status::Queue,
                    category,
                    tariff: if category == Category::Infographic {
                        tariff
                    } else {
                        None
                    },
                    is_first_party,
                    sku_quantity,
                    completed_sku: 0,
                    sku_history: Vec::new(),
                    product_id,
                    barcodes,
                    completed_barcodes: Vec::new(),
                    source_link,
                    result_link: None,
                    assignee_ids,
                    creator_id: actor.id,
                    deadline,
                    time_spent_seconds: 0,
                    last_tracking_start_ms: None,
                    completed_at_ms: None,
                    created_at_ms: now_ms,
                    comments: Vec::new(),
                };

                self.revision += 1;
                let event = Event::TaskCreated {
                    revision: self.revision,
                    task: task.clone(),
                };
                self.tasks.insert(task.id, task);
                Ok(event)
            }

            Command::Start { task_id } => {
                let actor_name = self.actor_name(actor.id);
                let task = self.tasks.get_mut(&task_id).ok_or(BoardError::TaskNotFound)?;

                if !actor.can_manage && !task.is_assignee(actor.id) {
                    return Err(BoardError::NotPermitted);
                }
                // Partial already implies started work; further progress goes
                // through the completion commands, not Start.
                if !matches!(task.status, Status::Queue | Status::Slacking) {
                    return Err(BoardError::InvalidTransition);
                }

                task.status = Status::Doing;
                task.last_tracking_start_ms = Some(now_ms);
                let title = task.title.clone();

                self.revision += 1;
                Ok(Event::WorkStarted {
                    revision: self.revision,
                    task_id,
                    title,
                    actor_name,
                })
            }

            Command::MarkSlacking { task_id } => {
                if !actor.can_manage {
                    return Err(BoardError::NotPermitted);
                }
                let task = self.tasks.get_mut(&task_id).ok_or(BoardError::TaskNotFound)?;
                if task.status != Status::Doing {
                    return Err(BoardError::InvalidTransition);
                }

                task.freeze_tracking(now_ms);
                task.status = Status::Slacking;
                let title = task.title.clone();

                self.revision += 1;
                Ok(Event::SlackingMarked {
                    revision: self.revision,
                    task_id,
                    title,
                })
            }

            Command::CompleteFully {
                task_id,
                completion_date_ms,
            } => {
                let task = self.tasks.get_mut(&task_id).ok_or(BoardError::TaskNotFound)?;
                if !actor.can_manage && !task.is_assignee(actor.id) {
                    return Err(BoardError::NotPermitted);
                }
                if task.status.is_terminal() {
                    return Err(BoardError::InvalidTransition);
                }

                task.freeze_tracking(now_ms);
                let remaining = task.sku_quantity as i64 - task.completed_sku;
                if remaining > 0 {
                    task.sku_history.push(SkuLog {
                        timestamp_ms: completion_date_ms,
                        count: remaining,
                        user_id: actor.id,
                    });
                }
                task.completed_sku = task.sku_quantity as i64;
                task.status = Status::Done;
                task.completed_at_ms = Some(completion_date_ms);
                let title = task.title.clone();

                self.revision += 1;
                Ok(Event::TaskCompleted {
                    revision: self.revision,
                    task_id,
                    title,
                    completed_at_ms: completion_date_ms,
                })
            }

            Command::CompletePartial {
                task_id,
                count,
                completion_date_ms,
            } => {
                if count <= 0 {
                    return Err(BoardError::InvalidCount);
                }
                let actor_name = self.actor_name(actor.id);
                let task = self.tasks.get_mut(&task_id).ok_or(BoardError::TaskNotFound)?;
                if !actor.can_manage && !task.is_assignee(actor.id) {
                    return Err(BoardError::NotPermitted);
                }
                if task.status.is_terminal() {
                    return Err(BoardError::InvalidTransition);
                }

                // The log always records the exact requested count; the cached
                // total stays the raw sum and is clamped only for display.
                task.sku_history.push(SkuLog {
                    timestamp_ms: completion_date_ms,
                    count,
                    user_id: actor.id,
                });
                task.completed_sku += count;

                let finished = task.completed_sku >= task.sku_quantity as i64;
                task.freeze_tracking(now_ms);
                if finished {
                    task.status = Status::Done;
                    task.completed_at_ms = Some(completion_date_ms);
                } else {
                    task.status = Status::Partial;
                }
                let title = task.title.clone();

                self.revision += 1;
                Ok(Event::SkuSubmitted {
                    revision: self.revision,
                    task_id,
                    title,
                    actor_name,
                    count,
                    finished,
                })
            }

            Command::ToggleBarcodeUnit { task_id, barcode } => {
                let task = self.tasks.get_mut(&task_id).ok_or(BoardError::TaskNotFound)?;
                if !actor.can_manage && !task.is_assignee(actor.id) {
                    return Err(BoardError::NotPermitted);
                }
                // Undo may demote a Done task; only Canceled is off limits.
                if task.status == Status::Canceled {
                    return Err(BoardError::InvalidTransition);
                }
                if !task.barcodes.contains(&barcode) {
                    return Err(BoardError::UnknownBarcode);
                }

                let undone = task.completed_barcodes.contains(&barcode);
                if undone {
                    task.completed_barcodes.retain(|b| b != &barcode);
                } else {
                    task.completed_barcodes.push(barcode.clone());
                }
                let delta: i64 = if undone { -1 } else { 1 };

                // Compensating entry, never a rewrite of the prior log.
                task.sku_history.push(SkuLog {
                    timestamp_ms: now_ms,
                    count: delta,
                    user_id: actor.id,
                });

                let raw_total = task.completed_sku + delta;
                task.completed_sku = raw_total.max(0);

                let finished = raw_total >= task.sku_quantity as i64;
                let new_status = if finished {
                    Status::Done
                } else if raw_total > 0 {
                    Status::Partial
                } else {
                    // Work has demonstrably begun, so an undo to zero lands in
                    // Doing, not back in the queue.
                    Status::Doing
                };
                if new_status != Status::Doing {
                    task.freeze_tracking(now_ms);
                }
                task.status = new_status;
                task.completed_at_ms = if finished { Some(now_ms) } else { None };

                self.revision += 1;
                Ok(Event::BarcodeToggled {
                    revision: self.revision,
                    task_id,
                    barcode,
                    undone,
                    status: new_status,
                })
            }

            Command::Archive { task_id } => {
                let task = self.tasks.get_mut(&task_id).ok_or(BoardError::TaskNotFound)?;
                if !actor.can_manage && task.creator_id != actor.id {
                    return Err(BoardError::NotPermitted);
                }
                if task.status.is_terminal() {
                    return Err(BoardError::InvalidTransition);
                }

                task.freeze_tracking(now_ms);
                task.status = Status::Canceled;
                task.completed_at_ms = Some(now_ms);
                let title = task.title.clone();

                self.revision += 1;
                Ok(Event::TaskArchived {
                    revision: self.revision,
                    task_id,
                    title,
                })
            }

            Command::Delete { task_id } => {
                let task = self.tasks.get(&task_id).ok_or(BoardError::TaskNotFound)?;
                if !actor.can_manage && task.creator_id != actor.id {
                    return Err(BoardError::NotPermitted);
                }
                self.tasks.remove(&task_id);

                self.revision += 1;
                Ok(Event::TaskDeleted {
                    revision: self.revision,
                    task_id,
                })
            }

            Command::Restore { task_id } => {
                let task = self.tasks.get_mut(&task_id).ok_or(BoardError::TaskNotFound)?;
                if !actor.can_manage && task.creator_id != actor.id {
                    return Err(BoardError::NotPermitted);
                }
                if task.status != Status::Canceled {
                    return Err(BoardError::InvalidTransition);
                }

                task.status = Status::Queue;
                task.completed_at_ms = None;
                let title = task.title.clone();

                self.revision += 1;
                Ok(Event::TaskRestored {
                    revision: self.revision,
                    task_id,
                    title,
                })
            }

            Command::AddComment { task_id, text } => {
                let text = text.trim().to_string();
                if text.is_empty() {
                    return Err(BoardError::EmptyText);
                }
                let task = self.tasks.get_mut(&task_id).ok_or(BoardError::TaskNotFound)?;

                let comment = Comment {
                    id: Uuid::new_v4(),
                    author_id: actor.id,
                    text,
                    timestamp_ms: now_ms,
                };
                task.comments.push(comment.clone());

                self.revision += 1;
                Ok(Event::CommentAdded {
                    revision: self.revision,
                    task_id,
                    comment,
                })
            }
        }
    }
}

impl Default for Board {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ──────────────────────────────────────────────────────
