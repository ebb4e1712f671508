//! Stored wire format for users and tasks.
//!
//! The store never sees the in-memory entities directly: every record crosses
//! this boundary as a Wire* struct, postcard-encoded. The mapping is total
//! and lossless in both directions (every entity field has exactly one wire
//! field and vice versa), so a schema drift shows up here, in one place,
//! instead of as silently dropped columns.
//!
//! Enums cross the wire as u8 discriminants; the values are shared knowledge
//! with whatever else reads the store and must never be renumbered. Deadlines
//! travel as days since the Unix epoch.

use crate::board::{Category, Comment, Role, SkuLog, Status, Tariff, Task, User};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Discriminants ──────────────────────────────────────────────

fn role_to_u8(r: Role) -> u8 {
    r as u8
}

fn role_from_u8(v: u8) -> Result<Role, WireError> {
    Ok(match v {
        0 => Role::Developer,
        1 => Role::Manager,
        2 => Role::TeamLead,
        3 => Role::Designer,
        4 => Role::Photographer,
        5 => Role::Retoucher,
        _ => return Err(WireError::BadDiscriminant("role", v)),
    })
}

fn category_from_u8(v: u8) -> Result<Category, WireError> {
    Ok(match v {
        0 => Category::Photo,
        1 => Category::Retouch,
        2 => Category::Infographic,
        3 => Category::Project,
        _ => return Err(WireError::BadDiscriminant("category", v)),
    })
}

fn tariff_from_u8(v: u8) -> Result<Tariff, WireError> {
    Ok(match v {
        0 => Tariff::Lite,
        1 => Tariff::Standard,
        2 => Tariff::Premium,
        _ => return Err(WireError::BadDiscriminant("tariff", v)),
    })
}

fn status_from_u8(v: u8) -> Result<Status, WireError> {
    Ok(match v {
        0 => Status::Queue,
        1 => Status::Doing,
        2 => Status::Slacking,
        3 => Status::Partial,
        4 => Status::Done,
        5 => Status::Canceled,
        _ => return Err(WireError::BadDiscriminant("status", v)),
    })
}

fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).expect("epoch date")
}

fn date_to_epoch_days(d: NaiveDate) -> i64 {
    (d - epoch()).num_days()
}

fn date_from_epoch_days(days: i64) -> Result<NaiveDate, WireError> {
    epoch()
        .checked_add_signed(chrono::Duration::days(days))
        .ok_or(WireError::BadDate(days))
}

// ── Errors ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    BadDiscriminant(&'static str, u8),
    BadDate(i64),
    Postcard(String),
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WireError::BadDiscriminant(field, v) => write!(f, "bad {field} discriminant {v}"),
            WireError::BadDate(days) => write!(f, "deadline out of range: {days} epoch days"),
            WireError::Postcard(e) => write!(f, "postcard: {e}"),
        }
    }
}

impl From<postcard::Error> for WireError {
    fn from(e: postcard::Error) -> Self {
        WireError::Postcard(e.to_string())
    }
}

// ── Records ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireSkuLog {
    pub timestamp_ms: i64,
    pub count: i64,
    pub user_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireComment {
    pub id: Uuid,
    pub author_id: Uuid,
    pub text: String,
    pub timestamp_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireUser {
    pub id: Uuid,
    pub login: String,
    pub display_name: String,
    pub role: u8,
    pub password_hash: String,
    pub is_admin: bool,
    pub bio: Option<String>,
    pub profile_comments: Vec<WireComment>,
    pub online_since_ms: Option<i64>,
    pub last_active_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireTask {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub status: u8,
    pub category: u8,
    pub tariff: Option<u8>,
    pub is_first_party: bool,
    pub sku_quantity: u32,
    pub completed_sku: i64,
    pub sku_history: Vec<WireSkuLog>,
    pub product_id: Option<String>,
    pub barcodes: Vec<String>,
    pub completed_barcodes: Vec<String>,
    pub source_link: Option<String>,
    pub result_link: Option<String>,
    pub assignee_ids: Vec<Uuid>,
    pub creator_id: Uuid,
    pub deadline_epoch_days: i64,
    pub time_spent_seconds: i64,
    pub last_tracking_start_ms: Option<i64>,
    pub completed_at_ms: Option<i64>,
    pub created_at_ms: i64,
    pub comments: Vec<WireComment>,
}

// ── Entity → wire ─────────────────────────────────────────────

impl From<&SkuLog> for WireSkuLog {
    fn from(l: &SkuLog) -> Self {
        WireSkuLog {
            timestamp_ms: l.timestamp_ms,
            count: l.count,
            user_id: l.user_id,
        }
    }
}

impl From<&Comment> for WireComment {
    fn from(c: &Comment) -> Self {
        WireComment {
            id: c.id,
            author_id: c.author_id,
            text: c.text.clone(),
            timestamp_ms: c.timestamp_ms,
        }
    }
}

impl From<&User> for WireUser {
    fn from(u: &User) -> Self {
        WireUser {
            id: u.id,
            login: u.login.clone(),
            display_name: u.display_name.clone(),
            role: role_to_u8(u.role),
            password_hash: u.password_hash.clone(),
            is_admin: u.is_admin,
            bio: u.bio.clone(),
            profile_comments: u.profile_comments.iter().map(Into::into).collect(),
            online_since_ms: u.online_since_ms,
            last_active_ms: u.last_active_ms,
        }
    }
}

impl From<&Task> for WireTask {
    fn from(t: &Task) -> Self {
        WireTask {
            id: t.id,
            title: t.title.clone(),
            description: t.description.clone(),
            status: t.status as u8,
            category: t.category as u8,
            tariff: t.tariff.map(|tf| tf as u8),
            is_first_party: t.is_first_party,
            sku_quantity: t.sku_quantity,
            completed_sku: t.completed_sku,
            sku_history: t.sku_history.iter().map(Into::into).collect(),
            product_id: t.product_id.clone(),
            barcodes: t.barcodes.clone(),
            completed_barcodes: t.completed_barcodes.clone(),
            source_link: t.source_link.clone(),
            result_link: t.result_link.clone(),
            assignee_ids: t.assignee_ids.clone(),
            creator_id: t.creator_id,
            deadline_epoch_days: date_to_epoch_days(t.deadline),
            time_spent_seconds: t.time_spent_seconds,
            last_tracking_start_ms: t.last_tracking_start_ms,
            completed_at_ms: t.completed_at_ms,
            created_at_ms: t.created_at_ms,
            comments: t.comments.iter().map(Into::into).collect(),
        }
    }
}

// ── Wire → entity ─────────────────────────────────────────────

impl From<WireSkuLog> for SkuLog {
    fn from(l: WireSkuLog) -> Self {
        SkuLog {
            timestamp_ms: l.timestamp_ms,
            count: l.count,
            user_id: l.user_id,
        }
    }
}

impl From<WireComment> for Comment {
    fn from(c: WireComment) -> Self {
        Comment {
            id: c.id,
            author_id: c.author_id,
            text: c.text,
            timestamp_ms: c.timestamp_ms,
        }
    }
}

impl TryFrom<WireUser> for User {
    type Error = WireError;

    fn try_from(w: WireUser) -> Result<Self, WireError> {
        Ok(User {
            id: w.id,
            login: w.login,
            display_name: w.display_name,
            role: role_from_u8(w.role)?,
            password_hash: w.password_hash,
            is_admin: w.is_admin,
            bio: w.bio,
            profile_comments: w.profile_comments.into_iter().map(Into::into).collect(),
            online_since_ms: w.online_since_ms,
            last_active_ms: w.last_active_ms,
        })
    }
}

impl TryFrom<WireTask> for Task {
    type Error = WireError;

    fn try_from(w: WireTask) -> Result<Self, WireError> {
        Ok(Task {
            id: w.id,
            title: w.title,
            description: w.description,
            status: status_from_u8(w.status)?,
            category: category_from_u8(w.category)?,
            tariff: w.tariff.map(tariff_from_u8).transpose()?,
            is_first_party: w.is_first_party,
            sku_quantity: w.sku_quantity,
            completed_sku: w.completed_sku,
            sku_history: w.sku_history.into_iter().map(Into::into).collect(),
            product_id: w.product_id,
            barcodes: w.barcodes,
            completed_barcodes: w.completed_barcodes,
            source_link: w.source_link,
            result_link: w.result_link,
            assignee_ids: w.assignee_ids,
            creator_id: w.creator_id,
            deadline: date_from_epoch_days(w.deadline_epoch_days)?,
            time_spent_seconds: w.time_spent_seconds,
            last_tracking_start_ms: w.last_tracking_start_ms,
            completed_at_ms: w.completed_at_ms,
            created_at_ms: w.created_at_ms,
            comments: w.comments.into_iter().map(Into::into).collect(),
        })
    }
}

// ── Encode / decode ───────────────────────────────────────────

pub fn encode_user(user: &User) -> Result<Vec<u8>, WireError> {
    Ok(postcard::to_allocvec(&WireUser::from(user))?)
}

pub fn decode_user(bytes: &[u8]) -> Result<User, WireError> {
    let wire: WireUser = postcard::from_bytes(bytes)?;
    wire.try_into()
}

pub fn encode_task(task: &Task) -> Result<Vec<u8>, WireError> {
    Ok(postcard::to_allocvec(&WireTask::from(task))?)
}

pub fn decode_task(bytes: &[u8]) -> Result<Task, WireError> {
    let wire: WireTask = postcard::from_bytes(bytes)?;
    wire.try_into()
}

// ── Tests ──────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn full_task() -> Task {
        let uid = Uuid::new_v4();
        Task {
            id: Uuid::new_v4(),
            title: "Infographic batch".into(),
            description: "premium set".into(),
            status: Status::Partial,
            category: Category::Infographic,
            tariff: Some(Tariff::Premium),
            is_first_party: true,
            sku_quantity: 12,
            completed_sku: 5,
            sku_history: vec![
                SkuLog {
                    timestamp_ms: 1_765_800_000_000,
                    count: 6,
                    user_id: uid,
                },
                SkuLog {
                    timestamp_ms: 1_765_800_500_000,
                    count: -1,
                    user_id: uid,
                },
            ],
            product_id: Some("P-1042".into()),
            barcodes: vec!["4780000000011".into(), "4780000000028".into()],
            completed_barcodes: vec!["4780000000011".into()],
            source_link: Some("https://example.test/src".into()),
            result_link: None,
            assignee_ids: vec![uid],
            creator_id: uid,
            deadline: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            time_spent_seconds: 3600,
            last_tracking_start_ms: None,
            completed_at_ms: None,
            created_at_ms: 1_765_700_000_000,
            comments: vec![Comment {
                id: Uuid::new_v4(),
                author_id: uid,
                text: "shadows look off".into(),
                timestamp_ms: 1_765_800_100_000,
            }],
        }
    }

    #[test]
    fn task_round_trip_is_lossless() {
        // A fully-populated task survives the wire with every field intact.
        let task = full_task();
        let decoded = decode_task(&encode_task(&task).unwrap()).unwrap();
        assert_eq!(decoded, task);
    }

    #[test]
    fn user_round_trip_is_lossless() {
        let user = User {
            id: Uuid::new_v4(),
            login: "retoucher1".into(),
            display_name: "Ana".into(),
            role: Role::Retoucher,
            password_hash: "$argon2id$stub".into(),
            is_admin: false,
            bio: Some("skin tones".into()),
            profile_comments: vec![Comment {
                id: Uuid::new_v4(),
                author_id: Uuid::new_v4(),
                text: "fast and careful".into(),
                timestamp_ms: 7,
            }],
            online_since_ms: Some(1_765_800_000_000),
            last_active_ms: Some(1_765_800_060_000),
        };
        let decoded = decode_user(&encode_user(&user).unwrap()).unwrap();
        assert_eq!(decoded, user);
    }

    #[test]
    fn unknown_discriminant_is_an_error_not_a_panic() {
        let mut wire = WireTask::from(&full_task());
        wire.status = 9;
        let bytes = postcard::to_allocvec(&wire).unwrap();
        assert!(matches!(
            decode_task(&bytes),
            Err(WireError::BadDiscriminant("status", 9))
        ));
    }

    #[test]
    fn deadline_crosses_as_epoch_days() {
        let d = NaiveDate::from_ymd_opt(1970, 1, 31).unwrap();
        assert_eq!(date_to_epoch_days(d), 30);
        assert_eq!(date_from_epoch_days(30).unwrap(), d);
    }
}
