//! Gateway to the backing store.
//!
//! The redb file plays the remote relational store: every access goes through
//! this one fallible surface, so callers treat it like a network dependency.
//! A failed read degrades to stale in-memory state, a failed write is logged
//! and reconciled by the next poll, and nothing here is allowed to panic.
//!
//! Field-name translation between entities and stored records lives entirely
//! in wire.rs; this module only moves bytes.

use crate::board::{Role, Task, User};
use crate::wire::{self, WireError};
use argon2::{
    password_hash::{rand_core::OsRng, SaltString},
    Argon2, PasswordHasher,
};
use redb::{Database, ReadableTable, TableDefinition};
use std::sync::Arc;
use uuid::Uuid;

const USERS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("users");
const TASKS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("tasks");

/// Thin handle to the store. Cloneable (Arc inside).
#[derive(Clone)]
pub struct Store {
    db: Arc<Database>,
}

impl Store {
    /// Open (or create) the store at the given path and ensure tables exist.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        {
            let _ = txn.open_table(USERS)?;
            let _ = txn.open_table(TASKS)?;
        }
        txn.commit()?;

        Ok(Store { db: Arc::new(db) })
    }

    // ── Users ──────────────────────────────────────────────────

    pub fn list_users(&self) -> Result<Vec<User>, StoreError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(USERS)?;
        let mut users = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            users.push(wire::decode_user(value.value())?);
        }
        Ok(users)
    }

    pub fn get_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(USERS)?;
        match table.get(id.as_bytes().as_slice())? {
            Some(value) => Ok(Some(wire::decode_user(value.value())?)),
            None => Ok(None),
        }
    }

    pub fn upsert_user(&self, user: &User) -> Result<(), StoreError> {
        let bytes = wire::encode_user(user)?;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(USERS)?;
            table.insert(user.id.as_bytes().as_slice(), bytes.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn delete_user(&self, id: Uuid) -> Result<(), StoreError> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(USERS)?;
            table.remove(id.as_bytes().as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Activity heartbeat: bump last_active_ms without touching anything else.
    pub fn touch_user_activity(&self, id: Uuid, now_ms: i64) -> Result<(), StoreError> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(USERS)?;
            let decoded = match table.get(id.as_bytes().as_slice())? {
                Some(value) => Some(wire::decode_user(value.value())?),
                None => None,
            };
            if let Some(mut user) = decoded {
                user.last_active_ms = Some(now_ms);
                let bytes = wire::encode_user(&user)?;
                table.insert(id.as_bytes().as_slice(), bytes.as_slice())?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    // ── Tasks ──────────────────────────────────────────────────

    pub fn list_tasks(&self) -> Result<Vec<Task>, StoreError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(TASKS)?;
        let mut tasks = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            tasks.push(wire::decode_task(value.value())?);
        }
        Ok(tasks)
    }

    pub fn get_task(&self, id: Uuid) -> Result<Option<Task>, StoreError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(TASKS)?;
        match table.get(id.as_bytes().as_slice())? {
            Some(value) => Ok(Some(wire::decode_task(value.value())?)),
            None => Ok(None),
        }
    }

    pub fn upsert_task(&self, task: &Task) -> Result<(), StoreError> {
        let bytes = wire::encode_task(task)?;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(TASKS)?;
            table.insert(task.id.as_bytes().as_slice(), bytes.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn delete_task(&self, id: Uuid) -> Result<(), StoreError> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(TASKS)?;
            table.remove(id.as_bytes().as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    // ── Seeding ────────────────────────────────────────────────

    /// Seed a default admin account if no users exist. Returns true if created.
    pub fn ensure_default_admin(&self) -> Result<Option<User>, StoreError> {
        if !self.list_users()?.is_empty() {
            return Ok(None);
        }

        let salt = SaltString::generate(&mut OsRng);
        let password_hash = Argon2::default()
            .hash_password(b"admin", &salt)
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .to_string();

        let user = User {
            id: Uuid::new_v4(),
            login: "admin".to_string(),
            display_name: "Studio Admin".to_string(),
            role: Role::Manager,
            password_hash,
            is_admin: true,
            bio: None,
            profile_comments: Vec::new(),
            online_since_ms: None,
            last_active_ms: None,
        };

        self.upsert_user(&user)?;
        Ok(Some(user))
    }
}

// ── Errors ─────────────────────────────────────────────────────

#[derive(Debug)]
pub enum StoreError {
    Backend(String),
    Wire(WireError),
}

// redb 2.x has many error types. Blanket them all into StoreError::Backend.
macro_rules! from_redb {
    ($($t:ty),*) => {
        $(impl From<$t> for StoreError {
            fn from(e: $t) -> Self { StoreError::Backend(e.to_string()) }
        })*
    };
}

from_redb!(
    redb::Error,
    redb::DatabaseError,
    redb::TableError,
    redb::TransactionError,
    redb::StorageError,
    redb::CommitError
);

impl From<WireError> for StoreError {
    fn from(e: WireError) -> Self {
        StoreError::Wire(e)
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Backend(e) => write!(f, "store backend: {e}"),
            StoreError::Wire(e) => write!(f, "store wire: {e}"),
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────
