//! Local session flag.
//!
//! The current user's id lives as an opaque string in one well-known file,
//! independent of the store. Absence of the file means "logged out". This is
//! deliberately not an auth token, just the client-side marker of who is
//! driving this process.

use std::fs;
use std::io;
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct Session {
    path: PathBuf,
}

impl Session {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Session { path: path.into() }
    }

    /// The logged-in user, if any. An unreadable or garbled flag file counts
    /// as logged out rather than an error.
    pub fn current_user(&self) -> Option<Uuid> {
        let raw = fs::read_to_string(&self.path).ok()?;
        Uuid::parse_str(raw.trim()).ok()
    }

    /// Set or clear the flag. Writes go through temp + rename so a crash
    /// never leaves a half-written id behind.
    pub fn set_current_user(&self, user: Option<Uuid>) -> io::Result<()> {
        match user {
            Some(id) => {
                let tmp = self.path.with_extension("tmp");
                fs::write(&tmp, id.to_string())?;
                fs::rename(tmp, &self.path)
            }
            None => match fs::remove_file(&self.path) {
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                other => other,
            },
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────
