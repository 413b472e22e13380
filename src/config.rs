use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::models::User;
use crate::remote::StaticIdentity;

pub const COLLAB_DIR: &str = ".collab";
pub const DB_FILE: &str = "collab.db";
pub const SESSION_FILE: &str = "session.json";

/// Walk up from `start` looking for a `.collab` directory.
pub fn find_collab_dir(start: &Path) -> Result<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let candidate = current.join(COLLAB_DIR);
        if candidate.is_dir() {
            return Ok(candidate);
        }

        if !current.pop() {
            bail!("Not a collab workspace (or any parent). Run 'collab init' first.");
        }
    }
}

pub fn db_path(collab_dir: &Path) -> PathBuf {
    collab_dir.join(DB_FILE)
}

pub fn session_path(collab_dir: &Path) -> PathBuf {
    collab_dir.join(SESSION_FILE)
}

/// Cached sign-in, written by `collab login`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub user: User,
    pub signed_in_at: DateTime<Utc>,
}

pub fn load_session(collab_dir: &Path) -> Result<Option<Session>> {
    let path = session_path(collab_dir);
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let session = serde_json::from_str(&content)
        .with_context(|| format!("Corrupt session file {}", path.display()))?;
    Ok(Some(session))
}

pub fn save_session(collab_dir: &Path, user: &User) -> Result<Session> {
    let session = Session {
        user: user.clone(),
        signed_in_at: Utc::now(),
    };
    let json = serde_json::to_string_pretty(&session)?;
    fs::write(session_path(collab_dir), json).context("Failed to write session file")?;
    Ok(session)
}

/// Remove the cached session. Returns false if nobody was signed in.
pub fn clear_session(collab_dir: &Path) -> Result<bool> {
    let path = session_path(collab_dir);
    if !path.exists() {
        return Ok(false);
    }
    fs::remove_file(&path).context("Failed to remove session file")?;
    Ok(true)
}

/// Identity backed by the cached session; anonymous when signed out.
pub fn identity(collab_dir: &Path) -> Result<StaticIdentity> {
    Ok(match load_session(collab_dir)? {
        Some(session) => StaticIdentity::signed_in(session.user),
        None => StaticIdentity::anonymous(),
    })
}
