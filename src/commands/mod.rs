//! CLI command handlers.
//!
//! Each command runs inside a [`Workspace`]: a tracker over the local
//! database, subscribed to the database's change channel. After the command,
//! [`Workspace::finish`] folds the events it produced back into the stores.

pub mod auth;
pub mod comment;
pub mod create;
pub mod delete;
pub mod export;
pub mod init;
pub mod list;
pub mod notification;
pub mod show;
pub mod status;
pub mod update;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::config;
use crate::db::Database;
use crate::models::{Entity, RecordId};
use crate::realtime::{LocalChannel, Subscription};
use crate::remote::{RemoteCollection, StaticIdentity};
use crate::tracker::{Tracked, Tracker};

pub type Session = Tracker<Database, StaticIdentity>;

pub struct Workspace {
    pub tracker: Session,
    dir: PathBuf,
    subscription: Option<Subscription>,
    // Keeps the channel's registry alive for the subscription.
    _channel: LocalChannel,
}

impl Workspace {
    /// Open the workspace rooted at `collab_dir` (the `.collab` directory).
    pub fn open(collab_dir: &Path) -> Result<Self> {
        let channel = LocalChannel::new();
        let db = Database::open(&config::db_path(collab_dir))?.with_channel(channel.clone());
        let identity = config::identity(collab_dir)?;
        let tracker = Tracker::new(db, identity);
        // Signed-out sessions only read; nothing to reconcile.
        let subscription = tracker.subscribe(&channel).ok();

        Ok(Workspace {
            tracker,
            dir: collab_dir.to_path_buf(),
            subscription,
            _channel: channel,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Fold pending realtime events into the stores.
    pub async fn finish(&mut self) -> Result<usize> {
        let Some(subscription) = self.subscription.as_mut() else {
            return Ok(0);
        };
        let applied = self.tracker.drain(subscription).await?;
        debug!(applied, "workspace drained");
        Ok(applied)
    }

    /// Drain pending events, then hand back the command's own result. A
    /// drain failure is logged and never reported in its place.
    pub async fn settle<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = self.finish().await {
            warn!(error = %err, "draining realtime events failed");
        }
        result
    }

    /// Fetch `T` and resolve `input` as a full id or unique prefix.
    pub async fn resolve<T: Tracked>(&self, input: &str) -> Result<RecordId>
    where
        Database: RemoteCollection<T>,
    {
        self.tracker.fetch::<T>().await?;
        resolve_id(&self.tracker.list::<T>(), input)
    }
}

/// Match `input` against confirmed ids: an exact match wins, otherwise the
/// prefix must be unambiguous.
pub fn resolve_id<T: Entity>(records: &[T], input: &str) -> Result<RecordId> {
    let input = input.trim();
    if input.is_empty() {
        bail!("{} id is required", T::KIND.title());
    }

    let ids: Vec<&str> = records.iter().filter_map(|r| r.id().as_confirmed()).collect();
    if let Some(id) = ids.iter().find(|id| **id == input) {
        return Ok(RecordId::confirmed(*id));
    }

    let matches: Vec<&str> = ids.into_iter().filter(|id| id.starts_with(input)).collect();
    match matches.as_slice() {
        [] => bail!("{} {} not found", T::KIND.title(), input),
        [id] => Ok(RecordId::confirmed(*id)),
        _ => bail!(
            "{} id '{}' is ambiguous ({} matches)",
            T::KIND.title(),
            input,
            matches.len()
        ),
    }
}

/// Parse a `YYYY-MM-DD` date as midnight UTC.
pub fn parse_date(input: &str) -> Result<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(input.trim(), "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{}'. Use YYYY-MM-DD", input))?;
    match date.and_hms_opt(0, 0, 0) {
        Some(dt) => Ok(dt.and_utc()),
        None => bail!("Invalid date '{}'", input),
    }
}

/// First 8 chars of an id, enough to type back.
pub fn short_id(id: &RecordId) -> String {
    id.to_string().chars().take(8).collect()
}

pub fn truncate(s: &str, max_chars: usize) -> String {
    let char_count = s.chars().count();
    if char_count <= max_chars {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", truncated)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::models::{Task, TaskDraft};
    use chrono::Datelike;
    use proptest::prelude::*;

    // ==================== Unit Tests ====================

    #[test]
    fn test_parse_date() {
        let dt = parse_date("2026-03-14").unwrap();
        assert_eq!((dt.year(), dt.month(), dt.day()), (2026, 3, 14));
        assert!(parse_date("14/03/2026").is_err());
        assert!(parse_date("2026-02-30").is_err());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a long task title", 10), "a long ...");
        assert_eq!(truncate("abcdef", 2), "...");
        assert_eq!(truncate("abcdef", 0), "...");
    }

    #[tokio::test]
    async fn test_resolve_prefix() {
        let (ws, _dir) = setup_workspace();
        let id = ws.tracker.create::<Task>(&TaskDraft::new("A")).await.unwrap();
        let full = id.to_string();

        assert_eq!(ws.resolve::<Task>(&full).await.unwrap(), id);
        assert_eq!(ws.resolve::<Task>(&full[..6]).await.unwrap(), id);
        assert!(ws.resolve::<Task>("zzzz").await.is_err());
        assert!(ws.resolve::<Task>("").await.is_err());
    }

    #[tokio::test]
    async fn test_finish_drains_own_echoes() {
        let (mut ws, _dir) = setup_workspace();
        ws.tracker.create::<Task>(&TaskDraft::new("A")).await.unwrap();
        // Task create plus its notification.
        assert_eq!(ws.finish().await.unwrap(), 2);
        assert_eq!(ws.finish().await.unwrap(), 0);
        assert_eq!(ws.tracker.list::<Task>().len(), 1);
    }

    #[tokio::test]
    async fn test_settle_keeps_command_error_when_drain_fails() {
        let (mut ws, dir) = setup_workspace();
        let db = config::db_path(&dir.path().join(config::COLLAB_DIR));
        rusqlite::Connection::open(db)
            .unwrap()
            .execute("DROP TABLE tasks", [])
            .unwrap();

        // A reconnect forces a refetch, which now fails.
        ws._channel.reconnect_all();
        assert!(ws.finish().await.is_err());

        ws._channel.reconnect_all();
        let result: Result<()> = ws.settle(Err(anyhow::anyhow!("command failed"))).await;
        assert_eq!(result.unwrap_err().to_string(), "command failed");

        ws._channel.reconnect_all();
        assert_eq!(ws.settle(Ok(7)).await.unwrap(), 7);
    }

    #[test]
    fn test_signed_out_workspace_has_no_subscription() {
        let dir = tempfile::tempdir().unwrap();
        let collab_dir = dir.path().join(config::COLLAB_DIR);
        std::fs::create_dir(&collab_dir).unwrap();
        let ws = Workspace::open(&collab_dir).unwrap();
        assert!(ws.subscription.is_none());
    }

    proptest! {
        #[test]
        fn prop_truncate_never_exceeds(s in ".{0,80}", max in 4usize..40) {
            prop_assert!(truncate(&s, max).chars().count() <= max);
        }
    }
}
