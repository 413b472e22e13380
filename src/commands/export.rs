use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::io::{self, Write};

use super::Workspace;
use crate::models::{CommentTarget, Notification, Project, Task};
use crate::tracker::Snapshot;

#[derive(Serialize)]
pub struct ExportData {
    pub version: i32,
    pub exported_at: String,
    #[serde(flatten)]
    pub snapshot: Snapshot,
}

/// Fetch every collection and every thread, then snapshot the stores.
pub async fn collect(ws: &Workspace) -> Result<ExportData> {
    ws.tracker.fetch::<Task>().await?;
    ws.tracker.fetch::<Project>().await?;
    ws.tracker.fetch::<Notification>().await?;

    let targets: Vec<CommentTarget> = ws
        .tracker
        .list::<Task>()
        .iter()
        .map(|t| CommentTarget::Task(t.id.to_string()))
        .chain(
            ws.tracker
                .list::<Project>()
                .iter()
                .map(|p| CommentTarget::Project(p.id.to_string())),
        )
        .collect();
    for target in &targets {
        ws.tracker.load_thread(target).await?;
    }

    Ok(ExportData {
        version: 1,
        exported_at: chrono::Utc::now().to_rfc3339(),
        snapshot: ws.tracker.snapshot(),
    })
}

pub async fn run_json(ws: &Workspace, output_path: Option<&str>) -> Result<()> {
    let data = collect(ws).await?;
    let json = serde_json::to_string_pretty(&data)?;

    match output_path {
        Some(path) => {
            fs::write(path, json).context("Failed to write export file")?;
            eprintln!(
                "Exported {} tasks, {} projects, {} comments to {}",
                data.snapshot.tasks.len(),
                data.snapshot.projects.len(),
                data.snapshot.comments.len(),
                path
            );
        }
        None => {
            let mut stdout = io::stdout().lock();
            writeln!(stdout, "{}", json)?;
        }
    }
    Ok(())
}
