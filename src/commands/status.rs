use anyhow::Result;

use super::{short_id, Workspace};
use crate::models::{Task, TaskPatch, TaskStatus};

async fn set_status(ws: &Workspace, id: &str, status: TaskStatus) -> Result<()> {
    let id = ws.resolve::<Task>(id).await?;
    if ws.tracker.get::<Task>(&id).is_some_and(|t| t.status == status) {
        println!("Task {} is already {}", short_id(&id), status);
        return Ok(());
    }

    let patch = TaskPatch {
        status: Some(status),
        ..Default::default()
    };
    ws.tracker.update::<Task>(&id, &patch).await?;
    match status {
        TaskStatus::Completed => println!("Completed task {}", short_id(&id)),
        _ => println!("Reopened task {}", short_id(&id)),
    }
    Ok(())
}

pub async fn complete(ws: &Workspace, id: &str) -> Result<()> {
    set_status(ws, id, TaskStatus::Completed).await
}

pub async fn reopen(ws: &Workspace, id: &str) -> Result<()> {
    set_status(ws, id, TaskStatus::Pending).await
}
