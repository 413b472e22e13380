use anyhow::Result;
use std::io::{self, Write};

use super::{short_id, Workspace};
use crate::models::{Entity, Project, RecordId, Task};

fn confirm(kind: &str, id: &RecordId, label: &str) -> Result<bool> {
    print!("Delete {} {} \"{}\"? [y/N] ", kind, short_id(id), label);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("y"))
}

pub async fn task(ws: &Workspace, id: &str, force: bool) -> Result<()> {
    let id = ws.resolve::<Task>(id).await?;
    if !force {
        let label = ws.tracker.get::<Task>(&id).map(|t| t.label().to_string()).unwrap_or_default();
        if !confirm("task", &id, &label)? {
            println!("Cancelled.");
            return Ok(());
        }
    }

    ws.tracker.delete::<Task>(&id).await?;
    println!("Deleted task {}", short_id(&id));
    Ok(())
}

pub async fn project(ws: &Workspace, id: &str, force: bool) -> Result<()> {
    let id = ws.resolve::<Project>(id).await?;
    if !force {
        let label = ws.tracker.get::<Project>(&id).map(|p| p.label().to_string()).unwrap_or_default();
        if !confirm("project", &id, &label)? {
            println!("Cancelled.");
            return Ok(());
        }
    }

    ws.tracker.delete::<Project>(&id).await?;
    println!("Deleted project {}", short_id(&id));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::{grace, setup_workspace};
    use crate::models::{ProjectDraft, TaskDraft};
    use crate::remote::{ListFilter, RemoteCollection};

    // ==================== Unit Tests ====================

    #[tokio::test]
    async fn test_delete_existing_task_force() {
        let (ws, _dir) = setup_workspace();
        let id = ws.tracker.create::<Task>(&TaskDraft::new("To delete")).await.unwrap();

        let result = task(&ws, &id.to_string(), true).await;
        assert!(result.is_ok());

        assert!(ws.tracker.get::<Task>(&id).is_none());
        let remote: Vec<Task> = RemoteCollection::<Task>::list(ws.tracker.remote(), &ListFilter::default())
            .await
            .unwrap();
        assert!(remote.is_empty());
    }

    #[tokio::test]
    async fn test_delete_nonexistent_task() {
        let (ws, _dir) = setup_workspace();
        let result = task(&ws, "99999", true).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("not found"));
    }

    #[tokio::test]
    async fn test_delete_others_project_rejected() {
        let (ws, _dir) = setup_workspace();
        let theirs: Project = RemoteCollection::<Project>::create(ws.tracker.remote(), &ProjectDraft::new("Theirs"), &grace())
            .await
            .unwrap();

        let result = project(&ws, &theirs.id.to_string(), true).await;
        assert!(result.is_err());
        assert!(ws.tracker.get::<Project>(&theirs.id).is_some());
    }

    #[tokio::test]
    async fn test_delete_then_drain_keeps_it_gone() {
        let (mut ws, _dir) = setup_workspace();
        let id = ws.tracker.create::<Task>(&TaskDraft::new("Gone")).await.unwrap();
        task(&ws, &id.to_string(), true).await.unwrap();

        ws.finish().await.unwrap();
        assert!(ws.tracker.get::<Task>(&id).is_none());
    }
}
