use anyhow::{bail, Result};
use chrono::{DateTime, Utc};

use super::{parse_date, short_id, Workspace};
use crate::models::{Project, ProjectPatch, ProjectStatus, RecordId, Task, TaskPatch, TaskStatus};
use crate::mutation::Resolution;

/// `""` clears an optional date, anything else must parse.
fn date_change(input: Option<&str>) -> Result<Option<Option<DateTime<Utc>>>> {
    match input {
        None => Ok(None),
        Some(s) if s.trim().is_empty() => Ok(Some(None)),
        Some(s) => Ok(Some(Some(parse_date(s)?))),
    }
}

fn report(kind: &str, id: &RecordId, resolution: Resolution) {
    match resolution {
        Resolution::Stale => println!("Updated {} {} (superseded by a newer edit)", kind, short_id(id)),
        _ => println!("Updated {} {}", kind, short_id(id)),
    }
}

pub async fn task(
    ws: &Workspace,
    id: &str,
    title: Option<&str>,
    description: Option<&str>,
    status: Option<&str>,
    due: Option<&str>,
) -> Result<()> {
    let patch = TaskPatch {
        title: title.map(str::to_string),
        description: description.map(str::to_string),
        status: status.map(str::parse::<TaskStatus>).transpose()?,
        due_date: date_change(due)?,
    };
    if patch.is_empty() {
        bail!("Nothing to update. Use --title, --description, --status or --due");
    }

    let id = ws.resolve::<Task>(id).await?;
    let resolution = ws.tracker.update::<Task>(&id, &patch).await?;
    report("task", &id, resolution);
    Ok(())
}

pub async fn project(
    ws: &Workspace,
    id: &str,
    name: Option<&str>,
    description: Option<&str>,
    status: Option<&str>,
    deadline: Option<&str>,
) -> Result<()> {
    let patch = ProjectPatch {
        name: name.map(str::to_string),
        description: description.map(str::to_string),
        deadline: date_change(deadline)?,
        status: status.map(str::parse::<ProjectStatus>).transpose()?,
    };
    if patch.is_empty() {
        bail!("Nothing to update. Use --name, --description, --status or --deadline");
    }

    let id = ws.resolve::<Project>(id).await?;
    let resolution = ws.tracker.update::<Project>(&id, &patch).await?;
    report("project", &id, resolution);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::{grace, setup_workspace};
    use crate::models::{ProjectDraft, TaskDraft};
    use crate::remote::RemoteCollection;

    // ==================== Unit Tests ====================

    #[test]
    fn test_date_change() {
        assert!(date_change(None).unwrap().is_none());
        assert_eq!(date_change(Some("")).unwrap(), Some(None));
        assert!(date_change(Some("2026-01-01")).unwrap().unwrap().is_some());
        assert!(date_change(Some("soon")).is_err());
    }

    #[tokio::test]
    async fn test_update_title() {
        let (ws, _dir) = setup_workspace();
        let id = ws.tracker.create::<Task>(&TaskDraft::new("Old")).await.unwrap();

        task(&ws, &id.to_string(), Some("New"), None, None, None).await.unwrap();
        let updated = ws.tracker.get::<Task>(&id).unwrap();
        assert_eq!(updated.title, "New");
        assert_eq!(updated.updated_by.as_deref(), Some("Ada"));
    }

    #[tokio::test]
    async fn test_update_keeps_other_fields() {
        let (ws, _dir) = setup_workspace();
        let draft = TaskDraft {
            title: "A".to_string(),
            description: "keep".to_string(),
            ..Default::default()
        };
        let id = ws.tracker.create::<Task>(&draft).await.unwrap();

        task(&ws, &id.to_string(), None, None, Some("completed"), None).await.unwrap();
        let updated = ws.tracker.get::<Task>(&id).unwrap();
        assert_eq!(updated.status, TaskStatus::Completed);
        assert_eq!(updated.description, "keep");
    }

    #[tokio::test]
    async fn test_update_nothing() {
        let (ws, _dir) = setup_workspace();
        let id = ws.tracker.create::<Task>(&TaskDraft::new("A")).await.unwrap();
        let result = task(&ws, &id.to_string(), None, None, None, None).await;
        assert!(result.unwrap_err().to_string().contains("Nothing to update"));
    }

    #[tokio::test]
    async fn test_update_others_task_rejected() {
        let (ws, _dir) = setup_workspace();
        let theirs: Task = RemoteCollection::<Task>::create(ws.tracker.remote(), &TaskDraft::new("Theirs"), &grace())
            .await
            .unwrap();

        let result = task(&ws, &theirs.id.to_string(), Some("Mine"), None, None, None).await;
        assert!(result.unwrap_err().to_string().contains("Not authorized"));
    }

    #[tokio::test]
    async fn test_update_project_clears_deadline() {
        let (ws, _dir) = setup_workspace();
        let draft = ProjectDraft {
            name: "Launch".to_string(),
            deadline: Some(parse_date("2026-06-01").unwrap()),
            ..Default::default()
        };
        let id = ws.tracker.create::<Project>(&draft).await.unwrap();

        project(&ws, &id.to_string(), None, None, None, Some("")).await.unwrap();
        assert!(ws.tracker.get::<Project>(&id).unwrap().deadline.is_none());
    }
}
