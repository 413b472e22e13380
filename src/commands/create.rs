use anyhow::Result;

use super::{parse_date, short_id, Workspace};
use crate::models::{Project, ProjectDraft, ProjectStatus, Task, TaskDraft, TaskStatus};

pub async fn task(
    ws: &Workspace,
    title: &str,
    description: Option<&str>,
    status: &str,
    due: Option<&str>,
) -> Result<()> {
    let draft = TaskDraft {
        title: title.to_string(),
        description: description.unwrap_or_default().to_string(),
        status: status.parse::<TaskStatus>()?,
        due_date: due.map(parse_date).transpose()?,
    };

    let id = ws.tracker.create::<Task>(&draft).await?;
    println!("Created task {} \"{}\"", short_id(&id), draft.title.trim());
    Ok(())
}

pub async fn project(
    ws: &Workspace,
    name: &str,
    description: Option<&str>,
    status: &str,
    deadline: Option<&str>,
) -> Result<()> {
    let draft = ProjectDraft {
        name: name.to_string(),
        description: description.unwrap_or_default().to_string(),
        deadline: deadline.map(parse_date).transpose()?,
        status: status.parse::<ProjectStatus>()?,
    };

    let id = ws.tracker.create::<Project>(&draft).await?;
    println!("Created project {} \"{}\"", short_id(&id), draft.name.trim());
    Ok(())
}
