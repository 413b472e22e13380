use anyhow::Result;

use super::{short_id, truncate, Workspace};
use crate::models::{Project, Task, TaskStatus};

pub async fn tasks(ws: &Workspace, status: Option<&str>, search: Option<&str>) -> Result<()> {
    let status = status.map(str::parse::<TaskStatus>).transpose()?;
    ws.tracker.fetch::<Task>().await?;

    let tasks: Vec<Task> = ws
        .tracker
        .task_view(search)
        .into_iter()
        .filter(|t| status.map_or(true, |s| t.status == s))
        .collect();

    if tasks.is_empty() {
        println!("No tasks found.");
        return Ok(());
    }

    for task in tasks {
        let status_display = format!("[{}]", task.status);
        let due = task
            .due_date
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<8} {:13} {:<40} {:10} {}",
            short_id(&task.id),
            status_display,
            truncate(&task.title, 40),
            due,
            task.created_by
        );
    }

    Ok(())
}

pub async fn projects(ws: &Workspace, search: Option<&str>) -> Result<()> {
    ws.tracker.fetch::<Project>().await?;
    let projects = ws.tracker.project_view(search);

    if projects.is_empty() {
        println!("No projects found.");
        return Ok(());
    }

    for project in projects {
        let status_display = format!("[{}]", project.status);
        let deadline = project
            .deadline
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<8} {:13} {:<40} {:10} {}",
            short_id(&project.id),
            status_display,
            truncate(&project.name, 40),
            deadline,
            project.created_by
        );
    }

    Ok(())
}
