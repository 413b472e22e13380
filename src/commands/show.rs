use anyhow::{bail, Result};

use super::{comment, Workspace};
use crate::models::{CommentTarget, Project, Task};

pub async fn task(ws: &Workspace, id: &str) -> Result<()> {
    let id = ws.resolve::<Task>(id).await?;
    let task = match ws.tracker.get::<Task>(&id) {
        Some(t) => t,
        None => bail!("Task {} not found", id),
    };

    println!("Task {}: {}", task.id, task.title);
    println!("Status: {}", task.status);
    if let Some(due) = task.due_date {
        println!("Due: {}", due.format("%Y-%m-%d"));
    }
    println!("Created: {} by {}", task.created_at.format("%Y-%m-%d %H:%M:%S"), task.created_by);
    match &task.updated_by {
        Some(by) => println!("Updated: {} by {}", task.updated_at.format("%Y-%m-%d %H:%M:%S"), by),
        None => println!("Updated: {}", task.updated_at.format("%Y-%m-%d %H:%M:%S")),
    }

    if !task.description.is_empty() {
        println!("\nDescription:");
        for line in task.description.lines() {
            println!("  {}", line);
        }
    }

    let target = CommentTarget::Task(id.to_string());
    let forest = ws.tracker.load_thread(&target).await?;
    if !forest.is_empty() {
        println!("\nComments:");
        comment::print_forest(&forest, 1);
    }

    Ok(())
}

pub async fn project(ws: &Workspace, id: &str) -> Result<()> {
    let id = ws.resolve::<Project>(id).await?;
    let project = match ws.tracker.get::<Project>(&id) {
        Some(p) => p,
        None => bail!("Project {} not found", id),
    };

    println!("Project {}: {}", project.id, project.name);
    println!("Status: {}", project.status);
    if let Some(deadline) = project.deadline {
        println!("Deadline: {}", deadline.format("%Y-%m-%d"));
    }
    println!(
        "Created: {} by {}",
        project.created_at.format("%Y-%m-%d %H:%M:%S"),
        project.created_by
    );
    if let Some(by) = &project.updated_by {
        println!("Updated: {} by {}", project.updated_at.format("%Y-%m-%d %H:%M:%S"), by);
    }

    if !project.description.is_empty() {
        println!("\nDescription:");
        for line in project.description.lines() {
            println!("  {}", line);
        }
    }

    let target = CommentTarget::Project(id.to_string());
    let forest = ws.tracker.load_thread(&target).await?;
    if !forest.is_empty() {
        println!("\nComments:");
        comment::print_forest(&forest, 1);
    }

    Ok(())
}
