use anyhow::{bail, Result};

use super::Workspace;
use crate::comments::{flatten, CommentNode};
use crate::models::{Comment, CommentTarget, Project, Task};

/// Which record a comment command addresses, from `--task` / `--project`.
pub async fn target(ws: &Workspace, task: Option<&str>, project: Option<&str>) -> Result<CommentTarget> {
    match (task, project) {
        (Some(id), None) => Ok(CommentTarget::Task(ws.resolve::<Task>(id).await?.to_string())),
        (None, Some(id)) => Ok(CommentTarget::Project(ws.resolve::<Project>(id).await?.to_string())),
        _ => bail!("Specify exactly one of --task or --project"),
    }
}

fn short(id: &str) -> String {
    id.chars().take(8).collect()
}

fn print_comment(comment: &Comment, indent: usize) {
    let prefix = "  ".repeat(indent);
    println!(
        "{}[{}] {} ({}): {}",
        prefix,
        comment.created_at.format("%Y-%m-%d %H:%M"),
        comment.author_name,
        short(&comment.id),
        comment.text
    );
}

/// Print a thread with replies indented under their parents.
pub fn print_forest(forest: &[CommentNode], indent: usize) {
    for (comment, depth) in flatten(forest) {
        print_comment(comment, indent + depth);
    }
}

/// Expand a comment id prefix within a loaded thread.
fn resolve_comment(forest: &[CommentNode], input: &str) -> Result<String> {
    let mut matches = Vec::new();
    for (comment, _) in flatten(forest) {
        if comment.id == input {
            return Ok(comment.id.clone());
        }
        if comment.id.starts_with(input) {
            matches.push(comment.id.clone());
        }
    }
    match matches.len() {
        0 => bail!("Comment {} not found", input),
        1 => Ok(matches.remove(0)),
        n => bail!("Comment id '{}' is ambiguous ({} matches)", input, n),
    }
}

pub async fn add(ws: &Workspace, target: &CommentTarget, text: &str, reply_to: Option<&str>) -> Result<()> {
    let parent = match reply_to {
        Some(input) => {
            let forest = ws.tracker.load_thread(target).await?;
            Some(resolve_comment(&forest, input)?)
        }
        None => None,
    };

    let comment = ws.tracker.add_comment(target, text, parent.as_deref()).await?;
    match parent {
        Some(parent) => println!("Replied to {} on {}", short(&parent), target),
        None => println!("Added comment {} on {}", short(&comment.id), target),
    }
    Ok(())
}

pub async fn list(ws: &Workspace, target: &CommentTarget) -> Result<()> {
    let forest = ws.tracker.load_thread(target).await?;

    if forest.is_empty() {
        println!("No comments on {}.", target);
        return Ok(());
    }

    print_forest(&forest, 0);
    Ok(())
}

pub async fn delete(ws: &Workspace, target: &CommentTarget, id: &str) -> Result<()> {
    let forest = ws.tracker.load_thread(target).await?;
    let id = resolve_comment(&forest, id)?;

    let removed = ws.tracker.delete_comment(target, &id).await?;
    if removed > 1 {
        println!("Deleted comment {} and {} replies", short(&id), removed - 1);
    } else {
        println!("Deleted comment {}", short(&id));
    }
    Ok(())
}
