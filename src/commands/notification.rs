use anyhow::Result;

use super::{short_id, Workspace};
use crate::models::Notification;

pub async fn list(ws: &Workspace, unread_only: bool) -> Result<()> {
    ws.tracker.fetch::<Notification>().await?;
    let notifications: Vec<Notification> = ws
        .tracker
        .notification_view()
        .into_iter()
        .filter(|n| !unread_only || !n.read)
        .collect();

    if notifications.is_empty() {
        println!("No notifications.");
        return Ok(());
    }

    for n in &notifications {
        let marker = if n.read { " " } else { "*" };
        println!(
            "{} {:<8} {} {}",
            marker,
            short_id(&n.id),
            n.created_at.format("%Y-%m-%d %H:%M"),
            n.message
        );
    }
    println!("\n{} unread", ws.tracker.unread_count());
    Ok(())
}

pub async fn read(ws: &Workspace, id: &str) -> Result<()> {
    let id = ws.resolve::<Notification>(id).await?;
    ws.tracker.mark_read(&id).await?;
    println!("Marked {} as read", short_id(&id));
    Ok(())
}

pub async fn read_all(ws: &Workspace) -> Result<()> {
    ws.tracker.fetch::<Notification>().await?;
    let marked = ws.tracker.mark_all_read().await?;
    println!("Marked {} notification(s) as read", marked);
    Ok(())
}

pub async fn delete(ws: &Workspace, id: &str) -> Result<()> {
    let id = ws.resolve::<Notification>(id).await?;
    ws.tracker.delete_notification(&id).await?;
    println!("Deleted notification {}", short_id(&id));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::{grace, setup_workspace};
    use crate::models::{NotificationDraft, Task, TaskDraft};
    use crate::remote::RemoteCollection;

    async fn seed(ws: &Workspace, titles: &[&str]) {
        for title in titles {
            ws.tracker.create::<Task>(&TaskDraft::new(*title)).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_list_only_mine() {
        let (ws, _dir) = setup_workspace();
        seed(&ws, &["A"]).await;
        let draft = NotificationDraft {
            message: "for grace".to_string(),
            user_id: "u2".to_string(),
        };
        RemoteCollection::<Notification>::create(ws.tracker.remote(), &draft, &grace())
            .await
            .unwrap();

        list(&ws, false).await.unwrap();
        let view = ws.tracker.notification_view();
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].message, "Task \"A\" created!");
    }

    #[tokio::test]
    async fn test_read_one() {
        let (ws, _dir) = setup_workspace();
        seed(&ws, &["A", "B"]).await;
        let id = ws.tracker.notification_view()[0].id.clone();

        read(&ws, &id.to_string()).await.unwrap();
        assert_eq!(ws.tracker.unread_count(), 1);
        assert!(list(&ws, true).await.is_ok());
    }

    #[tokio::test]
    async fn test_read_all() {
        let (ws, _dir) = setup_workspace();
        seed(&ws, &["A", "B", "C"]).await;
        read_all(&ws).await.unwrap();
        assert_eq!(ws.tracker.unread_count(), 0);
    }

    #[tokio::test]
    async fn test_delete() {
        let (ws, _dir) = setup_workspace();
        seed(&ws, &["A"]).await;
        let id = ws.tracker.notification_view()[0].id.clone();

        delete(&ws, &id.to_string()).await.unwrap();
        ws.tracker.fetch::<Notification>().await.unwrap();
        assert!(ws.tracker.list::<Notification>().is_empty());
    }
}
