use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::config::{self, COLLAB_DIR};
use crate::db::Database;

const GITIGNORE: &str = "# Local tracker state\ncollab.db\nsession.json\n";

pub fn run(path: &Path) -> Result<()> {
    let collab_dir = path.join(COLLAB_DIR);

    if collab_dir.exists() {
        println!("Already initialized at {}", path.display());
        return Ok(());
    }

    fs::create_dir_all(&collab_dir).context("Failed to create .collab directory")?;
    Database::open(&config::db_path(&collab_dir))?;
    fs::write(collab_dir.join(".gitignore"), GITIGNORE).context("Failed to write .gitignore")?;
    println!("Created {}", collab_dir.display());

    println!("Collab workspace initialized successfully!");
    println!("\nNext steps:");
    println!("  collab login --name \"Your Name\" --email you@example.com");
    println!("  collab task create \"Task\"");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Task, TaskDraft, User};
    use crate::remote::{ListFilter, RemoteCollection};
    use tempfile::tempdir;

    #[test]
    fn test_run_fresh_init() {
        let dir = tempdir().unwrap();
        let result = run(dir.path());
        assert!(result.is_ok());

        assert!(dir.path().join(".collab").is_dir());
        assert!(dir.path().join(".collab/collab.db").exists());
        assert!(dir.path().join(".collab/.gitignore").exists());
    }

    #[test]
    fn test_run_twice_keeps_data() {
        let dir = tempdir().unwrap();
        run(dir.path()).unwrap();
        let marker = dir.path().join(".collab/.gitignore");
        fs::write(&marker, "custom").unwrap();

        run(dir.path()).unwrap();
        assert_eq!(fs::read_to_string(&marker).unwrap(), "custom");
    }

    #[tokio::test]
    async fn test_database_usable_after_init() {
        let dir = tempdir().unwrap();
        run(dir.path()).unwrap();

        let db = Database::open(&dir.path().join(".collab/collab.db")).unwrap();
        let user = User {
            id: "u1".to_string(),
            name: "Ada".to_string(),
            email: String::new(),
        };
        RemoteCollection::<Task>::create(&db, &TaskDraft::new("Test task"), &user)
            .await
            .unwrap();
        let tasks: Vec<Task> = RemoteCollection::<Task>::list(&db, &ListFilter::default())
            .await
            .unwrap();
        assert_eq!(tasks.len(), 1);
    }

    #[test]
    fn test_gitignore_lists_local_files() {
        assert!(GITIGNORE.contains("collab.db"));
        assert!(GITIGNORE.contains("session.json"));
    }
}
