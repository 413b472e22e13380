use anyhow::{bail, Result};
use std::path::Path;

use crate::config;
use crate::models::User;

/// Stable user id: the explicit one, else the lowercased email, else the name.
fn user_id(id: Option<&str>, name: &str, email: &str) -> Option<String> {
    [id.unwrap_or(""), email, name]
        .iter()
        .map(|s| s.trim())
        .find(|s| !s.is_empty())
        .map(str::to_lowercase)
}

pub fn login(collab_dir: &Path, name: &str, email: &str, id: Option<&str>) -> Result<()> {
    let Some(id) = user_id(id, name, email) else {
        bail!("A name or email is required to log in");
    };
    let user = User {
        id,
        name: name.trim().to_string(),
        email: email.trim().to_string(),
    };

    if let Some(existing) = config::load_session(collab_dir)? {
        if existing.user.id != user.id {
            println!("Signed out {}", existing.user.display_name());
        }
    }

    config::save_session(collab_dir, &user)?;
    println!("Signed in as {} ({})", user.display_name(), user.id);
    Ok(())
}

pub fn logout(collab_dir: &Path) -> Result<()> {
    if config::clear_session(collab_dir)? {
        println!("Signed out.");
    } else {
        println!("Not signed in.");
    }
    Ok(())
}

pub fn whoami(collab_dir: &Path) -> Result<()> {
    match config::load_session(collab_dir)? {
        Some(session) => {
            println!("{} ({})", session.user.display_name(), session.user.id);
            if !session.user.email.is_empty() {
                println!("Email: {}", session.user.email);
            }
            println!(
                "Signed in: {}",
                session.signed_in_at.format("%Y-%m-%d %H:%M:%S")
            );
        }
        None => println!("Not signed in. Run 'collab login' first."),
    }
    Ok(())
}
