use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::env;
use std::path::{Path, PathBuf};

use collab::commands::{self, Workspace};
use collab::config;
use collab::logging::{self, LogFormat};

#[derive(Parser)]
#[command(name = "collab")]
#[command(about = "A collaborative task and project tracker")]
#[command(version)]
struct Cli {
    /// Directory to search for the .collab workspace (default: current directory)
    #[arg(long, global = true, env = "COLLAB_DIR")]
    dir: Option<PathBuf>,

    /// Log filter, e.g. "info" or "collab=debug"
    #[arg(long, global = true, env = "COLLAB_LOG", default_value = "warn")]
    log_level: String,

    /// Log output format (compact, json)
    #[arg(long, global = true, env = "COLLAB_LOG_FORMAT", default_value = "compact")]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a collab workspace in the current directory
    Init,

    /// Sign in; the identity is cached in the workspace
    Login {
        /// Display name
        #[arg(short, long, default_value = "")]
        name: String,
        /// Email address
        #[arg(short, long, default_value = "")]
        email: String,
        /// Explicit user id (default: email, else name)
        #[arg(long)]
        id: Option<String>,
    },

    /// Sign out
    Logout,

    /// Show the signed-in user
    Whoami,

    #[command(flatten)]
    Tracker(TrackerCommands),
}

/// Commands that run inside a tracker session.
#[derive(Subcommand)]
enum TrackerCommands {
    /// Task management
    Task {
        #[command(subcommand)]
        action: TaskCommands,
    },

    /// Project management
    Project {
        #[command(subcommand)]
        action: ProjectCommands,
    },

    /// Threaded comments on a task or project
    Comment {
        #[command(subcommand)]
        action: CommentCommands,
    },

    /// Your notifications
    Notification {
        #[command(subcommand)]
        action: NotificationCommands,
    },

    /// Export tasks, projects, notifications and comments as JSON
    Export {
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<String>,
    },
}

#[derive(Subcommand)]
enum TaskCommands {
    /// Create a new task
    Create {
        /// Task title
        title: String,
        /// Task description
        #[arg(short, long)]
        description: Option<String>,
        /// Status (pending, in-progress, completed)
        #[arg(short, long, default_value = "pending")]
        status: String,
        /// Due date (YYYY-MM-DD)
        #[arg(long)]
        due: Option<String>,
    },

    /// List tasks, newest first
    List {
        /// Filter by status
        #[arg(short, long)]
        status: Option<String>,
        /// Case-insensitive title search
        #[arg(short = 'q', long)]
        search: Option<String>,
    },

    /// Show task details and comments
    Show {
        /// Task id or unique prefix
        id: String,
    },

    /// Update a task
    Update {
        /// Task id or unique prefix
        id: String,
        /// New title
        #[arg(short, long)]
        title: Option<String>,
        /// New description
        #[arg(short, long)]
        description: Option<String>,
        /// New status
        #[arg(short, long)]
        status: Option<String>,
        /// New due date (YYYY-MM-DD, empty to clear)
        #[arg(long)]
        due: Option<String>,
    },

    /// Mark a task completed
    Complete {
        /// Task id or unique prefix
        id: String,
    },

    /// Set a task back to pending
    Reopen {
        /// Task id or unique prefix
        id: String,
    },

    /// Delete a task
    Delete {
        /// Task id or unique prefix
        id: String,
        /// Skip confirmation
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum ProjectCommands {
    /// Create a new project
    Create {
        /// Project name
        name: String,
        /// Project description
        #[arg(short, long)]
        description: Option<String>,
        /// Status (not-started, in-progress, completed)
        #[arg(short, long, default_value = "not-started")]
        status: String,
        /// Deadline (YYYY-MM-DD)
        #[arg(long)]
        deadline: Option<String>,
    },

    /// List projects, newest first
    List {
        /// Case-insensitive name search
        #[arg(short = 'q', long)]
        search: Option<String>,
    },

    /// Show project details and comments
    Show {
        /// Project id or unique prefix
        id: String,
    },

    /// Update a project
    Update {
        /// Project id or unique prefix
        id: String,
        /// New name
        #[arg(short, long)]
        name: Option<String>,
        /// New description
        #[arg(short, long)]
        description: Option<String>,
        /// New status
        #[arg(short, long)]
        status: Option<String>,
        /// New deadline (YYYY-MM-DD, empty to clear)
        #[arg(long)]
        deadline: Option<String>,
    },

    /// Delete a project
    Delete {
        /// Project id or unique prefix
        id: String,
        /// Skip confirmation
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Args)]
struct TargetArgs {
    /// Task id or unique prefix
    #[arg(long)]
    task: Option<String>,
    /// Project id or unique prefix
    #[arg(long)]
    project: Option<String>,
}

#[derive(Subcommand)]
enum CommentCommands {
    /// Add a comment or reply
    Add {
        #[command(flatten)]
        target: TargetArgs,
        /// Comment text
        text: String,
        /// Comment id (or prefix) to reply to
        #[arg(short, long)]
        reply_to: Option<String>,
    },

    /// Show the comment thread
    List {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Delete a comment and all replies under it
    Delete {
        #[command(flatten)]
        target: TargetArgs,
        /// Comment id or unique prefix
        id: String,
    },
}

#[derive(Subcommand)]
enum NotificationCommands {
    /// List notifications, newest first
    List {
        /// Only unread notifications
        #[arg(short, long)]
        unread: bool,
    },

    /// Mark a notification read
    Read {
        /// Notification id or unique prefix
        id: String,
    },

    /// Mark every notification read
    ReadAll,

    /// Delete a notification
    Delete {
        /// Notification id or unique prefix
        id: String,
    },
}

fn find_collab_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    let start = match explicit {
        Some(dir) => dir.to_path_buf(),
        None => env::current_dir()?,
    };
    config::find_collab_dir(&start)
}

async fn run_task(ws: &Workspace, action: TaskCommands) -> Result<()> {
    match action {
        TaskCommands::Create {
            title,
            description,
            status,
            due,
        } => commands::create::task(ws, &title, description.as_deref(), &status, due.as_deref()).await,
        TaskCommands::List { status, search } => {
            commands::list::tasks(ws, status.as_deref(), search.as_deref()).await
        }
        TaskCommands::Show { id } => commands::show::task(ws, &id).await,
        TaskCommands::Update {
            id,
            title,
            description,
            status,
            due,
        } => {
            commands::update::task(
                ws,
                &id,
                title.as_deref(),
                description.as_deref(),
                status.as_deref(),
                due.as_deref(),
            )
            .await
        }
        TaskCommands::Complete { id } => commands::status::complete(ws, &id).await,
        TaskCommands::Reopen { id } => commands::status::reopen(ws, &id).await,
        TaskCommands::Delete { id, force } => commands::delete::task(ws, &id, force).await,
    }
}

async fn run_project(ws: &Workspace, action: ProjectCommands) -> Result<()> {
    match action {
        ProjectCommands::Create {
            name,
            description,
            status,
            deadline,
        } => {
            commands::create::project(ws, &name, description.as_deref(), &status, deadline.as_deref())
                .await
        }
        ProjectCommands::List { search } => commands::list::projects(ws, search.as_deref()).await,
        ProjectCommands::Show { id } => commands::show::project(ws, &id).await,
        ProjectCommands::Update {
            id,
            name,
            description,
            status,
            deadline,
        } => {
            commands::update::project(
                ws,
                &id,
                name.as_deref(),
                description.as_deref(),
                status.as_deref(),
                deadline.as_deref(),
            )
            .await
        }
        ProjectCommands::Delete { id, force } => commands::delete::project(ws, &id, force).await,
    }
}

async fn run_comment(ws: &Workspace, action: CommentCommands) -> Result<()> {
    match action {
        CommentCommands::Add {
            target,
            text,
            reply_to,
        } => {
            let target =
                commands::comment::target(ws, target.task.as_deref(), target.project.as_deref())
                    .await?;
            commands::comment::add(ws, &target, &text, reply_to.as_deref()).await
        }
        CommentCommands::List { target } => {
            let target =
                commands::comment::target(ws, target.task.as_deref(), target.project.as_deref())
                    .await?;
            commands::comment::list(ws, &target).await
        }
        CommentCommands::Delete { target, id } => {
            let target =
                commands::comment::target(ws, target.task.as_deref(), target.project.as_deref())
                    .await?;
            commands::comment::delete(ws, &target, &id).await
        }
    }
}

async fn run_notification(ws: &Workspace, action: NotificationCommands) -> Result<()> {
    match action {
        NotificationCommands::List { unread } => commands::notification::list(ws, unread).await,
        NotificationCommands::Read { id } => commands::notification::read(ws, &id).await,
        NotificationCommands::ReadAll => commands::notification::read_all(ws).await,
        NotificationCommands::Delete { id } => commands::notification::delete(ws, &id).await,
    }
}

async fn run_tracker(ws: &Workspace, command: TrackerCommands) -> Result<()> {
    match command {
        TrackerCommands::Task { action } => run_task(ws, action).await,
        TrackerCommands::Project { action } => run_project(ws, action).await,
        TrackerCommands::Comment { action } => run_comment(ws, action).await,
        TrackerCommands::Notification { action } => run_notification(ws, action).await,
        TrackerCommands::Export { output } => commands::export::run_json(ws, output.as_deref()).await,
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_level, LogFormat::parse(&cli.log_format))?;

    match cli.command {
        Commands::Init => {
            let root = match cli.dir {
                Some(dir) => dir,
                None => env::current_dir()?,
            };
            commands::init::run(&root)
        }

        Commands::Login { name, email, id } => {
            let collab_dir = find_collab_dir(cli.dir.as_deref())?;
            commands::auth::login(&collab_dir, &name, &email, id.as_deref())
        }

        Commands::Logout => {
            let collab_dir = find_collab_dir(cli.dir.as_deref())?;
            commands::auth::logout(&collab_dir)
        }

        Commands::Whoami => {
            let collab_dir = find_collab_dir(cli.dir.as_deref())?;
            commands::auth::whoami(&collab_dir)
        }

        Commands::Tracker(command) => {
            let collab_dir = find_collab_dir(cli.dir.as_deref())?;
            let mut ws = Workspace::open(&collab_dir).context("Failed to open workspace")?;
            let result = run_tracker(&ws, command).await;
            // Fold this command's own change events back in.
            ws.settle(result).await
        }
    }
}
