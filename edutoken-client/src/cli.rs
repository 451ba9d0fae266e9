use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use edutoken_shared::auth::Role;
use edutoken_shared::domain::TokenKind;

const HELP_EPILOG: &str = r#"Config resolution order:
  1) --config/-c PATH
  2) $EDUTOKEN_CONFIG
  3) platform default, e.g. ~/.config/edutoken/client.yaml
"#;

#[derive(Debug, Parser)]
#[command(
    name = "edutoken",
    version,
    about = "EduToken dashboard for students and teachers",
    long_about = None,
    after_long_help = HELP_EPILOG,
)]
pub struct Cli {
    /// Path to YAML config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum RoleArg {
    Student,
    Teacher,
}

impl From<RoleArg> for Role {
    fn from(value: RoleArg) -> Self {
        match value {
            RoleArg::Student => Role::Student,
            RoleArg::Teacher => Role::Teacher,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum KindArg {
    Academic,
    Social,
}

impl From<KindArg> for TokenKind {
    fn from(value: KindArg) -> Self {
        match value {
            KindArg::Academic => TokenKind::Academic,
            KindArg::Social => TokenKind::Social,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create an account and store the session token
    Signup {
        /// Server URL (e.g., http://127.0.0.1:5151). Falls back to config.
        #[arg(long)]
        server: Option<String>,
        /// Email. Falls back to prompt.
        #[arg(long)]
        email: Option<String>,
        /// Role to pick right away
        #[arg(long, value_enum)]
        role: Option<RoleArg>,
    },
    /// Sign in and store the session token
    Login {
        /// Server URL (e.g., http://127.0.0.1:5151). Falls back to config.
        #[arg(long)]
        server: Option<String>,
        /// Email. Falls back to prompt.
        #[arg(long)]
        email: Option<String>,
    },
    /// Revoke the session and forget the token
    Logout,
    /// Show the signed-in account
    Whoami,
    /// Choose a role (only once)
    ChooseRole {
        #[arg(value_enum)]
        role: RoleArg,
    },
    /// Show a token balance (yours by default)
    Balance {
        /// Another user's id (teachers only)
        #[arg(long)]
        user: Option<String>,
    },
    /// List tasks
    Tasks,
    /// Create a task (teachers)
    CreateTask {
        title: String,
        /// Reward amount
        #[arg(long)]
        amount: i32,
        #[arg(long, value_enum, default_value_t = KindArg::Academic)]
        kind: KindArg,
        #[arg(long, default_value = "")]
        description: String,
        /// Due date, YYYY-MM-DD
        #[arg(long)]
        due: Option<String>,
        /// Student user id
        #[arg(long)]
        assignee: Option<String>,
    },
    /// Delete a task (teachers)
    DeleteTask { id: i32 },
    /// Mark a task as done and collect its reward (students)
    Complete { id: i32 },
    /// List events
    Events,
    /// Create an event (teachers)
    CreateEvent {
        title: String,
        /// Start, RFC 3339 or YYYY-MM-DD
        #[arg(long)]
        starts_at: String,
        #[arg(long)]
        amount: i32,
        #[arg(long, value_enum, default_value_t = KindArg::Social)]
        kind: KindArg,
        #[arg(long, default_value = "")]
        location: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// Delete an event (teachers)
    DeleteEvent { id: i32 },
    /// Print the QR payload of an event (teachers)
    Qr { id: i32 },
    /// Submit a scanned QR payload (students). Use '-' to read stdin.
    Scan { payload: String },
    /// Show recent notifications
    Notifications {
        #[arg(long)]
        limit: Option<usize>,
        /// Mark the listed notifications as read
        #[arg(long)]
        mark_read: bool,
    },
    /// List students (teachers)
    Students,
    /// Show school-wide statistics (teachers)
    Stats,
}
