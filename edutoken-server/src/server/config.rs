use chrono::{NaiveDate, NaiveDateTime};
use edutoken_shared::auth::Role;
use edutoken_shared::domain::Reward;
use serde::Deserialize;
use std::{env, fs, path::Path};

use crate::storage::{EventInput, SeedUser, TaskInput};

/// Hard cap on how many notifications a single listing returns.
pub const MAX_NOTIFICATION_WINDOW: usize = 50;
const DEFAULT_NOTIFICATION_WINDOW: usize = 10;
pub(crate) const FIXTURE_CREATOR: &str = "fixtures";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub jwt_secret: String,
    #[serde(default)]
    pub users: Vec<UserConfig>,
    #[serde(default)]
    pub tasks: Vec<TaskFixture>,
    #[serde(default)]
    pub events: Vec<EventFixture>,
    pub dev_cors_origin: Option<String>,
    pub listen_port: Option<u16>,
    pub notification_window: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserConfig {
    pub email: String,
    pub password_hash: String, // bcrypt hash
    pub role: Option<Role>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskFixture {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub due_date: Option<NaiveDate>,
    pub reward: Reward,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventFixture {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub starts_at: NaiveDateTime,
    #[serde(default)]
    pub location: String,
    pub reward: Reward,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.yaml".to_string());
        Self::load_from_path(path)
    }

    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(&path)?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let cfg: AppConfig = serde_yaml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt_secret.trim().is_empty() {
            return Err(ConfigError::Invalid("jwt_secret must not be empty".into()));
        }
        if let Some(u) = self.users.iter().find(|u| !u.email.contains('@')) {
            return Err(ConfigError::Invalid(format!(
                "user email is not valid: {}",
                u.email
            )));
        }
        let bad_task = self.tasks.iter().find(|t| !t.reward.is_valid());
        if let Some(t) = bad_task {
            return Err(ConfigError::Invalid(format!(
                "task {:?} needs a positive reward",
                t.title
            )));
        }
        let bad_event = self.events.iter().find(|e| !e.reward.is_valid());
        if let Some(e) = bad_event {
            return Err(ConfigError::Invalid(format!(
                "event {:?} needs a positive reward",
                e.title
            )));
        }
        if self.notification_window == Some(0) {
            return Err(ConfigError::Invalid(
                "notification_window must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Effective feed window, clamped to [`MAX_NOTIFICATION_WINDOW`].
    pub fn notification_window(&self) -> usize {
        self.notification_window
            .unwrap_or(DEFAULT_NOTIFICATION_WINDOW)
            .clamp(1, MAX_NOTIFICATION_WINDOW)
    }

    pub fn seed_users(&self) -> Vec<SeedUser> {
        self.users
            .iter()
            .map(|u| SeedUser {
                email: u.email.trim().to_ascii_lowercase(),
                password_hash: u.password_hash.clone(),
                role: u.role,
            })
            .collect()
    }

    pub fn task_fixtures(&self) -> Vec<TaskInput> {
        self.tasks
            .iter()
            .map(|t| TaskInput {
                title: t.title.clone(),
                description: t.description.clone(),
                due_date: t.due_date,
                reward: t.reward,
                assignee_id: None,
                created_by: FIXTURE_CREATOR.to_string(),
            })
            .collect()
    }

    pub fn event_fixtures(&self) -> Vec<EventInput> {
        self.events
            .iter()
            .map(|e| EventInput {
                title: e.title.clone(),
                description: e.description.clone(),
                starts_at: e.starts_at,
                location: e.location.clone(),
                reward: e.reward,
                created_by: FIXTURE_CREATOR.to_string(),
            })
            .collect()
    }
}
