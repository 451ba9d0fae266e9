use serde::{Deserialize, Serialize};

use crate::auth::Role;
use crate::domain::{Balance, EventStatus, Reward, Severity};

pub mod endpoints;
#[cfg(feature = "rest-client")]
pub mod rest;

pub const API_V1_PREFIX: &str = "/api/v1";

// Auth
#[derive(Debug, Serialize, Deserialize)]
pub struct SignUpReq {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub role: Option<Role>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthReq {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResp {
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RoleReq {
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserDto {
    pub id: String,
    pub email: String,
    pub role: Option<Role>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentDto {
    pub id: String,
    pub email: String,
}

// Ledger
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BalanceDto {
    pub user_id: String,
    pub academic: i32,
    pub social: i32,
    pub updated_at: Option<String>, // RFC3339 UTC, None when never earned
}

impl BalanceDto {
    pub fn balance(&self) -> Balance {
        Balance::new(self.academic, self.social)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationDto {
    pub id: i32,
    pub message: String,
    pub severity: Severity,
    pub read: bool,
    pub created_at: String, // RFC3339 UTC
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NotificationCountDto {
    pub unread: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EarnResp {
    pub balance: BalanceDto,
    pub reward: Reward,
    pub notification: Option<NotificationDto>,
}

// Tasks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDto {
    pub id: i32,
    pub title: String,
    pub description: String,
    pub due_date: Option<String>, // YYYY-MM-DD
    pub reward: Reward,
    pub completed: bool,
    pub assignee_id: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateTaskReq {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub due_date: Option<String>,
    pub reward: Reward,
    #[serde(default)]
    pub assignee_id: Option<String>,
}

// Events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventDto {
    pub id: i32,
    pub title: String,
    pub description: String,
    pub starts_at: String, // RFC3339 UTC
    pub location: String,
    pub reward: Reward,
    pub created_by: String,
    pub status: EventStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateEventReq {
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// RFC3339, or `YYYY-MM-DD` for midnight UTC.
    pub starts_at: String,
    #[serde(default)]
    pub location: String,
    pub reward: Reward,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QrCodeDto {
    pub event_id: i32,
    /// Text to encode into the QR image.
    pub payload: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ScanReq {
    pub payload: String,
}

// Teacher statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsDto {
    pub total_events: i64,
    pub active_events: i64,
    pub upcoming_events: i64,
    pub tokens_offered: i64,
    pub students: i64,
    pub academic_held: i64,
    pub social_held: i64,
    pub open_tasks: i64,
    pub completed_tasks: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VersionInfoDto {
    pub version: String,
}
