use crate::storage::schema::{balances, events, notifications, sessions, tasks, users};
use chrono::{NaiveDate, NaiveDateTime};
use diesel::prelude::*;
use edutoken_shared::auth::Role;
use edutoken_shared::domain::{Balance, Reward, Severity, TokenKind};

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: String,
    pub email: String,
    pub password_hash: String,
    pub role: Option<String>,
    pub created_at: NaiveDateTime,
}

impl User {
    /// Unknown role strings are treated as "no role chosen".
    pub fn role(&self) -> Option<Role> {
        self.role.as_deref().and_then(|r| r.parse().ok())
    }
}

#[derive(Insertable)]
#[diesel(table_name = users)]
pub struct NewUser<'a> {
    pub id: &'a str,
    pub email: &'a str,
    pub password_hash: &'a str,
    pub role: Option<&'a str>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = sessions)]
#[diesel(primary_key(jti))]
pub struct Session {
    pub jti: String,
    pub user_id: String,
    pub issued_at: NaiveDateTime,
    pub last_used_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = sessions)]
pub struct NewSession<'a> {
    pub jti: &'a str,
    pub user_id: &'a str,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = balances)]
#[diesel(primary_key(user_id))]
pub struct BalanceRow {
    pub user_id: String,
    pub academic: i32,
    pub social: i32,
    pub updated_at: NaiveDateTime,
}

impl BalanceRow {
    pub fn balance(&self) -> Balance {
        Balance::new(self.academic, self.social)
    }
}

#[derive(Insertable)]
#[diesel(table_name = balances)]
pub struct NewBalance<'a> {
    pub user_id: &'a str,
    pub academic: i32,
    pub social: i32,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = tasks)]
pub struct Task {
    pub id: i32,
    pub title: String,
    pub description: String,
    pub due_date: Option<NaiveDate>,
    pub reward_amount: i32,
    pub reward_kind: String,
    pub completed: bool,
    pub assignee_id: Option<String>,
    pub created_by: String,
    pub completed_by: Option<String>,
    pub completed_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

impl Task {
    pub fn reward(&self) -> Reward {
        Reward::new(self.reward_amount, parse_kind(&self.reward_kind))
    }
}

#[derive(Insertable)]
#[diesel(table_name = tasks)]
pub struct NewTask<'a> {
    pub title: &'a str,
    pub description: &'a str,
    pub due_date: Option<NaiveDate>,
    pub reward_amount: i32,
    pub reward_kind: &'a str,
    pub assignee_id: Option<&'a str>,
    pub created_by: &'a str,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = events)]
pub struct Event {
    pub id: i32,
    pub title: String,
    pub description: String,
    pub starts_at: NaiveDateTime,
    pub location: String,
    pub reward_amount: i32,
    pub reward_kind: String,
    pub created_by: String,
    pub created_at: NaiveDateTime,
}

impl Event {
    pub fn reward(&self) -> Reward {
        Reward::new(self.reward_amount, parse_kind(&self.reward_kind))
    }
}

#[derive(Insertable)]
#[diesel(table_name = events)]
pub struct NewEvent<'a> {
    pub title: &'a str,
    pub description: &'a str,
    pub starts_at: NaiveDateTime,
    pub location: &'a str,
    pub reward_amount: i32,
    pub reward_kind: &'a str,
    pub created_by: &'a str,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = notifications)]
pub struct Notification {
    pub id: i32,
    pub user_id: String,
    pub message: String,
    pub severity: String,
    pub is_read: bool,
    pub created_at: NaiveDateTime,
}

impl Notification {
    pub fn severity(&self) -> Severity {
        self.severity.parse().unwrap_or(Severity::Info)
    }
}

#[derive(Insertable)]
#[diesel(table_name = notifications)]
pub struct NewNotification<'a> {
    pub user_id: &'a str,
    pub message: &'a str,
    pub severity: &'a str,
}

// The schema CHECK limits stored kinds to the two known values.
fn parse_kind(s: &str) -> TokenKind {
    s.parse().unwrap_or(TokenKind::Academic)
}
