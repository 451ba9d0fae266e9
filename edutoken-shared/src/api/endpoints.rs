use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};

use super::API_V1_PREFIX;

fn base_join(base: &str, path: &str) -> String {
    let b = base.trim_end_matches('/');
    let p = path.trim_start_matches('/');
    format!("{}/{}", b, p)
}

fn v1(base: &str, suffix: &str) -> String {
    base_join(base, &format!("{}/{}", API_V1_PREFIX, suffix))
}

fn enc(s: &str) -> String {
    utf8_percent_encode(s, NON_ALPHANUMERIC).to_string()
}

pub fn auth_signup(base: &str) -> String {
    v1(base, "auth/signup")
}
pub fn auth_login(base: &str) -> String {
    v1(base, "auth/login")
}
pub fn auth_logout(base: &str) -> String {
    v1(base, "auth/logout")
}
pub fn auth_renew(base: &str) -> String {
    v1(base, "auth/renew")
}
pub fn auth_me(base: &str) -> String {
    v1(base, "auth/me")
}
pub fn auth_role(base: &str) -> String {
    v1(base, "auth/role")
}

pub fn tasks(base: &str) -> String {
    v1(base, "tasks")
}
pub fn task(base: &str, task_id: i32) -> String {
    v1(base, &format!("tasks/{}", task_id))
}
pub fn task_complete(base: &str, task_id: i32) -> String {
    v1(base, &format!("tasks/{}/complete", task_id))
}

pub fn events(base: &str) -> String {
    v1(base, "events")
}
pub fn event(base: &str, event_id: i32) -> String {
    v1(base, &format!("events/{}", event_id))
}
pub fn event_qr(base: &str, event_id: i32) -> String {
    v1(base, &format!("events/{}/qr", event_id))
}
pub fn scan(base: &str) -> String {
    v1(base, "scan")
}

pub fn user_balance(base: &str, user_id: &str) -> String {
    v1(base, &format!("users/{}/balance", enc(user_id)))
}
pub fn students(base: &str) -> String {
    v1(base, "students")
}
pub fn stats(base: &str) -> String {
    v1(base, "stats")
}

pub fn notifications(base: &str, limit: Option<usize>) -> String {
    match limit {
        Some(n) => v1(base, &format!("notifications?limit={}", n)),
        None => v1(base, "notifications"),
    }
}
pub fn notifications_count(base: &str) -> String {
    v1(base, "notifications/count")
}
pub fn notification_read(base: &str, id: i32) -> String {
    v1(base, &format!("notifications/{}/read", id))
}

pub fn version(base: &str) -> String {
    v1(base, "version")
}
