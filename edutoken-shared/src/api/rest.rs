//! Minimal REST client helpers for consumers (clients).

use super::endpoints as ep;
use super::*;
use once_cell::sync::Lazy;
use std::time::Duration;

pub use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum RestError {
    #[error("http: {0}")]
    Http(String),
    #[error("status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("serde: {0}")]
    Serde(String),
}

impl RestError {
    pub fn status(&self) -> Option<u16> {
        match self {
            RestError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

static HTTP_CLIENT: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .pool_max_idle_per_host(4)
        // Bound request duration
        .timeout(Duration::from_secs(30))
        .build()
        .expect("failed to build HTTP client")
});

fn mk_client() -> reqwest::Client {
    HTTP_CLIENT.clone()
}

async fn handle_json<T: for<'de> serde::Deserialize<'de>>(
    res: reqwest::Response,
) -> Result<T, RestError> {
    let status = res.status();
    if !status.is_success() {
        let body = res.text().await.unwrap_or_default();
        return Err(RestError::Status {
            status: status.as_u16(),
            body,
        });
    }
    res.json::<T>()
        .await
        .map_err(|e| RestError::Serde(e.to_string()))
}

async fn handle_empty(res: reqwest::Response) -> Result<(), RestError> {
    if res.status().is_success() {
        Ok(())
    } else {
        let status = res.status().as_u16();
        let body = res.text().await.unwrap_or_default();
        Err(RestError::Status { status, body })
    }
}

async fn send(req: reqwest::RequestBuilder) -> Result<reqwest::Response, RestError> {
    req.send().await.map_err(|e| RestError::Http(e.to_string()))
}

async fn get_json<T: for<'de> serde::Deserialize<'de>>(
    url: String,
    bearer: &str,
) -> Result<T, RestError> {
    let res = send(mk_client().get(url).bearer_auth(bearer)).await?;
    handle_json(res).await
}

pub async fn signup(base: &str, req: &SignUpReq) -> Result<AuthResp, RestError> {
    let res = send(mk_client().post(ep::auth_signup(base)).json(req)).await?;
    handle_json(res).await
}

pub async fn login(base: &str, req: &AuthReq) -> Result<AuthResp, RestError> {
    let res = send(mk_client().post(ep::auth_login(base)).json(req)).await?;
    handle_json(res).await
}

pub async fn logout(base: &str, bearer: &str) -> Result<(), RestError> {
    let res = send(mk_client().post(ep::auth_logout(base)).bearer_auth(bearer)).await?;
    handle_empty(res).await
}

pub async fn renew_token(base: &str, bearer: &str) -> Result<AuthResp, RestError> {
    let res = send(mk_client().post(ep::auth_renew(base)).bearer_auth(bearer)).await?;
    handle_json(res).await
}

pub async fn me(base: &str, bearer: &str) -> Result<UserDto, RestError> {
    get_json(ep::auth_me(base), bearer).await
}

pub async fn choose_role(base: &str, bearer: &str, req: &RoleReq) -> Result<AuthResp, RestError> {
    let res = send(
        mk_client()
            .post(ep::auth_role(base))
            .bearer_auth(bearer)
            .json(req),
    )
    .await?;
    handle_json(res).await
}

pub async fn list_tasks(base: &str, bearer: &str) -> Result<Vec<TaskDto>, RestError> {
    get_json(ep::tasks(base), bearer).await
}

pub async fn create_task(
    base: &str,
    bearer: &str,
    req: &CreateTaskReq,
) -> Result<TaskDto, RestError> {
    let res = send(mk_client().post(ep::tasks(base)).bearer_auth(bearer).json(req)).await?;
    handle_json(res).await
}

pub async fn delete_task(base: &str, bearer: &str, task_id: i32) -> Result<(), RestError> {
    let res = send(mk_client().delete(ep::task(base, task_id)).bearer_auth(bearer)).await?;
    handle_empty(res).await
}

pub async fn complete_task(base: &str, bearer: &str, task_id: i32) -> Result<EarnResp, RestError> {
    let res = send(
        mk_client()
            .post(ep::task_complete(base, task_id))
            .bearer_auth(bearer),
    )
    .await?;
    handle_json(res).await
}

pub async fn list_events(base: &str, bearer: &str) -> Result<Vec<EventDto>, RestError> {
    get_json(ep::events(base), bearer).await
}

pub async fn create_event(
    base: &str,
    bearer: &str,
    req: &CreateEventReq,
) -> Result<EventDto, RestError> {
    let res = send(mk_client().post(ep::events(base)).bearer_auth(bearer).json(req)).await?;
    handle_json(res).await
}

pub async fn delete_event(base: &str, bearer: &str, event_id: i32) -> Result<(), RestError> {
    let res = send(mk_client().delete(ep::event(base, event_id)).bearer_auth(bearer)).await?;
    handle_empty(res).await
}

pub async fn event_qr(base: &str, bearer: &str, event_id: i32) -> Result<QrCodeDto, RestError> {
    get_json(ep::event_qr(base, event_id), bearer).await
}

pub async fn scan(base: &str, bearer: &str, req: &ScanReq) -> Result<EarnResp, RestError> {
    let res = send(mk_client().post(ep::scan(base)).bearer_auth(bearer).json(req)).await?;
    handle_json(res).await
}

pub async fn user_balance(base: &str, bearer: &str, user_id: &str) -> Result<BalanceDto, RestError> {
    get_json(ep::user_balance(base, user_id), bearer).await
}

pub async fn list_students(base: &str, bearer: &str) -> Result<Vec<StudentDto>, RestError> {
    get_json(ep::students(base), bearer).await
}

pub async fn stats(base: &str, bearer: &str) -> Result<StatsDto, RestError> {
    get_json(ep::stats(base), bearer).await
}

pub async fn list_notifications(
    base: &str,
    bearer: &str,
    limit: Option<usize>,
) -> Result<Vec<NotificationDto>, RestError> {
    get_json(ep::notifications(base, limit), bearer).await
}

pub async fn notifications_count(
    base: &str,
    bearer: &str,
) -> Result<NotificationCountDto, RestError> {
    get_json(ep::notifications_count(base), bearer).await
}

pub async fn mark_notification_read(base: &str, bearer: &str, id: i32) -> Result<(), RestError> {
    let res = send(
        mk_client()
            .post(ep::notification_read(base, id))
            .bearer_auth(bearer),
    )
    .await?;
    handle_empty(res).await
}

pub async fn server_version(base: &str) -> Result<VersionInfoDto, RestError> {
    let res = send(mk_client().get(ep::version(base))).await?;
    handle_json(res).await
}
