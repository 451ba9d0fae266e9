mod acl;
pub mod auth;
mod config;

use crate::ledger::{Earned, LedgerError, Reconciler};
use crate::server::auth::AuthCtx;
use crate::storage::models::{BalanceRow, Event, Notification, Task};
use crate::storage::{CompleteOutcome, EventInput, Store, TaskInput};
use axum::http::{HeaderName, HeaderValue};
use axum::middleware;
use axum::response::Response as AxumResponse;
use axum::{
    Json, Router,
    extract::{Extension, Path, Query, State},
    http::{Method, StatusCode, header},
    routing::{delete, get, post},
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
pub use config::{
    AppConfig, ConfigError, EventFixture, MAX_NOTIFICATION_WINDOW, TaskFixture, UserConfig,
};
use edutoken_shared::api;
use edutoken_shared::auth::Role;
use edutoken_shared::domain::{EventStatus, Reward};
use edutoken_shared::qr::EventQrPayload;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{Span, info, info_span, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: Store,
    pub reconciler: Reconciler<Store>,
    shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: AppConfig, store: Store) -> Self {
        Self {
            config,
            reconciler: Reconciler::new(store.clone()),
            store,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

#[derive(Clone, Debug)]
struct ReqId(pub String);

pub fn router(state: AppState) -> Router {
    let private = Router::new()
        .route("/api/v1/auth/logout", post(auth::api_auth_logout))
        .route("/api/v1/auth/renew", post(auth::api_auth_renew))
        .route("/api/v1/auth/me", get(auth::api_auth_me))
        .route("/api/v1/auth/role", post(auth::api_auth_role))
        .route("/api/v1/tasks", get(api_list_tasks).post(api_create_task))
        .route("/api/v1/tasks/{id}", delete(api_delete_task))
        .route("/api/v1/tasks/{id}/complete", post(api_complete_task))
        .route("/api/v1/events", get(api_list_events).post(api_create_event))
        .route("/api/v1/events/{id}", delete(api_delete_event))
        .route("/api/v1/events/{id}/qr", get(api_event_qr))
        .route("/api/v1/scan", post(api_scan))
        .route("/api/v1/users/{id}/balance", get(api_user_balance))
        .route("/api/v1/students", get(api_list_students))
        .route("/api/v1/stats", get(api_stats))
        .route("/api/v1/notifications", get(api_list_notifications))
        .route("/api/v1/notifications/count", get(api_notifications_count))
        .route(
            "/api/v1/notifications/{id}/read",
            post(api_mark_notification_read),
        )
        .with_state(state.clone())
        .layer(middleware::from_fn(acl::enforce_acl))
        .layer(middleware::from_fn(set_auth_span_fields))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_bearer,
        ));

    // Trace with request context (method, path, request_id)
    let trace = TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
        let request_id = req
            .extensions()
            .get::<ReqId>()
            .map(|r| r.0.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        info_span!(
            "request",
            method = %req.method(),
            path = %req.uri().path(),
            request_id = %request_id,
            user_id = tracing::field::Empty,
            role = tracing::field::Empty,
        )
    });

    let app = Router::new()
        .route("/healthz", get(health))
        .route("/api/v1/version", get(api_version))
        .route("/api/v1/auth/signup", post(auth::api_auth_signup))
        .route("/api/v1/auth/login", post(auth::api_auth_login))
        .merge(private)
        .with_state(state.clone())
        .layer(trace)
        .layer(middleware::from_fn(add_security_headers))
        .layer(middleware::from_fn(add_request_id));

    // Optionally add CORS for dev if configured
    if let Some(origin) = &state.config.dev_cors_origin {
        let hv = header::HeaderValue::from_str(origin)
            .unwrap_or(header::HeaderValue::from_static("http://localhost:5173"));
        let cors = CorsLayer::new()
            .allow_origin(hv)
            .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);
        app.layer(cors)
    } else {
        app
    }
}

async fn health(State(state): State<AppState>) -> Result<&'static str, AppError> {
    state.store.ping().await.map_err(|e| {
        tracing::error!(error=%e, "health: database probe failed");
        AppError::internal(e)
    })?;
    Ok("ok")
}

async fn api_version() -> Json<api::VersionInfoDto> {
    Json(api::VersionInfoDto {
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn add_request_id(
    mut req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<AxumResponse, AppError> {
    let hdr = HeaderName::from_static("x-request-id");
    // Use provided x-request-id if present, else generate
    let rid = req
        .headers()
        .get(&hdr)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    req.extensions_mut().insert(ReqId(rid.clone()));
    let mut resp = next.run(req).await;
    if let Ok(hv) = HeaderValue::from_str(&rid) {
        resp.headers_mut().insert(hdr, hv);
    }
    Ok(resp)
}

async fn add_security_headers(
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<AxumResponse, AppError> {
    let mut resp = next.run(req).await;

    let headers = resp.headers_mut();
    for (name, value) in [
        ("x-content-type-options", "nosniff"),
        ("x-frame-options", "DENY"),
        ("referrer-policy", "no-referrer"),
        ("permissions-policy", "geolocation=(), microphone=()"),
        ("cross-origin-opener-policy", "same-origin"),
        ("cross-origin-resource-policy", "same-origin"),
        // Every response is API data or a health probe
        ("cache-control", "no-store, no-cache, must-revalidate, private"),
        ("pragma", "no-cache"),
    ] {
        headers.insert(
            HeaderName::from_static(name),
            HeaderValue::from_static(value),
        );
    }
    Ok(resp)
}

async fn set_auth_span_fields(
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<AxumResponse, AppError> {
    if let Some(auth) = req.extensions().get::<AuthCtx>() {
        let span = Span::current();
        span.record("user_id", tracing::field::display(auth.user_id()));
        if let Some(role) = auth.role() {
            span.record("role", tracing::field::display(role));
        }
    }
    Ok(next.run(req).await)
}

// Conversions

fn rfc3339(dt: NaiveDateTime) -> String {
    DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc).to_rfc3339()
}

fn event_status(starts_at: NaiveDateTime, now: OffsetDateTime) -> EventStatus {
    let start = OffsetDateTime::from_unix_timestamp(starts_at.and_utc().timestamp()).unwrap_or(now);
    EventStatus::at(start, now)
}

fn task_dto(t: Task) -> api::TaskDto {
    api::TaskDto {
        reward: t.reward(),
        id: t.id,
        title: t.title,
        description: t.description,
        due_date: t.due_date.map(|d| d.format("%Y-%m-%d").to_string()),
        completed: t.completed,
        assignee_id: t.assignee_id,
        created_at: rfc3339(t.created_at),
    }
}

fn event_dto(e: Event, now: OffsetDateTime) -> api::EventDto {
    api::EventDto {
        reward: e.reward(),
        status: event_status(e.starts_at, now),
        id: e.id,
        title: e.title,
        description: e.description,
        starts_at: rfc3339(e.starts_at),
        location: e.location,
        created_by: e.created_by,
    }
}

fn balance_dto(row: BalanceRow) -> api::BalanceDto {
    api::BalanceDto {
        user_id: row.user_id,
        academic: row.academic,
        social: row.social,
        updated_at: Some(rfc3339(row.updated_at)),
    }
}

fn notification_dto(n: Notification) -> api::NotificationDto {
    api::NotificationDto {
        severity: n.severity(),
        id: n.id,
        message: n.message,
        read: n.is_read,
        created_at: rfc3339(n.created_at),
    }
}

fn earn_resp(earned: Earned) -> api::EarnResp {
    api::EarnResp {
        balance: balance_dto(earned.balance),
        reward: earned.reward,
        notification: earned.notification.map(notification_dto),
    }
}

fn parse_due_date(s: &str) -> Result<NaiveDate, AppError> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|_| AppError::bad_request(format!("due_date must be YYYY-MM-DD, got {s:?}")))
}

/// Accepts RFC 3339 or a bare `YYYY-MM-DD` meaning midnight UTC.
fn parse_starts_at(s: &str) -> Result<NaiveDateTime, AppError> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.naive_utc());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| {
            AppError::bad_request(format!(
                "starts_at must be RFC 3339 or YYYY-MM-DD, got {s:?}"
            ))
        })
}

fn require_title(title: &str) -> Result<String, AppError> {
    let t = title.trim();
    if t.is_empty() {
        return Err(AppError::bad_request("title must not be empty"));
    }
    Ok(t.to_string())
}

fn require_reward(reward: Reward) -> Result<Reward, AppError> {
    if !reward.is_valid() {
        return Err(AppError::bad_request("reward amount must be positive"));
    }
    Ok(reward)
}

// Tasks

async fn api_list_tasks(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
) -> Result<Json<Vec<api::TaskDto>>, AppError> {
    let visible_to = match auth.role() {
        Some(Role::Teacher) => None,
        _ => Some(auth.user_id()),
    };
    let rows = state
        .store
        .list_tasks(visible_to)
        .await
        .map_err(AppError::internal)?;
    Ok(Json(rows.into_iter().map(task_dto).collect()))
}

async fn api_create_task(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Json(body): Json<api::CreateTaskReq>,
) -> Result<(StatusCode, Json<api::TaskDto>), AppError> {
    let title = require_title(&body.title)?;
    let reward = require_reward(body.reward)?;
    let due_date = body.due_date.as_deref().map(parse_due_date).transpose()?;
    if let Some(assignee) = body.assignee_id.as_deref() {
        let user = state
            .store
            .get_user(assignee)
            .await
            .map_err(AppError::internal)?;
        if user.and_then(|u| u.role()) != Some(Role::Student) {
            return Err(AppError::bad_request(format!(
                "assignee is not a student: {assignee}"
            )));
        }
    }
    let task = state
        .store
        .create_task(TaskInput {
            title,
            description: body.description,
            due_date,
            reward,
            assignee_id: body.assignee_id,
            created_by: auth.user_id().to_string(),
        })
        .await
        .map_err(AppError::internal)?;
    info!(task_id = task.id, reward = %reward, "task created");
    Ok((StatusCode::CREATED, Json(task_dto(task))))
}

async fn api_delete_task(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<StatusCode, AppError> {
    let deleted = state
        .store
        .delete_task(id)
        .await
        .map_err(AppError::internal)?;
    if !deleted {
        return Err(AppError::not_found(format!("task not found: {id}")));
    }
    info!(task_id = id, "task deleted");
    Ok(StatusCode::NO_CONTENT)
}

async fn api_complete_task(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(id): Path<i32>,
) -> Result<Json<api::EarnResp>, AppError> {
    let user_id = auth.user_id();
    let task = match state
        .store
        .complete_task(id, user_id)
        .await
        .map_err(AppError::internal)?
    {
        CompleteOutcome::Completed(t) => t,
        CompleteOutcome::NotFound => {
            return Err(AppError::not_found(format!("task not found: {id}")));
        }
        CompleteOutcome::AlreadyCompleted => {
            return Err(AppError::conflict("task already completed"));
        }
        CompleteOutcome::NotAssigned => {
            warn!(task_id = id, user_id, "complete: task assigned to someone else");
            return Err(AppError::forbidden());
        }
    };

    match state
        .reconciler
        .earn(user_id, task.reward(), &task.title)
        .await
    {
        Ok(earned) => Ok(Json(earn_resp(earned))),
        Err(e) => {
            warn!(task_id = id, user_id, error = %e, "complete: earn failed, reopening task");
            if let Err(re) = state.store.reopen_task(id, user_id).await {
                tracing::error!(task_id = id, error = %re, "complete: reopen failed");
            }
            Err(e.into())
        }
    }
}

// Events

async fn api_list_events(
    State(state): State<AppState>,
) -> Result<Json<Vec<api::EventDto>>, AppError> {
    let rows = state
        .store
        .list_events()
        .await
        .map_err(AppError::internal)?;
    let now = OffsetDateTime::now_utc();
    Ok(Json(rows.into_iter().map(|e| event_dto(e, now)).collect()))
}

async fn api_create_event(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Json(body): Json<api::CreateEventReq>,
) -> Result<(StatusCode, Json<api::EventDto>), AppError> {
    let title = require_title(&body.title)?;
    let reward = require_reward(body.reward)?;
    let starts_at = parse_starts_at(&body.starts_at)?;
    let event = state
        .store
        .create_event(EventInput {
            title,
            description: body.description,
            starts_at,
            location: body.location,
            reward,
            created_by: auth.user_id().to_string(),
        })
        .await
        .map_err(AppError::internal)?;
    info!(event_id = event.id, reward = %reward, "event created");
    Ok((
        StatusCode::CREATED,
        Json(event_dto(event, OffsetDateTime::now_utc())),
    ))
}

async fn api_delete_event(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<StatusCode, AppError> {
    let deleted = state
        .store
        .delete_event(id)
        .await
        .map_err(AppError::internal)?;
    if !deleted {
        return Err(AppError::not_found(format!("event not found: {id}")));
    }
    info!(event_id = id, "event deleted");
    Ok(StatusCode::NO_CONTENT)
}

async fn load_event(state: &AppState, id: i32) -> Result<Event, AppError> {
    state
        .store
        .get_event(id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("event not found: {id}")))
}

async fn api_event_qr(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<api::QrCodeDto>, AppError> {
    let event = load_event(&state, id).await?;
    let payload = EventQrPayload::new(event.id.to_string(), event.title.clone(), event.reward());
    Ok(Json(api::QrCodeDto {
        event_id: event.id,
        payload: payload.encode(),
    }))
}

async fn api_scan(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Json(body): Json<api::ScanReq>,
) -> Result<Json<api::EarnResp>, AppError> {
    let payload = EventQrPayload::decode(&body.payload).map_err(|e| {
        warn!(user_id = %auth.user_id(), error = %e, "scan: rejected payload");
        AppError::bad_request(format!("invalid QR payload: {e}"))
    })?;
    let id: i32 = payload
        .event_id
        .parse()
        .map_err(|_| AppError::not_found(format!("event not found: {}", payload.event_id)))?;
    let event = load_event(&state, id).await?;
    let reward = event.reward();
    if payload.reward() != reward {
        warn!(
            event_id = id,
            user_id = %auth.user_id(),
            payload_reward = %payload.reward(),
            stored_reward = %reward,
            "scan: payload does not match event"
        );
        return Err(AppError::bad_request("QR payload does not match event"));
    }
    let earned = state
        .reconciler
        .earn(auth.user_id(), reward, &event.title)
        .await?;
    Ok(Json(earn_resp(earned)))
}

// Ledger queries

async fn api_user_balance(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<api::BalanceDto>, AppError> {
    let row = state
        .store
        .find_balance(&user_id)
        .await
        .map_err(AppError::internal)?;
    Ok(Json(match row {
        Some(r) => balance_dto(r),
        None => api::BalanceDto {
            user_id,
            academic: 0,
            social: 0,
            updated_at: None,
        },
    }))
}

async fn api_list_students(
    State(state): State<AppState>,
) -> Result<Json<Vec<api::StudentDto>>, AppError> {
    let rows = state
        .store
        .list_students()
        .await
        .map_err(AppError::internal)?;
    Ok(Json(
        rows.into_iter()
            .map(|u| api::StudentDto {
                id: u.id,
                email: u.email,
            })
            .collect(),
    ))
}

async fn api_stats(State(state): State<AppState>) -> Result<Json<api::StatsDto>, AppError> {
    let s = state
        .store
        .stats(Utc::now().naive_utc())
        .await
        .map_err(AppError::internal)?;
    Ok(Json(api::StatsDto {
        total_events: s.total_events,
        active_events: s.active_events,
        upcoming_events: s.total_events - s.active_events,
        tokens_offered: s.tokens_offered,
        students: s.students,
        academic_held: s.academic_held,
        social_held: s.social_held,
        open_tasks: s.open_tasks,
        completed_tasks: s.completed_tasks,
    }))
}

#[derive(Deserialize)]
struct FeedOpts {
    limit: Option<usize>,
}

async fn api_list_notifications(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Query(opts): Query<FeedOpts>,
) -> Result<Json<Vec<api::NotificationDto>>, AppError> {
    let window = state.config.notification_window();
    let limit = opts.limit.unwrap_or(window).clamp(1, window);
    let rows = state
        .store
        .list_notifications(auth.user_id(), limit)
        .await
        .map_err(AppError::internal)?;
    Ok(Json(rows.into_iter().map(notification_dto).collect()))
}

async fn api_notifications_count(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
) -> Result<Json<api::NotificationCountDto>, AppError> {
    let unread = state
        .store
        .unread_notification_count(auth.user_id())
        .await
        .map_err(AppError::internal)?;
    Ok(Json(api::NotificationCountDto { unread }))
}

async fn api_mark_notification_read(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(id): Path<i32>,
) -> Result<StatusCode, AppError> {
    let updated = state
        .store
        .mark_notification_read(auth.user_id(), id)
        .await
        .map_err(AppError::internal)?;
    if !updated {
        return Err(AppError::not_found(format!("notification not found: {id}")));
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Unauthorized,
    Forbidden,
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl AppError {
    fn bad_request<T: Into<String>>(msg: T) -> Self {
        Self::BadRequest(msg.into())
    }
    fn unauthorized() -> Self {
        Self::Unauthorized
    }
    fn forbidden() -> Self {
        Self::Forbidden
    }
    fn not_found<T: Into<String>>(msg: T) -> Self {
        Self::NotFound(msg.into())
    }
    fn conflict<T: Into<String>>(msg: T) -> Self {
        Self::Conflict(msg.into())
    }
    fn internal<E: std::fmt::Display>(e: E) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<LedgerError> for AppError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::MissingUser | LedgerError::InvalidAmount(_) => {
                AppError::bad_request(e.to_string())
            }
            LedgerError::Overflow => AppError::conflict(e.to_string()),
            LedgerError::Lookup(_) | LedgerError::Write(_) => AppError::internal(e),
        }
    }
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, msg, kind, detail) = match self {
            AppError::BadRequest(m) => (StatusCode::BAD_REQUEST, m, "bad_request", None),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized".into(),
                "unauthorized",
                None,
            ),
            AppError::Forbidden => (StatusCode::FORBIDDEN, "forbidden".into(), "forbidden", None),
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, m, "not_found", None),
            AppError::Conflict(m) => (StatusCode::CONFLICT, m, "conflict", None),
            // Do not leak internal error details to clients, but log them
            AppError::Internal(m) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal server error".into(),
                "internal",
                Some(m),
            ),
        };
        if let Some(detail) = detail {
            tracing::error!(status = %status, kind = kind, message = %msg, detail = %detail, "request failed");
        } else {
            tracing::warn!(status = %status, kind = kind, message = %msg, "request failed");
        }
        let body = axum::Json(ErrorBody { error: msg });
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn starts_at_accepts_rfc3339_and_plain_dates() {
        let dt = parse_starts_at("2026-10-25T11:30:00+02:00").unwrap();
        assert_eq!(dt.hour(), 9);
        let midnight = parse_starts_at("2026-10-25").unwrap();
        assert_eq!(midnight.hour(), 0);
        assert!(parse_starts_at("next tuesday").is_err());
    }

    #[test]
    fn status_follows_start_time() {
        let now = OffsetDateTime::now_utc();
        let past = Utc::now().naive_utc() - chrono::Duration::hours(1);
        let future = Utc::now().naive_utc() + chrono::Duration::hours(1);
        assert_eq!(event_status(past, now), EventStatus::Active);
        assert_eq!(event_status(future, now), EventStatus::Upcoming);
    }

    #[test]
    fn ledger_errors_map_to_statuses() {
        assert!(matches!(
            AppError::from(LedgerError::InvalidAmount(0)),
            AppError::BadRequest(_)
        ));
        assert!(matches!(
            AppError::from(LedgerError::Overflow),
            AppError::Conflict(_)
        ));
    }
}
