use axum::extract::{Extension, State};
use axum::http::{Request, StatusCode, header};
use axum::middleware::Next;
use axum::response::Response;
use axum::Json;
use bcrypt::verify;
use chrono::{Duration, Utc};
use edutoken_shared::api;
use edutoken_shared::auth::Role;
use edutoken_shared::jwt::{self, JwtClaims};
use tracing::{error, info, warn};

use super::{AppError, AppState};
use crate::storage::StorageError;
use crate::storage::models::User;

/// How many days of inactivity before a user session is considered expired.
const USER_SESSION_IDLE_DAYS: i64 = 14;
/// How many days before mandatory re-login for users.
const USER_TOKEN_TTL_DAYS: i64 = 30;
const MIN_PASSWORD_LEN: usize = 6;

#[derive(Clone, Debug)]
pub struct AuthCtx {
    pub claims: JwtClaims,
}

impl AuthCtx {
    pub fn user_id(&self) -> &str {
        &self.claims.sub
    }

    pub fn role(&self) -> Option<Role> {
        self.claims.role
    }
}

pub async fn require_bearer(
    State(state): State<AppState>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AppError> {
    let unauthorized = || Err(AppError::unauthorized());
    let header_val = match req.headers().get(header::AUTHORIZATION) {
        Some(v) => v,
        None => return unauthorized(),
    };
    let header_str = header_val.to_str().map_err(|_| AppError::unauthorized())?;
    let Some(token) = header_str.strip_prefix("Bearer ") else {
        return unauthorized();
    };

    let claims = match jwt::decode_and_verify(token, state.config.jwt_secret.as_bytes()) {
        Ok(c) => c,
        Err(e) => {
            warn!(error=%e, "auth: jwt decode failed");
            return unauthorized();
        }
    };

    let jti = claims.jti.clone();
    let cutoff = Utc::now() - Duration::days(USER_SESSION_IDLE_DAYS);
    match state
        .store
        .touch_session_with_cutoff(&jti, cutoff.naive_utc())
        .await
    {
        Ok(true) => {}
        Ok(false) => {
            warn!(
                jti = %jti,
                user_id = %claims.sub,
                cutoff = %cutoff,
                "auth: session missing or expired (last_used_at < cutoff)"
            );
            return unauthorized();
        }
        Err(e) => {
            error!(jti = %jti, error=%e, "auth: touch_session_with_cutoff failed");
            return Err(AppError::internal(e));
        }
    }

    let user = load_user(&state, &claims.sub).await?.ok_or_else(|| {
        warn!(user_id = %claims.sub, "auth: token for unknown user");
        AppError::unauthorized()
    })?;
    if claims.role.is_some() && claims.role != user.role() {
        warn!(
            user_id = %claims.sub,
            token_role = ?claims.role,
            stored_role = ?user.role(),
            "auth: role mismatch"
        );
        return unauthorized();
    }

    req.extensions_mut().insert(AuthCtx { claims });
    Ok(next.run(req).await)
}

/// Creates a session and signs a token for `user`, carrying its current role.
pub async fn issue_jwt(state: &AppState, user: &User) -> Result<String, AppError> {
    let jti = uuid::Uuid::new_v4().to_string();
    let exp = (Utc::now() + Duration::days(USER_TOKEN_TTL_DAYS)).timestamp();
    let claims = JwtClaims {
        sub: user.id.clone(),
        jti: jti.clone(),
        exp,
        email: user.email.clone(),
        role: user.role(),
    };

    state
        .store
        .create_session(&jti, &user.id)
        .await
        .map_err(|e| {
            error!(user_id = %user.id, error=%e, "issue_jwt: create_session failed");
            AppError::internal(e)
        })?;
    jwt::encode(&claims, state.config.jwt_secret.as_bytes()).map_err(|e| {
        error!(user_id = %user.id, error=%e, "issue_jwt: jwt encode failed");
        AppError::internal(e)
    })
}

fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

async fn load_user(state: &AppState, user_id: &str) -> Result<Option<User>, AppError> {
    state.store.get_user(user_id).await.map_err(|e| {
        error!(user_id, error=%e, "auth: user lookup failed");
        AppError::internal(e)
    })
}

async fn revoke(state: &AppState, jti: &str) -> Result<(), AppError> {
    state.store.delete_session(jti).await.map_err(|e| {
        error!(jti, error=%e, "auth: delete_session failed");
        AppError::internal(e)
    })?;
    Ok(())
}

pub async fn api_auth_signup(
    State(state): State<AppState>,
    Json(body): Json<api::SignUpReq>,
) -> Result<Json<api::AuthResp>, AppError> {
    let email = normalize_email(&body.email);
    if !email.contains('@') {
        return Err(AppError::bad_request("email is not valid"));
    }
    if body.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::bad_request(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    let hash = bcrypt::hash(&body.password, bcrypt::DEFAULT_COST).map_err(|e| {
        error!(error=%e, "signup: bcrypt hash failed");
        AppError::internal(e)
    })?;
    let user = match state.store.create_user(&email, &hash, body.role).await {
        Ok(u) => u,
        Err(StorageError::Conflict(_)) => {
            warn!(email = %email, "signup: email already registered");
            return Err(AppError::conflict("email already registered"));
        }
        Err(e) => return Err(AppError::internal(e)),
    };
    info!(user_id = %user.id, role = ?body.role, "signup: user created");
    let token = issue_jwt(&state, &user).await?;
    Ok(Json(api::AuthResp { token }))
}

pub async fn api_auth_login(
    State(state): State<AppState>,
    Json(body): Json<api::AuthReq>,
) -> Result<Json<api::AuthResp>, AppError> {
    let email = normalize_email(&body.email);
    let user = state
        .store
        .find_user_by_email(&email)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| {
            warn!(email = %email, "login: unknown email");
            AppError::unauthorized()
        })?;
    if !verify(&body.password, &user.password_hash).map_err(|e| {
        error!(email = %email, error=%e, "login: bcrypt verify failed");
        AppError::internal(e)
    })? {
        warn!(email = %email, "login: invalid password");
        return Err(AppError::unauthorized());
    }
    let token = issue_jwt(&state, &user).await?;
    Ok(Json(api::AuthResp { token }))
}

pub async fn api_auth_logout(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
) -> Result<StatusCode, AppError> {
    revoke(&state, &auth.claims.jti).await?;
    info!(user_id = %auth.user_id(), "logout: session revoked");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn api_auth_renew(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
) -> Result<Json<api::AuthResp>, AppError> {
    let user = load_user(&state, auth.user_id())
        .await?
        .ok_or_else(AppError::unauthorized)?;
    let token = issue_jwt(&state, &user).await?;
    revoke(&state, &auth.claims.jti).await?;
    Ok(Json(api::AuthResp { token }))
}

pub async fn api_auth_me(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
) -> Result<Json<api::UserDto>, AppError> {
    let user = load_user(&state, auth.user_id())
        .await?
        .ok_or_else(AppError::unauthorized)?;
    Ok(Json(api::UserDto {
        role: user.role(),
        id: user.id,
        email: user.email,
    }))
}

/// Sets the caller's role once and swaps the token for one carrying it.
pub async fn api_auth_role(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Json(body): Json<api::RoleReq>,
) -> Result<Json<api::AuthResp>, AppError> {
    let updated = state
        .store
        .set_role_if_unset(auth.user_id(), body.role)
        .await
        .map_err(AppError::internal)?;
    if !updated {
        warn!(user_id = %auth.user_id(), requested = %body.role, "role: already chosen");
        return Err(AppError::conflict("role already chosen"));
    }
    let user = load_user(&state, auth.user_id())
        .await?
        .ok_or_else(AppError::unauthorized)?;
    info!(user_id = %user.id, role = %body.role, "role: chosen");
    let token = issue_jwt(&state, &user).await?;
    revoke(&state, &auth.claims.jti).await?;
    Ok(Json(api::AuthResp { token }))
}
