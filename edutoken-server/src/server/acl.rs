use super::{AppError, auth::AuthCtx};
use axum::response::Response;
use axum::{
    extract::OriginalUri,
    http::{Method, Request},
    middleware::Next,
};
use edutoken_shared::auth::Role;
use edutoken_shared::jwt::JwtClaims;
use percent_encoding::percent_decode_str;

pub async fn enforce_acl(req: Request<axum::body::Body>, next: Next) -> Result<Response, AppError> {
    let path = req
        .extensions()
        .get::<OriginalUri>()
        .map(|orig| orig.0.path().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let method = req.method().clone();
    let Some(auth) = req.extensions().get::<AuthCtx>() else {
        return Err(AppError::unauthorized());
    };
    let claims = &auth.claims;

    let segs = segmented(&path);
    let prefix = ["api", "v1"];
    if !segs.as_slice().starts_with(&prefix) {
        tracing::warn!(?segs, "ACL: path outside API scope");
        return Err(AppError::forbidden());
    }
    let rest = &segs[prefix.len()..];

    let decision = allow_any(&method, rest).or_else(|_| match claims.role {
        Some(Role::Teacher) => allow_teacher(&method, rest),
        Some(Role::Student) => allow_student(&method, rest, claims),
        None => Err(AppError::forbidden()),
    });

    if let Err(err) = decision {
        tracing::warn!(
            method = %method,
            path = %path,
            user_id = %claims.sub,
            role = ?claims.role,
            "ACL: no rule matched; denying"
        );
        return Err(err);
    }

    Ok(next.run(req).await)
}

/// Routes open to every signed-in user, including those without a role.
fn allow_any(method: &Method, rest: &[&str]) -> Result<(), AppError> {
    match rest {
        ["auth", "me"] if *method == Method::GET => Ok(()),
        ["auth", "role" | "logout" | "renew"] if *method == Method::POST => Ok(()),
        ["notifications"] if *method == Method::GET => Ok(()),
        ["notifications", "count"] if *method == Method::GET => Ok(()),
        ["notifications", id, "read"] if *method == Method::POST && id.parse::<i32>().is_ok() => {
            Ok(())
        }
        _ => Err(AppError::forbidden()),
    }
}

fn allow_teacher(method: &Method, rest: &[&str]) -> Result<(), AppError> {
    match rest {
        ["tasks"] if *method == Method::GET || *method == Method::POST => Ok(()),
        ["tasks", id] if *method == Method::DELETE && is_id(id) => Ok(()),
        ["events"] if *method == Method::GET || *method == Method::POST => Ok(()),
        ["events", id] if *method == Method::DELETE && is_id(id) => Ok(()),
        ["events", id, "qr"] if *method == Method::GET && is_id(id) => Ok(()),
        ["students"] if *method == Method::GET => Ok(()),
        ["stats"] if *method == Method::GET => Ok(()),
        ["users", _, "balance"] if *method == Method::GET => Ok(()),
        _ => Err(AppError::forbidden()),
    }
}

fn allow_student(method: &Method, rest: &[&str], claims: &JwtClaims) -> Result<(), AppError> {
    match rest {
        ["tasks"] if *method == Method::GET => Ok(()),
        ["tasks", id, "complete"] if *method == Method::POST && is_id(id) => Ok(()),
        ["events"] if *method == Method::GET => Ok(()),
        ["scan"] if *method == Method::POST => Ok(()),
        ["users", user, "balance"] if *method == Method::GET => ensure_self(claims, user),
        _ => Err(AppError::forbidden()),
    }
}

fn segmented(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn is_id(seg: &str) -> bool {
    seg.parse::<i32>().is_ok()
}

fn decode(seg: &str) -> String {
    percent_decode_str(seg).decode_utf8_lossy().to_string()
}

fn ensure_self(claims: &JwtClaims, seg: &str) -> Result<(), AppError> {
    if claims.sub == decode(seg) {
        Ok(())
    } else {
        Err(AppError::forbidden())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(role: Option<Role>) -> JwtClaims {
        JwtClaims {
            sub: "user-1".into(),
            jti: "j".into(),
            exp: 0,
            email: "a@b.c".into(),
            role,
        }
    }

    #[test]
    fn students_read_only_their_own_balance() {
        let c = claims(Some(Role::Student));
        assert!(allow_student(&Method::GET, &["users", "user-1", "balance"], &c).is_ok());
        assert!(allow_student(&Method::GET, &["users", "user-2", "balance"], &c).is_err());
        assert!(allow_student(&Method::GET, &["users", "user%2D1", "balance"], &c).is_ok());
    }

    #[test]
    fn students_cannot_manage_content() {
        let c = claims(Some(Role::Student));
        assert!(allow_student(&Method::POST, &["tasks"], &c).is_err());
        assert!(allow_student(&Method::DELETE, &["events", "1"], &c).is_err());
        assert!(allow_student(&Method::GET, &["events", "1", "qr"], &c).is_err());
        assert!(allow_student(&Method::GET, &["stats"], &c).is_err());
        assert!(allow_student(&Method::POST, &["tasks", "7", "complete"], &c).is_ok());
    }

    #[test]
    fn teachers_manage_but_do_not_earn() {
        assert!(allow_teacher(&Method::GET, &["events", "3", "qr"]).is_ok());
        assert!(allow_teacher(&Method::GET, &["users", "anyone", "balance"]).is_ok());
        assert!(allow_teacher(&Method::POST, &["scan"]).is_err());
        assert!(allow_teacher(&Method::POST, &["tasks", "1", "complete"]).is_err());
        assert!(allow_teacher(&Method::DELETE, &["tasks", "abc"]).is_err());
    }

    #[test]
    fn shared_routes_need_no_role() {
        assert!(allow_any(&Method::GET, &["auth", "me"]).is_ok());
        assert!(allow_any(&Method::POST, &["auth", "role"]).is_ok());
        assert!(allow_any(&Method::POST, &["notifications", "4", "read"]).is_ok());
        assert!(allow_any(&Method::GET, &["tasks"]).is_err());
    }
}
