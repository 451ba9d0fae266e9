use std::io::{self, Write};
use std::path::Path;

use crate::AppError;
use crate::config::{ClientConfig, load_or_default, normalize_server_url, save_config};
use edutoken_shared::api::{self, RoleReq};
use edutoken_shared::auth::Role;
use edutoken_shared::jwt;
use tracing::{info, warn};

pub async fn signup(
    cfg_path: &Path,
    server_arg: Option<String>,
    email_arg: Option<String>,
    role: Option<Role>,
) -> Result<(), AppError> {
    let mut cfg = load_or_default(cfg_path)?;
    apply_server(&mut cfg, server_arg);
    let email = email_or_prompt(email_arg)?;
    let password = read_password("Password (min 6 characters): ")?;
    let confirm = read_password("Repeat password: ")?;
    if password != confirm {
        return Err(AppError::Input("passwords do not match".into()));
    }

    let resp = api::rest::signup(
        &cfg.server_url,
        &api::SignUpReq {
            email: email.clone(),
            password,
            role,
        },
    )
    .await?;
    store_session(cfg_path, cfg, &email, resp.token)
}

pub async fn login(
    cfg_path: &Path,
    server_arg: Option<String>,
    email_arg: Option<String>,
) -> Result<(), AppError> {
    let mut cfg = load_or_default(cfg_path)?;
    apply_server(&mut cfg, server_arg);
    let email = match email_arg.or_else(|| cfg.email.clone()) {
        Some(e) => e,
        None => prompt("Email: ")?,
    };
    let password = read_password("Password: ")?;

    let resp = api::rest::login(
        &cfg.server_url,
        &api::AuthReq {
            email: email.clone(),
            password,
        },
    )
    .await?;
    store_session(cfg_path, cfg, &email, resp.token)
}

pub async fn logout(cfg_path: &Path) -> Result<(), AppError> {
    let mut cfg = load_or_default(cfg_path)?;
    let Some(token) = cfg.token.take() else {
        println!("Not signed in.");
        return Ok(());
    };
    // The local token is dropped even if the server is unreachable
    if let Err(e) = api::rest::logout(&cfg.server_url, &token).await {
        warn!(error=%e, "server logout failed; forgetting token locally");
    }
    save_config(cfg_path, &cfg)?;
    println!("Signed out.");
    Ok(())
}

pub async fn choose_role(cfg_path: &Path, role: Role) -> Result<(), AppError> {
    let mut cfg = load_or_default(cfg_path)?;
    let token = cfg.require_token()?.to_string();
    let resp = api::rest::choose_role(&cfg.server_url, &token, &RoleReq { role }).await?;
    cfg.token = Some(resp.token);
    save_config(cfg_path, &cfg)?;
    println!("You are now a {role}.");
    Ok(())
}

fn apply_server(cfg: &mut ClientConfig, server_arg: Option<String>) {
    if let Some(s) = server_arg {
        cfg.server_url = normalize_server_url(&s);
    }
}

fn store_session(
    cfg_path: &Path,
    mut cfg: ClientConfig,
    email: &str,
    token: String,
) -> Result<(), AppError> {
    let role = jwt::decode_unverified(&token)
        .map_err(|e| AppError::Http(format!("server returned an unreadable token: {e}")))?
        .role;
    cfg.token = Some(token);
    cfg.email = Some(email.trim().to_ascii_lowercase());
    save_config(cfg_path, &cfg)?;
    info!(path=%cfg_path.display(), "session saved");

    match role {
        Some(r) => println!("Signed in to {} as {} ({r}).", cfg.server_url, email),
        None => println!(
            "Signed in to {} as {}. Pick a role with `edutoken choose-role student|teacher`.",
            cfg.server_url, email
        ),
    }
    Ok(())
}

fn email_or_prompt(arg: Option<String>) -> Result<String, AppError> {
    let email = match arg {
        Some(e) => e,
        None => prompt("Email: ")?,
    };
    if !email.contains('@') {
        return Err(AppError::Input(format!("not an email address: {email}")));
    }
    Ok(email)
}

fn read_password(msg: &str) -> Result<String, AppError> {
    rpassword::prompt_password(msg).map_err(AppError::Io)
}

pub(crate) fn prompt(msg: &str) -> Result<String, AppError> {
    print!("{}", msg);
    io::stdout().flush().ok();
    let mut buf = String::new();
    io::stdin().read_line(&mut buf).map_err(AppError::Io)?;
    Ok(buf.trim().to_string())
}
