use edutoken_shared::api::rest::RestError;
use tracing::debug;

pub mod cli;
pub mod config;
pub mod dashboard;
pub mod login;

pub use cli::{Cli, Command};
pub use config::{ClientConfig, load_config, resolve_config_path};

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),
    #[error("http error: {0}")]
    Http(String),
    #[error("server refused ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("invalid input: {0}")]
    Input(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<RestError> for AppError {
    fn from(e: RestError) -> Self {
        match e {
            RestError::Status { status, body } => AppError::Api {
                status,
                message: error_message(&body),
            },
            other => AppError::Http(other.to_string()),
        }
    }
}

/// Extracts `error` from a `{"error": ...}` body, falling back to the raw text.
fn error_message(body: &str) -> String {
    #[derive(serde::Deserialize)]
    struct ErrorBody {
        error: String,
    }
    serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.error)
        .unwrap_or_else(|_| body.trim().to_string())
}

fn log_filter(rust_log: Option<String>) -> String {
    rust_log.unwrap_or_else(|| "info".to_string())
}

fn init_tracing() {
    let env_filter = log_filter(std::env::var("RUST_LOG").ok());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

pub async fn run(cli: Cli) -> Result<(), AppError> {
    init_tracing();

    let cfg_path = resolve_config_path(cli.config)?;
    debug!(path=?cfg_path, "config path resolved");

    match cli.command {
        Command::Signup {
            server,
            email,
            role,
        } => login::signup(&cfg_path, server, email, role.map(Into::into)).await,
        Command::Login { server, email } => login::login(&cfg_path, server, email).await,
        Command::Logout => login::logout(&cfg_path).await,
        Command::ChooseRole { role } => login::choose_role(&cfg_path, role.into()).await,
        other => {
            let cfg = load_config(&cfg_path)?;
            dashboard::run(&cfg, other).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_errors_surface_server_message() {
        let err: AppError = RestError::Status {
            status: 409,
            body: r#"{"error":"task already completed"}"#.into(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "server refused (409): task already completed"
        );
    }

    #[test]
    fn log_filter_defaults_to_info() {
        assert_eq!(log_filter(None), "info");
        assert_eq!(log_filter(Some("debug".into())), "debug");
    }

    #[test]
    fn non_json_bodies_pass_through() {
        assert_eq!(error_message("  bad gateway \n"), "bad gateway");
    }
}
