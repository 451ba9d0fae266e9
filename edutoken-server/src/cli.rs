use clap::Parser;
use std::path::PathBuf;

const HELP_EPILOG: &str = r#"Server options can also be provided via environment variables:
  CONFIG_PATH (default: ./config.yaml)
  DB_PATH     (default: data/app.db)
  PORT        (default: 5151 or config.listen_port)
  RUST_LOG    (default: info)
"#;

#[derive(Debug, Parser)]
#[command(
    name = "edutoken-server",
    version,
    about = "EduToken server",
    long_about = None,
    after_long_help = HELP_EPILOG,
)]
pub struct Cli {
    /// Path to the YAML config (overrides CONFIG_PATH)
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// SQLite database file (overrides DB_PATH)
    #[arg(long)]
    pub db: Option<PathBuf>,
    /// Listen port (overrides PORT and config.listen_port)
    #[arg(long)]
    pub port: Option<u16>,
    /// Validate the config and exit
    #[arg(long)]
    pub check_config: bool,
}
