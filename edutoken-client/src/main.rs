use clap::Parser;
use edutoken_client::{Cli, run};

#[tokio::main]
async fn main() -> Result<(), edutoken_client::AppError> {
    run(Cli::parse()).await
}
