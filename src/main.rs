use autohostd::frameworks::cli::Cli;
use autohostd::frameworks::{logging, runtime};
use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init();

    if let Err(err) = runtime::run(cli).await {
        tracing::error!(error = %err, "fatal error");
        std::process::exit(err.exit_code().unwrap_or(1) as i32);
    }
}
