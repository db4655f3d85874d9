use clap::Parser;
use tracing_subscriber::EnvFilter;

use defi_session::cli::{Cli, run_command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();
    run_command(cli).await
}

/// `RUST_LOG` filter (default `defi_session=info`); `LOG_FORMAT=json` for
/// structured output. Logs go to stderr so command output stays clean.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("defi_session=info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
