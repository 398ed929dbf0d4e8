use anyhow::Result;
use clap::{Args, Parser};
use tracing_subscriber::EnvFilter;

mod desk;

use desk::{handle_desk_command, DeskCommand, DeskContext};

#[derive(Parser)]
#[command(name = "clientdesk")]
#[command(about = "Client assignment desk", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: DeskCommand,
}

/// Store and credential selection shared by every command. Empty values fall
/// back to the matching `CLIENTDESK_*` environment variable.
#[derive(Args, Debug, Default)]
pub struct GlobalArgs {
    /// Session token; without one the local fallback file is used.
    #[arg(long, global = true, default_value = "")]
    pub token: String,
    #[arg(long, global = true, default_value = "")]
    pub sessions: String,
    #[arg(long, global = true, default_value = "")]
    pub db: String,
    #[arg(long, global = true, default_value = "")]
    pub fallback: String,
    /// Comma separated agent roster.
    #[arg(long, global = true, default_value = "")]
    pub agents: String,
    /// Grant administrator rights to the local operator.
    #[arg(long, global = true)]
    pub local_admin: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();
    let ctx = DeskContext::from_args(&cli.global)?;
    handle_desk_command(&ctx, cli.command)
}

fn init_logging() {
    let level = std::env::var("CLIENTDESK_LOG_LEVEL").unwrap_or_else(|_| "warn".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
