//! forgepm CLI - control plane for dedicated game servers

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;
mod commands;
mod output;

use cli::{Cli, Commands};
use commands::*;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    output::set_json_mode(cli.json);

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("forgepm={level},forgepm_ipc={level}", level = log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().without_time())
        .init();

    let result = match cli.command {
        Commands::Ls => instances::list().await,
        Commands::Show { id } => instances::show(&id).await,
        Commands::Create(args) => instances::create(args).await,
        Commands::Update(args) => instances::update(args).await,
        Commands::Rm { id } => instances::remove(&id).await,
        Commands::Start { id, args } => lifecycle::start(&id, args).await,
        Commands::Stop { id } => lifecycle::stop(&id).await,
        Commands::Restart { id } => lifecycle::restart(&id).await,
        Commands::Rcon { instance, command } => console::rcon(&instance, &command).await,
        Commands::Players { id } => console::players(&id).await,
        Commands::Kick {
            index,
            instance,
            reason,
        } => console::kick(&instance, index, reason).await,
        Commands::Ban {
            identifier,
            instance,
            reason,
        } => console::ban(&instance, &identifier, reason).await,
        Commands::Logs(args) => logs::execute(args).await,
        Commands::Crashes { limit } => logs::crashes(limit).await,
        Commands::Watchdog { action } => watchdog::execute(action).await,
        Commands::Jobs(args) => jobs::execute(args).await,
        Commands::Maps(args) => maps::execute(args).await,
        Commands::Stats(args) => stats::execute(args).await,
        Commands::Notify(args) => notify::execute(args).await,
        Commands::Ping => ping::execute().await,
        Commands::Kill => kill::execute().await,
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    Ok(())
}
