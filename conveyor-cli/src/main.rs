mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands, ConfigCommands};
use commands::{client, config, load_config, pool, serve, worker};
use conveyor_logging::{init_logging_from_config, init_simple_tracing, init_worker_tracing};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Worker mode first: logging goes to stderr before anything else is set up
    if cli.worker {
        let level = cli.log_level.as_deref().unwrap_or("info");
        init_worker_tracing(level)?;
        let config = load_config(cli.config.as_ref())?;
        return worker::run_worker(&config, cli.worker_id.unwrap_or(0)).await;
    }

    let config = load_config(cli.config.as_ref())?;

    match cli.log_level.as_deref() {
        Some(level) => init_simple_tracing(level)?,
        None => init_logging_from_config(&config.logging)?,
    }

    info!("Conveyor CLI starting");

    match &cli.command {
        Some(Commands::Serve { managers }) => serve::serve_command(&config, *managers).await,
        Some(Commands::Pool) => {
            let args = pool::worker_args(cli.config.as_ref(), cli.log_level.as_ref());
            pool::pool_command(&config, args).await
        }
        Some(Commands::Worker { id }) => worker::run_worker(&config, *id).await,
        Some(Commands::Submit {
            function,
            args,
            id,
            priority,
        }) => {
            client::submit_command(&config, function, args.as_deref(), id.as_deref(), *priority)
                .await
        }
        Some(Commands::Result { id, timeout }) => {
            client::result_command(&config, id, *timeout).await
        }
        Some(Commands::Info { managers }) => client::info_command(&config, *managers).await,
        Some(Commands::Shutdown { managers }) => {
            client::shutdown_command(&config, *managers).await
        }
        Some(Commands::Config { config_cmd }) => match config_cmd {
            ConfigCommands::Validate { config_file } => config::handle_config_validate(config_file),
            ConfigCommands::Generate { output, force } => {
                config::handle_config_generate(output.as_ref(), *force)
            }
            ConfigCommands::Show { format } => config::handle_config_show(&config, format),
        },
        None => {
            println!("No command specified. Use --help for usage information.");
            Ok(())
        }
    }
}
