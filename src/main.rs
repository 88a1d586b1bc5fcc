use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use outbound::cli::args::{Cli, Commands};
use outbound::cli::commands::{self, Context};

/// Environment variable holding the log filter, e.g. `OUTBOUND_LOG=debug`.
const LOG_ENV: &str = "OUTBOUND_LOG";

#[tokio::main]
async fn main() {
    init_tracing();

    if let Err(e) = run().await {
        eprintln!("{}: {:#}", "error".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        print!("{}", commands::completions(shell)?);
        return Ok(());
    }

    let ctx = Context::load(cli.output)?;
    let format = ctx.format;

    let output = match cli.command {
        Commands::Status => commands::status(&ctx.open_store()?, format)?,
        Commands::List => commands::list(&ctx.open_store()?, format)?,
        Commands::Create(args) => commands::create(&mut ctx.open_store()?, args, format)?,
        Commands::Update {
            entity,
            id,
            payload,
        } => commands::update(&mut ctx.open_store()?, entity, id, &payload, format)?,
        Commands::Delete { entity, id } => {
            commands::delete(&mut ctx.open_store()?, entity, id, format)?
        }
        Commands::Sync => commands::sync(&ctx).await?,
        Commands::Watch { interval } => commands::watch(&ctx, interval).await?,
        Commands::Failed => commands::failed(&ctx.open_store()?, format)?,
        Commands::Dismiss { id, all } => {
            commands::dismiss(&mut ctx.open_store()?, id, all, format)?
        }
        Commands::Clear { force } => commands::clear(&mut ctx.open_store()?, force, format)?,
        Commands::Completions { .. } => String::new(),
    };

    if !output.is_empty() {
        println!("{output}");
    }
    Ok(())
}
