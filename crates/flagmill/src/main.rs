//! Flagmill
//!
//! Batch staging daemon for distributed filesystem ingest. Watches origin
//! directories, stages batches of input files, and publishes flag files
//! that downstream loaders consume.
//!
//! Usage:
//!     flagmill run --config flagmill.toml
//!     flagmill kick events
//!     flagmill shutdown

mod logging;

use anyhow::Context;
use clap::{Parser, Subcommand};
use flagmill_core::config::DEFAULT_CONTROL_ADDR;
use flagmill_core::{control, FlagMaker, FlagMakerConfig, METRICS};
use std::path::PathBuf;
use std::sync::mpsc;

#[derive(Parser, Debug)]
#[command(name = "flagmill", about = "Flag-file batch staging for distributed ingest")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the polling loop
    Run {
        /// Path to the TOML configuration file
        #[arg(long, short, env = "FLAGMILL_CONFIG")]
        config: PathBuf,

        /// Mirror debug-level logs to stderr
        #[arg(long, short)]
        verbose: bool,
    },
    /// Force immediate emission for a data type on a running maker
    Kick {
        /// Data type name
        data_type: String,

        /// Control address of the running maker
        #[arg(long, default_value = DEFAULT_CONTROL_ADDR)]
        addr: String,
    },
    /// Stop a running maker
    Shutdown {
        /// Control address of the running maker
        #[arg(long, default_value = DEFAULT_CONTROL_ADDR)]
        addr: String,
    },
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    match args.command {
        Command::Run { config, verbose } => run(config, verbose),
        Command::Kick { data_type, addr } => {
            let reply = control::send_command(&addr, &format!("kick {data_type}"))?;
            println!("{reply}");
            Ok(())
        }
        Command::Shutdown { addr } => {
            let reply = control::send_command(&addr, "shutdown")?;
            println!("{reply}");
            Ok(())
        }
    }
}

fn run(config_path: PathBuf, verbose: bool) -> anyhow::Result<()> {
    logging::init_logging(verbose)?;

    let config = FlagMakerConfig::load(&config_path)
        .with_context(|| format!("failed to load config: {}", config_path.display()))?;

    tracing::info!(
        config = %config_path.display(),
        pool = %config.pool,
        data_types = config.data_types.len(),
        "starting flagmill"
    );

    let (tx, rx) = mpsc::channel();
    let _listener = control::spawn_listener(&config.control_addr, tx)?;

    let mut maker = FlagMaker::new(config, rx);
    let outcome = maker.run();
    maker.shutdown();

    tracing::info!(metrics = %METRICS.snapshot().summary(), "flagmill stopped");
    outcome?;
    Ok(())
}
