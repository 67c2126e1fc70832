mod commands;
mod console;

use clap::{Args, Parser, Subcommand};
use platform_backup::config::expand_home;
use platform_backup::{utils, Config};
use std::path::PathBuf;
use std::process::ExitCode;

const DEFAULT_CONFIG_DIR: &str = "~/.hoss";
const DEFAULT_ENDPOINT: &str = "http://localhost";

#[derive(Parser, Debug)]
#[command(name = "platformadm", author, version, about = "Administer a local platform deployment", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Tool settings file (TOML); defaults apply when omitted
    #[arg(long, global = true, value_name = "FILE")]
    settings: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Back up the platform running locally
    Backup(Target),

    /// Restore the local platform from a backup archive
    Restore {
        /// Archive produced by `platformadm backup`
        #[arg(value_name = "BACKUP_ARCHIVE")]
        archive: PathBuf,

        #[command(flatten)]
        target: Target,
    },

    /// Print tool and platform versions
    Version {
        /// Platform root endpoint, including the scheme
        #[arg(short, long, default_value = DEFAULT_ENDPOINT)]
        endpoint: String,
    },
}

#[derive(Args, Debug)]
struct Target {
    /// Platform configuration directory
    #[arg(short, long, default_value = DEFAULT_CONFIG_DIR)]
    config_dir: PathBuf,

    /// Platform root endpoint, including the scheme (e.g. https://platform.example.com)
    #[arg(short, long, default_value = DEFAULT_ENDPOINT)]
    endpoint: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            console::failure(&e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(cli.settings.as_deref())?;

    let log_level = cli.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;
    tracing::debug!("platformadm v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Backup(target) => {
            commands::backup(&config, &expand_home(&target.config_dir), &target.endpoint).await
        }
        Command::Restore { archive, target } => {
            commands::restore(&config, &expand_home(&target.config_dir), &target.endpoint, &archive).await
        }
        Command::Version { endpoint } => commands::version(&endpoint).await,
    }
}
