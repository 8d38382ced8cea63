mod doctor_cmd;
mod exec_cmd;

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};

use lmsguard_config::{config_dir, config_file_path, GuardConfig};

#[derive(Parser)]
#[command(name = "lmsguard")]
#[command(about = "Trust boundary for LMS tool-calling servers")]
#[command(version)]
struct Cli {
    /// Path to the config file (default: ~/.lmsguard/config.yaml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check configuration and sandbox prerequisites
    Doctor,
    /// Run a guest program through the sandbox and print the outcome as JSON
    Exec {
        /// File containing the program source
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let path = cli
        .config
        .unwrap_or_else(|| config_file_path(&config_dir()));

    match cli.command {
        Commands::Doctor => doctor_cmd::run(&path).await,
        Commands::Exec { file } => exec_cmd::run(&path, &file).await,
    }
}

/// Install the diagnostic logger using the config's level and directory.
pub(crate) fn init_logging(config: &GuardConfig) {
    let logging = config.logging();
    let dir = logging
        .dir
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(|| config_dir().join("logs"));
    let dir = if std::fs::create_dir_all(&dir).is_ok() {
        dir
    } else {
        std::env::temp_dir()
    };
    lmsguard_logging::init_logger(dir, &logging.level_or_default());
}

pub(crate) fn display(path: &Path) -> String {
    path.display().to_string()
}
