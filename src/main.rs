use clap::{Parser, Subcommand};
use shovel::cli::index::LookupKey;
use shovel::config::resolve_config_path;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "shovel")]
#[command(about = "Tail a delimited file into a database table", long_about = None)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Load the file into the sink, resuming where the last run stopped
    Run {
        /// Source file, overriding source.path
        file: Option<PathBuf>,
    },
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum IndexAction {
    /// Build the offset index if it does not exist yet
    Build { file: Option<PathBuf> },
    /// Print the index entry for a timestamp or an identifier
    Lookup {
        #[arg(long, conflicts_with = "id", required_unless_present = "id")]
        date: Option<String>,
        #[arg(long)]
        id: Option<Uuid>,
        file: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the resolved configuration
    Dump { file: Option<PathBuf> },
    Init {
        #[arg(long)]
        stdout: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shovel=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config_path = resolve_config_path(cli.config.as_deref());

    match cli.command {
        Some(Commands::Run { file }) => {
            shovel::cli::run::run(config_path, file).await?;
        }
        None => {
            shovel::cli::run::run(config_path, None).await?;
        }
        Some(Commands::Index { action }) => match action {
            IndexAction::Build { file } => {
                shovel::cli::index::build(config_path.as_deref(), file.as_deref()).await?;
            }
            IndexAction::Lookup { date, id, file } => {
                let key = match (date, id) {
                    (Some(date), _) => LookupKey::Date(date),
                    (None, Some(id)) => LookupKey::Identifier(id),
                    (None, None) => return Err("one of --date or --id is required".into()),
                };
                shovel::cli::index::lookup(config_path.as_deref(), file.as_deref(), key).await?;
            }
        },
        Some(Commands::Config { action }) => match action {
            ConfigAction::Dump { file } => {
                shovel::cli::config::dump(config_path.as_deref(), file.as_deref())?;
            }
            ConfigAction::Init { stdout } => {
                shovel::cli::config::init(stdout)?;
            }
        },
    }

    Ok(())
}
