use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "chansync")]
#[command(about = "Incremental Slack history synchronizer", long_about = None)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve the whitelist once and poll forever
    Run,
    /// Run a single poll cycle and exit
    Once,
    /// Show how whitelist entries resolve to conversation ids
    Resolve,
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Write the text of the first N logged messages to a sample file
    Extract {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
        #[arg(short = 'n', long, default_value_t = 10)]
        count: usize,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Init {
        #[arg(long)]
        stdout: bool,
    },
    Validate,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chansync=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let config_path = chansync::config::resolve_config_path(cli.config.as_deref());

    match cli.command {
        Some(Commands::Run) | None => {
            chansync::cli::run::run(config_path).await?;
        }
        Some(Commands::Once) => {
            chansync::cli::run::once(config_path).await?;
        }
        Some(Commands::Resolve) => {
            chansync::cli::run::resolve(config_path).await?;
        }
        Some(Commands::Config { action }) => match action {
            ConfigAction::Init { stdout } => {
                chansync::cli::config::init(stdout)?;
            }
            ConfigAction::Validate => {
                chansync::cli::config::validate(config_path)?;
            }
        },
        Some(Commands::Extract {
            input,
            output,
            count,
        }) => {
            let written = chansync::extract::write_sample(&input, &output, count)?;
            println!("Saved first {} messages to {}", written, output.display());
        }
    }

    Ok(())
}
