//! Sage CLI - local retrieval-augmented research analyst.
//!
//! # Usage
//!
//! ```bash
//! # One question
//! sage ask "What is quantum entanglement?"
//!
//! # Interactive loop
//! sage repl
//!
//! # Web form on http://127.0.0.1:8501/
//! sage serve
//!
//! # Knowledge base size
//! sage stats
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use sage_cli::{OutputFormat, commands, output};
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(name = "sage")]
#[command(about = "Sage - local research analyst over Wikipedia and arXiv", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Research a single question and print the answer
    Ask {
        /// The research question
        question: String,
    },

    /// Answer questions from stdin until "exit"
    Repl,

    /// Serve the research web form
    Serve {
        /// Bind address (default from configuration)
        #[arg(long)]
        host: Option<String>,

        /// Port (default from configuration)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Show knowledge base statistics
    Stats,

    /// Configuration management
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration
    Show,

    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        output::error(format!("{:#}", e));
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Human
    };

    // `config init` runs even when the current file does not parse
    if let Commands::Config(ConfigCommands::Init { force }) = cli.command {
        init_logging(cli.verbose, "info");
        return commands::config_init(cli.config, force).await;
    }

    let (config, source) = commands::load_config(cli.config.as_deref()).await?;
    init_logging(cli.verbose, &config.general.log_level);

    match cli.command {
        Commands::Ask { question } => {
            commands::ask(&config, &question, format).await?;
        }

        Commands::Repl => {
            commands::repl(&config, format).await?;
        }

        Commands::Serve { host, port } => {
            commands::serve(&config, host, port).await?;
        }

        Commands::Stats => {
            commands::stats(&config, format).await?;
        }

        Commands::Config(ConfigCommands::Show) => {
            commands::config_show(&config, source.as_deref(), format)?;
        }

        Commands::Config(ConfigCommands::Init { .. }) => {}
    }

    Ok(())
}

fn init_logging(verbose: bool, level: &str) {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let filter = if verbose {
        EnvFilter::new("sage_core=debug,sage_cli=debug,sage=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "sage_core={level},sage_cli={level},sage={level},warn"
            ))
        })
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}
