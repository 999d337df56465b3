//! Rosetta CLI - Command-line interface for Rosetta
//!
//! This is the main entry point for running a shared mappings server and
//! for working with mapping snapshots offline.

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "rosetta")]
#[command(author = "Rosetta Contributors")]
#[command(version)]
#[command(about = "Collaborative deobfuscation mappings server", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default settings file
    Init {
        /// Settings file (defaults to the user config directory)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Start the mappings server
    Serve {
        /// Settings file (defaults to the user config directory)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Address to bind, overriding the settings file
        #[arg(short, long)]
        bind: Option<String>,

        /// Port to listen on, overriding the settings file
        #[arg(short, long)]
        port: Option<u16>,

        /// Class index produced by the analysis pass
        #[arg(short, long)]
        index: Option<PathBuf>,

        /// Mapping snapshot to start from
        #[arg(short, long)]
        mappings: Option<PathBuf>,

        /// Write the final snapshot here on shutdown
        #[arg(short, long)]
        save: Option<PathBuf>,
    },

    /// Drop mappings that do not apply to the class index
    Check {
        /// Mapping snapshot to check
        mappings: PathBuf,

        /// Class index produced by the analysis pass
        #[arg(short, long)]
        index: PathBuf,

        /// Write the cleaned snapshot here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the deobfuscated name of every mapped entry
    Translate {
        /// Mapping snapshot to translate
        mappings: PathBuf,

        /// Translate every indexed entry instead of only mapped ones
        #[arg(short, long)]
        index: Option<PathBuf>,

        /// Output as JSON instead of formatted text
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .with(tracing_subscriber::EnvFilter::new(filter))
        .init();

    let result = match cli.command {
        Commands::Init { config, force } => commands::init(config.as_deref(), force),
        Commands::Serve {
            config,
            bind,
            port,
            index,
            mappings,
            save,
        } => {
            let options = commands::ServeOptions {
                config,
                bind,
                port,
                index,
                mappings,
                save,
            };
            commands::serve(options).await
        }
        Commands::Check {
            mappings,
            index,
            output,
        } => commands::check(&mappings, &index, output.as_deref()),
        Commands::Translate {
            mappings,
            index,
            json,
        } => commands::translate(&mappings, index.as_deref(), json),
    };

    if let Err(e) = result {
        eprintln!("{} {}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}
