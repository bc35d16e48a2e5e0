//! Kiln CLI - command-line front end for the training orchestrator.

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Kiln - iterative model-training sessions from the command line.
#[derive(Parser, Debug)]
#[command(
    name = "kiln",
    author,
    version,
    about = "Kiln - train, checkpoint, and resume slide-classifier models"
)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one training session
    ///
    /// Builds a fresh model, or resumes from the run root's rolling
    /// checkpoint when one exists, and trains for the requested number of
    /// epochs.
    Train {
        /// Directory of labeled training data (one subdirectory per class)
        #[arg(long)]
        dataset_dir: PathBuf,

        /// Directory of labeled validation data
        #[arg(long)]
        validation_dir: PathBuf,

        /// Number of epochs to run
        #[arg(long, default_value_t = 10)]
        epochs: u32,

        /// Optimizer name (adam, sgd)
        #[arg(long, default_value = "adam")]
        optimizer: String,

        /// Learning rate
        #[arg(long, default_value_t = 1e-3)]
        learning_rate: f64,

        /// Verbosity of epoch logging (0 silent, 1 progress, 2 detailed)
        #[arg(long, default_value_t = 1)]
        verbose: u8,

        /// Run root for checkpoints, artifacts, and history
        #[arg(long, default_value = ".")]
        run_root: PathBuf,

        /// Optional TOML settings file (batch size, image size, seed)
        #[arg(long)]
        settings: Option<PathBuf>,

        /// Stream progress events to stdout as JSON lines
        #[arg(long)]
        json_events: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .without_time()
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match args.command {
        Command::Train {
            dataset_dir,
            validation_dir,
            epochs,
            optimizer,
            learning_rate,
            verbose,
            run_root,
            settings,
            json_events,
        } => {
            commands::train::execute(commands::train::TrainArgs {
                dataset_dir,
                validation_dir,
                epochs,
                optimizer,
                learning_rate,
                verbose,
                run_root,
                settings,
                json_events,
            })
            .await
        }
    }
}
