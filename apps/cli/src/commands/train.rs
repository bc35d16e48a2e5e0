//! Training command implementation.

use anyhow::{Context, Result};
use colored::Colorize;
use kiln_engine::HistogramEngine;
use kiln_training::{
    CheckpointStore, ModelEngine, ProgressChannel, StdoutProgressChannel, TrainingRequest,
    TrainingSession, TrainingSettings, Verbosity,
};
use std::path::PathBuf;
use std::sync::Arc;

pub struct TrainArgs {
    pub dataset_dir: PathBuf,
    pub validation_dir: PathBuf,
    pub epochs: u32,
    pub optimizer: String,
    pub learning_rate: f64,
    pub verbose: u8,
    pub run_root: PathBuf,
    pub settings: Option<PathBuf>,
    pub json_events: bool,
}

pub async fn execute(args: TrainArgs) -> Result<()> {
    let settings = match &args.settings {
        Some(path) => TrainingSettings::from_toml_file(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => TrainingSettings::default(),
    };

    let engine: Arc<dyn ModelEngine> = Arc::new(HistogramEngine::new());
    let store = Arc::new(CheckpointStore::new(args.run_root.clone(), engine.file_extension()));

    let request = TrainingRequest {
        dataset_dir: args.dataset_dir,
        validation_dir: args.validation_dir,
        epochs: args.epochs,
        optimizer: args.optimizer,
        learning_rate: args.learning_rate,
        verbosity: Verbosity::from_level(args.verbose),
    };

    let mut session = TrainingSession::new(engine, store, settings);
    if args.json_events {
        let channel: Arc<dyn ProgressChannel> = Arc::new(StdoutProgressChannel);
        session = session.with_channel(channel);
    }

    let report = session.run(&request).await.context("Training session failed")?;

    println!();
    println!("{}", "Training complete".bold().green());
    println!("  Session: {}", report.session_id.to_string().cyan());
    if report.resumed {
        println!("  {}", "Resumed from rolling checkpoint".dimmed());
    }
    if report.stopped_early {
        println!(
            "  Stopped early after {} of {} epochs",
            report.history.len(),
            request.epochs
        );
    }
    if let Some(last) = report.history.last() {
        println!(
            "  Final metrics: loss {:.4}  accuracy {:.4}  val_loss {:.4}  val_accuracy {:.4}",
            last.loss, last.accuracy, last.val_loss, last.val_accuracy
        );
    }
    println!("  Model: {}", report.model_path.display().to_string().dimmed());
    println!("  History: {}", report.history_path.display().to_string().dimmed());
    println!();
    Ok(())
}
