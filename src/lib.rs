pub mod clean;
pub mod cli;
pub mod config;
pub mod dataset;
pub mod error;
pub mod features;
pub mod inspect;
pub mod io_utils;
pub mod observer;
pub mod summary;
pub mod table;
pub mod train;
pub mod trees;

use std::{env, sync::OnceLock};

use anyhow::{Context, Result};
use clap::Parser;
use log::{LevelFilter, info};

use crate::cli::{CleanArgs, Cli, Commands, FeaturesArgs, RunArgs, TrainArgs};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("revenue_pipeline", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Inspect(args) => inspect::execute(&args),
        Commands::Clean(args) => clean::execute(&args),
        Commands::Features(args) => features::execute(&args),
        Commands::Train(args) => train::execute(&args),
        Commands::Run(args) => handle_run(&args),
    }
}

/// Runs every stage in order. Each stage reads the file the previous one
/// persisted; the first failure stops the run.
fn handle_run(args: &RunArgs) -> Result<()> {
    info!("Starting pipeline run");
    let clean_args = CleanArgs {
        config: args.config.clone(),
        input: args.input.clone(),
        output: None,
        dedup: args.dedup,
        report: None,
        summary: false,
        delimiter: args.delimiter,
        input_encoding: args.input_encoding.clone(),
    };
    clean::execute(&clean_args).context("Cleaning stage failed")?;

    let features_args = FeaturesArgs {
        config: args.config.clone(),
        input: None,
        output: None,
        steps: args.steps.clone(),
        zero_division: args.zero_division,
        delimiter: None,
        input_encoding: None,
    };
    features::execute(&features_args).context("Feature stage failed")?;

    let train_args = TrainArgs {
        config: args.config.clone(),
        input: None,
        models_dir: None,
        seed: None,
        estimators: Vec::new(),
        delimiter: None,
        input_encoding: None,
    };
    train::execute(&train_args).context("Training stage failed")?;
    info!("Pipeline run complete");
    Ok(())
}
