use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::{DuplicatePolicy, Estimator, FeatureStep, ZeroDivisionPolicy};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Clean 5G sales records, derive features, and fit revenue models",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Show shape, column kinds, leading rows, missing counts and statistics
    Inspect(InspectArgs),
    /// Repair negative and out-of-range values and resolve duplicates
    Clean(CleanArgs),
    /// Derive numeric features and/or one-hot encode categorical columns
    Features(FeaturesArgs),
    /// Fit regression models on the featured table and compare them
    Train(TrainArgs),
    /// Run clean, features and train in sequence
    Run(RunArgs),
}

#[derive(Debug, Clone, Args)]
pub struct InspectArgs {
    /// YAML pipeline configuration
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// CSV file to inspect (defaults to the configured raw data path)
    #[arg(short = 'i', long = "input")]
    pub input: Option<PathBuf>,
    /// Number of leading rows to display
    #[arg(long, default_value_t = 5)]
    pub rows: usize,
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct CleanArgs {
    /// YAML pipeline configuration
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Raw CSV input (overrides paths.raw)
    #[arg(short = 'i', long = "input")]
    pub input: Option<PathBuf>,
    /// Cleaned CSV output (overrides paths.cleaned)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
    /// Duplicate handling policy
    #[arg(long, value_enum)]
    pub dedup: Option<DuplicatePolicy>,
    /// Write the cleaning report as JSON to this path
    #[arg(long)]
    pub report: Option<PathBuf>,
    /// Print summary statistics of the cleaned table
    #[arg(long)]
    pub summary: bool,
    /// CSV delimiter character for reading input
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct FeaturesArgs {
    /// YAML pipeline configuration
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Cleaned CSV input (overrides paths.cleaned)
    #[arg(short = 'i', long = "input")]
    pub input: Option<PathBuf>,
    /// Featured CSV output (overrides paths.featured)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
    /// Feature steps to apply in order; repeatable
    #[arg(long = "step", value_enum, action = clap::ArgAction::Append)]
    pub steps: Vec<FeatureStep>,
    /// What to do when a derived ratio divides by zero
    #[arg(long = "zero-division", value_enum)]
    pub zero_division: Option<ZeroDivisionPolicy>,
    /// CSV delimiter character for reading input
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct TrainArgs {
    /// YAML pipeline configuration
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Featured CSV input (overrides paths.featured)
    #[arg(short = 'i', long = "input")]
    pub input: Option<PathBuf>,
    /// Directory receiving model artifacts and the comparison table
    #[arg(long = "models-dir")]
    pub models_dir: Option<PathBuf>,
    /// Seed for the train/test shuffle
    #[arg(long)]
    pub seed: Option<u64>,
    /// Estimators to fit, in order; repeatable (defaults to all four)
    #[arg(long = "estimator", value_enum, action = clap::ArgAction::Append)]
    pub estimators: Vec<Estimator>,
    /// CSV delimiter character for reading input
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// YAML pipeline configuration
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Raw CSV input (overrides paths.raw)
    #[arg(short = 'i', long = "input")]
    pub input: Option<PathBuf>,
    /// Duplicate handling policy
    #[arg(long, value_enum)]
    pub dedup: Option<DuplicatePolicy>,
    /// Feature steps to apply in order; repeatable
    #[arg(long = "step", value_enum, action = clap::ArgAction::Append)]
    pub steps: Vec<FeatureStep>,
    /// What to do when a derived ratio divides by zero
    #[arg(long = "zero-division", value_enum)]
    pub zero_division: Option<ZeroDivisionPolicy>,
    /// CSV delimiter character for reading the raw input
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the raw input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn repeated_steps_keep_their_order() {
        let cli = Cli::try_parse_from([
            "revenue-pipeline",
            "features",
            "--step",
            "encode",
            "--step",
            "derive",
        ])
        .unwrap();
        match cli.command {
            Commands::Features(args) => {
                assert_eq!(args.steps, vec![FeatureStep::Encode, FeatureStep::Derive])
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn delimiter_aliases_resolve() {
        assert_eq!(parse_delimiter("tab"), Ok(b'\t'));
        assert_eq!(parse_delimiter("semicolon"), Ok(b';'));
        assert!(parse_delimiter("ab").is_err());
    }
}
