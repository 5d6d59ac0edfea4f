//! Pipeline configuration.
//!
//! Every field defaults to the fixed layout of the sales dataset, so an empty
//! (or absent) configuration file runs the pipeline exactly as designed. A
//! YAML file may override any subset of fields:
//!
//! ```yaml
//! duplicates: lenient
//! features: [derive, encode]
//! paths:
//!   raw: data/raw/Expanded_Dataset.csv
//! training:
//!   seed: 7
//! ```

use std::{
    collections::BTreeMap,
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, ensure};
use clap::ValueEnum;
use heck::ToSnakeCase;
use serde::{Deserialize, Serialize};

pub const SUBSCRIBERS: &str = "5G Subscribers (millions)";
pub const MARKET_SHARE: &str = "Market Share (%)";
pub const COVERAGE: &str = "Regional 5G Coverage (%)";
pub const CAPABILITY: &str = "5G Capability";
pub const QUARTER: &str = "Quarter";
pub const REGION: &str = "Region";
pub const PRODUCT_MODEL: &str = "Product Model";
pub const YEAR: &str = "Year";
pub const REVENUE: &str = "Revenue ($)";
pub const UNITS_SOLD: &str = "Units Sold";

pub const REVENUE_PER_UNIT: &str = "Revenue per Unit";
pub const GROWTH_RATE: &str = "5G Growth Rate";
pub const QUARTER_NUM: &str = "Quarter_Num";

/// How exact-duplicate rows are handled by the cleaning stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
#[value(rename_all = "kebab-case")]
pub enum DuplicatePolicy {
    /// Remove rows identical in every column, keeping the first.
    #[default]
    Strict,
    /// Keep every row and report (Year, Quarter, Region) groups with several products.
    Lenient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
#[value(rename_all = "kebab-case")]
pub enum FeatureStep {
    /// Revenue per Unit, 5G Growth Rate, Quarter_Num.
    Derive,
    /// Drop-first one-hot encoding of the categorical columns.
    Encode,
}

/// Resolution for a zero denominator in a derived ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
#[value(rename_all = "kebab-case")]
pub enum ZeroDivisionPolicy {
    #[default]
    Fail,
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
#[value(rename_all = "kebab-case")]
pub enum Estimator {
    /// Ordinary least squares with an intercept.
    LinearRegression,
    /// Single CART tree grown to purity.
    DecisionTree,
    /// Bootstrap-aggregated CART trees.
    RandomForest,
    /// Second-order gradient-boosted trees.
    Xgboost,
}

impl Estimator {
    pub const ALL: [Estimator; 4] = [
        Estimator::LinearRegression,
        Estimator::DecisionTree,
        Estimator::RandomForest,
        Estimator::Xgboost,
    ];

    pub fn display_name(&self) -> &'static str {
        match self {
            Estimator::LinearRegression => "Linear Regression",
            Estimator::DecisionTree => "Decision Tree",
            Estimator::RandomForest => "Random Forest",
            Estimator::Xgboost => "XGBoost",
        }
    }

    /// File-name stem, e.g. `random_forest`.
    pub fn slug(&self) -> String {
        format!("{self:?}").to_snake_case()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Paths {
    pub raw: PathBuf,
    pub cleaned: PathBuf,
    pub featured: PathBuf,
    pub models_dir: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            raw: PathBuf::from("data/raw/Expanded_Dataset.csv"),
            cleaned: PathBuf::from("data/processed/cleaned_data.csv"),
            featured: PathBuf::from("data/processed/featured_data.csv"),
            models_dir: PathBuf::from("models"),
        }
    }
}

/// Which columns each pass targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ColumnRoles {
    pub non_negative: Vec<String>,
    pub percentage: Vec<String>,
    pub categorical: Vec<String>,
    pub group_keys: Vec<String>,
    pub product: String,
    pub target: String,
    pub units: String,
    pub subscribers: String,
    pub quarter: String,
    /// Allowed labels per categorical column; anything else is reported.
    pub expected_domains: BTreeMap<String, Vec<String>>,
}

impl Default for ColumnRoles {
    fn default() -> Self {
        let owned = |names: &[&str]| names.iter().map(|n| n.to_string()).collect::<Vec<_>>();
        let mut expected_domains = BTreeMap::new();
        expected_domains.insert(QUARTER.to_string(), owned(&["Q1", "Q2", "Q3", "Q4"]));
        Self {
            non_negative: owned(&[SUBSCRIBERS, MARKET_SHARE]),
            percentage: owned(&[COVERAGE, MARKET_SHARE]),
            categorical: owned(&[CAPABILITY, QUARTER, REGION, PRODUCT_MODEL]),
            group_keys: owned(&[YEAR, QUARTER, REGION]),
            product: PRODUCT_MODEL.to_string(),
            target: REVENUE.to_string(),
            units: UNITS_SOLD.to_string(),
            subscribers: SUBSCRIBERS.to_string(),
            quarter: QUARTER.to_string(),
            expected_domains,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrainingSettings {
    pub test_ratio: f64,
    pub seed: u64,
    pub estimators: Vec<Estimator>,
    pub forest_trees: usize,
    pub boosting_rounds: usize,
    pub learning_rate: f64,
    pub boosting_max_depth: usize,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            test_ratio: 0.2,
            seed: 42,
            estimators: Estimator::ALL.to_vec(),
            forest_trees: 100,
            boosting_rounds: 100,
            learning_rate: 0.3,
            boosting_max_depth: 6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub paths: Paths,
    pub columns: ColumnRoles,
    pub duplicates: DuplicatePolicy,
    pub features: Vec<FeatureStep>,
    pub zero_division: ZeroDivisionPolicy,
    pub percentage_cap: f64,
    pub training: TrainingSettings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            paths: Paths::default(),
            columns: ColumnRoles::default(),
            duplicates: DuplicatePolicy::default(),
            features: vec![FeatureStep::Derive],
            zero_division: ZeroDivisionPolicy::default(),
            percentage_cap: 100.0,
            training: TrainingSettings::default(),
        }
    }
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening config file {path:?}"))?;
        let config: PipelineConfig = serde_yaml::from_reader(BufReader::new(file))
            .with_context(|| format!("Parsing config YAML {path:?}"))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let ratio = self.training.test_ratio;
        ensure!(
            ratio > 0.0 && ratio < 1.0,
            "training.test_ratio must lie strictly between 0 and 1 (got {ratio})"
        );
        ensure!(
            !self.training.estimators.is_empty(),
            "training.estimators must name at least one estimator"
        );
        ensure!(
            self.training.forest_trees > 0 && self.training.boosting_rounds > 0,
            "training.forest_trees and training.boosting_rounds must be positive"
        );
        let rate = self.training.learning_rate;
        ensure!(
            rate > 0.0 && rate <= 1.0,
            "training.learning_rate must lie in (0, 1] (got {rate})"
        );
        ensure!(
            self.percentage_cap.is_finite(),
            "percentage_cap must be a finite number"
        );
        Ok(())
    }
}
