//! Stage diagnostics as typed events.
//!
//! Transform functions report what they detect and repair by calling
//! [`PipelineObserver::observe`]; they never format or print anything
//! themselves. [`LogObserver`] is what the binary installs. Tests use
//! [`RecordingObserver`] to assert on the exact events a stage produced.

use log::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum StageEvent {
    Loaded {
        rows: usize,
        columns: usize,
    },
    MultiProductGroup {
        key: Vec<String>,
        products: Vec<String>,
        rows: usize,
    },
    NegativesImputed {
        column: String,
        negatives: usize,
        previously_missing: usize,
        median: f64,
    },
    PercentagesCapped {
        column: String,
        exceeding: usize,
        cap: f64,
    },
    CategoricalDomain {
        column: String,
        values: Vec<String>,
    },
    UnexpectedCategories {
        column: String,
        values: Vec<String>,
    },
    DuplicatesRemoved {
        removed: usize,
    },
    DuplicatesRetained {
        duplicates: usize,
        multi_product_groups: usize,
    },
    ColumnDerived {
        column: String,
    },
    ColumnEncoded {
        column: String,
        categories: usize,
        indicators: Vec<String>,
    },
    PredictorSkipped {
        column: String,
        reason: String,
    },
    RowsSkipped {
        rows: usize,
        reason: String,
    },
    /// A predictor lies in the span of the intercept and the predictors
    /// before it; its coefficient is pinned to zero.
    PredictorAliased {
        model: String,
        column: String,
    },
    ModelEvaluated {
        model: String,
        mae: f64,
        mse: f64,
        r2: f64,
    },
    /// Highest-ranked predictors of a tree model, most important first.
    FeatureImportances {
        model: String,
        top: Vec<(String, f64)>,
    },
    Saved {
        artifact: String,
        path: String,
    },
}

pub trait PipelineObserver {
    fn observe(&mut self, event: &StageEvent);
}

/// Forwards every event to the `log` facade.
#[derive(Debug, Default)]
pub struct LogObserver;

impl PipelineObserver for LogObserver {
    fn observe(&mut self, event: &StageEvent) {
        match event {
            StageEvent::Loaded { rows, columns } => {
                info!("Loaded {rows} row(s) across {columns} column(s)")
            }
            StageEvent::MultiProductGroup {
                key,
                products,
                rows,
            } => info!(
                "Group ({}) holds {rows} row(s) for {} product(s): {}",
                key.join(", "),
                products.len(),
                products.join(", ")
            ),
            StageEvent::NegativesImputed {
                column,
                negatives,
                previously_missing,
                median,
            } => info!(
                "{negatives} negative value(s) in '{column}' ({previously_missing} already missing) imputed with median {median}"
            ),
            StageEvent::PercentagesCapped {
                column,
                exceeding,
                cap,
            } => info!("{exceeding} value(s) above {cap} in '{column}' capped"),
            StageEvent::CategoricalDomain { column, values } => {
                info!("Unique values in '{column}': [{}]", values.join(", "))
            }
            StageEvent::UnexpectedCategories { column, values } => warn!(
                "'{column}' contains value(s) outside the expected domain: [{}]",
                values.join(", ")
            ),
            StageEvent::DuplicatesRemoved { removed } => {
                info!("Removed {removed} duplicate row(s)")
            }
            StageEvent::DuplicatesRetained {
                duplicates,
                multi_product_groups,
            } => info!(
                "Retained {duplicates} exact duplicate row(s); {multi_product_groups} group(s) carry multiple products"
            ),
            StageEvent::ColumnDerived { column } => info!("Derived column '{column}'"),
            StageEvent::ColumnEncoded {
                column,
                categories,
                indicators,
            } => info!(
                "Encoded '{column}' ({categories} categories) into {} indicator column(s)",
                indicators.len()
            ),
            StageEvent::PredictorSkipped { column, reason } => {
                warn!("Skipping predictor '{column}': {reason}")
            }
            StageEvent::RowsSkipped { rows, reason } => warn!("Skipping {rows} row(s): {reason}"),
            StageEvent::PredictorAliased { model, column } => warn!(
                "{model}: '{column}' is linearly dependent on earlier predictors; coefficient fixed at 0"
            ),
            StageEvent::ModelEvaluated {
                model,
                mae,
                mse,
                r2,
            } => info!("{model}: MAE {mae:.2}, MSE {mse:.2}, R² {r2:.4}"),
            StageEvent::FeatureImportances { model, top } => info!(
                "{model} top feature(s): {}",
                top.iter()
                    .map(|(column, importance)| format!("{column} ({importance:.4})"))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            StageEvent::Saved { artifact, path } => info!("Saved {artifact} to {path}"),
        }
    }
}

/// Keeps every event in arrival order.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    pub events: Vec<StageEvent>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PipelineObserver for RecordingObserver {
    fn observe(&mut self, event: &StageEvent) {
        self.events.push(event.clone());
    }
}
