//! Training stage: fits regression estimators to the featured table.
//!
//! `Revenue ($)` is the target and every other numeric or boolean column is a
//! predictor. Rows are shuffled with a seeded RNG and split into a held-out
//! test set before fitting, so repeated runs over the same file produce the
//! same models and scores.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use itertools::Itertools;
use linfa::{Dataset as LinfaDataset, traits::Fit};
use linfa_linear::LinearRegression;
use log::info;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};
use serde::{Deserialize, Serialize};

use crate::{
    cli::TrainArgs,
    config::{Estimator, PipelineConfig, TrainingSettings},
    dataset::{ColumnKind, Dataset, Value},
    error::PipelineError,
    io_utils,
    observer::{LogObserver, PipelineObserver, StageEvent},
    table,
    trees::{GradientBoosting, RandomForest, RegressionTree},
};

pub const COMPARISON_FILE: &str = "model_comparison.csv";
const TOP_IMPORTANCES: usize = 10;
/// Relative residual norm below which a predictor counts as a linear
/// combination of the ones before it.
const ALIAS_TOLERANCE: f64 = 1e-7;

/// Dense predictor matrix with the matching target vector.
#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    pub columns: Vec<String>,
    pub records: Array2<f64>,
    pub targets: Array1<f64>,
}

#[derive(Debug, Clone)]
pub struct HeldOutSplit {
    pub train_records: Array2<f64>,
    pub train_targets: Array1<f64>,
    pub test_records: Array2<f64>,
    pub test_targets: Array1<f64>,
}

/// Fitted parameters of one estimator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FittedModel {
    Linear {
        coefficients: Vec<f64>,
        intercept: f64,
    },
    DecisionTree(RegressionTree),
    RandomForest(RandomForest),
    GradientBoosting(GradientBoosting),
}

impl FittedModel {
    pub fn predict(&self, records: &Array2<f64>) -> Array1<f64> {
        match self {
            FittedModel::Linear {
                coefficients,
                intercept,
            } => records.dot(&ArrayView1::from(coefficients.as_slice())) + *intercept,
            FittedModel::DecisionTree(tree) => tree.predict(records),
            FittedModel::RandomForest(forest) => forest.predict(records),
            FittedModel::GradientBoosting(boosted) => boosted.predict(records),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub estimator: Estimator,
    pub name: String,
    pub feature_columns: Vec<String>,
    pub model: FittedModel,
}

impl ModelArtifact {
    pub fn predict(&self, records: &Array2<f64>) -> Array1<f64> {
        self.model.predict(records)
    }

    pub fn file_name(&self) -> String {
        format!("{}_model.bin", self.estimator.slug())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = bincode::serde::encode_to_vec(self, bincode::config::standard())
            .context("Encoding model artifact")?;
        io_utils::write_atomic(path, &bytes)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes =
            std::fs::read(path).with_context(|| format!("Opening model artifact {path:?}"))?;
        let (artifact, _) =
            bincode::serde::decode_from_slice::<ModelArtifact, _>(&bytes, bincode::config::standard())
                .with_context(|| format!("Decoding model artifact {path:?}"))?;
        Ok(artifact)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RegressionMetrics {
    pub mae: f64,
    pub mse: f64,
    pub r2: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainedModel {
    pub artifact: ModelArtifact,
    pub metrics: RegressionMetrics,
    /// One entry per feature column, summing to 1. Tree models only.
    pub importances: Option<Vec<f64>>,
}

impl TrainedModel {
    /// Feature columns paired with their importance, most important first.
    pub fn ranked_importances(&self) -> Vec<(String, f64)> {
        let Some(importances) = &self.importances else {
            return Vec::new();
        };
        self.artifact
            .feature_columns
            .iter()
            .cloned()
            .zip(importances.iter().copied())
            .sorted_by(|a, b| b.1.total_cmp(&a.1))
            .collect()
    }

    pub fn importance_file_name(&self) -> String {
        format!("feature_importance_{}.csv", self.artifact.estimator.slug())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingReport {
    pub feature_columns: Vec<String>,
    pub train_rows: usize,
    pub test_rows: usize,
    pub models: Vec<TrainedModel>,
}

impl TrainingReport {
    pub fn comparison_headers() -> Vec<String> {
        ["Model", "MAE", "MSE", "R² Score"]
            .iter()
            .map(|h| h.to_string())
            .collect()
    }

    pub fn comparison_rows(&self) -> Vec<Vec<String>> {
        self.models
            .iter()
            .map(|model| {
                vec![
                    model.artifact.name.clone(),
                    model.metrics.mae.to_string(),
                    model.metrics.mse.to_string(),
                    model.metrics.r2.to_string(),
                ]
            })
            .collect()
    }
}

/// Builds the predictor matrix. Text and empty columns are skipped, as are
/// rows with a missing target or predictor.
pub fn feature_matrix(
    dataset: &Dataset,
    target: &str,
    observer: &mut dyn PipelineObserver,
) -> Result<FeatureMatrix, PipelineError> {
    let target_values = dataset.column(target)?.to_numbers()?;

    let mut predictors = Vec::new();
    for column in dataset.columns() {
        if column.name == target {
            continue;
        }
        match column.kind() {
            ColumnKind::Numeric | ColumnKind::Boolean => predictors.push(column),
            kind => observer.observe(&StageEvent::PredictorSkipped {
                column: column.name.clone(),
                reason: format!("{kind} column"),
            }),
        }
    }
    if predictors.is_empty() {
        return Err(PipelineError::NoPredictors {
            target: target.to_string(),
        });
    }

    let usable = (0..dataset.row_count())
        .filter(|&row| {
            target_values[row].is_some()
                && predictors
                    .iter()
                    .all(|column| !column.values[row].is_missing())
        })
        .collect::<Vec<_>>();
    let skipped = dataset.row_count() - usable.len();
    if skipped > 0 {
        observer.observe(&StageEvent::RowsSkipped {
            rows: skipped,
            reason: "missing target or predictor value".to_string(),
        });
    }

    let records = Array2::from_shape_fn((usable.len(), predictors.len()), |(i, j)| {
        match predictors[j].values[usable[i]] {
            Value::Number(n) => n,
            Value::Flag(true) => 1.0,
            _ => 0.0,
        }
    });
    let targets = usable
        .iter()
        .map(|&row| target_values[row].unwrap_or_default())
        .collect::<Array1<f64>>();

    Ok(FeatureMatrix {
        columns: predictors.iter().map(|c| c.name.clone()).collect(),
        records,
        targets,
    })
}

/// Shuffles row indices with `seed`, puts the first `ceil(n * test_ratio)`
/// in the test set and the rest in the training set.
pub fn held_out_split(
    matrix: &FeatureMatrix,
    test_ratio: f64,
    seed: u64,
) -> Result<HeldOutSplit, PipelineError> {
    let rows = matrix.records.nrows();
    let test_rows = (rows as f64 * test_ratio).ceil() as usize;
    if rows < 2 || test_rows == 0 || test_rows >= rows {
        return Err(PipelineError::InsufficientRows {
            required: 2,
            found: rows,
        });
    }

    let mut order = (0..rows).collect::<Vec<_>>();
    let mut rng = StdRng::seed_from_u64(seed);
    order.shuffle(&mut rng);
    let (test, train) = order.split_at(test_rows);

    Ok(HeldOutSplit {
        train_records: matrix.records.select(Axis(0), train),
        train_targets: matrix.targets.select(Axis(0), train),
        test_records: matrix.records.select(Axis(0), test),
        test_targets: matrix.targets.select(Axis(0), test),
    })
}

pub fn regression_metrics(predictions: &Array1<f64>, truth: &Array1<f64>) -> RegressionMetrics {
    let residuals = truth - predictions;
    let mae = residuals.mapv(f64::abs).mean().unwrap_or_default();
    let mse = residuals.mapv(|r| r * r).mean().unwrap_or_default();
    let ss_res = residuals.mapv(|r| r * r).sum();
    let mean = truth.mean().unwrap_or_default();
    let ss_tot = truth.mapv(|t| (t - mean) * (t - mean)).sum();
    let r2 = if ss_tot > 0.0 {
        1.0 - ss_res / ss_tot
    } else if ss_res == 0.0 {
        1.0
    } else {
        0.0
    };
    RegressionMetrics { mae, mse, r2 }
}

/// Predictors kept for least squares: each must carry variation not already
/// explained by the intercept and the kept predictors before it.
pub fn independent_columns(records: &Array2<f64>) -> Vec<usize> {
    let mut basis: Vec<Array1<f64>> = Vec::new();
    let mut kept = Vec::new();
    for (idx, column) in records.axis_iter(Axis(1)).enumerate() {
        let mean = column.mean().unwrap_or_default();
        let mut residual = column.mapv(|v| v - mean);
        let scale = residual.dot(&residual).sqrt();
        for direction in &basis {
            let projection = residual.dot(direction);
            residual.scaled_add(-projection, direction);
        }
        let norm = residual.dot(&residual).sqrt();
        if norm > 0.0 && norm > ALIAS_TOLERANCE * scale {
            residual /= norm;
            basis.push(residual);
            kept.push(idx);
        }
    }
    kept
}

fn fit_linear(
    name: &str,
    feature_columns: &[String],
    split: &HeldOutSplit,
    observer: &mut dyn PipelineObserver,
) -> Result<FittedModel, PipelineError> {
    let kept = independent_columns(&split.train_records);
    for (idx, column) in feature_columns.iter().enumerate() {
        if !kept.contains(&idx) {
            observer.observe(&StageEvent::PredictorAliased {
                model: name.to_string(),
                column: column.clone(),
            });
        }
    }

    let mut coefficients = vec![0.0; feature_columns.len()];
    let intercept = if kept.is_empty() {
        split.train_targets.mean().unwrap_or_default()
    } else {
        let training = LinfaDataset::new(
            split.train_records.select(Axis(1), &kept),
            split.train_targets.clone(),
        );
        let fitted = LinearRegression::new()
            .fit(&training)
            .map_err(|err| PipelineError::ModelFit {
                model: name.to_string(),
                reason: err.to_string(),
            })?;
        for (&idx, &weight) in kept.iter().zip(fitted.params()) {
            coefficients[idx] = weight;
        }
        fitted.intercept()
    };

    if !intercept.is_finite() || coefficients.iter().any(|c| !c.is_finite()) {
        return Err(PipelineError::ModelFit {
            model: name.to_string(),
            reason: "least squares produced non-finite coefficients".to_string(),
        });
    }
    Ok(FittedModel::Linear {
        coefficients,
        intercept,
    })
}

pub fn fit_estimator(
    estimator: Estimator,
    feature_columns: &[String],
    split: &HeldOutSplit,
    settings: &TrainingSettings,
    observer: &mut dyn PipelineObserver,
) -> Result<TrainedModel, PipelineError> {
    let name = estimator.display_name().to_string();
    let records = &split.train_records;
    let targets = &split.train_targets;
    let (model, importances) = match estimator {
        Estimator::LinearRegression => (fit_linear(&name, feature_columns, split, observer)?, None),
        Estimator::DecisionTree => {
            let (tree, importances) = RegressionTree::fit(records, targets);
            (FittedModel::DecisionTree(tree), Some(importances))
        }
        Estimator::RandomForest => {
            let (forest, importances) =
                RandomForest::fit(records, targets, settings.forest_trees, settings.seed);
            (FittedModel::RandomForest(forest), Some(importances))
        }
        Estimator::Xgboost => {
            let (boosted, importances) = GradientBoosting::fit(
                records,
                targets,
                settings.boosting_rounds,
                settings.learning_rate,
                settings.boosting_max_depth,
            );
            (FittedModel::GradientBoosting(boosted), Some(importances))
        }
    };

    let predictions = model.predict(&split.test_records);
    let metrics = regression_metrics(&predictions, &split.test_targets);

    let artifact = ModelArtifact {
        estimator,
        name,
        feature_columns: feature_columns.to_vec(),
        model,
    };
    Ok(TrainedModel {
        artifact,
        metrics,
        importances,
    })
}

pub fn train(
    dataset: &Dataset,
    target: &str,
    settings: &TrainingSettings,
    observer: &mut dyn PipelineObserver,
) -> Result<TrainingReport, PipelineError> {
    let matrix = feature_matrix(dataset, target, observer)?;
    let split = held_out_split(&matrix, settings.test_ratio, settings.seed)?;

    let mut models = Vec::with_capacity(settings.estimators.len());
    for estimator in &settings.estimators {
        let model = fit_estimator(*estimator, &matrix.columns, &split, settings, observer)?;
        observer.observe(&StageEvent::ModelEvaluated {
            model: model.artifact.name.clone(),
            mae: model.metrics.mae,
            mse: model.metrics.mse,
            r2: model.metrics.r2,
        });
        if model.importances.is_some() {
            observer.observe(&StageEvent::FeatureImportances {
                model: model.artifact.name.clone(),
                top: model
                    .ranked_importances()
                    .into_iter()
                    .take(TOP_IMPORTANCES)
                    .collect(),
            });
        }
        models.push(model);
    }

    Ok(TrainingReport {
        feature_columns: matrix.columns,
        train_rows: split.train_records.nrows(),
        test_rows: split.test_records.nrows(),
        models,
    })
}

fn write_importances(model: &TrainedModel, path: &Path) -> Result<()> {
    let mut writer = io_utils::AtomicCsvWriter::create(path, io_utils::DEFAULT_CSV_DELIMITER)?;
    writer.write_record(["Feature", "Importance"])?;
    for (column, importance) in model.ranked_importances() {
        writer.write_record([column, importance.to_string()])?;
    }
    writer.commit()
}

/// Writes one artifact per model, an importance table per tree model, and the
/// comparison table into `models_dir`.
pub fn save_report(
    report: &TrainingReport,
    models_dir: &Path,
    observer: &mut dyn PipelineObserver,
) -> Result<Vec<PathBuf>> {
    let mut written = Vec::with_capacity(report.models.len() * 2 + 1);
    for model in &report.models {
        let path = models_dir.join(model.artifact.file_name());
        model
            .artifact
            .save(&path)
            .with_context(|| format!("Saving model '{}'", model.artifact.name))?;
        observer.observe(&StageEvent::Saved {
            artifact: model.artifact.name.clone(),
            path: path.display().to_string(),
        });
        written.push(path);

        if model.importances.is_some() {
            let path = models_dir.join(model.importance_file_name());
            write_importances(model, &path)
                .with_context(|| format!("Saving importances of '{}'", model.artifact.name))?;
            observer.observe(&StageEvent::Saved {
                artifact: format!("{} feature importances", model.artifact.name),
                path: path.display().to_string(),
            });
            written.push(path);
        }
    }

    let comparison = models_dir.join(COMPARISON_FILE);
    let mut writer = io_utils::AtomicCsvWriter::create(&comparison, io_utils::DEFAULT_CSV_DELIMITER)?;
    writer.write_record(TrainingReport::comparison_headers())?;
    for row in report.comparison_rows() {
        writer.write_record(row)?;
    }
    writer.commit()?;
    observer.observe(&StageEvent::Saved {
        artifact: "model comparison".to_string(),
        path: comparison.display().to_string(),
    });
    written.push(comparison);
    Ok(written)
}

pub fn execute(args: &TrainArgs) -> Result<()> {
    let mut config = PipelineConfig::load_or_default(args.config.as_deref())?;
    if let Some(input) = &args.input {
        config.paths.featured = input.clone();
    }
    if let Some(models_dir) = &args.models_dir {
        config.paths.models_dir = models_dir.clone();
    }
    if let Some(seed) = args.seed {
        config.training.seed = seed;
    }
    if !args.estimators.is_empty() {
        config.training.estimators = args.estimators.clone();
    }
    let delimiter = io_utils::resolve_delimiter(&config.paths.featured, args.delimiter);
    let encoding = io_utils::resolve_encoding(args.input_encoding.as_deref())?;

    info!(
        "Training {} estimator(s) on '{}' (test ratio {}, seed {})",
        config.training.estimators.len(),
        config.paths.featured.display(),
        config.training.test_ratio,
        config.training.seed
    );
    let dataset = Dataset::load(&config.paths.featured, delimiter, encoding)
        .with_context(|| format!("Loading featured data from {:?}", config.paths.featured))?;

    let mut observer = LogObserver;
    let report = train(
        &dataset,
        &config.columns.target,
        &config.training,
        &mut observer,
    )
    .with_context(|| format!("Training on {:?}", config.paths.featured))?;
    info!(
        "Fitted on {} row(s), evaluated on {} row(s) using {} predictor(s)",
        report.train_rows,
        report.test_rows,
        report.feature_columns.len()
    );

    save_report(&report, &config.paths.models_dir, &mut observer)?;
    table::print_table(
        &TrainingReport::comparison_headers(),
        &report.comparison_rows(),
    );
    for model in report.models.iter().filter(|m| m.importances.is_some()) {
        println!("\n{} feature importances:", model.artifact.name);
        let rows = model
            .ranked_importances()
            .into_iter()
            .take(TOP_IMPORTANCES)
            .map(|(column, importance)| vec![column, format!("{importance:.4}")])
            .collect::<Vec<_>>();
        table::print_table(&["Feature".to_string(), "Importance".to_string()], &rows);
    }
    Ok(())
}
