//! Cleaning stage: repairs invalid values and resolves duplicates.
//!
//! Passes run in a fixed order over the whole table:
//!
//! 1. multi-product group diagnostics (lenient policy only, read-only)
//! 2. negative values in non-negative columns → median imputation
//! 3. percentage columns capped at the configured ceiling (never floored)
//! 4. categorical domain inspection (read-only)
//! 5. duplicate resolution per [`DuplicatePolicy`]
//!
//! [`clean`] is pure apart from the observer; [`execute`] adds loading and
//! persistence around it.

use std::collections::{HashMap, HashSet};

use anyhow::{Context, Result};
use itertools::Itertools;
use log::info;
use serde::Serialize;

use crate::{
    cli::CleanArgs,
    config::{DuplicatePolicy, PipelineConfig},
    dataset::{Column, ColumnKind, Dataset, Value},
    error::PipelineError,
    io_utils,
    observer::{LogObserver, PipelineObserver, StageEvent},
    summary::{self, ColumnSummary},
    table,
};

const EMPTY_LABEL: &str = "<empty>";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NegativeRepair {
    pub column: String,
    pub negatives: usize,
    pub previously_missing: usize,
    pub median: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapRepair {
    pub column: String,
    pub exceeding: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoricalDomain {
    pub column: String,
    pub values: Vec<String>,
    pub unexpected: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MultiProductGroup {
    pub key: Vec<String>,
    pub products: Vec<String>,
    pub rows: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CleaningReport {
    pub policy: DuplicatePolicy,
    pub rows_in: usize,
    pub rows_out: usize,
    pub negatives: Vec<NegativeRepair>,
    pub capped: Vec<CapRepair>,
    pub domains: Vec<CategoricalDomain>,
    pub duplicates_removed: usize,
    pub duplicates_retained: usize,
    pub multi_product_groups: Vec<MultiProductGroup>,
}

#[derive(Debug, Clone)]
pub struct Cleaned {
    pub dataset: Dataset,
    pub report: CleaningReport,
}

pub fn clean(
    mut dataset: Dataset,
    config: &PipelineConfig,
    observer: &mut dyn PipelineObserver,
) -> Result<Cleaned, PipelineError> {
    let roles = &config.columns;
    let policy = config.duplicates;

    dataset.require_columns(&roles.non_negative)?;
    dataset.require_columns(&roles.percentage)?;
    dataset.require_columns(&roles.categorical)?;
    if policy == DuplicatePolicy::Lenient {
        dataset.require_columns(&roles.group_keys)?;
        dataset.require_columns(std::iter::once(&roles.product))?;
    }
    if dataset.row_count() == 0 {
        return Err(PipelineError::EmptyDataset);
    }

    let rows_in = dataset.row_count();
    observer.observe(&StageEvent::Loaded {
        rows: rows_in,
        columns: dataset.column_count(),
    });

    let product_groups = match policy {
        DuplicatePolicy::Lenient => {
            let groups = multi_product_groups(&dataset, &roles.group_keys, &roles.product)?;
            for group in &groups {
                observer.observe(&StageEvent::MultiProductGroup {
                    key: group.key.clone(),
                    products: group.products.clone(),
                    rows: group.rows,
                });
            }
            groups
        }
        DuplicatePolicy::Strict => Vec::new(),
    };

    let mut negatives = Vec::with_capacity(roles.non_negative.len());
    for name in &roles.non_negative {
        let repair = impute_negatives(dataset.column_mut(name)?)?;
        observer.observe(&StageEvent::NegativesImputed {
            column: repair.column.clone(),
            negatives: repair.negatives,
            previously_missing: repair.previously_missing,
            median: repair.median,
        });
        negatives.push(repair);
    }

    let mut capped = Vec::with_capacity(roles.percentage.len());
    for name in &roles.percentage {
        let exceeding = cap_values(dataset.column_mut(name)?, config.percentage_cap)?;
        observer.observe(&StageEvent::PercentagesCapped {
            column: name.clone(),
            exceeding,
            cap: config.percentage_cap,
        });
        capped.push(CapRepair {
            column: name.clone(),
            exceeding,
        });
    }

    let mut domains = Vec::with_capacity(roles.categorical.len());
    for name in &roles.categorical {
        let values = categorical_domain(dataset.column(name)?);
        let unexpected = match roles.expected_domains.get(name) {
            Some(allowed) => values
                .iter()
                .filter(|v| v.as_str() != EMPTY_LABEL && !allowed.contains(v))
                .cloned()
                .collect(),
            None => Vec::new(),
        };
        observer.observe(&StageEvent::CategoricalDomain {
            column: name.clone(),
            values: values.clone(),
        });
        if !unexpected.is_empty() {
            observer.observe(&StageEvent::UnexpectedCategories {
                column: name.clone(),
                values: unexpected.clone(),
            });
        }
        domains.push(CategoricalDomain {
            column: name.clone(),
            values,
            unexpected,
        });
    }

    let (duplicates_removed, duplicates_retained) = match policy {
        DuplicatePolicy::Strict => {
            let removed = remove_exact_duplicates(&mut dataset);
            observer.observe(&StageEvent::DuplicatesRemoved { removed });
            (removed, 0)
        }
        DuplicatePolicy::Lenient => {
            let duplicates = duplicate_rows(&dataset).len();
            observer.observe(&StageEvent::DuplicatesRetained {
                duplicates,
                multi_product_groups: product_groups.len(),
            });
            (0, duplicates)
        }
    };

    let report = CleaningReport {
        policy,
        rows_in,
        rows_out: dataset.row_count(),
        negatives,
        capped,
        domains,
        duplicates_removed,
        duplicates_retained,
        multi_product_groups: product_groups,
    };
    Ok(Cleaned { dataset, report })
}

/// Groups rows by `keys` and returns every group holding more than one
/// distinct `product`, in order of first appearance.
pub fn multi_product_groups(
    dataset: &Dataset,
    keys: &[String],
    product: &str,
) -> Result<Vec<MultiProductGroup>, PipelineError> {
    let key_columns = keys
        .iter()
        .map(|name| dataset.column(name))
        .collect::<Result<Vec<_>, _>>()?;
    let product_column = dataset.column(product)?;

    let mut index: HashMap<Vec<String>, usize> = HashMap::new();
    let mut groups: Vec<MultiProductGroup> = Vec::new();
    for row in 0..dataset.row_count() {
        let key = key_columns
            .iter()
            .map(|c| c.values[row].as_display())
            .collect::<Vec<_>>();
        let product = product_column.values[row].as_display();
        let slot = *index.entry(key.clone()).or_insert_with(|| {
            groups.push(MultiProductGroup {
                key,
                products: Vec::new(),
                rows: 0,
            });
            groups.len() - 1
        });
        let group = &mut groups[slot];
        group.rows += 1;
        if !group.products.contains(&product) {
            group.products.push(product);
        }
    }
    groups.retain(|group| group.products.len() > 1);
    Ok(groups)
}

/// Treats negatives as missing, then fills every missing cell with the median
/// of the remaining values.
pub fn impute_negatives(column: &mut Column) -> Result<NegativeRepair, PipelineError> {
    let numbers = column.to_numbers()?;
    let previously_missing = numbers.iter().filter(|n| n.is_none()).count();
    let negatives = numbers.iter().flatten().filter(|n| **n < 0.0).count();
    let kept = numbers
        .iter()
        .flatten()
        .copied()
        .filter(|n| *n >= 0.0)
        .collect::<Vec<_>>();
    let median = summary::median(&kept).ok_or_else(|| PipelineError::UndefinedImputation {
        column: column.name.clone(),
    })?;
    column.values = numbers
        .into_iter()
        .map(|n| match n {
            Some(n) if n >= 0.0 => Value::Number(n),
            _ => Value::Number(median),
        })
        .collect();
    Ok(NegativeRepair {
        column: column.name.clone(),
        negatives,
        previously_missing,
        median,
    })
}

/// Clips every value above `cap` down to `cap` and returns how many changed.
pub fn cap_values(column: &mut Column, cap: f64) -> Result<usize, PipelineError> {
    let numbers = column.to_numbers()?;
    let mut exceeding = 0;
    for (value, number) in column.values.iter_mut().zip(numbers) {
        if let Some(n) = number
            && n > cap
        {
            *value = Value::Number(cap);
            exceeding += 1;
        }
    }
    Ok(exceeding)
}

/// Distinct rendered values in order of first appearance.
pub fn categorical_domain(column: &Column) -> Vec<String> {
    column
        .values
        .iter()
        .map(|value| match value {
            Value::Missing => EMPTY_LABEL.to_string(),
            other => other.as_display(),
        })
        .unique()
        .collect()
}

/// Indices of rows that repeat an earlier row in every column.
pub fn duplicate_rows(dataset: &Dataset) -> Vec<usize> {
    let mut seen = HashSet::with_capacity(dataset.row_count());
    (0..dataset.row_count())
        .filter(|&row| !seen.insert(dataset.row_strings(row)))
        .collect()
}

/// Drops exact duplicates, keeping each first occurrence.
pub fn remove_exact_duplicates(dataset: &mut Dataset) -> usize {
    let duplicates = duplicate_rows(dataset);
    if duplicates.is_empty() {
        return 0;
    }
    let drop = duplicates.iter().copied().collect::<HashSet<_>>();
    let keep = (0..dataset.row_count())
        .filter(|row| !drop.contains(row))
        .collect::<Vec<_>>();
    dataset.retain_rows(&keep);
    duplicates.len()
}

pub fn execute(args: &CleanArgs) -> Result<()> {
    let mut config = PipelineConfig::load_or_default(args.config.as_deref())?;
    if let Some(input) = &args.input {
        config.paths.raw = input.clone();
    }
    if let Some(output) = &args.output {
        config.paths.cleaned = output.clone();
    }
    if let Some(policy) = args.dedup {
        config.duplicates = policy;
    }
    let delimiter = io_utils::resolve_delimiter(&config.paths.raw, args.delimiter);
    let encoding = io_utils::resolve_encoding(args.input_encoding.as_deref())?;

    info!(
        "Cleaning '{}' (delimiter '{}', duplicates {:?})",
        config.paths.raw.display(),
        io_utils::printable_delimiter(delimiter),
        config.duplicates
    );
    let dataset = Dataset::load(&config.paths.raw, delimiter, encoding)
        .with_context(|| format!("Loading raw data from {:?}", config.paths.raw))?;

    let mut observer = LogObserver;
    let cleaned = clean(dataset, &config, &mut observer)
        .with_context(|| format!("Cleaning {:?}", config.paths.raw))?;

    let output_delimiter = io_utils::resolve_delimiter(&config.paths.cleaned, None);
    cleaned
        .dataset
        .save(&config.paths.cleaned, output_delimiter)
        .with_context(|| format!("Saving cleaned data to {:?}", config.paths.cleaned))?;
    observer.observe(&StageEvent::Saved {
        artifact: "cleaned data".to_string(),
        path: config.paths.cleaned.display().to_string(),
    });

    if let Some(report_path) = &args.report {
        let json = serde_json::to_vec_pretty(&cleaned.report)
            .context("Serializing cleaning report")?;
        io_utils::write_atomic(report_path, &json)?;
        observer.observe(&StageEvent::Saved {
            artifact: "cleaning report".to_string(),
            path: report_path.display().to_string(),
        });
    }

    if args.summary {
        let rows = cleaned
            .dataset
            .columns()
            .iter()
            .filter(|column| column.kind() == ColumnKind::Numeric)
            .map(|column| ColumnSummary::of(column).render_row())
            .collect::<Vec<_>>();
        table::print_table(&ColumnSummary::headers(), &rows);
    }
    Ok(())
}
