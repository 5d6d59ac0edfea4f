//! Feature stage: derives numeric features and encodes categoricals.
//!
//! The stage is an ordered list of [`FeatureStep`]s applied to the cleaned
//! table. `Derive` appends `Revenue per Unit`, `5G Growth Rate` and
//! `Quarter_Num`; `Encode` replaces each categorical column with drop-first
//! indicator columns named `{column}_{category}`. Either may run alone or
//! both in sequence.

use std::cmp::Ordering;

use anyhow::{Context, Result};
use itertools::Itertools;
use log::info;

use crate::{
    cli::FeaturesArgs,
    config::{
        ColumnRoles, FeatureStep, GROWTH_RATE, PipelineConfig, QUARTER_NUM, REVENUE_PER_UNIT,
        ZeroDivisionPolicy,
    },
    dataset::{Column, Dataset, Value},
    error::PipelineError,
    io_utils,
    observer::{LogObserver, PipelineObserver, StageEvent},
};

pub fn engineer(
    mut dataset: Dataset,
    steps: &[FeatureStep],
    config: &PipelineConfig,
    observer: &mut dyn PipelineObserver,
) -> Result<Dataset, PipelineError> {
    for step in steps {
        dataset = match step {
            FeatureStep::Derive => {
                derive_numeric_features(dataset, &config.columns, config.zero_division, observer)?
            }
            FeatureStep::Encode => one_hot_encode(dataset, &config.columns.categorical, observer)?,
        };
    }
    Ok(dataset)
}

pub fn derive_numeric_features(
    mut dataset: Dataset,
    roles: &ColumnRoles,
    policy: ZeroDivisionPolicy,
    observer: &mut dyn PipelineObserver,
) -> Result<Dataset, PipelineError> {
    dataset.require_columns([&roles.target, &roles.units, &roles.subscribers, &roles.quarter])?;

    let revenue = dataset.column(&roles.target)?.to_numbers()?;
    let units = dataset.column(&roles.units)?.to_numbers()?;
    let per_unit = ratio_column(REVENUE_PER_UNIT, &revenue, &units, policy)?;

    let subscribers = dataset.column(&roles.subscribers)?.to_numbers()?;
    let growth = growth_rate_column(GROWTH_RATE, &subscribers, policy)?;

    let quarter_num = quarter_number_column(QUARTER_NUM, dataset.column(&roles.quarter)?)?;

    for column in [per_unit, growth, quarter_num] {
        let name = column.name.clone();
        dataset.upsert_column(column)?;
        observer.observe(&StageEvent::ColumnDerived { column: name });
    }
    Ok(dataset)
}

/// Element-wise `numerator / denominator`; missing operands give a missing
/// result.
pub fn ratio_column(
    name: &str,
    numerator: &[Option<f64>],
    denominator: &[Option<f64>],
    policy: ZeroDivisionPolicy,
) -> Result<Column, PipelineError> {
    let values = numerator
        .iter()
        .zip(denominator)
        .enumerate()
        .map(|(idx, pair)| match pair {
            (Some(n), Some(d)) => divide(*n, *d, name, idx + 1, policy),
            _ => Ok(Value::Missing),
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Column::new(name, values))
}

/// Fractional change from the previous row in current order; the first row
/// is 0.
pub fn growth_rate_column(
    name: &str,
    values: &[Option<f64>],
    policy: ZeroDivisionPolicy,
) -> Result<Column, PipelineError> {
    let mut rates = Vec::with_capacity(values.len());
    for (idx, current) in values.iter().enumerate() {
        let rate = if idx == 0 {
            Value::Number(0.0)
        } else {
            match (values[idx - 1], *current) {
                (Some(previous), Some(current)) => {
                    divide(current - previous, previous, name, idx + 1, policy)?
                }
                _ => Value::Missing,
            }
        };
        rates.push(rate);
    }
    Ok(Column::new(name, rates))
}

fn divide(
    numerator: f64,
    denominator: f64,
    column: &str,
    row: usize,
    policy: ZeroDivisionPolicy,
) -> Result<Value, PipelineError> {
    if denominator != 0.0 {
        return Ok(Value::Number(numerator / denominator));
    }
    match policy {
        ZeroDivisionPolicy::Fail => Err(PipelineError::DivisionByZero {
            column: column.to_string(),
            row,
        }),
        ZeroDivisionPolicy::Missing => Ok(Value::Missing),
    }
}

pub fn quarter_number(label: &str) -> Option<u8> {
    match label.trim() {
        "Q1" => Some(1),
        "Q2" => Some(2),
        "Q3" => Some(3),
        "Q4" => Some(4),
        _ => None,
    }
}

pub fn quarter_number_column(name: &str, quarter: &Column) -> Result<Column, PipelineError> {
    let values = quarter
        .values
        .iter()
        .enumerate()
        .map(|(idx, value)| {
            let label = value.as_display();
            quarter_number(&label)
                .map(|n| Value::Number(f64::from(n)))
                .ok_or(PipelineError::UnmappedQuarter {
                    row: idx + 1,
                    value: label,
                })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Column::new(name, values))
}

/// Replaces each named column with one indicator per category except the
/// first in sorted order.
pub fn one_hot_encode(
    mut dataset: Dataset,
    columns: &[String],
    observer: &mut dyn PipelineObserver,
) -> Result<Dataset, PipelineError> {
    dataset.require_columns(columns)?;
    for name in columns {
        let source = dataset.remove_column(name)?;
        let categories = sorted_categories(&source);
        let mut indicators = Vec::with_capacity(categories.len().saturating_sub(1));
        for category in categories.iter().skip(1) {
            let label = category.as_display();
            let values = source
                .values
                .iter()
                .map(|value| Value::Flag(!value.is_missing() && value.as_display() == label))
                .collect();
            let indicator = Column::new(format!("{name}_{label}"), values);
            indicators.push(indicator.name.clone());
            dataset.upsert_column(indicator)?;
        }
        observer.observe(&StageEvent::ColumnEncoded {
            column: name.clone(),
            categories: categories.len(),
            indicators,
        });
    }
    Ok(dataset)
}

/// Distinct non-missing values, numbers ordered numerically and ahead of
/// everything else, the rest ordered by their rendered text.
pub fn sorted_categories(column: &Column) -> Vec<Value> {
    column
        .values
        .iter()
        .filter(|value| !value.is_missing())
        .unique_by(|value| value.as_display())
        .cloned()
        .sorted_by(compare_categories)
        .collect()
}

fn compare_categories(left: &Value, right: &Value) -> Ordering {
    match (left.as_number(), right.as_number()) {
        (Some(a), Some(b)) => a.total_cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => left.as_display().cmp(&right.as_display()),
    }
}

pub fn execute(args: &FeaturesArgs) -> Result<()> {
    let mut config = PipelineConfig::load_or_default(args.config.as_deref())?;
    if let Some(input) = &args.input {
        config.paths.cleaned = input.clone();
    }
    if let Some(output) = &args.output {
        config.paths.featured = output.clone();
    }
    if !args.steps.is_empty() {
        config.features = args.steps.clone();
    }
    if let Some(policy) = args.zero_division {
        config.zero_division = policy;
    }
    let delimiter = io_utils::resolve_delimiter(&config.paths.cleaned, args.delimiter);
    let encoding = io_utils::resolve_encoding(args.input_encoding.as_deref())?;

    info!(
        "Engineering features from '{}' with step(s) {:?}",
        config.paths.cleaned.display(),
        config.features
    );
    let dataset = Dataset::load(&config.paths.cleaned, delimiter, encoding)
        .with_context(|| format!("Loading cleaned data from {:?}", config.paths.cleaned))?;

    let mut observer = LogObserver;
    let featured = engineer(dataset, &config.features, &config, &mut observer)
        .with_context(|| format!("Engineering features for {:?}", config.paths.cleaned))?;

    let output_delimiter = io_utils::resolve_delimiter(&config.paths.featured, None);
    featured
        .save(&config.paths.featured, output_delimiter)
        .with_context(|| format!("Saving featured data to {:?}", config.paths.featured))?;
    observer.observe(&StageEvent::Saved {
        artifact: "featured data".to_string(),
        path: config.paths.featured.display().to_string(),
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::RecordingObserver;

    #[test]
    fn revenue_per_unit_divides_row_by_row() {
        let column = ratio_column(
            REVENUE_PER_UNIT,
            &[Some(1000.0), None],
            &[Some(50.0), Some(2.0)],
            ZeroDivisionPolicy::Fail,
        )
        .unwrap();
        assert_eq!(column.values, vec![Value::Number(20.0), Value::Missing]);
    }

    #[test]
    fn zero_units_follow_policy() {
        let err = ratio_column("r", &[Some(1.0)], &[Some(0.0)], ZeroDivisionPolicy::Fail)
            .unwrap_err();
        assert_eq!(
            err,
            PipelineError::DivisionByZero {
                column: "r".into(),
                row: 1
            }
        );
        let column =
            ratio_column("r", &[Some(1.0)], &[Some(0.0)], ZeroDivisionPolicy::Missing).unwrap();
        assert_eq!(column.values, vec![Value::Missing]);
    }

    #[test]
    fn growth_rate_starts_at_zero_and_follows_row_order() {
        let column = growth_rate_column(
            GROWTH_RATE,
            &[Some(10.0), Some(15.0), Some(12.0)],
            ZeroDivisionPolicy::Fail,
        )
        .unwrap();
        assert_eq!(
            column.values,
            vec![Value::Number(0.0), Value::Number(0.5), Value::Number(-0.2)]
        );
    }

    #[test]
    fn growth_rate_from_zero_reports_row() {
        let err = growth_rate_column("g", &[Some(0.0), Some(3.0)], ZeroDivisionPolicy::Fail)
            .unwrap_err();
        assert_eq!(
            err,
            PipelineError::DivisionByZero {
                column: "g".into(),
                row: 2
            }
        );
    }

    #[test]
    fn quarter_labels_map_to_ordinals() {
        assert_eq!(quarter_number("Q3"), Some(3));
        assert_eq!(quarter_number(" Q1 "), Some(1));
        assert_eq!(quarter_number("q2"), None);
        let err = quarter_number_column("n", &Column::texts("Quarter", &["Q1", "Q5"])).unwrap_err();
        assert_eq!(
            err,
            PipelineError::UnmappedQuarter {
                row: 2,
                value: "Q5".into()
            }
        );
    }

    #[test]
    fn one_hot_drops_first_sorted_category() {
        let dataset = Dataset::from_columns(vec![
            Column::numbers("Revenue ($)", &[1.0, 2.0, 3.0, 4.0]),
            Column::texts("Region", &["West", "East", "North", ""]),
        ])
        .unwrap();
        let mut observer = RecordingObserver::new();
        let encoded = one_hot_encode(dataset, &["Region".to_string()], &mut observer).unwrap();
        assert_eq!(
            encoded.headers(),
            vec!["Revenue ($)", "Region_North", "Region_West"]
        );
        let north = &encoded.column("Region_North").unwrap().values;
        assert_eq!(
            north,
            &vec![
                Value::Flag(false),
                Value::Flag(false),
                Value::Flag(true),
                Value::Flag(false)
            ]
        );
        assert_eq!(
            observer.events,
            vec![StageEvent::ColumnEncoded {
                column: "Region".into(),
                categories: 3,
                indicators: vec!["Region_North".into(), "Region_West".into()],
            }]
        );
    }

    #[test]
    fn single_category_contributes_no_columns() {
        let dataset = Dataset::from_columns(vec![
            Column::numbers("x", &[1.0, 2.0]),
            Column::texts("5G Capability", &["Yes", "Yes"]),
        ])
        .unwrap();
        let mut observer = RecordingObserver::new();
        let encoded =
            one_hot_encode(dataset, &["5G Capability".to_string()], &mut observer).unwrap();
        assert_eq!(encoded.headers(), vec!["x"]);
    }

    #[test]
    fn numeric_categories_sort_numerically() {
        let column = Column::texts("Year", &["2024", "100", "2023"]);
        let labels = sorted_categories(&column)
            .iter()
            .map(Value::as_display)
            .collect::<Vec<_>>();
        assert_eq!(labels, vec!["100", "2023", "2024"]);
    }
}
