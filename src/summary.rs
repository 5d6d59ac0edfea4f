use crate::dataset::{Column, format_number};

/// Median of the given values, averaging the two middle values for an even
/// count. `None` when there is nothing to take the median of.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len().is_multiple_of(2) {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSummary {
    pub name: String,
    pub count: usize,
    pub missing: usize,
    pub mean: Option<f64>,
    pub std_dev: Option<f64>,
    pub min: Option<f64>,
    pub median: Option<f64>,
    pub max: Option<f64>,
}

impl ColumnSummary {
    /// Summarises the numeric cells of `column`, ignoring everything else.
    pub fn of(column: &Column) -> Self {
        let values = column
            .values
            .iter()
            .filter_map(|v| v.as_number())
            .collect::<Vec<_>>();
        let count = values.len();
        let sum: f64 = values.iter().sum();
        let mean = (count > 0).then(|| sum / count as f64);
        let std_dev = match mean {
            Some(mean) if count > 1 => {
                let squares: f64 = values.iter().map(|v| (v - mean) * (v - mean)).sum();
                Some((squares / (count as f64 - 1.0)).sqrt())
            }
            _ => None,
        };
        Self {
            name: column.name.clone(),
            count,
            missing: column.missing_count(),
            mean,
            std_dev,
            min: values.iter().copied().reduce(f64::min),
            median: median(&values),
            max: values.iter().copied().reduce(f64::max),
        }
    }

    pub fn headers() -> Vec<String> {
        ["column", "count", "mean", "std_dev", "min", "median", "max"]
            .iter()
            .map(|h| h.to_string())
            .collect()
    }

    pub fn render_row(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.count.to_string(),
            format_metric(self.mean),
            format_metric(self.std_dev),
            format_metric(self.min),
            format_metric(self.median),
            format_metric(self.max),
        ]
    }
}

fn format_metric(metric: Option<f64>) -> String {
    metric
        .map(|value| {
            if value.fract() == 0.0 {
                format_number(value)
            } else {
                format!("{value:.4}")
            }
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Column;

    #[test]
    fn median_handles_odd_and_even_lengths() {
        assert_eq!(median(&[30.0, 10.0, 20.0]), Some(20.0));
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn summary_skips_missing_cells() {
        let column = Column::texts("x", &["1", "", "3", "5"]);
        let summary = ColumnSummary::of(&column);
        assert_eq!(summary.count, 3);
        assert_eq!(summary.missing, 1);
        assert_eq!(summary.mean, Some(3.0));
        assert_eq!(summary.std_dev, Some(2.0));
        assert_eq!(summary.min, Some(1.0));
        assert_eq!(summary.max, Some(5.0));
        assert_eq!(
            summary.render_row(),
            vec!["x", "3", "3", "2", "1", "3", "5"]
        );
    }

    #[test]
    fn single_value_has_no_spread() {
        let summary = ColumnSummary::of(&Column::numbers("x", &[7.5]));
        assert_eq!(summary.std_dev, None);
        assert_eq!(summary.render_row()[2], "7.5000");
    }
}
