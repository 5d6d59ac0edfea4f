//! In-memory table model shared by every stage.
//!
//! A [`Dataset`] is column-major: each [`Column`] owns a name and one
//! [`Value`] per row. All columns always have the same length. Stages take a
//! dataset by value, transform it, and hand it back; nothing is shared.

use std::{collections::HashSet, fmt, path::Path};

use anyhow::{Context, Result, ensure};
use encoding_rs::Encoding;
use serde::{Deserialize, Serialize};

use crate::{error::PipelineError, io_utils};

/// Placeholders read as missing, matching the usual dataframe readers.
const NA_TOKENS: &[&str] = &[
    "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
    "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Missing,
    Number(f64),
    Flag(bool),
    Text(String),
}

impl Value {
    /// Parses a raw cell. Empty cells and NA placeholders are missing;
    /// numbers win over text.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() || NA_TOKENS.contains(&trimmed) {
            return Value::Missing;
        }
        if trimmed.eq_ignore_ascii_case("true") {
            return Value::Flag(true);
        }
        if trimmed.eq_ignore_ascii_case("false") {
            return Value::Flag(false);
        }
        match trimmed.parse::<f64>() {
            Ok(number) if number.is_finite() => Value::Number(number),
            _ => Value::Text(raw.to_string()),
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Value::Missing)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_display(&self) -> String {
        match self {
            Value::Missing => String::new(),
            Value::Number(n) => format_number(*n),
            Value::Flag(b) => b.to_string(),
            Value::Text(s) => s.clone(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}

pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.0}")
    } else {
        value.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Empty,
    Numeric,
    Boolean,
    Text,
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ColumnKind::Empty => "empty",
            ColumnKind::Numeric => "numeric",
            ColumnKind::Boolean => "boolean",
            ColumnKind::Text => "text",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: Vec<Value>,
}

impl Column {
    pub fn new(name: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    pub fn numbers(name: impl Into<String>, values: &[f64]) -> Self {
        Self::new(name, values.iter().map(|v| Value::Number(*v)).collect())
    }

    pub fn texts(name: impl Into<String>, values: &[&str]) -> Self {
        Self::new(name, values.iter().map(|v| Value::parse(v)).collect())
    }

    /// The narrowest kind that covers every non-missing value.
    pub fn kind(&self) -> ColumnKind {
        let mut kind = ColumnKind::Empty;
        for value in &self.values {
            let next = match value {
                Value::Missing => continue,
                Value::Number(_) => ColumnKind::Numeric,
                Value::Flag(_) => ColumnKind::Boolean,
                Value::Text(_) => return ColumnKind::Text,
            };
            kind = match (kind, next) {
                (ColumnKind::Empty, next) => next,
                (current, next) if current == next => current,
                _ => return ColumnKind::Text,
            };
        }
        kind
    }

    pub fn missing_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_missing()).count()
    }

    /// Numeric view of the column; missing cells map to `None`.
    pub fn to_numbers(&self) -> Result<Vec<Option<f64>>, PipelineError> {
        self.values
            .iter()
            .enumerate()
            .map(|(idx, value)| match value {
                Value::Missing => Ok(None),
                Value::Number(n) => Ok(Some(*n)),
                other => Err(PipelineError::NonNumericValue {
                    column: self.name.clone(),
                    row: idx + 1,
                    value: other.as_display(),
                }),
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Dataset {
    columns: Vec<Column>,
    row_count: usize,
}

impl Dataset {
    pub fn from_columns(columns: Vec<Column>) -> Result<Self> {
        let row_count = columns.first().map(|c| c.values.len()).unwrap_or(0);
        for column in &columns {
            ensure!(
                column.values.len() == row_count,
                "Column '{}' has {} value(s) but expected {row_count}",
                column.name,
                column.values.len()
            );
        }
        let mut seen = HashSet::new();
        for column in &columns {
            ensure!(
                seen.insert(column.name.as_str()),
                "Duplicate column name '{}'",
                column.name
            );
        }
        Ok(Self { columns, row_count })
    }

    pub fn from_rows(headers: &[String], rows: Vec<Vec<String>>) -> Result<Self> {
        let mut columns = headers
            .iter()
            .map(|name| Column::new(name.clone(), Vec::with_capacity(rows.len())))
            .collect::<Vec<_>>();
        for (idx, row) in rows.into_iter().enumerate() {
            ensure!(
                row.len() == headers.len(),
                "Row {} has {} field(s) but the header defines {}",
                idx + 1,
                row.len(),
                headers.len()
            );
            for (column, raw) in columns.iter_mut().zip(row.iter()) {
                column.values.push(Value::parse(raw));
            }
        }
        Self::from_columns(columns)
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn headers(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Result<&Column, PipelineError> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| PipelineError::missing_column(name))
    }

    pub fn column_mut(&mut self, name: &str) -> Result<&mut Column, PipelineError> {
        self.columns
            .iter_mut()
            .find(|c| c.name == name)
            .ok_or_else(|| PipelineError::missing_column(name))
    }

    /// Fails on the first name that is not a column of this dataset.
    pub fn require_columns<'a, I>(&self, names: I) -> Result<(), PipelineError>
    where
        I: IntoIterator<Item = &'a String>,
    {
        for name in names {
            self.column(name)?;
        }
        Ok(())
    }

    /// Adds a column, replacing any existing column with the same name in place.
    pub fn upsert_column(&mut self, column: Column) -> Result<(), PipelineError> {
        if !self.columns.is_empty() && column.values.len() != self.row_count {
            return Err(PipelineError::ColumnLength {
                column: column.name,
                expected: self.row_count,
                found: column.values.len(),
            });
        }
        if self.columns.is_empty() {
            self.row_count = column.values.len();
        }
        match self.position(&column.name) {
            Some(idx) => self.columns[idx] = column,
            None => self.columns.push(column),
        }
        Ok(())
    }

    pub fn remove_column(&mut self, name: &str) -> Result<Column, PipelineError> {
        let idx = self
            .position(name)
            .ok_or_else(|| PipelineError::missing_column(name))?;
        Ok(self.columns.remove(idx))
    }

    pub fn row_strings(&self, idx: usize) -> Vec<String> {
        self.columns
            .iter()
            .map(|c| c.values[idx].as_display())
            .collect()
    }

    /// Keeps only the rows whose index appears in `keep` (ascending).
    pub fn retain_rows(&mut self, keep: &[usize]) {
        for column in &mut self.columns {
            column.values = keep.iter().map(|&idx| column.values[idx].clone()).collect();
        }
        self.row_count = keep.len();
    }

    pub fn load(path: &Path, delimiter: u8, encoding: &'static Encoding) -> Result<Self> {
        let mut reader = io_utils::open_csv_reader_from_path(path, delimiter, true)?;
        let headers = io_utils::reader_headers(&mut reader, encoding)
            .with_context(|| format!("Reading headers from {path:?}"))?;
        let mut rows = Vec::new();
        for (idx, record) in reader.byte_records().enumerate() {
            let record = record.with_context(|| format!("Reading row {}", idx + 2))?;
            rows.push(io_utils::decode_record(&record, encoding)?);
        }
        Self::from_rows(&headers, rows).with_context(|| format!("Parsing table {path:?}"))
    }

    /// Writes the table to `path`; the destination only appears once the
    /// whole table has been serialised.
    pub fn save(&self, path: &Path, delimiter: u8) -> Result<()> {
        let mut writer = io_utils::AtomicCsvWriter::create(path, delimiter)?;
        writer.write_record(&self.headers())?;
        for idx in 0..self.row_count {
            writer
                .write_record(&self.row_strings(idx))
                .with_context(|| format!("Writing output row {}", idx + 2))?;
        }
        writer.commit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_distinguishes_numbers_flags_text_and_missing() {
        assert_eq!(Value::parse("42"), Value::Number(42.0));
        assert_eq!(Value::parse(" -5.5 "), Value::Number(-5.5));
        assert_eq!(Value::parse("TRUE"), Value::Flag(true));
        assert_eq!(Value::parse("Q3"), Value::Text("Q3".into()));
        assert_eq!(Value::parse("   "), Value::Missing);
        assert_eq!(Value::parse("inf"), Value::Text("inf".into()));
    }

    #[test]
    fn na_placeholders_parse_as_missing() {
        for token in ["NA", "N/A", "NaN", "nan", "null", "NULL", " None ", "#N/A", "<NA>"] {
            assert_eq!(Value::parse(token), Value::Missing, "{token:?}");
        }
        assert_eq!(Value::parse("Nan5G"), Value::Text("Nan5G".into()));
        assert_eq!(
            Column::texts("5G Subscribers (millions)", &["12.5", "NA", "n/a"]).missing_count(),
            2
        );
    }

    #[test]
    fn whole_numbers_render_without_fraction() {
        assert_eq!(Value::Number(2023.0).as_display(), "2023");
        assert_eq!(Value::Number(20.5).as_display(), "20.5");
        assert_eq!(Value::Missing.as_display(), "");
    }

    #[test]
    fn kind_widens_to_text_on_mixed_values() {
        assert_eq!(Column::texts("a", &["1", "", "2"]).kind(), ColumnKind::Numeric);
        assert_eq!(Column::texts("b", &["true", "false"]).kind(), ColumnKind::Boolean);
        assert_eq!(Column::texts("c", &["1", "true"]).kind(), ColumnKind::Text);
        assert_eq!(Column::texts("d", &["", ""]).kind(), ColumnKind::Empty);
    }

    #[test]
    fn from_rows_rejects_ragged_rows() {
        let headers = vec!["a".to_string(), "b".to_string()];
        let err = Dataset::from_rows(&headers, vec![vec!["1".into()]]).unwrap_err();
        assert!(err.to_string().contains("Row 1 has 1 field(s)"));
    }

    #[test]
    fn upsert_replaces_existing_column_in_place() {
        let mut dataset = Dataset::from_columns(vec![
            Column::numbers("a", &[1.0, 2.0]),
            Column::numbers("b", &[3.0, 4.0]),
        ])
        .unwrap();
        dataset.upsert_column(Column::numbers("a", &[9.0, 9.0])).unwrap();
        assert_eq!(dataset.headers(), vec!["a", "b"]);
        assert_eq!(dataset.column("a").unwrap().values[0], Value::Number(9.0));
        assert!(dataset.upsert_column(Column::numbers("c", &[1.0])).is_err());
    }

    #[test]
    fn to_numbers_reports_offending_row() {
        let column = Column::texts("Units Sold", &["10", "many"]);
        let err = column.to_numbers().unwrap_err();
        assert_eq!(
            err,
            PipelineError::NonNumericValue {
                column: "Units Sold".into(),
                row: 2,
                value: "many".into(),
            }
        );
    }
}
