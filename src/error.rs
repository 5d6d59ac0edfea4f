use thiserror::Error;

/// Stage-fatal failures. Data-quality anomalies are repaired and observed instead.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PipelineError {
    #[error("Column '{column}' not found in input")]
    MissingColumn { column: String },

    #[error("Column '{column}' row {row}: expected a number but found '{value}'")]
    NonNumericValue {
        column: String,
        row: usize,
        value: String,
    },

    #[error("Column '{column}' has no non-missing values; median imputation is undefined")]
    UndefinedImputation { column: String },

    #[error("Column '{column}' has {found} value(s) but the table has {expected} row(s)")]
    ColumnLength {
        column: String,
        expected: usize,
        found: usize,
    },

    #[error("Column '{column}' row {row}: division by zero")]
    DivisionByZero { column: String, row: usize },

    #[error("Row {row}: quarter label '{value}' is not one of Q1, Q2, Q3, Q4")]
    UnmappedQuarter { row: usize, value: String },

    #[error("Input contains no data rows")]
    EmptyDataset,

    #[error("No numeric or boolean predictor columns remain besides '{target}'")]
    NoPredictors { target: String },

    #[error("Need at least {required} usable row(s) for training but found {found}")]
    InsufficientRows { required: usize, found: usize },

    #[error("Fitting '{model}' failed: {reason}")]
    ModelFit { model: String, reason: String },
}

impl PipelineError {
    pub fn missing_column(column: &str) -> Self {
        PipelineError::MissingColumn {
            column: column.to_string(),
        }
    }
}
