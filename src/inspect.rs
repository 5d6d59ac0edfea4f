use anyhow::{Context, Result};
use log::info;

use crate::{
    cli::InspectArgs,
    config::PipelineConfig,
    dataset::{ColumnKind, Dataset},
    io_utils,
    summary::ColumnSummary,
    table,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Overview {
    pub rows: usize,
    pub columns: Vec<(String, ColumnKind, usize)>,
    pub head: Vec<Vec<String>>,
    pub summaries: Vec<ColumnSummary>,
}

pub fn overview(dataset: &Dataset, head_rows: usize) -> Overview {
    let columns = dataset
        .columns()
        .iter()
        .map(|c| (c.name.clone(), c.kind(), c.missing_count()))
        .collect();
    let head = (0..dataset.row_count().min(head_rows))
        .map(|row| dataset.row_strings(row))
        .collect();
    let summaries = dataset
        .columns()
        .iter()
        .filter(|c| c.kind() == ColumnKind::Numeric)
        .map(ColumnSummary::of)
        .collect();
    Overview {
        rows: dataset.row_count(),
        columns,
        head,
        summaries,
    }
}

impl Overview {
    pub fn render(&self, headers: &[String]) -> String {
        let mut output = format!(
            "{} row(s) x {} column(s)\n\n",
            self.rows,
            self.columns.len()
        );
        let column_rows = self
            .columns
            .iter()
            .map(|(name, kind, missing)| vec![name.clone(), kind.to_string(), missing.to_string()])
            .collect::<Vec<_>>();
        output.push_str(&table::render_table(
            &["column".to_string(), "kind".to_string(), "missing".to_string()],
            &column_rows,
        ));
        if !self.head.is_empty() {
            output.push('\n');
            output.push_str(&table::render_table(headers, &self.head));
        }
        if !self.summaries.is_empty() {
            output.push('\n');
            let rows = self
                .summaries
                .iter()
                .map(ColumnSummary::render_row)
                .collect::<Vec<_>>();
            output.push_str(&table::render_table(&ColumnSummary::headers(), &rows));
        }
        output
    }
}

pub fn execute(args: &InspectArgs) -> Result<()> {
    let config = PipelineConfig::load_or_default(args.config.as_deref())?;
    let input = args.input.clone().unwrap_or(config.paths.raw);
    let delimiter = io_utils::resolve_delimiter(&input, args.delimiter);
    let encoding = io_utils::resolve_encoding(args.input_encoding.as_deref())?;

    let dataset = Dataset::load(&input, delimiter, encoding)
        .with_context(|| format!("Loading {input:?}"))?;
    let overview = overview(&dataset, args.rows);
    print!("{}", overview.render(&dataset.headers()));
    info!(
        "Inspected {} row(s) across {} column(s) in {:?}",
        overview.rows,
        overview.columns.len(),
        input
    );
    Ok(())
}
