//! File I/O helpers shared by the stages.
//!
//! - **Delimiter resolution**: `.tsv` → tab, anything else → comma, unless
//!   overridden.
//! - **Decoding**: input is decoded through `encoding_rs` (UTF-8 by default);
//!   output is always UTF-8.
//! - **Atomic output**: every artifact is written to a temporary file beside
//!   its destination and persisted over it only when complete, so a failing
//!   stage never leaves a partial file behind.

use std::{
    fs::{self, File},
    io::{BufReader, Read, Write},
    path::Path,
};

use anyhow::{Context, Result, anyhow};
use encoding_rs::{Encoding, UTF_8};
use tempfile::NamedTempFile;

pub const DEFAULT_CSV_DELIMITER: u8 = b',';
pub const DEFAULT_TSV_DELIMITER: u8 = b'\t';

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    if let Some(value) = label {
        Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| anyhow!("Unknown encoding '{value}'"))
    } else {
        Ok(UTF_8)
    }
}

pub fn resolve_delimiter(path: &Path, provided: Option<u8>) -> u8 {
    provided.unwrap_or_else(|| match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") => DEFAULT_TSV_DELIMITER,
        _ => DEFAULT_CSV_DELIMITER,
    })
}

pub fn open_csv_reader<R>(reader: R, delimiter: u8, has_headers: bool) -> csv::Reader<R>
where
    R: Read,
{
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(has_headers)
        .delimiter(delimiter)
        .double_quote(true)
        .flexible(false);
    builder.from_reader(reader)
}

pub fn open_csv_reader_from_path(
    path: &Path,
    delimiter: u8,
    has_headers: bool,
) -> Result<csv::Reader<BufReader<File>>> {
    let file = File::open(path).with_context(|| format!("Opening input file {path:?}"))?;
    Ok(open_csv_reader(BufReader::new(file), delimiter, has_headers))
}

pub fn decode_bytes(bytes: &[u8], encoding: &'static Encoding) -> Result<String> {
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        Err(anyhow!(
            "Failed to decode text with encoding {}",
            encoding.name()
        ))
    } else {
        Ok(text.into_owned())
    }
}

pub fn decode_record(record: &csv::ByteRecord, encoding: &'static Encoding) -> Result<Vec<String>> {
    record
        .iter()
        .map(|field| decode_bytes(field, encoding))
        .collect()
}

pub fn reader_headers<R>(
    reader: &mut csv::Reader<R>,
    encoding: &'static Encoding,
) -> Result<Vec<String>>
where
    R: Read,
{
    let headers = reader.byte_headers()?.clone();
    decode_record(&headers, encoding)
}

/// Opens a temporary file next to `path`, creating the parent directory first.
fn staging_file(path: &Path) -> Result<NamedTempFile> {
    let parent = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).with_context(|| format!("Creating directory {parent:?}"))?;
    NamedTempFile::new_in(parent).with_context(|| format!("Creating staging file in {parent:?}"))
}

fn persist(staged: NamedTempFile, path: &Path) -> Result<()> {
    staged
        .persist(path)
        .map_err(|err| err.error)
        .with_context(|| format!("Persisting output file {path:?}"))?;
    Ok(())
}

/// Writes `bytes` to `path` in one step.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut staged = staging_file(path)?;
    staged
        .write_all(bytes)
        .with_context(|| format!("Writing output file {path:?}"))?;
    persist(staged, path)
}

/// CSV writer whose output only becomes visible at [`AtomicCsvWriter::commit`].
/// Dropping it without committing discards everything written.
pub struct AtomicCsvWriter {
    writer: csv::Writer<NamedTempFile>,
    destination: std::path::PathBuf,
}

impl AtomicCsvWriter {
    pub fn create(path: &Path, delimiter: u8) -> Result<Self> {
        let staged = staging_file(path)?;
        let mut builder = csv::WriterBuilder::new();
        builder.delimiter(delimiter).double_quote(true);
        Ok(Self {
            writer: builder.from_writer(staged),
            destination: path.to_path_buf(),
        })
    }

    pub fn write_record<I, T>(&mut self, record: I) -> Result<()>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        self.writer
            .write_record(record)
            .with_context(|| format!("Writing to {:?}", self.destination))
    }

    pub fn commit(self) -> Result<()> {
        let Self {
            writer,
            destination,
        } = self;
        let staged = writer
            .into_inner()
            .map_err(|err| anyhow!("Flushing CSV output for {destination:?}: {}", err.error()))?;
        persist(staged, &destination)
    }
}

pub fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b',' => ",".to_string(),
        b'\t' => "\\t".to_string(),
        other => (other as char).to_string(),
    }
}
