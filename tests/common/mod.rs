#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::{TempDir, tempdir};

use revenue_pipeline::dataset::Dataset;

pub const SALES_FIXTURE: &str = "sales_sample.csv";

pub const SALES_HEADER: &str = "Year,Quarter,Region,Product Model,5G Capability,Units Sold,Revenue ($),Market Share (%),5G Subscribers (millions),Regional 5G Coverage (%)";

/// Returns the absolute path to a fixture under `tests/data`.
pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("data")
        .join(name)
}

pub fn load_fixture(name: &str) -> Dataset {
    Dataset::load(&fixture_path(name), b',', encoding_rs::UTF_8).expect("load fixture")
}

/// Builds a sales table from data lines that follow [`SALES_HEADER`].
pub fn sales_table(lines: &[&str]) -> Dataset {
    let headers = SALES_HEADER
        .split(',')
        .map(|h| h.to_string())
        .collect::<Vec<_>>();
    let rows = lines
        .iter()
        .map(|line| line.split(',').map(|f| f.to_string()).collect())
        .collect();
    Dataset::from_rows(&headers, rows).expect("sales table")
}

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates a fresh scratch directory for the current test case.
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    /// Returns the root path for all files owned by this workspace.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace, creating parent
    /// directories, and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dirs");
        }
        fs::write(&path, contents).expect("write temp file contents");
        path
    }

    /// Copies a fixture into the workspace under `name`.
    pub fn copy_fixture(&self, fixture: &str, name: &str) -> PathBuf {
        let contents = fs::read_to_string(fixture_path(fixture)).expect("read fixture");
        self.write(name, &contents)
    }
}
