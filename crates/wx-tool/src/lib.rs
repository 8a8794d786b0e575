//! Fixture runner: compiles and links a directory of sources and checks the
//! result against the directory's `case.json`.

mod case;
mod runner;
mod source;

pub use case::{CaseOutputType, TestCase, TESTCASE_SCHEMA_V1};
pub use runner::{assert_case, run_case, RunReport};
pub use source::{read_sources_from_dir, read_test_case};

use std::path::PathBuf;

use thiserror::Error;
use wx_api::ApiError;

#[derive(Debug, Error)]
pub enum WxToolError {
    #[error("Failed to read file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse testcase {path}: {source}")]
    ParseCase {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Invalid testcase schema version \"{found}\", expected \"{expected}\".")]
    InvalidSchemaVersion { expected: String, found: String },
    #[error("No .wxs files under {path}.")]
    SourceEmpty { path: PathBuf },
    #[error("Entry {entry} is not a source of the fixture.")]
    MissingEntry { entry: String },
    #[error("Toolset error: {0}")]
    Api(#[from] ApiError),
    #[error("Expected {severity}s [{expected}], got [{actual}].\n{transcript}")]
    DiagnosticsMismatch {
        severity: &'static str,
        expected: String,
        actual: String,
        transcript: String,
    },
    #[error("No linked output to check rows against.\n{transcript}")]
    MissingOutput { transcript: String },
    #[error("Expected row {table}:{key} is missing.")]
    MissingRow { table: String, key: String },
    #[error("Row {table}:{key} should not be linked.")]
    UnexpectedRow { table: String, key: String },
    #[error("Expected {expected} row(s) {table}:{key}, found {actual}.")]
    RowCountMismatch {
        table: String,
        key: String,
        expected: usize,
        actual: usize,
    },
    #[error("Property {name} expected \"{expected}\", got {actual:?}.")]
    PropertyMismatch {
        name: String,
        expected: String,
        actual: Option<String>,
    },
}
