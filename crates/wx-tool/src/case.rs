use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const TESTCASE_SCHEMA_V1: &str = "wx-tool-case.v1";

/// A fixture directory's expectations: which diagnostics the compile and
/// link of its sources produce, and which rows the linked output holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    pub schema_version: String,
    /// Source files to compile; empty means every `.wxs` in the directory.
    #[serde(default)]
    pub entries: Vec<String>,
    #[serde(default)]
    pub output_type: CaseOutputType,
    #[serde(default)]
    pub defines: BTreeMap<String, String>,
    #[serde(default)]
    pub pedantic: bool,
    /// Message names such as `DUPLICATE_SYMBOL`, compared as sets.
    #[serde(default)]
    pub expected_errors: Vec<String>,
    #[serde(default)]
    pub expected_warnings: Vec<String>,
    /// Table name to primary keys that must be linked.
    #[serde(default)]
    pub expected_rows: BTreeMap<String, Vec<String>>,
    /// Table name to primary keys that must not be linked.
    #[serde(default)]
    pub absent_rows: BTreeMap<String, Vec<String>>,
    /// Table name to the exact number of rows linked into it.
    #[serde(default)]
    pub row_counts: BTreeMap<String, BTreeMap<String, usize>>,
    #[serde(default)]
    pub expected_properties: BTreeMap<String, String>,
}

impl TestCase {
    pub fn expects_failure(&self) -> bool {
        !self.expected_errors.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseOutputType {
    #[default]
    Product,
    Module,
}

#[cfg(test)]
mod case_tests {
    use super::*;

    #[test]
    fn testcase_deserialize_applies_defaults() {
        let parsed: TestCase = serde_json::from_str(
            r#"{
  "schemaVersion": "wx-tool-case.v1"
}"#,
        )
        .expect("testcase should deserialize");

        assert_eq!(parsed.schema_version, TESTCASE_SCHEMA_V1);
        assert!(parsed.entries.is_empty());
        assert_eq!(parsed.output_type, CaseOutputType::Product);
        assert!(!parsed.pedantic);
        assert!(!parsed.expects_failure());
    }

    #[test]
    fn testcase_deserialize_reads_every_expectation() {
        let parsed: TestCase = serde_json::from_str(
            r#"{
  "schemaVersion": "wx-tool-case.v1",
  "entries": ["product.wxs"],
  "outputType": "module",
  "defines": {"Version": "1.0"},
  "pedantic": true,
  "expectedErrors": ["DUPLICATE_SYMBOL"],
  "expectedWarnings": ["UNREFERENCED_SECTION"],
  "expectedRows": {"Property": ["Shared"]},
  "absentRows": {"Property": ["Other"]},
  "rowCounts": {"Property": {"Shared": 1}},
  "expectedProperties": {"Shared": "1"}
}"#,
        )
        .expect("testcase should deserialize");

        assert_eq!(parsed.output_type, CaseOutputType::Module);
        assert!(parsed.expects_failure());
        assert_eq!(parsed.expected_rows["Property"], vec!["Shared".to_string()]);
        assert_eq!(parsed.row_counts["Property"]["Shared"], 1);
    }

    #[test]
    fn unknown_output_types_are_rejected() {
        let parsed = serde_json::from_str::<TestCase>(
            r#"{"schemaVersion": "wx-tool-case.v1", "outputType": "patch"}"#,
        );
        assert!(parsed.is_err());
    }
}
