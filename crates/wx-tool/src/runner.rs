use std::collections::BTreeSet;
use std::path::Path;

use wx_api::{compile_sources_from_xml_map, link_output, ExtensionSet};
use wx_core::{Messaging, Output, OutputType};
use wx_linker::LinkOptions;
use wx_parser::PreprocessOptions;

use crate::source::{case_entries, read_sources_from_dir, read_test_case};
use crate::{CaseOutputType, TestCase, WxToolError};

/// What compiling and linking a fixture produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub errors: BTreeSet<String>,
    pub warnings: BTreeSet<String>,
    /// Every message as printed, for failure reports.
    pub transcript: Vec<String>,
    /// Absent when compiling or linking reported an error.
    pub output: Option<Output>,
}

impl RunReport {
    fn transcript_text(&self) -> String {
        self.transcript.join("\n")
    }
}

pub fn run_case(fixture_dir: &Path, case: &TestCase) -> Result<RunReport, WxToolError> {
    let sources = read_sources_from_dir(fixture_dir)?;
    let entries = case_entries(case, &sources)?;

    let mut options = PreprocessOptions::default();
    for (name, value) in &case.defines {
        options.variables.define(name.clone(), value.clone());
    }
    let link = LinkOptions {
        output_type: match case.output_type {
            CaseOutputType::Product => OutputType::Product,
            CaseOutputType::Module => OutputType::Module,
        },
        pedantic: case.pedantic,
    };

    let messaging = Messaging::default();
    let extensions = ExtensionSet::new();
    let linked = compile_sources_from_xml_map(&sources, &entries, &options, &extensions, &messaging)
        .and_then(|intermediates| link_output(&intermediates, &[], &extensions, &link, &[], &messaging));
    let output = match linked {
        Ok(output) => Some(output),
        // Reported failures are the outcome under test.
        Err(_) if messaging.encountered_error() => None,
        Err(error) => return Err(WxToolError::Api(error)),
    };

    let mut report = RunReport {
        errors: BTreeSet::new(),
        warnings: BTreeSet::new(),
        transcript: Vec::new(),
        output,
    };
    for message in messaging.messages() {
        let name = message.code.name().to_string();
        if message.severity.is_error() {
            report.errors.insert(name);
        } else {
            report.warnings.insert(name);
        }
        report.transcript.push(message.to_string());
    }
    Ok(report)
}

/// Errors must match exactly; expected warnings must all be present.
pub fn assert_case(fixture_dir: &Path, case_path: &Path) -> Result<(), WxToolError> {
    let case = read_test_case(case_path)?;
    let report = run_case(fixture_dir, &case)?;

    let expected_errors = case.expected_errors.iter().cloned().collect::<BTreeSet<_>>();
    if expected_errors != report.errors {
        return Err(WxToolError::DiagnosticsMismatch {
            severity: "error",
            expected: join(&expected_errors),
            actual: join(&report.errors),
            transcript: report.transcript_text(),
        });
    }
    let expected_warnings = case.expected_warnings.iter().cloned().collect::<BTreeSet<_>>();
    if !expected_warnings.is_subset(&report.warnings) {
        return Err(WxToolError::DiagnosticsMismatch {
            severity: "warning",
            expected: join(&expected_warnings),
            actual: join(&report.warnings),
            transcript: report.transcript_text(),
        });
    }

    let has_row_expectations = !case.expected_rows.is_empty()
        || !case.absent_rows.is_empty()
        || !case.row_counts.is_empty()
        || !case.expected_properties.is_empty();
    let output = match &report.output {
        Some(output) => output,
        None if has_row_expectations => {
            return Err(WxToolError::MissingOutput {
                transcript: report.transcript_text(),
            })
        }
        None => return Ok(()),
    };

    for (table, keys) in &case.expected_rows {
        for key in keys {
            if count_rows(output, table, key) == 0 {
                return Err(WxToolError::MissingRow {
                    table: table.clone(),
                    key: key.clone(),
                });
            }
        }
    }
    for (table, keys) in &case.absent_rows {
        for key in keys {
            if count_rows(output, table, key) > 0 {
                return Err(WxToolError::UnexpectedRow {
                    table: table.clone(),
                    key: key.clone(),
                });
            }
        }
    }
    for (table, counts) in &case.row_counts {
        for (key, expected) in counts {
            let actual = count_rows(output, table, key);
            if actual != *expected {
                return Err(WxToolError::RowCountMismatch {
                    table: table.clone(),
                    key: key.clone(),
                    expected: *expected,
                    actual,
                });
            }
        }
    }
    for (name, expected) in &case.expected_properties {
        let actual = output.property(name);
        if actual != Some(expected.as_str()) {
            return Err(WxToolError::PropertyMismatch {
                name: name.clone(),
                expected: expected.clone(),
                actual: actual.map(str::to_string),
            });
        }
    }

    Ok(())
}

fn count_rows(output: &Output, table: &str, key: &str) -> usize {
    output.rows(table).filter(|row| row.primary_key() == key).count()
}

fn join(names: &BTreeSet<String>) -> String {
    names.iter().cloned().collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod runner_tests {
    use std::fs;

    use super::*;

    const PRODUCT: &str = r#"<Wix xmlns="http://wixtoolset.org/schemas/v4/wxs">
<Product Id="{11111111-2222-3333-4444-555555555555}" Name="Demo" Version="1.0.0" Manufacturer="Acme" Language="1033">
  <PropertyRef Id="Shared"/>
</Product>
</Wix>"#;

    fn fixture(fragment: &str, case: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("temp dir");
        fs::write(dir.path().join("product.wxs"), PRODUCT).expect("product");
        fs::write(
            dir.path().join("fragment.wxs"),
            format!(r#"<Wix xmlns="http://wixtoolset.org/schemas/v4/wxs">{fragment}</Wix>"#),
        )
        .expect("fragment");
        fs::write(dir.path().join("case.json"), case).expect("case");
        dir
    }

    #[test]
    fn linked_rows_are_checked() {
        let dir = fixture(
            r#"<Fragment Id="A"><Property Id="Shared" Value="1"/></Fragment>"#,
            r#"{
  "schemaVersion": "wx-tool-case.v1",
  "expectedRows": {"Property": ["Shared"]},
  "rowCounts": {"Property": {"Shared": 1}},
  "expectedProperties": {"Shared": "1"}
}"#,
        );
        assert_case(dir.path(), &dir.path().join("case.json")).expect("case should pass");

        let case = read_test_case(&dir.path().join("case.json")).expect("case");
        let report = run_case(dir.path(), &case).expect("run");
        assert!(report.errors.is_empty());
        assert!(report.output.is_some());
    }

    #[test]
    fn wrong_property_value_is_reported() {
        let dir = fixture(
            r#"<Fragment Id="A"><Property Id="Shared" Value="1"/></Fragment>"#,
            r#"{"schemaVersion": "wx-tool-case.v1", "expectedProperties": {"Shared": "2"}}"#,
        );
        let error = assert_case(dir.path(), &dir.path().join("case.json")).expect_err("mismatch");
        assert!(matches!(error, WxToolError::PropertyMismatch { .. }));
    }

    #[test]
    fn link_errors_become_the_outcome() {
        let dir = fixture(
            r#"<Fragment Id="A"><Property Id="Other" Value="1"/></Fragment>"#,
            r#"{"schemaVersion": "wx-tool-case.v1", "expectedErrors": ["UNRESOLVED_REFERENCE"]}"#,
        );
        assert_case(dir.path(), &dir.path().join("case.json")).expect("failure is expected");

        let case = read_test_case(&dir.path().join("case.json")).expect("case");
        let report = run_case(dir.path(), &case).expect("run");
        assert!(report.output.is_none());
        assert!(!report.transcript.is_empty());
    }

    #[test]
    fn unexpected_errors_fail_the_case() {
        let dir = fixture(
            r#"<Fragment Id="A"><Property Id="Other" Value="1"/></Fragment>"#,
            r#"{"schemaVersion": "wx-tool-case.v1", "expectedRows": {"Property": ["Other"]}}"#,
        );
        let error = assert_case(dir.path(), &dir.path().join("case.json")).expect_err("errors");
        assert!(matches!(
            error,
            WxToolError::DiagnosticsMismatch { severity: "error", .. }
        ));
    }

    #[test]
    fn every_fixture_passes() {
        let dirs = wx_test_fixtures::fixture_dirs();
        assert!(!dirs.is_empty());
        for dir in dirs {
            let case_path = dir.join(wx_test_fixtures::CASE_FILE);
            if let Err(error) = assert_case(&dir, &case_path) {
                panic!("fixture {} failed: {error}", dir.display());
            }
        }
    }
}
