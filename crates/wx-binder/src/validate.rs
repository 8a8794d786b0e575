use std::collections::{BTreeMap, BTreeSet};

use wx_core::{MessageCode, Output, WixError};

use crate::error::Problems;

/// Checks foreign keys and non-nullable columns of every real table.
pub(crate) fn validate_rows(output: &Output, problems: &mut Problems<'_>) {
    let mut key_sets: BTreeMap<(String, usize), BTreeSet<String>> = BTreeMap::new();

    for table in output.tables.values() {
        let definition = table.definition();
        if definition.unreal {
            continue;
        }
        for row in &table.rows {
            for (index, column) in definition.columns.iter().enumerate() {
                let value = row.value(index);
                if value.is_null() {
                    if !column.nullable {
                        problems.error(WixError::with_location(
                            MessageCode::NullInNonNullableColumn,
                            format!(
                                "Row '{}' has no value for the non-nullable column '{}'.",
                                row.symbol_name(),
                                column.name
                            ),
                            row.source_line.clone(),
                        ));
                    }
                    continue;
                }
                let (Some(key_table), Some(key_column)) = (&column.key_table, column.key_column) else {
                    continue;
                };
                let keys = key_sets
                    .entry((key_table.clone(), key_column))
                    .or_insert_with(|| {
                        output
                            .rows(key_table)
                            .map(|target| target.value(key_column.saturating_sub(1)).to_string())
                            .collect()
                    });
                let text = value.to_string();
                if !keys.contains(&text) {
                    problems.error(WixError::with_location(
                        MessageCode::InvalidForeignKey,
                        format!(
                            "Column '{}.{}' of row '{}' refers to '{}', which is not in table '{}'.",
                            definition.name,
                            column.name,
                            row.primary_key(),
                            text,
                            key_table
                        ),
                        row.source_line.clone(),
                    ));
                }
            }
        }
    }
}

#[cfg(test)]
mod validate_tests {
    use super::*;
    use wx_core::{Messaging, MessagingPolicy, OutputType, SourceLineNumber, TableDefinitions};

    fn add(output: &mut Output, table: &str, values: &[&str]) {
        let definition = TableDefinitions::builtin().require(table).expect("builtin");
        let row = output.ensure_table(&definition).create_row(SourceLineNumber::at("test.wxs", 4));
        for (index, value) in values.iter().enumerate() {
            row.set_text(index, value).expect("field");
        }
    }

    #[test]
    fn dangling_foreign_keys_and_nulls_are_reported() {
        let messaging = Messaging::new(MessagingPolicy::default());
        let mut problems = Problems::new(&messaging);
        let mut output = Output::new(OutputType::Product);
        add(&mut output, "Directory", &["TARGETDIR", "", "SourceDir"]);
        add(&mut output, "Directory", &["INSTALLDIR", "TARGETDIR", "App"]);
        add(&mut output, "Component", &["Good", "", "INSTALLDIR", "0"]);
        add(&mut output, "Component", &["Bad", "", "ELSEWHERE", "0"]);
        add(&mut output, "Feature", &["Main", "", "", "", "", ""]);
        validate_rows(&output, &mut problems);

        let error = problems.check().expect_err("invalid rows");
        assert_eq!(error.errors.len(), 3);
        assert!(error.errors[0].code == MessageCode::InvalidForeignKey);
        assert!(error.errors[0].message.contains("ELSEWHERE"));
        let nulls = error
            .errors
            .iter()
            .filter(|error| error.code == MessageCode::NullInNonNullableColumn)
            .count();
        assert_eq!(nulls, 2, "Feature.Level and Feature.Attributes");
    }

    #[test]
    fn unreal_tables_are_not_validated() {
        let messaging = Messaging::new(MessagingPolicy::default());
        let mut problems = Problems::new(&messaging);
        let mut output = Output::new(OutputType::Product);
        add(&mut output, "WixFile", &["missing", "NOWHERE", "1", "a.txt"]);
        validate_rows(&output, &mut problems);
        assert!(problems.check().is_ok());
    }
}
