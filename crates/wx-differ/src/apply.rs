use log::{debug, info};
use wx_core::{FieldValue, MessageCode, Messaging, Output, OutputType, Row, RowOperation, Table, WixError};

use crate::differ::{read_summary, validate_identity, ProductIdentity, SUMMARY_TABLE};
use crate::error::{DiffError, Report};
use crate::flags::TransformFlags;

/// Applies `transform` to a copy of `target`.
///
/// `flags` overrides the flags stored in the transform summary. Error
/// conditions whose bit is clear are skipped silently: adds overwrite,
/// missing deletes and updates are ignored.
pub fn apply_transform(
    target: &Output,
    transform: &Output,
    flags: Option<TransformFlags>,
    messaging: &Messaging,
) -> Result<Output, DiffError> {
    let mut report = Report::new(messaging);
    if transform.output_type != OutputType::Transform {
        return Err(report.fail(
            MessageCode::InvalidTransformInput,
            format!("Expected a transform but got a {} output.", transform.output_type.keyword()),
        ));
    }
    let (stored_flags, expected) = read_summary(transform);
    let flags = flags.or(stored_flags).unwrap_or_default();
    validate_identity(flags, &expected, &ProductIdentity::of(target), &mut report);

    let mut patched = target.clone();
    if transform.codepage != target.codepage {
        if flags.contains(TransformFlags::ERROR_CHANGE_CODEPAGE) {
            report.error(
                MessageCode::CodepageChanged,
                format!(
                    "The transform changes the codepage from {} to {}.",
                    target.codepage, transform.codepage
                ),
            );
        }
        patched.codepage = transform.codepage;
    }

    for (name, changes) in &transform.tables {
        if name == SUMMARY_TABLE {
            continue;
        }
        apply_table(&mut patched, changes, flags, &mut report);
    }
    info!("applied transform with flags {}", flags);
    report.finish(patched)
}

fn apply_table(patched: &mut Output, changes: &Table, flags: TransformFlags, report: &mut Report<'_>) {
    let name = changes.name();
    let existing = patched.table(name);
    let all_adds = changes.rows.iter().all(|row| row.operation == RowOperation::Add);
    if all_adds && !changes.rows.is_empty() {
        if let Some(existing) = existing {
            let whole_table_present = changes
                .rows
                .iter()
                .all(|row| existing.find(&row.primary_key()).is_some());
            if whole_table_present && flags.contains(TransformFlags::ERROR_ADD_EXISTING_TABLE) {
                report.error(
                    MessageCode::AddExistingTable,
                    format!("The transform adds table '{}', which already exists.", name),
                );
                return;
            }
        }
    }
    let deletes = changes.rows.iter().any(|row| row.operation == RowOperation::Delete);
    if existing.is_none() && deletes && flags.contains(TransformFlags::ERROR_DELETE_MISSING_TABLE) {
        report.error(
            MessageCode::DeleteMissingTable,
            format!("The transform deletes rows of table '{}', which does not exist.", name),
        );
        return;
    }

    let table = patched.ensure_table(changes.definition());
    let mut applied = 0;
    for change in &changes.rows {
        let key = change.primary_key();
        let position = table.rows.iter().position(|row| row.primary_key() == key);
        match (change.operation, position) {
            (RowOperation::None, _) => continue,
            (RowOperation::Add, Some(index)) => {
                if flags.contains(TransformFlags::ERROR_ADD_EXISTING_ROW) {
                    report.error(
                        MessageCode::AddExistingRow,
                        format!("The transform adds row '{}:{}', which already exists.", name, key),
                    );
                    continue;
                }
                table.rows[index] = settled(change);
            }
            (RowOperation::Add, None) => table.rows.push(settled(change)),
            (RowOperation::Delete, Some(index)) => {
                table.rows.remove(index);
            }
            (RowOperation::Delete, None) => {
                if flags.contains(TransformFlags::ERROR_DELETE_MISSING_ROW) {
                    report.error(
                        MessageCode::DeleteMissingRow,
                        format!("The transform deletes row '{}:{}', which does not exist.", name, key),
                    );
                }
                continue;
            }
            (RowOperation::Modify, Some(index)) => {
                let row = &mut table.rows[index];
                for (column, field) in change.fields().iter().enumerate() {
                    if !field.modified {
                        continue;
                    }
                    if let Err(error) = set_value(row, column, &field.value) {
                        report.push(error);
                    }
                }
            }
            (RowOperation::Modify, None) => {
                if flags.contains(TransformFlags::ERROR_UPDATE_MISSING_ROW) {
                    report.error(
                        MessageCode::UpdateMissingRow,
                        format!("The transform updates row '{}:{}', which does not exist.", name, key),
                    );
                }
                continue;
            }
        }
        applied += 1;
    }
    if table.rows.is_empty() {
        patched.tables.remove(name);
    }
    debug!("{}: applied {} change(s)", name, applied);
}

/// A transform row as it lands in the patched output.
fn settled(change: &Row) -> Row {
    let mut row = change.clone();
    row.operation = RowOperation::None;
    for index in 0..row.len() {
        row.mark_modified(index, false);
    }
    row
}

fn set_value(row: &mut Row, column: usize, value: &FieldValue) -> Result<(), WixError> {
    match value {
        FieldValue::Null => row.set_null(column),
        FieldValue::Number(number) => row.set_number(column, *number),
        other => row.set_string(column, other.as_str().unwrap_or_default()),
    }
}

#[cfg(test)]
mod apply_tests {
    use std::collections::BTreeMap;

    use proptest::prelude::*;

    use super::*;
    use crate::differ::{diff, DiffOptions};
    use wx_core::columns::property;
    use wx_core::{SourceLineNumber, TableDefinitions};

    fn properties(pairs: &BTreeMap<String, String>) -> Output {
        let mut output = Output::new(OutputType::Product);
        let definition = TableDefinitions::builtin().require("Property").expect("Property");
        let table = output.ensure_table(&definition);
        for (id, value) in pairs {
            let row = table.create_row(SourceLineNumber::at("product.wxs", 1));
            row.set_string(property::PROPERTY, id).expect("id");
            row.set_string(property::VALUE, value).expect("value");
        }
        output
    }

    fn values(output: &Output) -> BTreeMap<String, String> {
        output
            .rows("Property")
            .map(|row| {
                (
                    row.primary_key(),
                    row.get_string(property::VALUE).unwrap_or_default().to_string(),
                )
            })
            .collect()
    }

    fn pairs(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect()
    }

    #[test]
    fn applying_a_diff_reproduces_the_updated_rows() {
        let target = properties(&pairs(&[("A", "1"), ("B", "2"), ("C", "3")]));
        let updated = properties(&pairs(&[("A", "1"), ("B", "20"), ("D", "4")]));
        let messaging = Messaging::default();
        let transform = diff(&target, &updated, &DiffOptions::default(), &messaging).expect("diff");
        let patched = apply_transform(&target, &transform, None, &messaging).expect("apply");
        assert_eq!(values(&patched), values(&updated));
        assert!(patched.rows("Property").all(|row| row.operation == RowOperation::None));
    }

    #[test]
    fn error_flags_make_conflicts_fatal() {
        let target = properties(&pairs(&[("A", "1")]));
        let updated = properties(&pairs(&[("A", "1"), ("B", "2")]));
        let messaging = Messaging::default();
        let transform = diff(&target, &updated, &DiffOptions::default(), &messaging).expect("diff");

        // B already exists in the updated product.
        let overwritten = apply_transform(&updated, &transform, None, &messaging).expect("silent overwrite");
        assert_eq!(values(&overwritten), values(&updated));
        let error = apply_transform(&updated, &transform, Some(TransformFlags::ERROR_ADD_EXISTING_ROW), &messaging)
            .expect_err("add existing");
        assert!(error.has_code(MessageCode::AddExistingRow));

        let reverse = diff(&updated, &target, &DiffOptions::default(), &messaging).expect("reverse");
        let ignored = apply_transform(&target, &reverse, None, &messaging).expect("missing delete ignored");
        assert_eq!(values(&ignored), values(&target));
        let error = apply_transform(&target, &reverse, Some(TransformFlags::ERROR_DELETE_MISSING_ROW), &messaging)
            .expect_err("delete missing");
        assert!(error.has_code(MessageCode::DeleteMissingRow));
    }

    #[test]
    fn updates_of_missing_rows_and_codepage_changes() {
        let target = properties(&pairs(&[("A", "1")]));
        let updated = properties(&pairs(&[("A", "2")]));
        let messaging = Messaging::default();
        let mut transform = diff(&target, &updated, &DiffOptions::default(), &messaging).expect("diff");

        let empty = properties(&BTreeMap::new());
        let error = apply_transform(&empty, &transform, Some(TransformFlags::ALL_ERRORS), &messaging)
            .expect_err("update missing");
        assert!(error.has_code(MessageCode::UpdateMissingRow));

        transform.codepage = 1252;
        let patched = apply_transform(&target, &transform, None, &messaging).expect("codepage");
        assert_eq!(patched.codepage, 1252);
        let error = apply_transform(&target, &transform, Some(TransformFlags::ERROR_CHANGE_CODEPAGE), &messaging)
            .expect_err("codepage");
        assert!(error.has_code(MessageCode::CodepageChanged));
    }

    #[test]
    fn non_transforms_cannot_be_applied() {
        let target = properties(&pairs(&[("A", "1")]));
        let error = apply_transform(&target, &target, None, &Messaging::default()).expect_err("not a transform");
        assert!(error.has_code(MessageCode::InvalidTransformInput));
    }

    proptest! {
        #[test]
        fn diff_then_apply_round_trips_property_tables(
            target in prop::collection::btree_map("[A-D]", "[a-c]{1,2}", 0..4),
            updated in prop::collection::btree_map("[A-D]", "[a-c]{1,2}", 0..4),
        ) {
            let messaging = Messaging::default();
            let (target_output, updated_output) = (properties(&target), properties(&updated));
            match diff(&target_output, &updated_output, &DiffOptions::default(), &messaging) {
                Ok(transform) => {
                    let patched = apply_transform(&target_output, &transform, None, &messaging).expect("apply");
                    prop_assert_eq!(values(&patched), updated);
                }
                Err(error) => {
                    prop_assert!(error.has_code(MessageCode::NoDifferences));
                    prop_assert_eq!(target, updated);
                }
            }
        }
    }
}
