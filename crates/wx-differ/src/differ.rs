use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use log::{debug, info};
use wx_core::columns::{file, summary_information};
use wx_core::{
    MessageCode, Messaging, Output, OutputType, Row, RowOperation, SourceLineNumber, Table, TableDefinition,
    TableDefinitions, WixError,
};

use crate::error::{DiffError, Report};
use crate::flags::TransformFlags;

pub(crate) const SUMMARY_TABLE: &str = "_SummaryInformation";
const FILE_TABLE: &str = "File";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiffOptions {
    /// Echo identical rows into the transform with operation `None`.
    pub preserve_unchanged_rows: bool,
    pub flags: TransformFlags,
}

/// What a product looks like to transform validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ProductIdentity {
    pub product_code: String,
    pub product_version: String,
    pub upgrade_code: String,
    pub language: String,
}

impl ProductIdentity {
    pub fn of(output: &Output) -> Self {
        let property = |name: &str| output.property(name).unwrap_or_default().to_string();
        Self {
            product_code: property("ProductCode"),
            product_version: property("ProductVersion"),
            upgrade_code: property("UpgradeCode"),
            language: property("ProductLanguage"),
        }
    }

    pub fn major_version(&self) -> &str {
        self.product_version.split('.').next().unwrap_or_default()
    }
}

/// Checks each requested validation between the product the transform
/// applies to and the one it was built for.
pub(crate) fn validate_identity(
    flags: TransformFlags,
    expected: &ProductIdentity,
    actual: &ProductIdentity,
    report: &mut Report<'_>,
) {
    let checks = [
        (
            TransformFlags::VALIDATE_PRODUCT,
            MessageCode::ProductCodeMismatch,
            "product code",
            expected.product_code.as_str(),
            actual.product_code.as_str(),
        ),
        (
            TransformFlags::VALIDATE_UPGRADE_CODE,
            MessageCode::UpgradeCodeMismatch,
            "upgrade code",
            expected.upgrade_code.as_str(),
            actual.upgrade_code.as_str(),
        ),
        (
            TransformFlags::VALIDATE_LANGUAGE,
            MessageCode::LanguageMismatch,
            "language",
            expected.language.as_str(),
            actual.language.as_str(),
        ),
        (
            TransformFlags::VALIDATE_MAJOR_VERSION,
            MessageCode::MajorVersionMismatch,
            "major version",
            expected.major_version(),
            actual.major_version(),
        ),
    ];
    for (flag, code, what, expected, actual) in checks {
        if flags.contains(flag) && !expected.eq_ignore_ascii_case(actual) {
            report.error(
                code,
                format!(
                    "The transform validates the {} but the target has '{}' and the updated product has '{}'.",
                    what, expected, actual
                ),
            );
        }
    }
}

/// Row-level difference between two linked outputs as a transform.
pub fn diff(
    target: &Output,
    updated: &Output,
    options: &DiffOptions,
    messaging: &Messaging,
) -> Result<Output, DiffError> {
    diff_with_payloads(target, updated, options, &BTreeSet::new(), messaging)
}

/// Like [`diff`], but File rows keyed in `changed_payloads` are emitted as
/// `Modify` even when every column matches, because the file content behind
/// them changed.
pub fn diff_with_payloads(
    target: &Output,
    updated: &Output,
    options: &DiffOptions,
    changed_payloads: &BTreeSet<String>,
    messaging: &Messaging,
) -> Result<Output, DiffError> {
    let mut report = Report::new(messaging);
    for output in [target, updated] {
        if matches!(output.output_type, OutputType::Transform | OutputType::Patch) {
            return Err(report.fail(
                MessageCode::InvalidTransformInput,
                format!("A {} output cannot be diffed.", output.output_type.keyword()),
            ));
        }
    }
    if target.output_type != updated.output_type {
        return Err(report.fail(
            MessageCode::OutputTypeMismatch,
            format!(
                "The target is a {} but the updated output is a {}.",
                target.output_type.keyword(),
                updated.output_type.keyword()
            ),
        ));
    }

    let target_identity = ProductIdentity::of(target);
    let updated_identity = ProductIdentity::of(updated);
    validate_identity(options.flags, &target_identity, &updated_identity, &mut report);

    let mut transform = Output::new(OutputType::Transform);
    transform.codepage = updated.codepage;
    let codepage_changed = target.codepage != updated.codepage;
    if codepage_changed && options.flags.contains(TransformFlags::ERROR_CHANGE_CODEPAGE) {
        report.error(
            MessageCode::CodepageChanged,
            format!("The codepage changes from {} to {}.", target.codepage, updated.codepage),
        );
    }

    let names = target
        .tables
        .keys()
        .chain(updated.tables.keys())
        .filter(|name| name.as_str() != SUMMARY_TABLE)
        .collect::<BTreeSet<_>>();
    let no_payloads = BTreeSet::new();
    let mut changed_rows = 0;
    for name in names {
        let (target_table, updated_table) = (target.table(name), updated.table(name));
        let Some(definition) = updated_table.or(target_table).map(|table| table.definition().clone()) else {
            continue;
        };
        if definition.unreal {
            continue;
        }
        let payloads = if name.as_str() == FILE_TABLE {
            changed_payloads
        } else {
            &no_payloads
        };
        let (table, changes) =
            diff_table(&definition, target_table, updated_table, payloads, options.preserve_unchanged_rows);
        debug!("{}: {} change(s)", name, changes);
        changed_rows += changes;
        if !table.rows.is_empty() {
            transform.tables.insert(name.clone(), table);
        }
    }

    if changed_rows == 0 && !codepage_changed {
        report.error(
            MessageCode::NoDifferences,
            "The target and updated outputs are identical; there is nothing to transform.",
        );
    }
    if let Err(error) = write_summary(&mut transform, options.flags, &target_identity, &updated_identity) {
        report.push(error);
    }
    info!("transform has {} changed row(s)", changed_rows);
    report.finish(transform)
}

fn diff_table(
    definition: &Arc<TableDefinition>,
    target: Option<&Table>,
    updated: Option<&Table>,
    changed_payloads: &BTreeSet<String>,
    preserve_unchanged_rows: bool,
) -> (Table, usize) {
    let keyed = |table: Option<&Table>| -> BTreeMap<String, Row> {
        table
            .map(|table| table.rows.iter().map(|row| (row.primary_key(), row.clone())).collect())
            .unwrap_or_default()
    };
    let target_rows = keyed(target);
    let mut updated_rows = keyed(updated);

    let mut table = Table::new(definition.clone());
    let mut changes = 0;
    for (key, target_row) in target_rows {
        match updated_rows.remove(&key) {
            None => {
                let mut row = target_row;
                row.operation = RowOperation::Delete;
                table.rows.push(row);
                changes += 1;
            }
            Some(mut row) => {
                let mut differs = false;
                for index in 0..definition.columns.len() {
                    let modified = row.value(index) != target_row.value(index);
                    row.mark_modified(index, modified);
                    differs |= modified;
                }
                if !differs && changed_payloads.contains(&key) {
                    row.mark_modified(file::FILE_SIZE, true);
                    differs = true;
                }
                if differs {
                    row.operation = RowOperation::Modify;
                    table.rows.push(row);
                    changes += 1;
                } else if preserve_unchanged_rows {
                    row.operation = RowOperation::None;
                    table.rows.push(row);
                }
            }
        }
    }
    for (_, mut row) in updated_rows {
        for index in 0..definition.columns.len() {
            row.mark_modified(index, true);
        }
        row.operation = RowOperation::Add;
        table.rows.push(row);
        changes += 1;
    }
    (table, changes)
}

/// Transform summary: flags, the product pair it was built from and the
/// target language.
fn write_summary(
    transform: &mut Output,
    flags: TransformFlags,
    target: &ProductIdentity,
    updated: &ProductIdentity,
) -> Result<(), WixError> {
    let definition = TableDefinitions::builtin().require(SUMMARY_TABLE)?;
    let table = transform.ensure_table(&definition);
    let revision = format!(
        "{}{};{}{};{}",
        target.product_code, target.product_version, updated.product_code, updated.product_version, target.upgrade_code
    );
    let template = format!(";{}", target.language);
    let flags = flags.bits().to_string();
    for (property_id, value) in [
        (summary_information::TEMPLATE, template.as_str()),
        (summary_information::REVISION, revision.as_str()),
        (summary_information::CHAR_COUNT, flags.as_str()),
    ] {
        let row = table.create_row(SourceLineNumber::synthetic());
        row.set_number(summary_information::PROPERTY_ID, property_id)?;
        row.set_string(summary_information::VALUE, value)?;
        row.operation = RowOperation::Add;
    }
    Ok(())
}

/// Reads the flags and product pair back from a transform summary.
pub(crate) fn read_summary(transform: &Output) -> (Option<TransformFlags>, ProductIdentity) {
    let value = |property_id: i32| {
        transform
            .rows(SUMMARY_TABLE)
            .find(|row| row.get_number(summary_information::PROPERTY_ID) == Some(property_id))
            .and_then(|row| row.get_string(summary_information::VALUE))
            .unwrap_or_default()
    };
    let flags = value(summary_information::CHAR_COUNT)
        .parse::<u32>()
        .ok()
        .map(TransformFlags::from_bits);

    let mut identity = ProductIdentity::default();
    let revision = value(summary_information::REVISION);
    if let Some(target) = revision.split(';').next() {
        let split = target.find('}').map_or(0, |index| index + 1);
        identity.product_code = target[..split].to_string();
        identity.product_version = target[split..].to_string();
    }
    identity.upgrade_code = revision.rsplit(';').next().unwrap_or_default().to_string();
    identity.language = value(summary_information::TEMPLATE)
        .rsplit(';')
        .next()
        .unwrap_or_default()
        .to_string();
    (flags, identity)
}

#[cfg(test)]
mod differ_tests {
    use std::collections::BTreeMap;

    use super::*;
    use wx_compiler::Compiler;
    use wx_core::columns::property;
    use wx_linker::{link, LinkOptions};
    use wx_parser::{preprocess_xml_map, PreprocessOptions};

    pub(crate) fn product_output(version: &str, properties: &[(&str, &str)]) -> Output {
        let extra = properties
            .iter()
            .map(|(id, value)| format!(r#"<Property Id="{id}" Value="{value}"/>"#))
            .collect::<String>();
        let source = format!(
            r#"<Wix xmlns="http://wixtoolset.org/schemas/v4/wxs">
<Product Id="{{11111111-2222-3333-4444-555555555555}}" Name="Demo" Version="{version}" Manufacturer="Acme" Language="1033" UpgradeCode="{{99999999-2222-3333-4444-555555555555}}">
  {extra}
</Product>
</Wix>"#
        );
        let messaging = Messaging::default();
        let files = BTreeMap::from([("product.wxs".to_string(), source)]);
        let document = preprocess_xml_map(&files, "product.wxs", &PreprocessOptions::default(), &messaging)
            .expect("preprocess");
        let intermediate = Compiler::new().compile(&document, &messaging);
        assert!(!messaging.encountered_error(), "{:?}", messaging.messages());
        link(&[intermediate], &[], TableDefinitions::builtin(), &LinkOptions::default(), &messaging).expect("link")
    }

    fn operations(transform: &Output, table: &str) -> Vec<(String, RowOperation)> {
        transform
            .rows(table)
            .map(|row| (row.primary_key(), row.operation))
            .collect()
    }

    #[test]
    fn one_added_and_one_changed_row_make_one_add_and_one_modify() {
        let target = product_output("1.0.0", &[("Color", "red")]);
        let updated = product_output("1.0.0", &[("Color", "blue"), ("Size", "large")]);
        let messaging = Messaging::default();
        let transform = diff(&target, &updated, &DiffOptions::default(), &messaging).expect("diff");

        assert_eq!(transform.output_type, OutputType::Transform);
        assert_eq!(
            operations(&transform, "Property"),
            vec![
                ("Color".to_string(), RowOperation::Modify),
                ("Size".to_string(), RowOperation::Add)
            ]
        );
        let color = transform.table("Property").and_then(|table| table.find("Color")).expect("Color");
        assert!(!color.fields()[property::PROPERTY].modified);
        assert!(color.fields()[property::VALUE].modified);
        assert_eq!(transform.tables.len(), 2, "Property plus the transform summary");
    }

    #[test]
    fn identical_outputs_are_an_error() {
        let target = product_output("1.0.0", &[("Color", "red")]);
        let messaging = Messaging::default();
        let error = diff(&target, &target.clone(), &DiffOptions::default(), &messaging).expect_err("empty");
        assert!(error.has_code(MessageCode::NoDifferences));
        assert!(messaging.encountered_error());
    }

    #[test]
    fn deleted_rows_and_preserved_rows() {
        let target = product_output("1.0.0", &[("Color", "red"), ("Size", "large")]);
        let updated = product_output("1.0.0", &[("Color", "red")]);
        let messaging = Messaging::default();
        let options = DiffOptions {
            preserve_unchanged_rows: true,
            ..DiffOptions::default()
        };
        let transform = diff(&target, &updated, &options, &messaging).expect("diff");
        let property_rows = operations(&transform, "Property");
        assert!(property_rows.contains(&("Size".to_string(), RowOperation::Delete)));
        assert!(property_rows.contains(&("Color".to_string(), RowOperation::None)));
        assert!(property_rows.contains(&("ProductName".to_string(), RowOperation::None)));

        let trimmed = diff(&target, &updated, &DiffOptions::default(), &messaging).expect("diff");
        assert_eq!(operations(&trimmed, "Property"), vec![("Size".to_string(), RowOperation::Delete)]);
    }

    #[test]
    fn validation_flags_reject_major_upgrades() {
        let target = product_output("1.0.0", &[]);
        let updated = product_output("2.0.0", &[]);
        let messaging = Messaging::default();
        let options = DiffOptions {
            flags: TransformFlags::DEFAULT_VALIDATION,
            ..DiffOptions::default()
        };
        let error = diff(&target, &updated, &options, &messaging).expect_err("major version");
        assert!(error.has_code(MessageCode::MajorVersionMismatch));
        assert!(!error.has_code(MessageCode::ProductCodeMismatch));

        let minor = product_output("1.1.0", &[]);
        let transform = diff(&target, &minor, &options, &Messaging::default()).expect("minor update");
        let (flags, identity) = read_summary(&transform);
        assert_eq!(flags, Some(TransformFlags::DEFAULT_VALIDATION));
        assert_eq!(identity, ProductIdentity::of(&target));
    }

    fn with_file(mut output: Output, key: &str, size: i32) -> Output {
        let definition = TableDefinitions::builtin().require(FILE_TABLE).expect("File");
        let row = output.ensure_table(&definition).create_row(SourceLineNumber::synthetic());
        row.set_string(file::FILE, key).expect("key");
        row.set_string(file::COMPONENT, "Main").expect("component");
        row.set_string(file::FILE_NAME, "app.exe").expect("name");
        row.set_number(file::FILE_SIZE, size).expect("size");
        row.set_number(file::SEQUENCE, 1).expect("sequence");
        output
    }

    #[test]
    fn changed_payloads_modify_otherwise_identical_file_rows() {
        let target = with_file(product_output("1.0.0", &[]), "AppExe", 2);
        let updated = with_file(product_output("1.0.0", &[]), "AppExe", 2);
        let messaging = Messaging::default();
        let error = diff(&target, &updated, &DiffOptions::default(), &messaging).expect_err("same rows");
        assert!(error.has_code(MessageCode::NoDifferences));

        let changed = BTreeSet::from(["AppExe".to_string(), "Gone".to_string()]);
        let messaging = Messaging::default();
        let transform =
            diff_with_payloads(&target, &updated, &DiffOptions::default(), &changed, &messaging).expect("diff");
        assert_eq!(operations(&transform, FILE_TABLE), vec![("AppExe".to_string(), RowOperation::Modify)]);
        let row = transform.table(FILE_TABLE).and_then(|table| table.find("AppExe")).expect("AppExe");
        assert!(row.fields()[file::FILE_SIZE].modified);
        assert!(!row.fields()[file::FILE_NAME].modified);
        assert!(transform.table("Property").is_none());
    }

    #[test]
    fn mismatched_and_transform_inputs_are_rejected() {
        let product = product_output("1.0.0", &[]);
        let mut module = product.clone();
        module.output_type = OutputType::Module;
        let messaging = Messaging::default();
        let error = diff(&product, &module, &DiffOptions::default(), &messaging).expect_err("types");
        assert!(error.has_code(MessageCode::OutputTypeMismatch));

        let mut transform = product.clone();
        transform.output_type = OutputType::Transform;
        let error = diff(&transform, &transform, &DiffOptions::default(), &messaging).expect_err("transform");
        assert!(error.has_code(MessageCode::InvalidTransformInput));
    }
}
