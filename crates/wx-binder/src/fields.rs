//! Bind-time substitution of `!(loc.X)`, `!(wix.X)`, `!(bind.property.X)`
//! and `!(bind.fileSize.X)` inside row values.
//!
//! File sizes are only known after file resolution, so they are replaced in
//! a second, delayed pass.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use log::{debug, trace};
use regex::{Captures, Regex};
use wx_core::columns::{file, property, wix_variable};
use wx_core::{ColumnCategory, Localization, MessageCode, Output, SourceLineNumber, WixError};

use crate::error::Problems;

fn variable_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"!\((loc|wix|bind\.property|bind\.fileSize)\.([A-Za-z0-9_.]+)\)")
            .expect("variable pattern must compile")
    })
}

fn file_reference_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\[#([A-Za-z0-9_.]+)\]").expect("file reference pattern must compile"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Pass {
    Fields,
    FileSizes,
}

struct Values<'a> {
    localization: Option<&'a Localization>,
    culture: Option<&'a str>,
    wix: BTreeMap<String, String>,
    properties: BTreeMap<String, String>,
    file_sizes: BTreeMap<String, i32>,
}

impl Values<'_> {
    fn lookup(&self, kind: &str, name: &str, pass: Pass) -> Lookup {
        match (pass, kind) {
            (Pass::Fields, "bind.fileSize") | (Pass::FileSizes, "loc" | "wix" | "bind.property") => Lookup::Deferred,
            (_, "loc") => match self.localization {
                Some(localization) => localization
                    .get(name)
                    .map_or(Lookup::Missing(MessageCode::UndefinedLocalizationVariable), |value| {
                        Lookup::Found(value.to_string())
                    }),
                None => Lookup::Missing(MessageCode::MissingLocalization),
            },
            (_, "wix") => self
                .wix
                .get(name)
                .map_or(Lookup::Missing(MessageCode::UndefinedWixVariable), |value| {
                    Lookup::Found(value.clone())
                }),
            (_, "bind.property") => self
                .properties
                .get(name)
                .map_or(Lookup::Missing(MessageCode::UndefinedBindVariable), |value| {
                    Lookup::Found(value.clone())
                }),
            (_, _) => self
                .file_sizes
                .get(name)
                .map_or(Lookup::Missing(MessageCode::UndefinedBindVariable), |size| {
                    Lookup::Found(size.to_string())
                }),
        }
    }
}

enum Lookup {
    Found(String),
    Missing(MessageCode),
    Deferred,
}

/// Replaces the variables of `pass` in every string-like field of `output`.
pub(crate) fn resolve_fields(
    output: &mut Output,
    culture: Option<&str>,
    variables: &BTreeMap<String, String>,
    pass: Pass,
    problems: &mut Problems<'_>,
) {
    let localizations = std::mem::take(&mut output.localizations);
    let localization = match culture {
        Some(culture) => localizations.iter().find(|localization| localization.culture == culture),
        None => localizations.first(),
    };
    let mut values = Values {
        localization,
        culture,
        wix: wix_variables(output, variables, pass, problems),
        properties: properties(output),
        file_sizes: output
            .rows("File")
            .filter_map(|row| Some((row.primary_key(), row.get_number(file::FILE_SIZE)?)))
            .collect(),
    };

    substitute_table(output, "Property", &values, pass, problems);
    values.properties = properties(output);

    let names = output
        .tables
        .keys()
        .filter(|name| name.as_str() != "Property")
        .cloned()
        .collect::<Vec<_>>();
    for name in names {
        substitute_table(output, &name, &values, pass, problems);
    }
    output.localizations = localizations;
}

fn properties(output: &Output) -> BTreeMap<String, String> {
    output
        .rows("Property")
        .filter_map(|row| Some((row.primary_key(), row.get_string(property::VALUE)?.to_string())))
        .collect()
}

/// Source `WixVariable` values with command-line overrides applied. A
/// command-line value for a variable the source does not mark overridable
/// is a collision, reported once on the `Fields` pass.
fn wix_variables(
    output: &Output,
    overrides: &BTreeMap<String, String>,
    pass: Pass,
    problems: &mut Problems<'_>,
) -> BTreeMap<String, String> {
    let mut values = BTreeMap::new();
    let mut fixed = BTreeMap::new();
    for row in output.rows("WixVariable") {
        let id = row.primary_key();
        values.insert(id.clone(), row.get_string(wix_variable::VALUE).unwrap_or_default().to_string());
        if row.get_number(wix_variable::OVERRIDABLE).unwrap_or(0) == 0 {
            fixed.insert(id, &row.source_line);
        }
    }
    for (name, value) in overrides {
        match fixed.get(name) {
            Some(location) => {
                if pass == Pass::Fields {
                    problems.error(WixError::with_location(
                        MessageCode::WixVariableCollision,
                        format!(
                            "The WixVariable '{}' is set on the command line but its source definition is not overridable.",
                            name
                        ),
                        (*location).clone(),
                    ));
                }
            }
            None => {
                values.insert(name.clone(), value.clone());
            }
        }
    }
    values
}

fn substitute_table(output: &mut Output, name: &str, values: &Values<'_>, pass: Pass, problems: &mut Problems<'_>) {
    let Some(table) = output.table_mut(name) else { return };
    let formatted = table
        .definition()
        .columns
        .iter()
        .enumerate()
        .filter(|(_, column)| column.is_formatted())
        .map(|(index, _)| index)
        .collect::<Vec<_>>();
    for row in &mut table.rows {
        for index in &formatted {
            let Some(text) = row.get_string(*index) else { continue };
            if !text.contains("!(") {
                continue;
            }
            let Some(replaced) = substitute(text, values, pass, &row.source_line, problems) else { continue };
            trace!("{}: '{}' -> '{}'", row.symbol_name(), text, replaced);
            if let Err(error) = row.set_string(*index, &replaced) {
                problems.error(error);
            }
        }
    }
}

fn substitute(
    text: &str,
    values: &Values<'_>,
    pass: Pass,
    location: &SourceLineNumber,
    problems: &mut Problems<'_>,
) -> Option<String> {
    let mut changed = false;
    let replaced = variable_pattern().replace_all(text, |captures: &Captures<'_>| {
        let (kind, name) = (&captures[1], &captures[2]);
        match values.lookup(kind, name, pass) {
            Lookup::Found(value) => {
                changed = true;
                value
            }
            Lookup::Deferred => captures[0].to_string(),
            Lookup::Missing(code) => {
                let message = match code {
                    MessageCode::MissingLocalization => format!(
                        "Localization variable '{}' is used but no localization for culture '{}' was provided.",
                        name,
                        values.culture.unwrap_or("neutral")
                    ),
                    _ => format!("The variable '!({}.{})' is not defined.", kind, name),
                };
                problems.error(WixError::with_location(code, message, location.clone()));
                captures[0].to_string()
            }
        }
    });
    changed.then(|| replaced.into_owned())
}

/// Checks that every `[#FileId]` in a formatted column names a File row.
pub(crate) fn validate_file_references(output: &Output, problems: &mut Problems<'_>) {
    let files = output.rows("File").map(|row| row.primary_key()).collect::<Vec<_>>();
    let mut checked = 0usize;
    for table in output.tables.values() {
        let formatted = table
            .definition()
            .columns
            .iter()
            .enumerate()
            .filter(|(_, column)| column.category == ColumnCategory::Formatted)
            .map(|(index, _)| index)
            .collect::<Vec<_>>();
        for row in &table.rows {
            for index in &formatted {
                let Some(text) = row.get_string(*index) else { continue };
                for captures in file_reference_pattern().captures_iter(text) {
                    checked += 1;
                    let id = &captures[1];
                    if !files.iter().any(|file| file == id) {
                        problems.error(WixError::with_location(
                            MessageCode::UnresolvedFileReference,
                            format!("The file reference '[#{}]' in table '{}' does not name a file.", id, table.name()),
                            row.source_line.clone(),
                        ));
                    }
                }
            }
        }
    }
    debug!("checked {} file reference(s)", checked);
}
