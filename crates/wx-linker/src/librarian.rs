use std::collections::BTreeMap;

use log::info;
use wx_core::{Intermediate, Library, Localization, MessageCode, Messaging, SourceLineNumber, WixError};

use crate::diagnostics::{Diagnostics, LinkError};

/// Combines intermediates into a library. References are left unresolved.
pub fn create_library(
    id: &str,
    intermediates: &[Intermediate],
    localizations: &[Localization],
    messaging: &Messaging,
) -> Result<Library, LinkError> {
    let mut diagnostics = Diagnostics::new(messaging);
    let mut library = Library {
        id: id.to_string(),
        sections: Vec::new(),
        localizations: Vec::new(),
    };

    let mut seen = BTreeMap::<String, SourceLineNumber>::new();
    for intermediate in intermediates {
        for section in &intermediate.sections {
            if let Some(first) = seen.get(&section.id) {
                diagnostics.error(WixError::with_location(
                    MessageCode::DuplicateSection,
                    format!(
                        "Section '{}' is defined more than once in library '{}' (first at {}).",
                        section.id, id, first
                    ),
                    section.source_line.clone(),
                ));
                continue;
            }
            seen.insert(section.id.clone(), section.source_line.clone());
            let mut section = section.clone();
            section.library_id = Some(id.to_string());
            library.sections.push(section);
        }
    }

    merge_localizations(&mut library.localizations, localizations, &mut diagnostics);

    info!(
        "library {} holds {} section(s) and {} localization(s)",
        id,
        library.sections.len(),
        library.localizations.len()
    );
    diagnostics.finish(library)
}

/// Folds `incoming` into `target`, one entry per culture.
pub(crate) fn merge_localizations(
    target: &mut Vec<Localization>,
    incoming: &[Localization],
    diagnostics: &mut Diagnostics<'_>,
) {
    for localization in incoming {
        let Some(existing) = target
            .iter_mut()
            .find(|existing| existing.culture == localization.culture)
        else {
            target.push(localization.clone());
            continue;
        };
        for collision in existing.merge(localization) {
            let location = localization
                .strings
                .get(&collision)
                .map(|string| string.source_line.clone())
                .unwrap_or_else(SourceLineNumber::synthetic);
            diagnostics.error(WixError::with_location(
                MessageCode::DuplicateLocalizationString,
                format!(
                    "Localization string '{}' for culture '{}' is defined more than once.",
                    collision, localization.culture
                ),
                location,
            ));
        }
    }
}

#[cfg(test)]
mod librarian_tests {
    use super::*;
    use wx_core::{LocalizedString, Section, SectionType};

    fn intermediate(id: &str, sections: &[&str]) -> Intermediate {
        let mut intermediate = Intermediate::new(id);
        for section in sections {
            intermediate.add_section(Section::new(
                *section,
                SectionType::Fragment,
                SourceLineNumber::at(id, 1),
            ));
        }
        intermediate
    }

    fn localization(culture: &str, entries: &[(&str, &str)]) -> Localization {
        let mut localization = Localization::new(culture);
        for (id, value) in entries {
            localization.strings.insert(
                (*id).to_string(),
                LocalizedString {
                    id: (*id).to_string(),
                    value: (*value).to_string(),
                    overridable: false,
                    source_line: SourceLineNumber::at("strings.wxl", 1),
                },
            );
        }
        localization
    }

    #[test]
    fn library_stamps_sections_and_merges_cultures() {
        let messaging = Messaging::default();
        let library = create_library(
            "common",
            &[intermediate("a.wxs", &["A"]), intermediate("b.wxs", &["B"])],
            &[
                localization("en-us", &[("Title", "Hello")]),
                localization("en-us", &[("Prompt", "Insert")]),
                localization("de-de", &[("Title", "Hallo")]),
            ],
            &messaging,
        )
        .expect("library");
        assert_eq!(library.sections.len(), 2);
        assert!(library
            .sections
            .iter()
            .all(|section| section.library_id.as_deref() == Some("common")));
        assert_eq!(library.sections[1].intermediate_id.as_deref(), Some("b.wxs"));
        assert_eq!(library.localizations.len(), 2);
        assert_eq!(library.localizations[0].get("Prompt"), Some("Insert"));
    }

    #[test]
    fn duplicate_sections_are_rejected() {
        let messaging = Messaging::default();
        let error = create_library(
            "common",
            &[intermediate("a.wxs", &["Same"]), intermediate("b.wxs", &["Same"])],
            &[],
            &messaging,
        )
        .expect_err("duplicate");
        assert!(error.has_code(MessageCode::DuplicateSection));
        assert!(messaging.has_code(MessageCode::DuplicateSection));
    }

    #[test]
    fn conflicting_strings_are_rejected() {
        let messaging = Messaging::default();
        let error = create_library(
            "common",
            &[],
            &[
                localization("en-us", &[("Title", "Hello")]),
                localization("en-us", &[("Title", "Howdy")]),
            ],
            &messaging,
        )
        .expect_err("conflict");
        assert!(error.has_code(MessageCode::DuplicateLocalizationString));
    }
}
