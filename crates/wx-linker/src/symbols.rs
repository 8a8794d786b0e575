use std::collections::{BTreeMap, BTreeSet};

use log::trace;
use wx_core::{AccessModifier, MessageCode, Row, Section, WixError};

use crate::diagnostics::Diagnostics;

/// A row's position in the link pool.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct RowRef {
    pub section: usize,
    pub table: String,
    pub row: usize,
}

impl RowRef {
    pub fn get<'s>(&self, sections: &'s [Section]) -> &'s Row {
        &sections[self.section].tables[&self.table].rows[self.row]
    }

    fn get_mut<'s>(&self, sections: &'s mut [Section]) -> &'s mut Row {
        sections[self.section]
            .tables
            .get_mut(&self.table)
            .map(|table| &mut table.rows[self.row])
            .unwrap_or_else(|| unreachable!("row references always point into the pool"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Resolution {
    Private(RowRef),
    Global(RowRef),
    Ambiguous { private: RowRef, global: RowRef },
    Unresolved,
}

/// Whether a row declared in `declaring` with `access` can satisfy a
/// reference made from `referencing`.
pub fn is_accessible(access: AccessModifier, declaring: &Section, referencing: &Section) -> bool {
    let same = |left: &Option<String>, right: &Option<String>| left.is_some() && left == right;
    let same_intermediate = same(&declaring.intermediate_id, &referencing.intermediate_id);
    let same_library = same(&declaring.library_id, &referencing.library_id);
    match access {
        AccessModifier::Private => {
            declaring.id == referencing.id && same_intermediate && declaring.library_id == referencing.library_id
        }
        AccessModifier::Internal => same_intermediate,
        AccessModifier::Protected => same_intermediate || same_library,
        AccessModifier::Public => true,
    }
}

/// Rows of symbol tables indexed by `Table:key`.
#[derive(Debug, Default)]
pub(crate) struct SymbolTable {
    /// Non-private candidates, sorted by `(section id, row index)`. The first
    /// linked one survives duplicate collapse.
    global: BTreeMap<String, Vec<RowRef>>,
    private: Vec<BTreeMap<String, RowRef>>,
}

impl SymbolTable {
    pub fn build(sections: &[Section]) -> Self {
        let mut symbols = SymbolTable {
            global: BTreeMap::new(),
            private: vec![BTreeMap::new(); sections.len()],
        };
        for (section_index, section) in sections.iter().enumerate() {
            for (name, table) in &section.tables {
                if !table.definition().symbol {
                    continue;
                }
                for (row_index, row) in table.rows.iter().enumerate() {
                    let reference = RowRef {
                        section: section_index,
                        table: name.clone(),
                        row: row_index,
                    };
                    let key = row.symbol_name();
                    if row.access == AccessModifier::Private {
                        symbols.private[section_index].entry(key).or_insert(reference);
                    } else {
                        symbols.global.entry(key).or_default().push(reference);
                    }
                }
            }
        }
        for candidates in symbols.global.values_mut() {
            candidates.sort_by(|left, right| {
                (&sections[left.section].id, left.section, left.row)
                    .cmp(&(&sections[right.section].id, right.section, right.row))
            });
        }
        symbols
    }

    /// Checks every symbol with a declaration in a `kept` section. Identical
    /// duplicates in kept sections are marked redundant behind the first kept
    /// candidate; any differing candidate is a conflict. Symbols declared only
    /// in pruned sections are ignored.
    pub fn collapse_duplicates(
        &self,
        sections: &mut [Section],
        kept: &BTreeSet<usize>,
        pedantic: bool,
        diagnostics: &mut Diagnostics<'_>,
    ) {
        for (key, candidates) in &self.global {
            let Some(survivor) = candidates.iter().find(|candidate| kept.contains(&candidate.section)) else {
                continue;
            };
            for other in candidates.iter().filter(|candidate| *candidate != survivor) {
                let (identical, synthesized, location, first) = {
                    let linked = survivor.get(sections);
                    let duplicate = other.get(sections);
                    (
                        linked.is_identical(duplicate),
                        linked.synthesized && duplicate.synthesized,
                        duplicate.source_line.clone(),
                        linked.source_line.clone(),
                    )
                };
                if identical {
                    if kept.contains(&other.section) {
                        trace!("collapsing identical duplicate {}", key);
                        other.get_mut(sections).redundant = true;
                    }
                    if pedantic && !synthesized {
                        diagnostics.warning(
                            MessageCode::IdenticalDuplicateSymbol,
                            format!(
                                "Symbol '{}' is declared more than once with identical values (first at {}).",
                                key, first
                            ),
                            location,
                        );
                    }
                } else {
                    diagnostics.error(WixError::with_location(
                        MessageCode::DuplicateSymbol,
                        format!("Duplicate symbol '{}' found (first declared at {}).", key, first),
                        location,
                    ));
                }
            }
        }
    }

    pub fn resolve(&self, sections: &[Section], from: usize, key: &str) -> Resolution {
        let private = self.private[from].get(key).cloned();
        let global = self.global.get(key).and_then(|candidates| {
            candidates
                .iter()
                .find(|candidate| {
                    let row = candidate.get(sections);
                    is_accessible(row.access, &sections[candidate.section], &sections[from])
                })
                .cloned()
        });

        match (private, global) {
            (Some(private), Some(global)) if !private.get(sections).is_identical(global.get(sections)) => {
                Resolution::Ambiguous { private, global }
            }
            (Some(private), _) => Resolution::Private(private),
            (None, Some(global)) => Resolution::Global(global),
            (None, None) => Resolution::Unresolved,
        }
    }
}

#[cfg(test)]
mod symbols_tests {
    use super::*;
    use proptest::prelude::*;
    use wx_core::{SectionType, SourceLineNumber};

    fn section(id: &str, intermediate: Option<&str>, library: Option<&str>) -> Section {
        let mut section = Section::new(id, SectionType::Fragment, SourceLineNumber::synthetic());
        section.intermediate_id = intermediate.map(str::to_string);
        section.library_id = library.map(str::to_string);
        section
    }

    #[test]
    fn access_scopes_follow_their_breadth() {
        let home = section("A", Some("a.wxs"), Some("lib"));
        let sibling = section("B", Some("a.wxs"), None);
        let library_peer = section("C", Some("c.wxs"), Some("lib"));
        let stranger = section("D", Some("d.wxs"), None);

        assert!(is_accessible(AccessModifier::Private, &home, &home));
        assert!(!is_accessible(AccessModifier::Private, &home, &sibling));
        assert!(is_accessible(AccessModifier::Internal, &home, &sibling));
        assert!(!is_accessible(AccessModifier::Internal, &home, &library_peer));
        assert!(is_accessible(AccessModifier::Protected, &home, &library_peer));
        assert!(!is_accessible(AccessModifier::Protected, &home, &stranger));
        assert!(is_accessible(AccessModifier::Public, &home, &stranger));
    }

    fn arb_section() -> impl Strategy<Value = Section> {
        (
            prop::sample::select(vec!["A", "B"]),
            prop::option::of(prop::sample::select(vec!["a.wxs", "b.wxs"])),
            prop::option::of(prop::sample::select(vec!["lib1", "lib2"])),
        )
            .prop_map(|(id, intermediate, library)| section(id, intermediate, library))
    }

    fn property_row(value: &str) -> wx_core::Row {
        let definition = wx_core::TableDefinitions::builtin().require("Property").expect("Property");
        let mut row = wx_core::Row::new(definition, SourceLineNumber::synthetic());
        row.set_string(0, "Shared").expect("key");
        row.set_string(1, value).expect("value");
        row
    }

    fn redundant_flags(sections: &[Section]) -> Vec<bool> {
        sections.iter().flat_map(|section| section.rows().map(|row| row.redundant)).collect()
    }

    fn sections_with(values: &[&str]) -> Vec<Section> {
        values
            .iter()
            .enumerate()
            .map(|(index, value)| {
                let mut section = section(&format!("S{index}"), Some("a.wxs"), None);
                section.add_row(property_row(value));
                section
            })
            .collect()
    }

    #[test]
    fn conflicts_between_pruned_sections_are_ignored() {
        let messaging = wx_core::Messaging::default();
        let mut sections = sections_with(&["1", "2"]);
        let symbols = SymbolTable::build(&sections);

        let mut pruned = Diagnostics::new(&messaging);
        symbols.collapse_duplicates(&mut sections, &BTreeSet::new(), false, &mut pruned);
        assert!(!pruned.has_errors());

        let mut linked = Diagnostics::new(&messaging);
        symbols.collapse_duplicates(&mut sections, &BTreeSet::from([1]), false, &mut linked);
        assert!(linked.has_errors());
    }

    #[test]
    fn only_linked_duplicates_are_marked_redundant() {
        let messaging = wx_core::Messaging::default();
        let mut sections = sections_with(&["1", "1", "1"]);
        let symbols = SymbolTable::build(&sections);

        let mut diagnostics = Diagnostics::new(&messaging);
        symbols.collapse_duplicates(&mut sections, &BTreeSet::from([1, 2]), false, &mut diagnostics);
        assert!(!diagnostics.has_errors());
        assert_eq!(redundant_flags(&sections), vec![false, false, true]);
    }

    #[test]
    fn resolution_never_picks_an_invisible_candidate() {
        let mut other = section("A1", Some("other.wxs"), None);
        let mut row = property_row("1");
        row.access = AccessModifier::Internal;
        other.add_row(row.clone());
        let mut mine = section("B2", Some("mine.wxs"), None);
        mine.add_row(row);
        let referencing = section("Entry", Some("mine.wxs"), None);
        let sections = vec![other, mine, referencing];
        let symbols = SymbolTable::build(&sections);

        match symbols.resolve(&sections, 2, "Property:Shared") {
            Resolution::Global(target) => assert_eq!(target.section, 1),
            other => panic!("expected the visible candidate, got {other:?}"),
        }
    }

    proptest! {
        #[test]
        fn collapse_is_idempotent(values in prop::collection::vec(prop::sample::select(vec!["1", "2"]), 1..5)) {
            let mut sections = values
                .iter()
                .enumerate()
                .map(|(index, value)| {
                    let mut section = section(&format!("S{index}"), Some("a.wxs"), None);
                    section.add_row(property_row(value));
                    section
                })
                .collect::<Vec<_>>();
            let messaging = wx_core::Messaging::default();
            let symbols = SymbolTable::build(&sections);
            let kept = (0..sections.len()).collect::<BTreeSet<_>>();

            let mut first = Diagnostics::new(&messaging);
            symbols.collapse_duplicates(&mut sections, &kept, false, &mut first);
            let after_first = redundant_flags(&sections);
            let mut second = Diagnostics::new(&messaging);
            symbols.collapse_duplicates(&mut sections, &kept, false, &mut second);

            prop_assert_eq!(redundant_flags(&sections), after_first.clone());
            let identical = values.iter().all(|value| *value == values[0]);
            prop_assert_eq!(first.has_errors(), !identical);
            if identical {
                prop_assert_eq!(after_first.iter().filter(|flag| **flag).count(), values.len() - 1);
            }
        }

        #[test]
        fn widening_access_never_hides_a_symbol(
            declaring in arb_section(),
            referencing in arb_section(),
            narrow in 0usize..4,
            wide in 0usize..4,
        ) {
            let (narrow, wide) = (narrow.min(wide), narrow.max(wide));
            let narrow = AccessModifier::ALL[narrow];
            let wide = AccessModifier::ALL[wide];
            if is_accessible(narrow, &declaring, &referencing) {
                prop_assert!(is_accessible(wide, &declaring, &referencing));
            }
        }
    }
}
