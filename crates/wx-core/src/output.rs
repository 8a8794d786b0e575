use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::data::{Row, Section, SectionType, Table};
use crate::definitions::TableDefinition;
use crate::source::SourceLineNumber;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OutputType {
    Product,
    Module,
    Patch,
    Transform,
    PatchCreation,
}

impl OutputType {
    pub fn keyword(self) -> &'static str {
        match self {
            Self::Product => "product",
            Self::Module => "module",
            Self::Patch => "patch",
            Self::Transform => "transform",
            Self::PatchCreation => "patchCreation",
        }
    }

    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "product" => Some(Self::Product),
            "module" => Some(Self::Module),
            "patch" => Some(Self::Patch),
            "transform" => Some(Self::Transform),
            "patchCreation" => Some(Self::PatchCreation),
            _ => None,
        }
    }

    /// The entry section type that produces this output.
    pub fn entry_section_type(self) -> Option<SectionType> {
        match self {
            Self::Product => Some(SectionType::Product),
            Self::Module => Some(SectionType::Module),
            Self::PatchCreation => Some(SectionType::PatchCreation),
            Self::Patch | Self::Transform => None,
        }
    }

    pub fn from_section_type(section_type: SectionType) -> Option<Self> {
        match section_type {
            SectionType::Product => Some(Self::Product),
            SectionType::Module => Some(Self::Module),
            SectionType::PatchCreation => Some(Self::PatchCreation),
            SectionType::Transform => Some(Self::Transform),
            SectionType::Fragment => None,
        }
    }

    /// Default package file extension.
    pub fn package_extension(self) -> &'static str {
        match self {
            Self::Product => "msi",
            Self::Module => "msm",
            Self::Patch => "msp",
            Self::Transform => "mst",
            Self::PatchCreation => "pcp",
        }
    }
}

/// A named nested output, e.g. an embedded transform.
#[derive(Debug, Clone, PartialEq)]
pub struct SubStorage {
    pub name: String,
    pub data: Output,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Output {
    pub output_type: OutputType,
    pub codepage: i32,
    pub entry_section_id: Option<String>,
    pub section_ids: BTreeSet<String>,
    pub tables: BTreeMap<String, Table>,
    pub sub_storages: Vec<SubStorage>,
    pub localizations: Vec<Localization>,
}

impl Output {
    pub fn new(output_type: OutputType) -> Self {
        Self {
            output_type,
            codepage: 0,
            entry_section_id: None,
            section_ids: BTreeSet::new(),
            tables: BTreeMap::new(),
            sub_storages: Vec::new(),
            localizations: Vec::new(),
        }
    }

    pub fn ensure_table(&mut self, definition: &Arc<TableDefinition>) -> &mut Table {
        self.tables
            .entry(definition.name.clone())
            .or_insert_with(|| Table::new(Arc::clone(definition)))
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    pub fn table_mut(&mut self, name: &str) -> Option<&mut Table> {
        self.tables.get_mut(name)
    }

    pub fn rows(&self, table: &str) -> impl Iterator<Item = &Row> {
        self.tables
            .get(table)
            .into_iter()
            .flat_map(|table| table.rows.iter())
    }

    /// Value of a `Property` row, if present.
    pub fn property(&self, name: &str) -> Option<&str> {
        self.table("Property")?
            .find(name)
            .and_then(|row| row.get_string(crate::columns::property::VALUE))
    }
}

/// Sections compiled from one source document.
#[derive(Debug, Clone, PartialEq)]
pub struct Intermediate {
    pub id: String,
    pub sections: Vec<Section>,
}

impl Intermediate {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            sections: Vec::new(),
        }
    }

    /// Adds a section and stamps it with this intermediate's id.
    pub fn add_section(&mut self, mut section: Section) {
        section.intermediate_id = Some(self.id.clone());
        self.sections.push(section);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Library {
    pub id: String,
    pub sections: Vec<Section>,
    pub localizations: Vec<Localization>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalizedString {
    pub id: String,
    pub value: String,
    pub overridable: bool,
    pub source_line: SourceLineNumber,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Localization {
    pub culture: String,
    pub codepage: Option<i32>,
    pub strings: BTreeMap<String, LocalizedString>,
}

impl Localization {
    pub fn new(culture: impl Into<String>) -> Self {
        Self {
            culture: culture.into(),
            codepage: None,
            strings: BTreeMap::new(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&str> {
        self.strings.get(id).map(|string| string.value.as_str())
    }

    /// Merges `other` into this localization. Existing non-overridable
    /// strings win; returns ids that collided with a non-overridable string.
    pub fn merge(&mut self, other: &Localization) -> Vec<String> {
        let mut collisions = Vec::new();
        for (id, string) in &other.strings {
            match self.strings.get(id) {
                Some(existing) if !existing.overridable => {
                    if existing.value != string.value {
                        collisions.push(id.clone());
                    }
                }
                _ => {
                    self.strings.insert(id.clone(), string.clone());
                }
            }
        }
        if self.codepage.is_none() {
            self.codepage = other.codepage;
        }
        collisions
    }
}

#[cfg(test)]
mod output_tests {
    use super::*;

    fn string(id: &str, value: &str, overridable: bool) -> LocalizedString {
        LocalizedString {
            id: id.to_string(),
            value: value.to_string(),
            overridable,
            source_line: SourceLineNumber::synthetic(),
        }
    }

    #[test]
    fn localization_merge_keeps_fixed_strings() {
        let mut base = Localization::new("en-us");
        base.strings.insert("A".into(), string("A", "fixed", false));
        base.strings.insert("B".into(), string("B", "soft", true));

        let mut other = Localization::new("en-us");
        other.codepage = Some(1252);
        other.strings.insert("A".into(), string("A", "other", false));
        other.strings.insert("B".into(), string("B", "replaced", false));

        let collisions = base.merge(&other);
        assert_eq!(collisions, vec!["A".to_string()]);
        assert_eq!(base.get("A"), Some("fixed"));
        assert_eq!(base.get("B"), Some("replaced"));
        assert_eq!(base.codepage, Some(1252));
    }

    #[test]
    fn output_type_maps_to_entry_sections() {
        assert_eq!(
            OutputType::Product.entry_section_type(),
            Some(SectionType::Product)
        );
        assert_eq!(OutputType::Transform.entry_section_type(), None);
        assert_eq!(OutputType::from_keyword("module"), Some(OutputType::Module));
        assert_eq!(OutputType::Module.package_extension(), "msm");
    }
}
