use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::codes::MessageCode;
use crate::definitions::{ColumnType, TableDefinition};
use crate::error::WixError;
use crate::identifier::{AccessModifier, Identifier};
use crate::source::SourceLineNumber;

/// A typed cell. The variant always follows the column type, so two rows of
/// the same table compare field by field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum FieldValue {
    #[default]
    Null,
    String(String),
    Number(i32),
    Localized(String),
    /// Path to external data (file source, binary stream).
    Object(String),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(value) | FieldValue::Localized(value) | FieldValue::Object(value) => {
                Some(value)
            }
            FieldValue::Null | FieldValue::Number(_) => None,
        }
    }

    pub fn as_number(&self) -> Option<i32> {
        match self {
            FieldValue::Number(value) => Some(*value),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => Ok(()),
            FieldValue::Number(value) => write!(f, "{}", value),
            FieldValue::String(value) | FieldValue::Localized(value) | FieldValue::Object(value) => {
                f.write_str(value)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Field {
    pub value: FieldValue,
    /// Set by the differ on fields that changed in a `Modify` row.
    pub modified: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RowOperation {
    #[default]
    None,
    Add,
    Delete,
    Modify,
}

impl RowOperation {
    pub fn keyword(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Add => "add",
            Self::Delete => "delete",
            Self::Modify => "modify",
        }
    }

    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "none" => Some(Self::None),
            "add" => Some(Self::Add),
            "delete" => Some(Self::Delete),
            "modify" => Some(Self::Modify),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    definition: Arc<TableDefinition>,
    fields: Vec<Field>,
    pub source_line: SourceLineNumber,
    pub access: AccessModifier,
    pub redundant: bool,
    pub synthesized: bool,
    pub operation: RowOperation,
}

impl Row {
    pub fn new(definition: Arc<TableDefinition>, source_line: SourceLineNumber) -> Self {
        let fields = vec![Field::default(); definition.columns.len()];
        Self {
            definition,
            fields,
            source_line,
            access: AccessModifier::Public,
            redundant: false,
            synthesized: false,
            operation: RowOperation::None,
        }
    }

    /// Creates a row whose first column holds `identifier.id`.
    pub fn with_identifier(
        definition: Arc<TableDefinition>,
        source_line: SourceLineNumber,
        identifier: &Identifier,
    ) -> Result<Self, WixError> {
        let mut row = Self::new(definition, source_line);
        row.access = identifier.access;
        row.set_string(0, &identifier.id)?;
        Ok(row)
    }

    pub fn definition(&self) -> &Arc<TableDefinition> {
        &self.definition
    }

    pub fn table_name(&self) -> &str {
        &self.definition.name
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, index: usize) -> Option<&Field> {
        self.fields.get(index)
    }

    pub fn value(&self, index: usize) -> &FieldValue {
        static NULL: FieldValue = FieldValue::Null;
        self.fields
            .get(index)
            .map(|field| &field.value)
            .unwrap_or(&NULL)
    }

    pub fn get_string(&self, index: usize) -> Option<&str> {
        self.value(index).as_str()
    }

    pub fn get_number(&self, index: usize) -> Option<i32> {
        self.value(index).as_number()
    }

    pub fn set_string(&mut self, index: usize, value: &str) -> Result<(), WixError> {
        if value.is_empty() {
            return self.set_null(index);
        }
        let column_type = self.column_type(index)?;
        let value = match column_type {
            ColumnType::String => FieldValue::String(value.to_string()),
            ColumnType::Localized => FieldValue::Localized(value.to_string()),
            ColumnType::Object => FieldValue::Object(value.to_string()),
            ColumnType::Number => return Err(self.mismatch(index, "a string")),
        };
        self.fields[index].value = value;
        Ok(())
    }

    pub fn set_number(&mut self, index: usize, value: i32) -> Result<(), WixError> {
        match self.column_type(index)? {
            ColumnType::Number => {
                self.fields[index].value = FieldValue::Number(value);
                Ok(())
            }
            _ => Err(self.mismatch(index, "a number")),
        }
    }

    pub fn set_object(&mut self, index: usize, path: &str) -> Result<(), WixError> {
        match self.column_type(index)? {
            ColumnType::Object => self.set_string(index, path),
            _ => Err(self.mismatch(index, "an object")),
        }
    }

    pub fn set_null(&mut self, index: usize) -> Result<(), WixError> {
        self.column_type(index)?;
        self.fields[index].value = FieldValue::Null;
        Ok(())
    }

    /// Sets a field from its textual form, parsing numbers for number columns.
    pub fn set_text(&mut self, index: usize, text: &str) -> Result<(), WixError> {
        match self.column_type(index)? {
            ColumnType::Number if text.is_empty() => self.set_null(index),
            ColumnType::Number => {
                let number = text.trim().parse::<i32>().map_err(|_| {
                    WixError::with_location(
                        MessageCode::FieldTypeMismatch,
                        format!(
                            "Column '{}.{}' expects a number but got '{}'.",
                            self.definition.name, self.definition.columns[index].name, text
                        ),
                        self.source_line.clone(),
                    )
                })?;
                self.set_number(index, number)
            }
            _ => self.set_string(index, text),
        }
    }

    pub fn mark_modified(&mut self, index: usize, modified: bool) {
        if let Some(field) = self.fields.get_mut(index) {
            field.modified = modified;
        }
    }

    /// Key columns joined with `/`.
    pub fn primary_key(&self) -> String {
        self.definition
            .primary_key_columns()
            .map(|index| self.value(index).to_string())
            .collect::<Vec<_>>()
            .join("/")
    }

    /// `Table:key`, the linker's symbol name for this row.
    pub fn symbol_name(&self) -> String {
        format!("{}:{}", self.definition.name, self.primary_key())
    }

    /// Same table and same field values. Provenance and flags are ignored.
    pub fn is_identical(&self, other: &Row) -> bool {
        self.definition.name == other.definition.name
            && self.fields.len() == other.fields.len()
            && self
                .fields
                .iter()
                .zip(&other.fields)
                .all(|(left, right)| left.value == right.value)
    }

    fn column_type(&self, index: usize) -> Result<ColumnType, WixError> {
        self.definition
            .columns
            .get(index)
            .map(|column| column.column_type)
            .ok_or_else(|| {
                WixError::with_location(
                    MessageCode::FieldCountMismatch,
                    format!(
                        "Table '{}' has {} columns; index {} is out of range.",
                        self.definition.name,
                        self.definition.columns.len(),
                        index
                    ),
                    self.source_line.clone(),
                )
            })
    }

    fn mismatch(&self, index: usize, actual: &str) -> WixError {
        let column = &self.definition.columns[index];
        WixError::with_location(
            MessageCode::FieldTypeMismatch,
            format!(
                "Column '{}.{}' is {:?} and cannot hold {}.",
                self.definition.name, column.name, column.column_type, actual
            ),
            self.source_line.clone(),
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    definition: Arc<TableDefinition>,
    pub rows: Vec<Row>,
}

impl Table {
    pub fn new(definition: Arc<TableDefinition>) -> Self {
        Self {
            definition,
            rows: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &Arc<TableDefinition> {
        &self.definition
    }

    pub fn create_row(&mut self, source_line: SourceLineNumber) -> &mut Row {
        self.rows
            .push(Row::new(Arc::clone(&self.definition), source_line));
        let last = self.rows.len() - 1;
        &mut self.rows[last]
    }

    pub fn push(&mut self, row: Row) -> Result<(), WixError> {
        if row.table_name() != self.definition.name {
            return Err(WixError::unexpected(format!(
                "Row of table '{}' added to table '{}'.",
                row.table_name(),
                self.definition.name
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn find(&self, primary_key: &str) -> Option<&Row> {
        self.rows.iter().find(|row| row.primary_key() == primary_key)
    }

    pub fn find_mut(&mut self, primary_key: &str) -> Option<&mut Row> {
        self.rows
            .iter_mut()
            .find(|row| row.primary_key() == primary_key)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SectionType {
    Fragment,
    Product,
    Module,
    PatchCreation,
    Transform,
}

impl SectionType {
    pub fn keyword(self) -> &'static str {
        match self {
            Self::Fragment => "fragment",
            Self::Product => "product",
            Self::Module => "module",
            Self::PatchCreation => "patchCreation",
            Self::Transform => "transform",
        }
    }

    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "fragment" => Some(Self::Fragment),
            "product" => Some(Self::Product),
            "module" => Some(Self::Module),
            "patchCreation" => Some(Self::PatchCreation),
            "transform" => Some(Self::Transform),
            _ => None,
        }
    }

    /// Whether a section of this type can start a link.
    pub fn is_entry(self) -> bool {
        matches!(self, Self::Product | Self::Module | Self::PatchCreation)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimpleReference {
    pub table_name: String,
    /// Key columns joined with `/`.
    pub primary_keys: String,
    pub source_line: SourceLineNumber,
}

impl SimpleReference {
    pub fn symbol_name(&self) -> String {
        format!("{}:{}", self.table_name, self.primary_keys)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ComplexReferenceParentType {
    Feature,
    ComponentGroup,
    Module,
    Product,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ComplexReferenceChildType {
    Component,
    ComponentGroup,
    Feature,
}

macro_rules! keyword_enum {
    ($ty:ident { $($variant:ident => $keyword:literal),+ $(,)? }) => {
        impl $ty {
            pub fn keyword(self) -> &'static str {
                match self {
                    $(Self::$variant => $keyword,)+
                }
            }

            pub fn from_keyword(keyword: &str) -> Option<Self> {
                match keyword {
                    $($keyword => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

keyword_enum!(ComplexReferenceParentType {
    Feature => "feature",
    ComponentGroup => "componentGroup",
    Module => "module",
    Product => "product",
});

keyword_enum!(ComplexReferenceChildType {
    Component => "component",
    ComponentGroup => "componentGroup",
    Feature => "feature",
});

/// Group membership: feature contains component, group contains group, ...
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComplexReference {
    pub parent_type: ComplexReferenceParentType,
    pub parent_id: String,
    pub child_type: ComplexReferenceChildType,
    pub child_id: String,
    /// The child's primary parent (e.g. the feature a component is authored
    /// under, as opposed to a `ComponentRef` elsewhere).
    pub primary: bool,
    pub source_line: SourceLineNumber,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub id: String,
    pub section_type: SectionType,
    pub codepage: i32,
    pub intermediate_id: Option<String>,
    pub library_id: Option<String>,
    pub tables: BTreeMap<String, Table>,
    pub references: Vec<SimpleReference>,
    pub complex_references: Vec<ComplexReference>,
    pub source_line: SourceLineNumber,
}

impl Section {
    pub fn new(id: impl Into<String>, section_type: SectionType, source_line: SourceLineNumber) -> Self {
        Self {
            id: id.into(),
            section_type,
            codepage: 0,
            intermediate_id: None,
            library_id: None,
            tables: BTreeMap::new(),
            references: Vec::new(),
            complex_references: Vec::new(),
            source_line,
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

    pub fn add_row(&mut self, row: Row) -> &mut Row {
        let table = self.ensure_table(&Arc::clone(row.definition()));
        table.rows.push(row);
        let last = table.rows.len() - 1;
        &mut table.rows[last]
    }

    pub fn add_reference(
        &mut self,
        table_name: impl Into<String>,
        primary_keys: impl Into<String>,
        source_line: SourceLineNumber,
    ) {
        self.references.push(SimpleReference {
            table_name: table_name.into(),
            primary_keys: primary_keys.into(),
            source_line,
        });
    }

    pub fn rows(&self) -> impl Iterator<Item = &Row> {
        self.tables.values().flat_map(|table| table.rows.iter())
    }
}

#[cfg(test)]
mod data_tests {
    use super::*;
    use crate::definitions::TableDefinitions;

    fn property_row(id: &str, value: &str) -> Row {
        let definition = TableDefinitions::builtin()
            .require("Property")
            .expect("Property table");
        let mut row = Row::with_identifier(
            definition,
            SourceLineNumber::at("a.wxs", 1),
            &Identifier::public(id),
        )
        .expect("row");
        row.set_string(1, value).expect("value");
        row
    }

    #[test]
    fn setters_follow_column_types() {
        let definition = TableDefinitions::builtin().require("File").expect("File");
        let mut row = Row::new(definition, SourceLineNumber::synthetic());
        row.set_string(crate::columns::file::FILE, "f1").expect("string");
        row.set_number(crate::columns::file::FILE_SIZE, 42).expect("number");
        row.set_string(crate::columns::file::FILE_NAME, "a.txt").expect("localized");

        assert_eq!(row.value(0), &FieldValue::String("f1".to_string()));
        assert_eq!(row.get_number(3), Some(42));
        assert_eq!(row.value(2), &FieldValue::Localized("a.txt".to_string()));

        let error = row
            .set_string(crate::columns::file::FILE_SIZE, "big")
            .expect_err("number column");
        assert_eq!(error.code, MessageCode::FieldTypeMismatch);
        let error = row.set_number(99, 1).expect_err("out of range");
        assert_eq!(error.code, MessageCode::FieldCountMismatch);
    }

    #[test]
    fn empty_string_is_null() {
        let row = property_row("P", "");
        assert!(row.value(1).is_null());
    }

    #[test]
    fn set_text_parses_numbers() {
        let definition = TableDefinitions::builtin().require("Media").expect("Media");
        let mut row = Row::new(definition, SourceLineNumber::synthetic());
        row.set_text(0, "3").expect("disk id");
        assert_eq!(row.get_number(0), Some(3));
        let error = row.set_text(0, "x").expect_err("not a number");
        assert_eq!(error.code, MessageCode::FieldTypeMismatch);
    }

    #[test]
    fn primary_key_joins_key_columns() {
        let definition = TableDefinitions::builtin()
            .require("FeatureComponents")
            .expect("FeatureComponents");
        let mut row = Row::new(definition, SourceLineNumber::synthetic());
        row.set_string(0, "Main").expect("feature");
        row.set_string(1, "C1").expect("component");
        assert_eq!(row.primary_key(), "Main/C1");
        assert_eq!(row.symbol_name(), "FeatureComponents:Main/C1");
    }

    #[test]
    fn identical_ignores_provenance_and_access() {
        let left = property_row("P", "1");
        let mut right = property_row("P", "1");
        right.source_line = SourceLineNumber::at("b.wxs", 9);
        right.access = AccessModifier::Private;
        assert!(left.is_identical(&right));
        assert!(!left.is_identical(&property_row("P", "2")));
    }

    #[test]
    fn section_groups_rows_by_table() {
        let mut section = Section::new("s1", SectionType::Fragment, SourceLineNumber::synthetic());
        section.add_row(property_row("A", "1"));
        section.add_row(property_row("B", "2"));
        section.add_reference("Directory", "TARGETDIR", SourceLineNumber::synthetic());
        assert_eq!(section.table("Property").map(Table::len), Some(2));
        assert_eq!(section.rows().count(), 2);
        assert_eq!(section.references[0].symbol_name(), "Directory:TARGETDIR");
    }
}
