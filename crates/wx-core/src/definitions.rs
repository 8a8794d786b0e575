//! Table schema as configuration data.
//!
//! The built-in tables ship as `data/tables.xml`; extensions may contribute
//! more definitions in the same format through [`TableDefinitions::load_xml`].

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use roxmltree::{Document, Node};

use crate::codes::MessageCode;
use crate::error::WixError;

const BUILTIN_TABLES: &str = include_str!("../data/tables.xml");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    String,
    Localized,
    Number,
    Object,
}

impl ColumnType {
    fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "string" => Some(Self::String),
            "localized" => Some(Self::Localized),
            "number" => Some(Self::Number),
            "object" => Some(Self::Object),
            _ => None,
        }
    }
}

/// Validation category of a column's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ColumnCategory {
    #[default]
    Text,
    Integer,
    Identifier,
    Formatted,
    Guid,
    Condition,
    Version,
    Filename,
    DefaultDir,
    Cabinet,
    Property,
    Path,
    Binary,
    CustomSource,
}

impl ColumnCategory {
    fn from_keyword(keyword: &str) -> Option<Self> {
        let category = match keyword {
            "text" => Self::Text,
            "integer" => Self::Integer,
            "identifier" => Self::Identifier,
            "formatted" => Self::Formatted,
            "guid" => Self::Guid,
            "condition" => Self::Condition,
            "version" => Self::Version,
            "filename" => Self::Filename,
            "defaultDir" => Self::DefaultDir,
            "cabinet" => Self::Cabinet,
            "property" => Self::Property,
            "path" => Self::Path,
            "binary" => Self::Binary,
            "customSource" => Self::CustomSource,
            _ => return None,
        };
        Some(category)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinition {
    pub name: String,
    pub column_type: ColumnType,
    pub length: usize,
    pub nullable: bool,
    pub primary_key: bool,
    pub key_table: Option<String>,
    /// One-based column of `key_table` this column points at.
    pub key_column: Option<usize>,
    pub category: ColumnCategory,
}

impl ColumnDefinition {
    pub fn localizable(&self) -> bool {
        self.column_type == ColumnType::Localized
    }

    /// Whether `!(...)` bind-time substitution applies to this column.
    pub fn is_formatted(&self) -> bool {
        matches!(
            self.column_type,
            ColumnType::String | ColumnType::Localized | ColumnType::Object
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDefinition {
    pub name: String,
    pub columns: Vec<ColumnDefinition>,
    /// Unreal tables exist only between compile and bind and are never
    /// written to the final package.
    pub unreal: bool,
    /// Rows of symbol tables take part in linker symbol resolution.
    pub symbol: bool,
}

impl TableDefinition {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column.name == name)
    }

    pub fn primary_key_columns(&self) -> impl Iterator<Item = usize> + '_ {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, column)| column.primary_key)
            .map(|(index, _)| index)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableDefinitions {
    tables: BTreeMap<String, Arc<TableDefinition>>,
}

impl TableDefinitions {
    /// The built-in installer tables.
    pub fn builtin() -> &'static TableDefinitions {
        static BUILTIN: OnceLock<TableDefinitions> = OnceLock::new();
        BUILTIN.get_or_init(|| {
            TableDefinitions::load_xml(BUILTIN_TABLES)
                .expect("built-in table definitions must parse")
        })
    }

    pub fn load_xml(text: &str) -> Result<Self, WixError> {
        let document = Document::parse(text)
            .map_err(|error| WixError::new(MessageCode::XmlParseError, error.to_string()))?;
        let root = document.root_element();
        if root.tag_name().name() != "tableDefinitions" {
            return Err(WixError::new(
                MessageCode::MalformedFile,
                format!(
                    "Expected <tableDefinitions> root but found <{}>.",
                    root.tag_name().name()
                ),
            ));
        }

        let mut tables = BTreeMap::new();
        for node in root.children().filter(|node| node.is_element()) {
            let definition = parse_table_definition(node)?;
            if tables.contains_key(&definition.name) {
                return Err(WixError::new(
                    MessageCode::MalformedFile,
                    format!("Table '{}' is defined twice.", definition.name),
                ));
            }
            tables.insert(definition.name.clone(), Arc::new(definition));
        }

        Ok(Self { tables })
    }

    /// Adds extension-contributed tables. Redefining an existing table with
    /// a different shape is rejected.
    pub fn extend(&mut self, other: TableDefinitions) -> Result<(), WixError> {
        for (name, definition) in other.tables {
            match self.tables.get(&name) {
                Some(existing) if existing != &definition => {
                    return Err(WixError::new(
                        MessageCode::MalformedFile,
                        format!("Table '{}' conflicts with an existing definition.", name),
                    ));
                }
                Some(_) => {}
                None => {
                    self.tables.insert(name, definition);
                }
            }
        }
        Ok(())
    }

    pub fn insert(&mut self, definition: TableDefinition) {
        self.tables
            .insert(definition.name.clone(), Arc::new(definition));
    }

    pub fn get(&self, name: &str) -> Option<&Arc<TableDefinition>> {
        self.tables.get(name)
    }

    pub fn require(&self, name: &str) -> Result<Arc<TableDefinition>, WixError> {
        self.tables.get(name).cloned().ok_or_else(|| {
            WixError::new(
                MessageCode::UnknownTable,
                format!("Table '{}' has no definition.", name),
            )
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<TableDefinition>> {
        self.tables.values()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

fn parse_table_definition(node: Node<'_, '_>) -> Result<TableDefinition, WixError> {
    if node.tag_name().name() != "tableDefinition" {
        return Err(malformed(node, "unexpected element"));
    }
    let name = node
        .attribute("name")
        .ok_or_else(|| malformed(node, "missing name"))?
        .to_string();

    let mut columns = Vec::new();
    for child in node.children().filter(|child| child.is_element()) {
        columns.push(parse_column_definition(child, &name)?);
    }
    if columns.is_empty() {
        return Err(malformed(node, "table has no columns"));
    }

    Ok(TableDefinition {
        name,
        columns,
        unreal: yes(node.attribute("unreal")),
        symbol: yes(node.attribute("symbol")),
    })
}

fn parse_column_definition(node: Node<'_, '_>, table: &str) -> Result<ColumnDefinition, WixError> {
    let name = node
        .attribute("name")
        .ok_or_else(|| malformed(node, &format!("column of '{}' is missing name", table)))?
        .to_string();
    let column_type = node
        .attribute("type")
        .and_then(ColumnType::from_keyword)
        .ok_or_else(|| malformed(node, &format!("column '{}.{}' has a bad type", table, name)))?;
    let length = match node.attribute("length") {
        Some(value) => value
            .parse()
            .map_err(|_| malformed(node, &format!("column '{}.{}' has a bad length", table, name)))?,
        None => 0,
    };
    let key_column = match node.attribute("keyColumn") {
        Some(value) => Some(value.parse().map_err(|_| {
            malformed(node, &format!("column '{}.{}' has a bad keyColumn", table, name))
        })?),
        None => None,
    };
    let category = match node.attribute("category") {
        Some(value) => ColumnCategory::from_keyword(value).ok_or_else(|| {
            malformed(node, &format!("column '{}.{}' has a bad category", table, name))
        })?,
        None => ColumnCategory::default(),
    };

    Ok(ColumnDefinition {
        name,
        column_type,
        length,
        nullable: yes(node.attribute("nullable")),
        primary_key: yes(node.attribute("primaryKey")),
        key_table: node.attribute("keyTable").map(str::to_string),
        key_column,
        category,
    })
}

fn yes(value: Option<&str>) -> bool {
    value == Some("yes")
}

fn malformed(node: Node<'_, '_>, detail: &str) -> WixError {
    let position = node.document().text_pos_at(node.range().start);
    WixError::new(
        MessageCode::MalformedFile,
        format!(
            "Invalid table definition at line {}: {}.",
            position.row, detail
        ),
    )
}

#[cfg(test)]
mod definitions_tests {
    use super::*;

    #[test]
    fn builtin_tables_parse() {
        let builtin = TableDefinitions::builtin();
        let file = builtin.get("File").expect("File table");
        assert!(file.symbol);
        assert!(!file.unreal);
        assert_eq!(file.columns[0].name, "File");
        assert_eq!(file.column_index("Sequence"), Some(7));
        assert_eq!(file.primary_key_columns().collect::<Vec<_>>(), vec![0]);

        let wix_file = builtin.get("WixFile").expect("WixFile table");
        assert!(wix_file.unreal);
        assert_eq!(wix_file.columns[3].column_type, ColumnType::Object);

        let feature_components = builtin.get("FeatureComponents").expect("table");
        assert!(!feature_components.symbol);
        assert_eq!(
            feature_components.primary_key_columns().collect::<Vec<_>>(),
            vec![0, 1]
        );
    }

    #[test]
    fn require_reports_unknown_table() {
        let error = TableDefinitions::builtin()
            .require("Nope")
            .expect_err("unknown table");
        assert_eq!(error.code, MessageCode::UnknownTable);
    }

    #[test]
    fn extend_accepts_new_tables_and_rejects_conflicts() {
        let mut definitions = TableDefinitions::builtin().clone();
        let extra = TableDefinitions::load_xml(
            r#"<tableDefinitions>
                 <tableDefinition name="WixFirewallException" symbol="yes">
                   <columnDefinition name="Id" type="string" length="72" primaryKey="yes" category="identifier"/>
                   <columnDefinition name="Port" type="number" length="4"/>
                 </tableDefinition>
               </tableDefinitions>"#,
        )
        .expect("extension tables");
        definitions.extend(extra).expect("no conflict");
        assert!(definitions.contains("WixFirewallException"));

        let conflicting = TableDefinitions::load_xml(
            r#"<tableDefinitions>
                 <tableDefinition name="Property">
                   <columnDefinition name="Property" type="number" primaryKey="yes"/>
                 </tableDefinition>
               </tableDefinitions>"#,
        )
        .expect("parses");
        let error = definitions.extend(conflicting).expect_err("conflict");
        assert_eq!(error.code, MessageCode::MalformedFile);
    }

    #[test]
    fn load_xml_rejects_bad_column_type() {
        let error = TableDefinitions::load_xml(
            r#"<tableDefinitions>
                 <tableDefinition name="T"><columnDefinition name="A" type="blob"/></tableDefinition>
               </tableDefinitions>"#,
        )
        .expect_err("bad type");
        assert_eq!(error.code, MessageCode::MalformedFile);
        assert!(error.message.contains("T.A"));
    }
}
