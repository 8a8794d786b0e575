//! Object (`.wixobj`), library (`.wixlib`) and output (`.wixout`) files.
//!
//! All three are XML documents with a format namespace and a `version`
//! attribute on the root. Writers stream through `quick-xml`; readers parse
//! with `roxmltree`.

use std::fmt;
use std::io::Cursor;
use std::path::Path;

use log::debug;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use roxmltree::{Document, Node};
use thiserror::Error;

use crate::codes::MessageCode;
use crate::data::{
    ComplexReference, ComplexReferenceChildType, ComplexReferenceParentType, Row, RowOperation,
    Section, SectionType, SimpleReference, Table,
};
use crate::definitions::TableDefinitions;
use crate::error::WixError;
use crate::identifier::AccessModifier;
use crate::messaging::Messaging;
use crate::output::{
    Intermediate, Library, Localization, LocalizedString, Output, OutputType, SubStorage,
};
use crate::source::SourceLineNumber;

pub const OBJECT_NAMESPACE: &str = "http://wix.rs/schemas/object";
pub const LIBRARY_NAMESPACE: &str = "http://wix.rs/schemas/library";
pub const OUTPUT_NAMESPACE: &str = "http://wix.rs/schemas/output";
pub const FORMAT_VERSION: &str = "1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileFormat {
    Object,
    Library,
    Output,
}

impl FileFormat {
    pub fn root_element(self) -> &'static str {
        match self {
            Self::Object => "wixObject",
            Self::Library => "wixLibrary",
            Self::Output => "wixOutput",
        }
    }

    pub fn namespace(self) -> &'static str {
        match self {
            Self::Object => OBJECT_NAMESPACE,
            Self::Library => LIBRARY_NAMESPACE,
            Self::Output => OUTPUT_NAMESPACE,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Object => "wixobj",
            Self::Library => "wixlib",
            Self::Output => "wixout",
        }
    }

    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "wixobj" => Some(Self::Object),
            "wixlib" => Some(Self::Library),
            "wixout" => Some(Self::Output),
            _ => None,
        }
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Object => write!(f, "object"),
            Self::Library => write!(f, "library"),
            Self::Output => write!(f, "output"),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LoadError {
    #[error("expected a {expected} file but found a {actual} file")]
    UnexpectedFormat {
        expected: FileFormat,
        actual: FileFormat,
    },
    #[error(transparent)]
    Invalid(#[from] WixError),
}

impl LoadError {
    pub fn into_wix_error(self) -> WixError {
        match self {
            LoadError::UnexpectedFormat { .. } => {
                WixError::new(MessageCode::UnexpectedFileFormat, self.to_string())
            }
            LoadError::Invalid(error) => error,
        }
    }
}

pub struct LoadOptions<'a> {
    pub definitions: &'a TableDefinitions,
    /// Drop tables without a definition (with a warning) instead of failing.
    pub allow_incomplete: bool,
    pub messaging: &'a Messaging,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoadedFile {
    Object(Intermediate),
    Library(Library),
    Output(Output),
}

pub fn detect_format(text: &str) -> Option<FileFormat> {
    let document = Document::parse(text).ok()?;
    detect_root(document.root_element())
}

fn detect_root(root: Node<'_, '_>) -> Option<FileFormat> {
    [FileFormat::Object, FileFormat::Library, FileFormat::Output]
        .into_iter()
        .find(|format| {
            root.tag_name().name() == format.root_element()
                && root.tag_name().namespace() == Some(format.namespace())
        })
}

pub fn load_any(text: &str, options: &LoadOptions<'_>) -> Result<LoadedFile, LoadError> {
    let document = parse_document(text)?;
    let root = document.root_element();
    match detect_root(root) {
        Some(FileFormat::Object) => Ok(LoadedFile::Object(read_intermediate_root(root, options)?)),
        Some(FileFormat::Library) => Ok(LoadedFile::Library(read_library_root(root, options)?)),
        Some(FileFormat::Output) => Ok(LoadedFile::Output(read_output_root(root, options)?)),
        None => Err(unknown_root(root).into()),
    }
}

pub fn load_path(path: &Path, options: &LoadOptions<'_>) -> Result<LoadedFile, LoadError> {
    let text = std::fs::read_to_string(path).map_err(|error| {
        WixError::new(
            MessageCode::FileNotFound,
            format!("Cannot read '{}': {}", path.display(), error),
        )
    })?;
    debug!("loading {}", path.display());
    load_any(&text, options)
}

pub fn read_intermediate(text: &str, options: &LoadOptions<'_>) -> Result<Intermediate, LoadError> {
    let document = parse_document(text)?;
    let root = expect_root(&document, FileFormat::Object)?;
    read_intermediate_root(root, options)
}

pub fn read_library(text: &str, options: &LoadOptions<'_>) -> Result<Library, LoadError> {
    let document = parse_document(text)?;
    let root = expect_root(&document, FileFormat::Library)?;
    read_library_root(root, options)
}

pub fn read_output(text: &str, options: &LoadOptions<'_>) -> Result<Output, LoadError> {
    let document = parse_document(text)?;
    let root = expect_root(&document, FileFormat::Output)?;
    read_output_root(root, options)
}

pub fn write_intermediate(intermediate: &Intermediate) -> Result<String, WixError> {
    let mut writer = new_writer()?;
    let mut root = BytesStart::new(FileFormat::Object.root_element());
    root.push_attribute(("xmlns", OBJECT_NAMESPACE));
    root.push_attribute(("version", FORMAT_VERSION));
    root.push_attribute(("id", intermediate.id.as_str()));
    emit(&mut writer, Event::Start(root))?;
    for section in &intermediate.sections {
        write_section(&mut writer, section)?;
    }
    emit(
        &mut writer,
        Event::End(BytesEnd::new(FileFormat::Object.root_element())),
    )?;
    finish(writer)
}

pub fn write_library(library: &Library) -> Result<String, WixError> {
    let mut writer = new_writer()?;
    let mut root = BytesStart::new(FileFormat::Library.root_element());
    root.push_attribute(("xmlns", LIBRARY_NAMESPACE));
    root.push_attribute(("version", FORMAT_VERSION));
    root.push_attribute(("id", library.id.as_str()));
    emit(&mut writer, Event::Start(root))?;
    for section in &library.sections {
        write_section(&mut writer, section)?;
    }
    for localization in &library.localizations {
        write_localization(&mut writer, localization)?;
    }
    emit(
        &mut writer,
        Event::End(BytesEnd::new(FileFormat::Library.root_element())),
    )?;
    finish(writer)
}

pub fn write_output(output: &Output) -> Result<String, WixError> {
    let mut writer = new_writer()?;
    write_output_element(&mut writer, output, true)?;
    finish(writer)
}

type XmlWriter = Writer<Cursor<Vec<u8>>>;

fn new_writer() -> Result<XmlWriter, WixError> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
    emit(
        &mut writer,
        Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)),
    )?;
    Ok(writer)
}

fn finish(writer: XmlWriter) -> Result<String, WixError> {
    String::from_utf8(writer.into_inner().into_inner())
        .map_err(|error| WixError::new(MessageCode::OutputWriteFailed, error.to_string()))
}

fn emit(writer: &mut XmlWriter, event: Event<'_>) -> Result<(), WixError> {
    writer
        .write_event(event)
        .map_err(|error| WixError::new(MessageCode::OutputWriteFailed, error.to_string()))
}

fn write_text_element(
    writer: &mut XmlWriter,
    start: BytesStart<'_>,
    text: &str,
) -> Result<(), WixError> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    if text.is_empty() {
        return emit(writer, Event::Empty(start));
    }
    emit(writer, Event::Start(start))?;
    emit(writer, Event::Text(BytesText::new(text)))?;
    emit(writer, Event::End(BytesEnd::new(name)))
}

fn write_section(writer: &mut XmlWriter, section: &Section) -> Result<(), WixError> {
    let mut start = BytesStart::new("section");
    start.push_attribute(("id", section.id.as_str()));
    start.push_attribute(("type", section.section_type.keyword()));
    if section.codepage != 0 {
        start.push_attribute(("codepage", section.codepage.to_string().as_str()));
    }
    if let Some(intermediate_id) = &section.intermediate_id {
        start.push_attribute(("intermediateId", intermediate_id.as_str()));
    }
    if let Some(library_id) = &section.library_id {
        start.push_attribute(("libraryId", library_id.as_str()));
    }
    start.push_attribute(("sourceLineNumber", section.source_line.encode().as_str()));
    emit(writer, Event::Start(start))?;

    for table in section.tables.values() {
        write_table(writer, table)?;
    }
    for reference in &section.references {
        let mut element = BytesStart::new("reference");
        element.push_attribute(("table", reference.table_name.as_str()));
        element.push_attribute(("keys", reference.primary_keys.as_str()));
        element.push_attribute(("sourceLineNumber", reference.source_line.encode().as_str()));
        emit(writer, Event::Empty(element))?;
    }
    for reference in &section.complex_references {
        let mut element = BytesStart::new("complexReference");
        element.push_attribute(("parentType", reference.parent_type.keyword()));
        element.push_attribute(("parent", reference.parent_id.as_str()));
        element.push_attribute(("childType", reference.child_type.keyword()));
        element.push_attribute(("child", reference.child_id.as_str()));
        if reference.primary {
            element.push_attribute(("primary", "yes"));
        }
        element.push_attribute(("sourceLineNumber", reference.source_line.encode().as_str()));
        emit(writer, Event::Empty(element))?;
    }

    emit(writer, Event::End(BytesEnd::new("section")))
}

fn write_table(writer: &mut XmlWriter, table: &Table) -> Result<(), WixError> {
    let mut start = BytesStart::new("table");
    start.push_attribute(("name", table.name()));
    emit(writer, Event::Start(start))?;
    for row in &table.rows {
        write_row(writer, row)?;
    }
    emit(writer, Event::End(BytesEnd::new("table")))
}

fn write_row(writer: &mut XmlWriter, row: &Row) -> Result<(), WixError> {
    let mut start = BytesStart::new("row");
    start.push_attribute(("sourceLineNumber", row.source_line.encode().as_str()));
    if row.access != AccessModifier::Public {
        start.push_attribute(("access", row.access.keyword()));
    }
    if row.redundant {
        start.push_attribute(("redundant", "yes"));
    }
    if row.synthesized {
        start.push_attribute(("synthesized", "yes"));
    }
    if row.operation != RowOperation::None {
        start.push_attribute(("op", row.operation.keyword()));
    }
    emit(writer, Event::Start(start))?;
    for field in row.fields() {
        let mut element = BytesStart::new("field");
        if field.modified {
            element.push_attribute(("modified", "yes"));
        }
        write_text_element(writer, element, &field.value.to_string())?;
    }
    emit(writer, Event::End(BytesEnd::new("row")))
}

fn write_localization(writer: &mut XmlWriter, localization: &Localization) -> Result<(), WixError> {
    let mut start = BytesStart::new("localization");
    start.push_attribute(("culture", localization.culture.as_str()));
    if let Some(codepage) = localization.codepage {
        start.push_attribute(("codepage", codepage.to_string().as_str()));
    }
    emit(writer, Event::Start(start))?;
    for string in localization.strings.values() {
        let mut element = BytesStart::new("string");
        element.push_attribute(("id", string.id.as_str()));
        if string.overridable {
            element.push_attribute(("overridable", "yes"));
        }
        element.push_attribute(("sourceLineNumber", string.source_line.encode().as_str()));
        write_text_element(writer, element, &string.value)?;
    }
    emit(writer, Event::End(BytesEnd::new("localization")))
}

fn write_output_element(
    writer: &mut XmlWriter,
    output: &Output,
    with_namespace: bool,
) -> Result<(), WixError> {
    let mut root = BytesStart::new(FileFormat::Output.root_element());
    if with_namespace {
        root.push_attribute(("xmlns", OUTPUT_NAMESPACE));
    }
    root.push_attribute(("version", FORMAT_VERSION));
    root.push_attribute(("type", output.output_type.keyword()));
    if output.codepage != 0 {
        root.push_attribute(("codepage", output.codepage.to_string().as_str()));
    }
    if let Some(entry) = &output.entry_section_id {
        root.push_attribute(("entrySectionId", entry.as_str()));
    }
    emit(writer, Event::Start(root))?;

    for section_id in &output.section_ids {
        let mut element = BytesStart::new("sectionRef");
        element.push_attribute(("id", section_id.as_str()));
        emit(writer, Event::Empty(element))?;
    }
    for table in output.tables.values() {
        write_table(writer, table)?;
    }
    for localization in &output.localizations {
        write_localization(writer, localization)?;
    }
    for storage in &output.sub_storages {
        let mut start = BytesStart::new("subStorage");
        start.push_attribute(("name", storage.name.as_str()));
        emit(writer, Event::Start(start))?;
        write_output_element(writer, &storage.data, false)?;
        emit(writer, Event::End(BytesEnd::new("subStorage")))?;
    }

    emit(
        writer,
        Event::End(BytesEnd::new(FileFormat::Output.root_element())),
    )
}

fn parse_document(text: &str) -> Result<Document<'_>, WixError> {
    Document::parse(text).map_err(|error| WixError::new(MessageCode::XmlParseError, error.to_string()))
}

fn expect_root<'a, 'input>(
    document: &'a Document<'input>,
    expected: FileFormat,
) -> Result<Node<'a, 'input>, LoadError> {
    let root = document.root_element();
    match detect_root(root) {
        Some(actual) if actual == expected => Ok(root),
        Some(actual) => Err(LoadError::UnexpectedFormat { expected, actual }),
        None => Err(unknown_root(root).into()),
    }
}

fn unknown_root(root: Node<'_, '_>) -> WixError {
    WixError::new(
        MessageCode::UnexpectedFileFormat,
        format!(
            "Unrecognized file root <{}> in namespace '{}'.",
            root.tag_name().name(),
            root.tag_name().namespace().unwrap_or_default()
        ),
    )
}

fn check_version(root: Node<'_, '_>) -> Result<(), WixError> {
    match root.attribute("version") {
        Some(FORMAT_VERSION) => Ok(()),
        Some(other) => Err(WixError::new(
            MessageCode::UnsupportedFormatVersion,
            format!(
                "File version '{}' is not supported; expected '{}'.",
                other, FORMAT_VERSION
            ),
        )),
        None => Err(malformed(root, "missing version attribute")),
    }
}

fn read_intermediate_root(
    root: Node<'_, '_>,
    options: &LoadOptions<'_>,
) -> Result<Intermediate, LoadError> {
    check_version(root)?;
    let id = required(root, "id")?.to_string();
    let mut intermediate = Intermediate::new(id);
    for node in elements(root) {
        match node.tag_name().name() {
            "section" => intermediate.sections.push(read_section(node, options)?),
            _ => return Err(malformed(node, "unexpected element").into()),
        }
    }
    Ok(intermediate)
}

fn read_library_root(root: Node<'_, '_>, options: &LoadOptions<'_>) -> Result<Library, LoadError> {
    check_version(root)?;
    let mut library = Library {
        id: required(root, "id")?.to_string(),
        sections: Vec::new(),
        localizations: Vec::new(),
    };
    for node in elements(root) {
        match node.tag_name().name() {
            "section" => library.sections.push(read_section(node, options)?),
            "localization" => library.localizations.push(read_localization(node)?),
            _ => return Err(malformed(node, "unexpected element").into()),
        }
    }
    Ok(library)
}

fn read_output_root(root: Node<'_, '_>, options: &LoadOptions<'_>) -> Result<Output, LoadError> {
    check_version(root)?;
    let output_type = OutputType::from_keyword(required(root, "type")?)
        .ok_or_else(|| malformed(root, "unknown output type"))?;
    let mut output = Output::new(output_type);
    output.codepage = optional_number(root, "codepage")?.unwrap_or(0);
    output.entry_section_id = root.attribute("entrySectionId").map(str::to_string);

    for node in elements(root) {
        match node.tag_name().name() {
            "sectionRef" => {
                output.section_ids.insert(required(node, "id")?.to_string());
            }
            "table" => {
                if let Some(table) = read_table(node, options)? {
                    output.tables.insert(table.name().to_string(), table);
                }
            }
            "localization" => output.localizations.push(read_localization(node)?),
            "subStorage" => {
                let name = required(node, "name")?.to_string();
                let inner = elements(node)
                    .next()
                    .ok_or_else(|| malformed(node, "empty sub-storage"))?;
                let data = read_output_root(inner, options)?;
                output.sub_storages.push(SubStorage { name, data });
            }
            _ => return Err(malformed(node, "unexpected element").into()),
        }
    }
    Ok(output)
}

fn read_section(node: Node<'_, '_>, options: &LoadOptions<'_>) -> Result<Section, WixError> {
    let section_type = SectionType::from_keyword(required(node, "type")?)
        .ok_or_else(|| malformed(node, "unknown section type"))?;
    let mut section = Section::new(
        required(node, "id")?,
        section_type,
        source_line(node),
    );
    section.codepage = optional_number(node, "codepage")?.unwrap_or(0);
    section.intermediate_id = node.attribute("intermediateId").map(str::to_string);
    section.library_id = node.attribute("libraryId").map(str::to_string);

    for child in elements(node) {
        match child.tag_name().name() {
            "table" => {
                if let Some(table) = read_table(child, options)? {
                    section.tables.insert(table.name().to_string(), table);
                }
            }
            "reference" => section.references.push(SimpleReference {
                table_name: required(child, "table")?.to_string(),
                primary_keys: required(child, "keys")?.to_string(),
                source_line: source_line(child),
            }),
            "complexReference" => {
                let parent_type = ComplexReferenceParentType::from_keyword(required(child, "parentType")?)
                    .ok_or_else(|| malformed(child, "unknown parentType"))?;
                let child_type = ComplexReferenceChildType::from_keyword(required(child, "childType")?)
                    .ok_or_else(|| malformed(child, "unknown childType"))?;
                section.complex_references.push(ComplexReference {
                    parent_type,
                    parent_id: required(child, "parent")?.to_string(),
                    child_type,
                    child_id: required(child, "child")?.to_string(),
                    primary: child.attribute("primary") == Some("yes"),
                    source_line: source_line(child),
                });
            }
            _ => return Err(malformed(child, "unexpected element")),
        }
    }
    Ok(section)
}

fn read_table(node: Node<'_, '_>, options: &LoadOptions<'_>) -> Result<Option<Table>, WixError> {
    let name = required(node, "name")?;
    let Some(definition) = options.definitions.get(name) else {
        if options.allow_incomplete {
            options.messaging.warning(
                MessageCode::UnknownTableIgnored,
                format!("Table '{}' has no definition and was dropped.", name),
                None,
            );
            return Ok(None);
        }
        return Err(WixError::new(
            MessageCode::UnknownTable,
            format!("Table '{}' has no definition.", name),
        ));
    };

    let mut table = Table::new(definition.clone());
    for row_node in elements(node) {
        if row_node.tag_name().name() != "row" {
            return Err(malformed(row_node, "unexpected element"));
        }
        let mut row = Row::new(definition.clone(), source_line(row_node));
        if let Some(access) = row_node.attribute("access") {
            row.access = AccessModifier::from_keyword(access)
                .ok_or_else(|| malformed(row_node, "unknown access modifier"))?;
        }
        row.redundant = row_node.attribute("redundant") == Some("yes");
        row.synthesized = row_node.attribute("synthesized") == Some("yes");
        if let Some(op) = row_node.attribute("op") {
            row.operation = RowOperation::from_keyword(op)
                .ok_or_else(|| malformed(row_node, "unknown row operation"))?;
        }

        let fields = elements(row_node).collect::<Vec<_>>();
        if fields.len() != definition.columns.len() {
            return Err(WixError::with_location(
                MessageCode::FieldCountMismatch,
                format!(
                    "Row of table '{}' has {} fields; expected {}.",
                    name,
                    fields.len(),
                    definition.columns.len()
                ),
                row.source_line.clone(),
            ));
        }
        for (index, field) in fields.into_iter().enumerate() {
            row.set_text(index, field.text().unwrap_or_default())?;
            row.mark_modified(index, field.attribute("modified") == Some("yes"));
        }
        table.rows.push(row);
    }
    Ok(Some(table))
}

fn read_localization(node: Node<'_, '_>) -> Result<Localization, WixError> {
    let mut localization = Localization::new(required(node, "culture")?);
    localization.codepage = optional_number(node, "codepage")?;
    for child in elements(node) {
        let id = required(child, "id")?.to_string();
        localization.strings.insert(
            id.clone(),
            LocalizedString {
                id,
                value: child.text().unwrap_or_default().to_string(),
                overridable: child.attribute("overridable") == Some("yes"),
                source_line: child
                    .attribute("sourceLineNumber")
                    .and_then(SourceLineNumber::decode)
                    .unwrap_or_else(SourceLineNumber::synthetic),
            },
        );
    }
    Ok(localization)
}

fn elements<'a, 'input>(node: Node<'a, 'input>) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children().filter(|child| child.is_element())
}

fn source_line(node: Node<'_, '_>) -> SourceLineNumber {
    node.attribute("sourceLineNumber")
        .and_then(SourceLineNumber::decode)
        .unwrap_or_else(SourceLineNumber::synthetic)
}

fn required<'a>(node: Node<'a, '_>, name: &str) -> Result<&'a str, WixError> {
    node.attribute(name)
        .ok_or_else(|| malformed(node, &format!("missing '{}' attribute", name)))
}

fn optional_number(node: Node<'_, '_>, name: &str) -> Result<Option<i32>, WixError> {
    node.attribute(name)
        .map(|value| {
            value
                .parse::<i32>()
                .map_err(|_| malformed(node, &format!("'{}' must be a number", name)))
        })
        .transpose()
}

fn malformed(node: Node<'_, '_>, detail: &str) -> WixError {
    let position = node.document().text_pos_at(node.range().start);
    WixError::new(
        MessageCode::MalformedFile,
        format!(
            "Malformed <{}> at line {}: {}.",
            node.tag_name().name(),
            position.row,
            detail
        ),
    )
}
