use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, OnceLock};

use log::trace;
use regex::Regex;
use wx_core::{
    is_legal_identifier, parse_identifier, AccessModifier, ComplexReference, ComplexReferenceChildType,
    ComplexReferenceParentType, Identifier, Intermediate, MessageCode, Messaging, Row, Section,
    SectionType, SourceLineNumber, TableDefinitions, WixError, WXS_NAMESPACE,
};
use wx_parser::{XmlElementNode, XmlNode};

use crate::ids::{generate_guid, generate_identifier};
use crate::registry::HandlerRegistry;

pub const DIRECTORY_ID: &str = "DirectoryId";
pub const COMPONENT_ID: &str = "ComponentId";
pub const COMPONENT_GROUP_ID: &str = "ComponentGroupId";
pub const FEATURE_ID: &str = "FeatureId";

/// Ambient identifiers handed down to child elements (current directory,
/// component, feature, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElementContext {
    values: BTreeMap<String, String>,
}

impl ElementContext {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn with(&self, key: &str, value: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.values.insert(key.to_string(), value.into());
        next
    }

    pub fn without(&self, key: &str) -> Self {
        let mut next = self.clone();
        next.values.remove(key);
        next
    }
}

/// State for compiling one source document.
pub struct CompileContext<'a> {
    registry: &'a HandlerRegistry,
    definitions: &'a TableDefinitions,
    messaging: &'a Messaging,
    source_path: String,
    intermediate: Intermediate,
    section: Option<Section>,
    section_ids: BTreeSet<String>,
    /// `Package/@Compressed` of the current section.
    pub package_compressed: Option<bool>,
}

impl<'a> CompileContext<'a> {
    pub(crate) fn new(
        registry: &'a HandlerRegistry,
        definitions: &'a TableDefinitions,
        messaging: &'a Messaging,
        source_path: &str,
    ) -> Self {
        Self {
            registry,
            definitions,
            messaging,
            source_path: source_path.to_string(),
            intermediate: Intermediate::new(source_path),
            section: None,
            section_ids: BTreeSet::new(),
            package_compressed: None,
        }
    }

    pub(crate) fn finish(mut self) -> Intermediate {
        if let Some(section) = self.section.take() {
            self.intermediate.add_section(section);
        }
        self.intermediate
    }

    pub fn source_path(&self) -> &str {
        &self.source_path
    }

    pub fn definitions(&self) -> &TableDefinitions {
        self.definitions
    }

    pub fn messaging(&self) -> &Messaging {
        self.messaging
    }

    pub fn error(&self, code: MessageCode, message: impl Into<String>, location: &SourceLineNumber) {
        self.messaging
            .error(WixError::with_location(code, message, location.clone()));
    }

    pub fn warning(&self, code: MessageCode, message: impl Into<String>, location: &SourceLineNumber) {
        self.messaging
            .warning(code, message, Some(location.clone()));
    }

    // Sections

    pub fn begin_section(&mut self, id: &str, section_type: SectionType, location: &SourceLineNumber) -> bool {
        if self.section.is_some() {
            self.error(
                MessageCode::UnexpectedElement,
                "Sections cannot be nested.",
                location,
            );
            return false;
        }
        if !self.section_ids.insert(id.to_string()) {
            self.error(
                MessageCode::DuplicateSection,
                format!("Section '{}' is defined more than once.", id),
                location,
            );
            return false;
        }
        trace!("begin {} section {}", section_type.keyword(), id);
        self.section = Some(Section::new(id, section_type, location.clone()));
        self.package_compressed = None;
        true
    }

    pub fn end_section(&mut self) {
        if let Some(section) = self.section.take() {
            self.intermediate.add_section(section);
        }
    }

    pub fn section(&self) -> Option<&Section> {
        self.section.as_ref()
    }

    pub fn section_mut(&mut self) -> Option<&mut Section> {
        self.section.as_mut()
    }

    // Attributes

    /// Reports any core attribute not in `allowed`.
    pub fn check_attributes(&self, element: &XmlElementNode, allowed: &[&str]) {
        for name in element.attributes.keys() {
            if !allowed.contains(&name.as_str()) {
                self.error(
                    MessageCode::UnexpectedAttribute,
                    format!(
                        "The {} element contains an unexpected attribute '{}'.",
                        element.name, name
                    ),
                    &element.location,
                );
            }
        }
    }

    pub fn required<'e>(&self, element: &'e XmlElementNode, name: &str) -> Option<&'e str> {
        match element.attribute(name) {
            Some(value) if !value.trim().is_empty() => Some(value),
            Some(_) => {
                self.error(
                    MessageCode::IllegalAttributeValue,
                    format!(
                        "The {}/@{} attribute's value cannot be empty.",
                        element.name, name
                    ),
                    &element.location,
                );
                None
            }
            None => {
                self.error(
                    MessageCode::ExpectedAttribute,
                    format!(
                        "The {} element requires the '{}' attribute.",
                        element.name, name
                    ),
                    &element.location,
                );
                None
            }
        }
    }

    /// Parses an identifier attribute, honouring an access-modifier prefix.
    pub fn identifier(&self, element: &XmlElementNode, name: &str) -> Option<Identifier> {
        let raw = element.attribute(name)?;
        let parsed = parse_identifier(raw).filter(|identifier| is_legal_identifier(&identifier.id));
        if parsed.is_none() {
            self.error(
                MessageCode::IllegalIdentifier,
                format!(
                    "The {}/@{} attribute's value '{}' is not a legal identifier.",
                    element.name, name, raw
                ),
                &element.location,
            );
        }
        parsed
    }

    pub fn required_identifier(&self, element: &XmlElementNode, name: &str) -> Option<Identifier> {
        if element.attribute(name).is_none() {
            self.required(element, name);
            return None;
        }
        self.identifier(element, name)
    }

    /// Identifier attribute used as a reference; access modifiers are not
    /// allowed there.
    pub fn reference_id(&self, element: &XmlElementNode, name: &str) -> Option<String> {
        let identifier = self.identifier(element, name)?;
        if identifier.access != AccessModifier::Public {
            self.error(
                MessageCode::IllegalIdentifier,
                format!(
                    "The {}/@{} attribute references '{}' and cannot carry an access modifier.",
                    element.name, name, identifier.id
                ),
                &element.location,
            );
            return None;
        }
        Some(identifier.id)
    }

    pub fn yes_no(&self, element: &XmlElementNode, name: &str) -> Option<bool> {
        match element.attribute(name)? {
            "yes" => Some(true),
            "no" => Some(false),
            other => {
                self.illegal_value(element, name, other, "'yes' or 'no'");
                None
            }
        }
    }

    pub fn integer(&self, element: &XmlElementNode, name: &str, min: i32, max: i32) -> Option<i32> {
        let raw = element.attribute(name)?;
        match raw.trim().parse::<i32>() {
            Ok(value) if (min..=max).contains(&value) => Some(value),
            _ => {
                self.illegal_value(
                    element,
                    name,
                    raw,
                    &format!("an integer between {} and {}", min, max),
                );
                None
            }
        }
    }

    /// Validates a GUID attribute; `*` is replaced by a GUID derived from
    /// `generate_from`.
    pub fn guid(&self, element: &XmlElementNode, name: &str, generate_from: &[&str]) -> Option<String> {
        let raw = element.attribute(name)?.trim();
        if raw == "*" {
            return Some(generate_guid(generate_from));
        }
        if guid_regex().is_match(raw) {
            let bare = raw.trim_start_matches('{').trim_end_matches('}');
            return Some(format!("{{{}}}", bare.to_ascii_uppercase()));
        }
        self.error(
            MessageCode::IllegalGuid,
            format!(
                "The {}/@{} attribute's value '{}' is not a legal GUID.",
                element.name, name, raw
            ),
            &element.location,
        );
        None
    }

    pub fn illegal_value(&self, element: &XmlElementNode, name: &str, value: &str, expected: &str) {
        self.error(
            MessageCode::IllegalAttributeValue,
            format!(
                "The {}/@{} attribute's value '{}' is not legal; expected {}.",
                element.name, name, value, expected
            ),
            &element.location,
        );
    }

    pub fn generate_id(&self, prefix: &str, args: &[&str]) -> String {
        generate_identifier(prefix, args)
    }

    // Rows and references

    /// Adds a row to the current section. `fill` sets the non-key columns.
    pub fn add_row(
        &mut self,
        table: &str,
        location: &SourceLineNumber,
        identifier: Option<&Identifier>,
        fill: impl FnOnce(&mut Row) -> Result<(), WixError>,
    ) -> Option<&mut Row> {
        let definition = match self.definitions.require(table) {
            Ok(definition) => definition,
            Err(error) => {
                self.messaging.error(error);
                return None;
            }
        };
        let mut row = match identifier {
            Some(identifier) => Row::with_identifier(Arc::clone(&definition), location.clone(), identifier),
            None => Ok(Row::new(Arc::clone(&definition), location.clone())),
        }
        .and_then(|mut row| fill(&mut row).map(|_| row));
        if let Err(error) = &mut row {
            if error.location.is_none() {
                error.location = Some(location.clone());
            }
        }
        let row = match row {
            Ok(row) => row,
            Err(error) => {
                self.messaging.error(error);
                return None;
            }
        };

        let Some(section) = self.section.as_mut() else {
            self.messaging.error(WixError::with_location(
                MessageCode::UnexpectedElement,
                format!("A {} row must be authored inside a Product, Module or Fragment.", table),
                location.clone(),
            ));
            return None;
        };
        Some(section.add_row(row))
    }

    pub fn add_reference(&mut self, table: &str, keys: &str, location: &SourceLineNumber) {
        if let Some(section) = self.section.as_mut() {
            section.add_reference(table, keys, location.clone());
        }
    }

    pub fn add_complex_reference(
        &mut self,
        parent_type: ComplexReferenceParentType,
        parent_id: &str,
        child_type: ComplexReferenceChildType,
        child_id: &str,
        primary: bool,
        location: &SourceLineNumber,
    ) {
        if let Some(section) = self.section.as_mut() {
            section.complex_references.push(ComplexReference {
                parent_type,
                parent_id: parent_id.to_string(),
                child_type,
                child_id: child_id.to_string(),
                primary,
                source_line: location.clone(),
            });
        }
    }

    // Dispatch

    /// Compiles every child element of `element` through the registry.
    pub fn parse_children(&mut self, element: &XmlElementNode, context: &ElementContext) {
        for child in &element.children {
            match child {
                XmlNode::Element(child) => self.parse_element(element, child, context),
                XmlNode::Text(_) => {}
            }
        }
    }

    pub fn parse_element(&mut self, parent: &XmlElementNode, element: &XmlElementNode, context: &ElementContext) {
        let namespace = element.namespace.as_deref().unwrap_or_default();
        let Some(handler) = self.registry.element(namespace, &element.name).cloned() else {
            let message = if namespace == WXS_NAMESPACE {
                format!(
                    "The {} element contains an unexpected child element '{}'.",
                    parent.name, element.name
                )
            } else {
                format!(
                    "The {} element contains an unhandled extension element '{}' in namespace '{}'.",
                    parent.name, element.name, namespace
                )
            };
            self.error(MessageCode::UnexpectedElement, message, &element.location);
            return;
        };

        let parents = handler.parents();
        if !parents.is_empty() && !parents.contains(&parent.name.as_str()) {
            self.error(
                MessageCode::UnexpectedElement,
                format!(
                    "The {} element cannot appear under {}.",
                    element.name, parent.name
                ),
                &element.location,
            );
            return;
        }

        handler.parse_element(self, parent, element, context);
        self.parse_extension_attributes(element, context);
    }

    fn parse_extension_attributes(&mut self, element: &XmlElementNode, context: &ElementContext) {
        for attribute in &element.extension_attributes {
            match self.registry.attribute(&attribute.namespace).cloned() {
                Some(handler) => handler.parse_attribute(self, element, attribute, context),
                None => self.error(
                    MessageCode::UnexpectedAttribute,
                    format!(
                        "The {} element contains an unhandled extension attribute '{}' in namespace '{}'.",
                        element.name, attribute.name, attribute.namespace
                    ),
                    &element.location,
                ),
            }
        }
    }
}

fn guid_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"^\{?[0-9A-Fa-f]{8}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{12}\}?$")
            .expect("guid regex must compile")
    })
}
