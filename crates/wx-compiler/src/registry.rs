use std::collections::BTreeMap;
use std::sync::Arc;

use wx_core::{TableDefinitions, WixError};
use wx_parser::{ExtensionAttribute, XmlElementNode};

use crate::context::{CompileContext, ElementContext};

/// Compiles one element kind. Built-in elements and extension elements go
/// through the same interface.
pub trait ElementHandler: Send + Sync {
    /// Local names of elements this element may appear under. Empty means
    /// any parent.
    fn parents(&self) -> &[&'static str] {
        &[]
    }

    fn parse_element(
        &self,
        compiler: &mut CompileContext<'_>,
        parent: &XmlElementNode,
        element: &XmlElementNode,
        context: &ElementContext,
    );
}

/// Compiles attributes of a foreign namespace found on any element.
pub trait AttributeHandler: Send + Sync {
    fn parse_attribute(
        &self,
        compiler: &mut CompileContext<'_>,
        element: &XmlElementNode,
        attribute: &ExtensionAttribute,
        context: &ElementContext,
    );
}

/// Registration entry point for compiler extensions.
pub trait CompilerExtension: Send + Sync {
    /// Namespace whose elements and attributes this extension owns.
    fn namespace(&self) -> &str;

    fn register(&self, registry: &mut HandlerRegistry) -> Result<(), WixError>;

    fn table_definitions(&self) -> Option<TableDefinitions> {
        None
    }
}

#[derive(Default, Clone)]
pub struct HandlerRegistry {
    elements: BTreeMap<(String, String), Arc<dyn ElementHandler>>,
    attributes: BTreeMap<String, Arc<dyn AttributeHandler>>,
}

impl HandlerRegistry {
    pub fn register_element(
        &mut self,
        namespace: &str,
        name: &str,
        handler: Arc<dyn ElementHandler>,
    ) -> Result<(), WixError> {
        let key = (namespace.to_string(), name.to_string());
        if self.elements.contains_key(&key) {
            return Err(WixError::unexpected(format!(
                "Element '{{{}}}{}' already has a handler.",
                namespace, name
            )));
        }
        self.elements.insert(key, handler);
        Ok(())
    }

    pub fn register_attributes(
        &mut self,
        namespace: &str,
        handler: Arc<dyn AttributeHandler>,
    ) -> Result<(), WixError> {
        if self.attributes.contains_key(namespace) {
            return Err(WixError::unexpected(format!(
                "Namespace '{}' already has an attribute handler.",
                namespace
            )));
        }
        self.attributes.insert(namespace.to_string(), handler);
        Ok(())
    }

    pub fn element(&self, namespace: &str, name: &str) -> Option<&Arc<dyn ElementHandler>> {
        self.elements.get(&(namespace.to_string(), name.to_string()))
    }

    pub fn attribute(&self, namespace: &str) -> Option<&Arc<dyn AttributeHandler>> {
        self.attributes.get(namespace)
    }

    pub fn element_count(&self) -> usize {
        self.elements.len()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("elements", &self.elements.keys().collect::<Vec<_>>())
            .field("attributes", &self.attributes.keys().collect::<Vec<_>>())
            .finish()
    }
}
