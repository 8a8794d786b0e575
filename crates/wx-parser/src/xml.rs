use std::collections::BTreeMap;

use wx_core::SourceLineNumber;

#[derive(Debug, Clone, PartialEq)]
pub struct SourceDocument {
    pub path: String,
    pub root: XmlElementNode,
}

#[derive(Debug, Clone, PartialEq)]
pub enum XmlNode {
    Element(XmlElementNode),
    Text(XmlTextNode),
}

/// An attribute owned by a non-core namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionAttribute {
    pub namespace: String,
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct XmlElementNode {
    pub namespace: Option<String>,
    pub name: String,
    /// Attributes without a namespace, after variable substitution.
    pub attributes: BTreeMap<String, String>,
    pub extension_attributes: Vec<ExtensionAttribute>,
    pub children: Vec<XmlNode>,
    pub location: SourceLineNumber,
}

#[derive(Debug, Clone, PartialEq)]
pub struct XmlTextNode {
    pub value: String,
    pub location: SourceLineNumber,
}

impl XmlElementNode {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn is(&self, namespace: &str, name: &str) -> bool {
        self.namespace.as_deref() == Some(namespace) && self.name == name
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &XmlElementNode> {
        self.children.iter().filter_map(|child| match child {
            XmlNode::Element(element) => Some(element),
            XmlNode::Text(_) => None,
        })
    }

    /// Concatenated text children, trimmed.
    pub fn inner_text(&self) -> String {
        self.children
            .iter()
            .filter_map(|child| match child {
                XmlNode::Text(text) => Some(text.value.as_str()),
                XmlNode::Element(_) => None,
            })
            .collect::<String>()
            .trim()
            .to_string()
    }
}
