//! Built-in element handlers for the core namespace.

use std::sync::Arc;

use wx_core::{WixError, WXS_NAMESPACE};
use wx_parser::XmlElementNode;

use crate::context::{CompileContext, ElementContext};
use crate::registry::{ElementHandler, HandlerRegistry};

mod components;
mod directories;
mod features;
mod resources;
mod sections;

type ParseFn = fn(&mut CompileContext<'_>, &XmlElementNode, &XmlElementNode, &ElementContext);

struct BuiltinHandler {
    parents: &'static [&'static str],
    parse: ParseFn,
}

impl ElementHandler for BuiltinHandler {
    fn parents(&self) -> &[&'static str] {
        self.parents
    }

    fn parse_element(
        &self,
        compiler: &mut CompileContext<'_>,
        parent: &XmlElementNode,
        element: &XmlElementNode,
        context: &ElementContext,
    ) {
        (self.parse)(compiler, parent, element, context)
    }
}

const SECTIONS: &[&str] = &["Product", "Module", "Fragment"];
const DIRECTORIES: &[&str] = &["Product", "Module", "Fragment", "Directory", "DirectoryRef"];
const COMPONENT_PARENTS: &[&str] = &[
    "Module",
    "Fragment",
    "Directory",
    "DirectoryRef",
    "ComponentGroup",
    "Feature",
    "FeatureRef",
];
const GROUP_MEMBERS: &[&str] = &["Feature", "FeatureRef", "ComponentGroup"];
const FEATURE_PARENTS: &[&str] = &["Product", "Fragment", "Feature", "FeatureRef"];

pub(crate) fn register_builtin(registry: &mut HandlerRegistry) -> Result<(), WixError> {
    let table: [(&str, &'static [&'static str], ParseFn); 21] = [
        ("Product", &["Wix"], sections::product),
        ("Module", &["Wix"], sections::module),
        ("Fragment", &["Wix"], sections::fragment),
        ("Package", &["Product", "Module"], sections::package),
        ("Directory", DIRECTORIES, directories::directory),
        ("DirectoryRef", SECTIONS, directories::directory_ref),
        ("Component", COMPONENT_PARENTS, components::component),
        ("ComponentRef", GROUP_MEMBERS, components::component_ref),
        ("ComponentGroup", SECTIONS, components::component_group),
        ("ComponentGroupRef", GROUP_MEMBERS, components::component_group_ref),
        ("File", &["Component"], components::file),
        ("RegistryValue", &["Component"], components::registry_value),
        ("Feature", FEATURE_PARENTS, features::feature),
        ("FeatureRef", FEATURE_PARENTS, features::feature_ref),
        ("Property", SECTIONS, resources::property),
        ("PropertyRef", SECTIONS, resources::property_ref),
        ("Media", SECTIONS, resources::media),
        ("Binary", SECTIONS, resources::binary),
        ("CustomAction", SECTIONS, resources::custom_action),
        ("CustomActionRef", SECTIONS, resources::custom_action_ref),
        ("WixVariable", SECTIONS, resources::wix_variable),
    ];

    for (name, parents, parse) in table {
        registry.register_element(WXS_NAMESPACE, name, Arc::new(BuiltinHandler { parents, parse }))?;
    }
    Ok(())
}
