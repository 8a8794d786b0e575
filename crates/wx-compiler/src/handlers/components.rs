use wx_core::columns::{component, file, registry, wix_file};
use wx_core::{
    parse_identifier, ComplexReferenceChildType as Child, ComplexReferenceParentType as Parent, Identifier,
    MessageCode,
};
use wx_parser::XmlElementNode;

use crate::context::{
    CompileContext, ElementContext, COMPONENT_GROUP_ID, COMPONENT_ID, DIRECTORY_ID, FEATURE_ID,
};

pub(super) fn component(
    c: &mut CompileContext<'_>,
    _parent: &XmlElementNode,
    element: &XmlElementNode,
    context: &ElementContext,
) {
    c.check_attributes(element, &["Id", "Guid", "Directory", "Feature", "Condition"]);
    let Some(identifier) = c.required_identifier(element, "Id") else { return };
    let directory = match element.attribute("Directory") {
        Some(_) => match c.reference_id(element, "Directory") {
            Some(directory) => Some(directory),
            None => return,
        },
        None => context.get(DIRECTORY_ID).map(str::to_string),
    };
    let Some(directory) = directory else {
        c.error(
            MessageCode::ExpectedAttribute,
            "The Component element requires the 'Directory' attribute when it is not nested under a Directory.",
            &element.location,
        );
        return;
    };
    let guid = c.guid(element, "Guid", &["Component", &identifier.id]);
    let feature = match element.attribute("Feature") {
        Some(_) => c.reference_id(element, "Feature"),
        None => None,
    };
    let key_path = key_path(c, element, &identifier.id);

    let condition = element.attribute("Condition");
    c.add_row("Component", &element.location, Some(&identifier), |row| {
        if let Some(guid) = &guid {
            row.set_string(component::COMPONENT_ID, guid)?;
        }
        row.set_string(component::DIRECTORY, &directory)?;
        let attributes = match &key_path {
            Some((_, true)) => component::ATTRIBUTE_REGISTRY_KEY_PATH,
            _ => 0,
        };
        row.set_number(component::ATTRIBUTES, attributes)?;
        if let Some(condition) = condition {
            row.set_string(component::CONDITION, condition)?;
        }
        if let Some((key_path, _)) = &key_path {
            row.set_string(component::KEY_PATH, key_path)?;
        }
        Ok(())
    });
    c.add_reference("Directory", &directory, &element.location);

    if let Some(feature) = &feature {
        c.add_reference("Feature", feature, &element.location);
        c.add_complex_reference(Parent::Feature, feature, Child::Component, &identifier.id, true, &element.location);
    }
    if let Some(parent_feature) = context.get(FEATURE_ID) {
        c.add_complex_reference(
            Parent::Feature,
            parent_feature,
            Child::Component,
            &identifier.id,
            true,
            &element.location,
        );
    }
    if let Some(group) = context.get(COMPONENT_GROUP_ID) {
        c.add_complex_reference(
            Parent::ComponentGroup,
            group,
            Child::Component,
            &identifier.id,
            false,
            &element.location,
        );
    }

    let child_context = context
        .with(COMPONENT_ID, identifier.id.as_str())
        .with(DIRECTORY_ID, directory);
    c.parse_children(element, &child_context);
}

/// First child marked `KeyPath="yes"`, else the first File. The flag is
/// set when the key path is a registry value.
fn key_path(c: &CompileContext<'_>, element: &XmlElementNode, component_id: &str) -> Option<(String, bool)> {
    let mut first_file = None;
    for child in element.child_elements() {
        let registry = match child.name.as_str() {
            "File" => false,
            "RegistryValue" => true,
            _ => continue,
        };
        let candidate = match child.attribute("Id") {
            Some(raw) => parse_identifier(raw).map(|identifier| identifier.id),
            None if registry => Some(default_registry_id(c, child, component_id)),
            None => default_file_id(c, child, component_id),
        };
        if child.attribute("KeyPath") == Some("yes") {
            return candidate.map(|id| (id, registry));
        }
        if first_file.is_none() && !registry {
            first_file = candidate.map(|id| (id, false));
        }
    }
    first_file
}

pub(super) fn component_ref(
    c: &mut CompileContext<'_>,
    parent: &XmlElementNode,
    element: &XmlElementNode,
    context: &ElementContext,
) {
    c.check_attributes(element, &["Id", "Primary"]);
    if element.attribute("Id").is_none() {
        c.required(element, "Id");
        return;
    }
    let Some(id) = c.reference_id(element, "Id") else { return };
    let primary = c.yes_no(element, "Primary").unwrap_or(false);
    c.add_reference("Component", &id, &element.location);
    member_reference(c, parent, context, Child::Component, &id, primary, element);
}

pub(super) fn component_group(
    c: &mut CompileContext<'_>,
    _parent: &XmlElementNode,
    element: &XmlElementNode,
    context: &ElementContext,
) {
    c.check_attributes(element, &["Id", "Directory"]);
    let Some(identifier) = c.required_identifier(element, "Id") else { return };
    let mut child_context = context.without(FEATURE_ID).with(COMPONENT_GROUP_ID, identifier.id.as_str());
    if element.attribute("Directory").is_some() {
        if let Some(directory) = c.reference_id(element, "Directory") {
            c.add_reference("Directory", &directory, &element.location);
            child_context = child_context.with(DIRECTORY_ID, directory);
        }
    }
    c.add_row("WixComponentGroup", &element.location, Some(&identifier), |_| Ok(()));
    c.parse_children(element, &child_context);
}

pub(super) fn component_group_ref(
    c: &mut CompileContext<'_>,
    parent: &XmlElementNode,
    element: &XmlElementNode,
    context: &ElementContext,
) {
    c.check_attributes(element, &["Id", "Primary"]);
    if element.attribute("Id").is_none() {
        c.required(element, "Id");
        return;
    }
    let Some(id) = c.reference_id(element, "Id") else { return };
    let primary = c.yes_no(element, "Primary").unwrap_or(false);
    c.add_reference("WixComponentGroup", &id, &element.location);
    member_reference(c, parent, context, Child::ComponentGroup, &id, primary, element);
}

fn member_reference(
    c: &mut CompileContext<'_>,
    parent: &XmlElementNode,
    context: &ElementContext,
    child_type: Child,
    child_id: &str,
    primary: bool,
    element: &XmlElementNode,
) {
    let reference = match parent.name.as_str() {
        "ComponentGroup" => context
            .get(COMPONENT_GROUP_ID)
            .map(|group| (Parent::ComponentGroup, group, false)),
        _ => context
            .get(FEATURE_ID)
            .map(|feature| (Parent::Feature, feature, primary)),
    };
    if let Some((parent_type, parent_id, primary)) = reference {
        c.add_complex_reference(parent_type, parent_id, child_type, child_id, primary, &element.location);
    }
}

fn file_name(element: &XmlElementNode) -> Option<&str> {
    element.attribute("Name").or_else(|| {
        element
            .attribute("Source")
            .and_then(|source| source.rsplit(['\\', '/']).next())
            .filter(|name| !name.is_empty())
    })
}

fn default_file_id(c: &CompileContext<'_>, element: &XmlElementNode, component_id: &str) -> Option<String> {
    file_name(element).map(|name| c.generate_id("fil", &[component_id, name]))
}

fn default_registry_id(c: &CompileContext<'_>, element: &XmlElementNode, component_id: &str) -> String {
    let root = element.attribute("Root").unwrap_or_default();
    let key = element.attribute("Key").unwrap_or_default();
    let name = element.attribute("Name").unwrap_or_default();
    c.generate_id("reg", &[component_id, root, key, name])
}

fn file_identifier(c: &CompileContext<'_>, element: &XmlElementNode, component_id: &str) -> Option<Identifier> {
    match element.attribute("Id") {
        Some(_) => c.identifier(element, "Id"),
        None => default_file_id(c, element, component_id).map(Identifier::public),
    }
}

fn registry_identifier(
    c: &CompileContext<'_>,
    element: &XmlElementNode,
    component_id: &str,
) -> Option<Identifier> {
    match element.attribute("Id") {
        Some(_) => c.identifier(element, "Id"),
        None => Some(Identifier::public(default_registry_id(c, element, component_id))),
    }
}

pub(super) fn file(
    c: &mut CompileContext<'_>,
    _parent: &XmlElementNode,
    element: &XmlElementNode,
    context: &ElementContext,
) {
    c.check_attributes(
        element,
        &["Id", "Name", "Source", "DiskId", "Compressed", "KeyPath", "Version", "Language"],
    );
    let Some(component_id) = context.get(COMPONENT_ID) else { return };
    let Some(source) = c.required(element, "Source") else { return };
    let Some(name) = file_name(element) else {
        c.illegal_value(element, "Source", source, "a path that ends in a file name");
        return;
    };
    c.yes_no(element, "KeyPath");
    let disk_id = match element.attribute("DiskId") {
        Some(_) => match c.integer(element, "DiskId", 1, 32767) {
            Some(disk_id) => disk_id,
            None => return,
        },
        None => 1,
    };
    let compressed = c.yes_no(element, "Compressed").or(c.package_compressed);
    let Some(identifier) = file_identifier(c, element, component_id) else { return };
    let directory = context.get(DIRECTORY_ID).unwrap_or_default().to_string();
    let version = element.attribute("Version");
    let language = element.attribute("Language");

    c.add_row("File", &element.location, Some(&identifier), |row| {
        row.set_string(file::COMPONENT, component_id)?;
        row.set_string(file::FILE_NAME, name)?;
        row.set_number(file::FILE_SIZE, 0)?;
        if let Some(version) = version {
            row.set_string(file::VERSION, version)?;
        }
        if let Some(language) = language {
            row.set_string(file::LANGUAGE, language)?;
        }
        match compressed {
            Some(true) => row.set_number(file::ATTRIBUTES, file::ATTRIBUTE_COMPRESSED)?,
            Some(false) => row.set_number(file::ATTRIBUTES, file::ATTRIBUTE_NONCOMPRESSED)?,
            None => {}
        }
        row.set_number(file::SEQUENCE, 0)
    });
    c.add_row("WixFile", &element.location, Some(&identifier), |row| {
        row.set_string(wix_file::DIRECTORY, &directory)?;
        row.set_number(wix_file::DISK_ID, disk_id)?;
        row.set_object(wix_file::SOURCE, source)?;
        if let Some(compressed) = compressed {
            row.set_number(wix_file::COMPRESSED, i32::from(compressed))?;
        }
        Ok(())
    });
}

fn registry_root(root: &str) -> Option<i32> {
    match root {
        "HKCR" => Some(0),
        "HKCU" => Some(1),
        "HKLM" => Some(2),
        "HKU" => Some(3),
        "HKMU" => Some(-1),
        _ => None,
    }
}

pub(super) fn registry_value(
    c: &mut CompileContext<'_>,
    _parent: &XmlElementNode,
    element: &XmlElementNode,
    context: &ElementContext,
) {
    c.check_attributes(element, &["Id", "Root", "Key", "Name", "Value", "Type", "KeyPath"]);
    let Some(component_id) = context.get(COMPONENT_ID) else { return };
    let root = c.required(element, "Root");
    let key = c.required(element, "Key");
    let value = c.required(element, "Value");
    c.yes_no(element, "KeyPath");
    let (Some(root), Some(key), Some(value)) = (root, key, value) else { return };
    let Some(root_number) = registry_root(root) else {
        c.illegal_value(element, "Root", root, "'HKCR', 'HKCU', 'HKLM', 'HKU' or 'HKMU'");
        return;
    };
    let value = match element.attribute("Type").unwrap_or("string") {
        "string" => value.to_string(),
        "integer" => format!("#{}", value),
        "expandable" => format!("#%{}", value),
        other => {
            c.illegal_value(element, "Type", other, "'string', 'integer' or 'expandable'");
            return;
        }
    };
    let Some(identifier) = registry_identifier(c, element, component_id) else { return };
    let name = element.attribute("Name");

    c.add_row("Registry", &element.location, Some(&identifier), |row| {
        row.set_number(registry::ROOT, root_number)?;
        row.set_string(registry::KEY, key)?;
        if let Some(name) = name {
            row.set_string(registry::NAME, name)?;
        }
        row.set_string(registry::VALUE, &value)?;
        row.set_string(registry::COMPONENT, component_id)
    });
}
