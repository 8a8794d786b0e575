use wx_core::columns::directory;
use wx_core::{Identifier, MessageCode};
use wx_parser::XmlElementNode;

use crate::context::{CompileContext, ElementContext, DIRECTORY_ID};

const ROOT_DIRECTORY: &str = "TARGETDIR";

pub(super) fn directory(
    c: &mut CompileContext<'_>,
    _parent: &XmlElementNode,
    element: &XmlElementNode,
    context: &ElementContext,
) {
    c.check_attributes(element, &["Id", "Name"]);
    let explicit = match element.attribute("Id") {
        Some(_) => match c.identifier(element, "Id") {
            Some(identifier) => Some(identifier),
            None => return,
        },
        None => None,
    };
    let name = element.attribute("Name").map(str::trim);
    if explicit.is_none() && name.is_none() {
        c.error(
            MessageCode::ExpectedAttribute,
            "The Directory element requires the 'Id' attribute or the 'Name' attribute.",
            &element.location,
        );
        return;
    }
    if name == Some("") {
        c.illegal_value(element, "Name", "", "a non-empty directory name");
        return;
    }

    let declared_parent = context.get(DIRECTORY_ID).map(str::to_string);
    if let Some(parent) = &declared_parent {
        c.add_reference("Directory", parent, &element.location);
    }

    let name = match (name, &explicit) {
        (Some(name), _) => name,
        (None, Some(identifier)) if identifier.id == ROOT_DIRECTORY => "SourceDir",
        (None, _) => ".",
    };
    let segments = name
        .split(['\\', '/'])
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>();
    let Some((last, inline)) = segments.split_last() else {
        c.illegal_value(element, "Name", name, "a directory name");
        return;
    };

    // `a\b\c` creates a synthesized row for each leading segment.
    let parent_key = declared_parent.clone().unwrap_or_default();
    let mut parent = declared_parent;
    let mut prefix = String::new();
    for segment in inline {
        if !prefix.is_empty() {
            prefix.push('\\');
        }
        prefix.push_str(segment);
        let id = c.generate_id("d", &[&parent_key, &prefix]);
        let row = c.add_row("Directory", &element.location, Some(&Identifier::public(&id)), |row| {
            if let Some(parent) = &parent {
                row.set_string(directory::PARENT, parent)?;
            }
            row.set_string(directory::DEFAULT_DIR, segment)
        });
        if let Some(row) = row {
            row.synthesized = true;
        }
        parent = Some(id);
    }

    let identifier = explicit.unwrap_or_else(|| {
        Identifier::public(c.generate_id("d", &[&parent_key, name]))
    });
    c.add_row("Directory", &element.location, Some(&identifier), |row| {
        if let Some(parent) = &parent {
            row.set_string(directory::PARENT, parent)?;
        }
        row.set_string(directory::DEFAULT_DIR, last)
    });

    c.parse_children(element, &context.with(DIRECTORY_ID, identifier.id.as_str()));
}

pub(super) fn directory_ref(
    c: &mut CompileContext<'_>,
    _parent: &XmlElementNode,
    element: &XmlElementNode,
    context: &ElementContext,
) {
    c.check_attributes(element, &["Id"]);
    if element.attribute("Id").is_none() {
        c.required(element, "Id");
        return;
    }
    let Some(id) = c.reference_id(element, "Id") else { return };
    c.add_reference("Directory", &id, &element.location);
    c.parse_children(element, &context.with(DIRECTORY_ID, id));
}
