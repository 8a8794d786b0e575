use wx_core::columns::feature;
use wx_parser::XmlElementNode;

use crate::context::{CompileContext, ElementContext, COMPONENT_GROUP_ID, FEATURE_ID};

const ATTRIBUTE_UI_DISALLOW_ABSENT: i32 = 0x10;

pub(super) fn feature(
    c: &mut CompileContext<'_>,
    _parent: &XmlElementNode,
    element: &XmlElementNode,
    context: &ElementContext,
) {
    c.check_attributes(
        element,
        &["Id", "Title", "Description", "Level", "Display", "ConfigurableDirectory", "Absent"],
    );
    let Some(identifier) = c.required_identifier(element, "Id") else { return };
    let level = match element.attribute("Level") {
        Some(_) => c.integer(element, "Level", 0, 32767),
        None => Some(1),
    };
    let display = match element.attribute("Display") {
        None => None,
        Some("hidden") => Some(0),
        Some("expand") => Some(1),
        Some("collapse") => Some(2),
        Some(other) => match other.parse::<i32>() {
            Ok(number) if number >= 0 => Some(number),
            _ => {
                c.illegal_value(element, "Display", other, "'collapse', 'expand', 'hidden' or a number");
                None
            }
        },
    };
    let attributes = match element.attribute("Absent") {
        None | Some("allow") => 0,
        Some("disallow") => ATTRIBUTE_UI_DISALLOW_ABSENT,
        Some(other) => {
            c.illegal_value(element, "Absent", other, "'allow' or 'disallow'");
            0
        }
    };
    let directory = match element.attribute("ConfigurableDirectory") {
        Some(_) => c.reference_id(element, "ConfigurableDirectory"),
        None => None,
    };
    let parent = context.get(FEATURE_ID);
    let title = element.attribute("Title");
    let description = element.attribute("Description");

    c.add_row("Feature", &element.location, Some(&identifier), |row| {
        if let Some(parent) = parent {
            row.set_string(feature::PARENT, parent)?;
        }
        if let Some(title) = title {
            row.set_string(feature::TITLE, title)?;
        }
        if let Some(description) = description {
            row.set_string(feature::DESCRIPTION, description)?;
        }
        if let Some(display) = display {
            row.set_number(feature::DISPLAY, display)?;
        }
        row.set_number(feature::LEVEL, level.unwrap_or(1))?;
        if let Some(directory) = &directory {
            row.set_string(feature::DIRECTORY, directory)?;
        }
        row.set_number(feature::ATTRIBUTES, attributes)
    });
    if let Some(parent) = parent {
        c.add_reference("Feature", parent, &element.location);
    }
    if let Some(directory) = &directory {
        c.add_reference("Directory", directory, &element.location);
    }

    let child_context = context
        .without(COMPONENT_GROUP_ID)
        .with(FEATURE_ID, identifier.id.as_str());
    c.parse_children(element, &child_context);
}

pub(super) fn feature_ref(
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
    c.add_reference("Feature", &id, &element.location);
    c.parse_children(element, &context.without(COMPONENT_GROUP_ID).with(FEATURE_ID, id));
}
