use wx_core::columns::{binary, custom_action, media, property, wix_variable};
use wx_core::MessageCode;
use wx_parser::XmlElementNode;

use crate::context::{CompileContext, ElementContext};

pub(super) fn property(
    c: &mut CompileContext<'_>,
    _parent: &XmlElementNode,
    element: &XmlElementNode,
    _context: &ElementContext,
) {
    c.check_attributes(element, &["Id", "Value", "Secure", "Hidden", "Admin"]);
    let Some(identifier) = c.required_identifier(element, "Id") else { return };
    for flag in ["Secure", "Hidden", "Admin"] {
        c.yes_no(element, flag);
    }
    let text = element.inner_text();
    let value = match element.attribute("Value") {
        Some(value) => value.to_string(),
        None if !text.trim().is_empty() => text,
        None => {
            c.required(element, "Value");
            return;
        }
    };
    c.add_row("Property", &element.location, Some(&identifier), |row| {
        row.set_string(property::VALUE, &value)
    });
}

pub(super) fn property_ref(
    c: &mut CompileContext<'_>,
    _parent: &XmlElementNode,
    element: &XmlElementNode,
    _context: &ElementContext,
) {
    simple_ref(c, element, "Property");
}

pub(super) fn custom_action_ref(
    c: &mut CompileContext<'_>,
    _parent: &XmlElementNode,
    element: &XmlElementNode,
    _context: &ElementContext,
) {
    simple_ref(c, element, "CustomAction");
}

fn simple_ref(c: &mut CompileContext<'_>, element: &XmlElementNode, table: &str) {
    c.check_attributes(element, &["Id"]);
    if element.attribute("Id").is_none() {
        c.required(element, "Id");
        return;
    }
    if let Some(id) = c.reference_id(element, "Id") {
        c.add_reference(table, &id, &element.location);
    }
}

pub(super) fn media(
    c: &mut CompileContext<'_>,
    _parent: &XmlElementNode,
    element: &XmlElementNode,
    _context: &ElementContext,
) {
    c.check_attributes(
        element,
        &["Id", "Cabinet", "EmbedCab", "DiskPrompt", "VolumeLabel", "CompressionLevel"],
    );
    if element.attribute("Id").is_none() {
        c.required(element, "Id");
        return;
    }
    let Some(disk_id) = c.integer(element, "Id", 1, 32767) else { return };
    if let Some(level) = element.attribute("CompressionLevel") {
        if !matches!(level, "none" | "low" | "medium" | "high" | "mszip") {
            c.illegal_value(element, "CompressionLevel", level, "'none', 'low', 'medium', 'high' or 'mszip'");
        }
    }
    let embed = c.yes_no(element, "EmbedCab").unwrap_or(false);
    let cabinet = match (element.attribute("Cabinet"), embed) {
        (Some(cabinet), true) => Some(format!("#{}", cabinet)),
        (Some(cabinet), false) => Some(cabinet.to_string()),
        (None, true) => {
            c.error(
                MessageCode::ExpectedAttribute,
                "The Media element requires the 'Cabinet' attribute when 'EmbedCab' is 'yes'.",
                &element.location,
            );
            return;
        }
        (None, false) => None,
    };
    let prompt = element.attribute("DiskPrompt");
    let label = element.attribute("VolumeLabel");

    c.add_row("Media", &element.location, None, |row| {
        row.set_number(media::DISK_ID, disk_id)?;
        row.set_number(media::LAST_SEQUENCE, 0)?;
        if let Some(prompt) = prompt {
            row.set_string(media::DISK_PROMPT, prompt)?;
        }
        if let Some(cabinet) = &cabinet {
            row.set_string(media::CABINET, cabinet)?;
        }
        if let Some(label) = label {
            row.set_string(media::VOLUME_LABEL, label)?;
        }
        Ok(())
    });
}

pub(super) fn binary(
    c: &mut CompileContext<'_>,
    _parent: &XmlElementNode,
    element: &XmlElementNode,
    _context: &ElementContext,
) {
    c.check_attributes(element, &["Id", "SourceFile"]);
    let identifier = c.required_identifier(element, "Id");
    let source = c.required(element, "SourceFile");
    let (Some(identifier), Some(source)) = (identifier, source) else { return };
    c.add_row("Binary", &element.location, Some(&identifier), |row| {
        row.set_object(binary::DATA, source)
    });
}

const TYPE_DLL_IN_BINARY: i32 = 1;
const TYPE_EXE_FROM_FILE: i32 = 18;
const TYPE_SET_DIRECTORY: i32 = 35;
const TYPE_SET_PROPERTY: i32 = 51;
const FLAG_CONTINUE: i32 = 0x40;
const FLAG_IN_SCRIPT: i32 = 0x400;
const FLAG_NO_IMPERSONATE: i32 = 0x800;

pub(super) fn custom_action(
    c: &mut CompileContext<'_>,
    _parent: &XmlElementNode,
    element: &XmlElementNode,
    _context: &ElementContext,
) {
    c.check_attributes(
        element,
        &[
            "Id",
            "BinaryKey",
            "DllEntry",
            "Property",
            "Directory",
            "Value",
            "FileKey",
            "ExeCommand",
            "Execute",
            "Return",
            "Impersonate",
        ],
    );
    let Some(identifier) = c.required_identifier(element, "Id") else { return };

    let (base, source, target, reference) = if let Some(binary) = element.attribute("BinaryKey") {
        let Some(entry) = c.required(element, "DllEntry") else { return };
        (TYPE_DLL_IN_BINARY, binary, Some(entry), Some(("Binary", binary)))
    } else if let Some(property) = element.attribute("Property") {
        let Some(value) = c.required(element, "Value") else { return };
        (TYPE_SET_PROPERTY, property, Some(value), None)
    } else if let Some(directory) = element.attribute("Directory") {
        let Some(value) = c.required(element, "Value") else { return };
        (TYPE_SET_DIRECTORY, directory, Some(value), Some(("Directory", directory)))
    } else if let Some(file) = element.attribute("FileKey") {
        let Some(command) = c.required(element, "ExeCommand") else { return };
        (TYPE_EXE_FROM_FILE, file, Some(command), Some(("File", file)))
    } else {
        c.error(
            MessageCode::ExpectedAttribute,
            "The CustomAction element requires one of 'BinaryKey', 'Property', 'Directory' or 'FileKey'.",
            &element.location,
        );
        return;
    };

    let mut flags = 0;
    match element.attribute("Execute") {
        None | Some("immediate") => {}
        Some("deferred") => flags |= FLAG_IN_SCRIPT,
        Some(other) => c.illegal_value(element, "Execute", other, "'immediate' or 'deferred'"),
    }
    match element.attribute("Return") {
        None | Some("check") => {}
        Some("ignore") => flags |= FLAG_CONTINUE,
        Some(other) => c.illegal_value(element, "Return", other, "'check' or 'ignore'"),
    }
    if c.yes_no(element, "Impersonate") == Some(false) {
        flags |= FLAG_NO_IMPERSONATE;
    }

    c.add_row("CustomAction", &element.location, Some(&identifier), |row| {
        row.set_number(custom_action::TYPE, base | flags)?;
        row.set_string(custom_action::SOURCE, source)?;
        if let Some(target) = target {
            row.set_string(custom_action::TARGET, target)?;
        }
        Ok(())
    });
    if let Some((table, key)) = reference {
        c.add_reference(table, key, &element.location);
    }
}

pub(super) fn wix_variable(
    c: &mut CompileContext<'_>,
    _parent: &XmlElementNode,
    element: &XmlElementNode,
    _context: &ElementContext,
) {
    c.check_attributes(element, &["Id", "Value", "Overridable"]);
    let identifier = c.required_identifier(element, "Id");
    let value = c.required(element, "Value");
    let overridable = c.yes_no(element, "Overridable").unwrap_or(false);
    let (Some(identifier), Some(value)) = (identifier, value) else { return };
    c.add_row("WixVariable", &element.location, Some(&identifier), |row| {
        row.set_string(wix_variable::VALUE, value)?;
        row.set_number(wix_variable::OVERRIDABLE, i32::from(overridable))
    });
}
