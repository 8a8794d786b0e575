use std::sync::OnceLock;

use regex::Regex;
use wx_core::columns::summary_information as pid;
use wx_core::{Identifier, MessageCode, SectionType, SourceLineNumber};
use wx_parser::XmlElementNode;

use crate::context::{CompileContext, ElementContext};

pub(super) fn product(
    c: &mut CompileContext<'_>,
    _parent: &XmlElementNode,
    element: &XmlElementNode,
    context: &ElementContext,
) {
    c.check_attributes(
        element,
        &["Id", "Name", "Version", "Manufacturer", "Language", "UpgradeCode", "Codepage"],
    );
    let name = c.required(element, "Name");
    let version = c.required(element, "Version");
    let manufacturer = c.required(element, "Manufacturer");
    let language = c.required(element, "Language");
    c.required(element, "Id");
    let seed = [c.source_path(), name.unwrap_or_default(), version.unwrap_or_default()];
    let product_code = c.guid(element, "Id", &seed);
    let upgrade_code = c.guid(element, "UpgradeCode", &["UpgradeCode", name.unwrap_or_default()]);
    let codepage = c.integer(element, "Codepage", 0, 65001);
    if let Some(version) = version {
        check_version(c, element, "Version", version);
    }
    if let Some(language) = language {
        if language.parse::<u16>().is_err() {
            c.illegal_value(element, "Language", language, "a numeric language id");
        }
    }

    let Some(product_code) = product_code else { return };
    if !c.begin_section(&product_code, SectionType::Product, &element.location) {
        return;
    }
    if let (Some(codepage), Some(section)) = (codepage, c.section_mut()) {
        section.codepage = codepage;
    }

    let properties = [
        ("ProductCode", Some(product_code.as_str())),
        ("ProductName", name),
        ("ProductVersion", version),
        ("Manufacturer", manufacturer),
        ("ProductLanguage", language),
        ("UpgradeCode", upgrade_code.as_deref()),
    ];
    for (id, value) in properties {
        if let Some(value) = value {
            add_property(c, id, value, &element.location);
        }
    }

    c.parse_children(element, context);
    c.end_section();
}

pub(super) fn module(
    c: &mut CompileContext<'_>,
    _parent: &XmlElementNode,
    element: &XmlElementNode,
    context: &ElementContext,
) {
    c.check_attributes(element, &["Id", "Language", "Version", "Codepage", "Guid"]);
    let identifier = c.required_identifier(element, "Id");
    let language = c.required(element, "Language");
    let version = c.required(element, "Version");
    let codepage = c.integer(element, "Codepage", 0, 65001);
    if let Some(version) = version {
        check_version(c, element, "Version", version);
    }
    let language_number = language.and_then(|language| match language.parse::<i32>() {
        Ok(number) => Some(number),
        Err(_) => {
            c.illegal_value(element, "Language", language, "a numeric language id");
            None
        }
    });

    let Some(identifier) = identifier else { return };
    if !c.begin_section(&identifier.id, SectionType::Module, &element.location) {
        return;
    }
    if let (Some(codepage), Some(section)) = (codepage, c.section_mut()) {
        section.codepage = codepage;
    }
    if let (Some(language), Some(version)) = (language_number, version) {
        c.add_row("ModuleSignature", &element.location, Some(&identifier), |row| {
            row.set_number(1, language)?;
            row.set_string(2, version)
        });
    }

    c.parse_children(element, context);
    c.end_section();
}

pub(super) fn fragment(
    c: &mut CompileContext<'_>,
    _parent: &XmlElementNode,
    element: &XmlElementNode,
    context: &ElementContext,
) {
    c.check_attributes(element, &["Id"]);
    let id = match element.attribute("Id") {
        Some(_) => match c.identifier(element, "Id") {
            Some(identifier) => identifier.id,
            None => return,
        },
        None => {
            let line = element.location.line().unwrap_or_default().to_string();
            c.generate_id("frg", &[c.source_path(), &line])
        }
    };
    if !c.begin_section(&id, SectionType::Fragment, &element.location) {
        return;
    }
    c.parse_children(element, context);
    c.end_section();
}

pub(super) fn package(
    c: &mut CompileContext<'_>,
    parent: &XmlElementNode,
    element: &XmlElementNode,
    _context: &ElementContext,
) {
    c.check_attributes(
        element,
        &[
            "Id",
            "Description",
            "Manufacturer",
            "Compressed",
            "InstallerVersion",
            "Languages",
            "Platform",
        ],
    );
    let section_id = c.section().map(|section| section.id.clone()).unwrap_or_default();
    let package_code = match element.attribute("Id") {
        Some(_) => c.guid(element, "Id", &["Package", &section_id]),
        None => Some(crate::ids::generate_guid(&["Package", &section_id])),
    };
    let compressed = c.yes_no(element, "Compressed");
    let installer_version = c.integer(element, "InstallerVersion", 0, i32::MAX).unwrap_or(200);
    let platform = element.attribute("Platform").unwrap_or("Intel");
    if !matches!(platform, "Intel" | "x86" | "x64" | "Arm64") {
        c.illegal_value(element, "Platform", platform, "'x86', 'x64' or 'Arm64'");
    }
    let languages = element.attribute("Languages").unwrap_or("1033");
    c.package_compressed = compressed;

    let title = if parent.name == "Module" {
        "Merge Module"
    } else {
        "Installation Database"
    };
    let template = format!("{};{}", platform.replace("x86", "Intel"), languages);
    let word_count = if compressed == Some(true) { "2" } else { "0" };
    let installer_version = installer_version.to_string();

    let mut summary = vec![
        (pid::TITLE, title),
        (pid::TEMPLATE, template.as_str()),
        (pid::PAGE_COUNT, installer_version.as_str()),
        (pid::WORD_COUNT, word_count),
    ];
    if let Some(description) = element.attribute("Description") {
        summary.push((pid::SUBJECT, description));
    }
    if let Some(manufacturer) = element.attribute("Manufacturer") {
        summary.push((pid::AUTHOR, manufacturer));
    }
    if let Some(package_code) = package_code.as_deref() {
        summary.push((pid::REVISION, package_code));
    }

    for (property_id, value) in summary {
        c.add_row("_SummaryInformation", &element.location, None, |row| {
            row.set_number(pid::PROPERTY_ID, property_id)?;
            row.set_string(pid::VALUE, value)
        });
    }
}

fn add_property(c: &mut CompileContext<'_>, id: &str, value: &str, location: &SourceLineNumber) {
    c.add_row("Property", location, Some(&Identifier::public(id)), |row| {
        row.set_string(wx_core::columns::property::VALUE, value)
    });
}

fn check_version(c: &CompileContext<'_>, element: &XmlElementNode, name: &str, value: &str) {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = REGEX.get_or_init(|| {
        Regex::new(r"^\d{1,5}(\.\d{1,5}){0,3}$").expect("version regex must compile")
    });
    if !value.starts_with("!(") && !regex.is_match(value) {
        c.error(
            MessageCode::IllegalAttributeValue,
            format!(
                "The {}/@{} attribute's value '{}' is not a valid version.",
                element.name, name, value
            ),
            &element.location,
        );
    }
}
