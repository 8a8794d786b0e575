use wx_core::{Localization, LocalizedString, MessageCode, Messaging, WixError, WXL_NAMESPACE};
use wx_parser::{SourceDocument, XmlElementNode};

/// Reads a `WixLocalization` document into a string table.
///
/// Problems are reported to `messaging`; `None` means the document could
/// not be used at all.
pub fn compile_localization(document: &SourceDocument, messaging: &Messaging) -> Option<Localization> {
    let root = &document.root;
    if !root.is(WXL_NAMESPACE, "WixLocalization") {
        messaging.error(WixError::with_location(
            MessageCode::ExpectedRootElement,
            format!(
                "\"{}\" must have a WixLocalization root element in namespace '{}'.",
                document.path, WXL_NAMESPACE
            ),
            root.location.clone(),
        ));
        return None;
    }

    let culture = root.attribute("Culture").unwrap_or_default();
    let mut localization = Localization::new(culture);
    if let Some(raw) = root.attribute("Codepage") {
        match raw.trim().parse::<i32>() {
            Ok(codepage) => localization.codepage = Some(codepage),
            Err(_) => messaging.error(illegal_value(root, "Codepage", raw)),
        }
    }

    for element in root.child_elements() {
        if !element.is(WXL_NAMESPACE, "String") {
            messaging.error(WixError::with_location(
                MessageCode::UnexpectedElement,
                format!(
                    "The WixLocalization element contains an unexpected child element '{}'.",
                    element.name
                ),
                element.location.clone(),
            ));
            continue;
        }
        if let Some(string) = localized_string(element, messaging) {
            if let Some(existing) = localization.strings.get(&string.id) {
                messaging.error(WixError::with_location(
                    MessageCode::DuplicateLocalizationString,
                    format!(
                        "Localization string '{}' is defined more than once (first at {}).",
                        string.id, existing.source_line
                    ),
                    string.source_line.clone(),
                ));
                continue;
            }
            localization.strings.insert(string.id.clone(), string);
        }
    }
    Some(localization)
}

fn localized_string(element: &XmlElementNode, messaging: &Messaging) -> Option<LocalizedString> {
    let Some(id) = element.attribute("Id").filter(|id| !id.trim().is_empty()) else {
        messaging.error(WixError::with_location(
            MessageCode::ExpectedAttribute,
            "The String element requires the 'Id' attribute.",
            element.location.clone(),
        ));
        return None;
    };
    let overridable = match element.attribute("Overridable") {
        None | Some("no") => false,
        Some("yes") => true,
        Some(other) => {
            messaging.error(illegal_value(element, "Overridable", other));
            false
        }
    };
    let value = element
        .attribute("Value")
        .map(str::to_string)
        .unwrap_or_else(|| element.inner_text());
    Some(LocalizedString {
        id: id.trim().to_string(),
        value,
        overridable,
        source_line: element.location.clone(),
    })
}

fn illegal_value(element: &XmlElementNode, name: &str, value: &str) -> WixError {
    WixError::with_location(
        MessageCode::IllegalAttributeValue,
        format!(
            "The {}/@{} attribute's value '{}' is not legal.",
            element.name, name, value
        ),
        element.location.clone(),
    )
}

#[cfg(test)]
mod localization_tests {
    use std::collections::BTreeMap;

    use super::*;
    use wx_parser::{preprocess_xml_map, PreprocessOptions};

    fn load(text: &str, messaging: &Messaging) -> Option<Localization> {
        let files = BTreeMap::from([("en-us.wxl".to_string(), text.to_string())]);
        let document =
            preprocess_xml_map(&files, "en-us.wxl", &PreprocessOptions::default(), messaging).expect("preprocess");
        compile_localization(&document, messaging)
    }

    #[test]
    fn strings_are_collected_with_culture_and_codepage() {
        let messaging = Messaging::default();
        let localization = load(
            r#"<WixLocalization xmlns="http://wixtoolset.org/schemas/v4/wxl" Culture="en-us" Codepage="1252">
  <String Id="Title">My Product</String>
  <String Id="Prompt" Overridable="yes" Value="Insert disk"/>
</WixLocalization>"#,
            &messaging,
        )
        .expect("localization");
        assert!(!messaging.encountered_error());
        assert_eq!(localization.culture, "en-us");
        assert_eq!(localization.codepage, Some(1252));
        assert_eq!(localization.get("Title"), Some("My Product"));
        assert!(localization.strings["Prompt"].overridable);
    }

    #[test]
    fn duplicate_string_ids_are_errors() {
        let messaging = Messaging::default();
        load(
            r#"<WixLocalization xmlns="http://wixtoolset.org/schemas/v4/wxl" Culture="en-us">
  <String Id="A">one</String>
  <String Id="A">two</String>
</WixLocalization>"#,
            &messaging,
        );
        assert!(messaging.has_code(MessageCode::DuplicateLocalizationString));
    }

    #[test]
    fn wrong_root_is_rejected() {
        let messaging = Messaging::default();
        let result = load(r#"<Wix xmlns="http://wixtoolset.org/schemas/v4/wxs"/>"#, &messaging);
        assert!(result.is_none());
        assert!(messaging.has_code(MessageCode::ExpectedRootElement));
    }
}
