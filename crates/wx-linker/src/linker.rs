use std::collections::{BTreeMap, BTreeSet};

use log::{debug, info, trace};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use wx_core::{
    ComplexReference, ComplexReferenceChildType as Child, ComplexReferenceParentType as Parent, Intermediate,
    Library, MessageCode, Messaging, Output, OutputType, Section, SectionType, SimpleReference,
    SourceLineNumber, TableDefinitions, WixError,
};

use crate::complex;
use crate::diagnostics::{Diagnostics, LinkError};
use crate::librarian::merge_localizations;
use crate::symbols::{Resolution, SymbolTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkOptions {
    pub output_type: OutputType,
    /// Warn about identical duplicates and unreferenced sections.
    pub pedantic: bool,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            output_type: OutputType::Product,
            pedantic: false,
        }
    }
}

/// Links the sections of `intermediates` and `libraries` into one output.
///
/// Only sections reachable from the entry section contribute rows. Any
/// symbol problem fails the link; every problem is also reported to
/// `messaging`.
pub fn link(
    intermediates: &[Intermediate],
    libraries: &[Library],
    definitions: &TableDefinitions,
    options: &LinkOptions,
    messaging: &Messaging,
) -> Result<Output, LinkError> {
    let mut diagnostics = Diagnostics::new(messaging);
    let mut pool = intermediates
        .iter()
        .flat_map(|intermediate| intermediate.sections.iter())
        .chain(libraries.iter().flat_map(|library| library.sections.iter()))
        .cloned()
        .collect::<Vec<_>>();
    info!(
        "linking {} section(s) from {} object(s) and {} library(ies)",
        pool.len(),
        intermediates.len(),
        libraries.len()
    );

    let Some(entry) = find_entry(&pool, options.output_type, &mut diagnostics) else {
        return Err(diagnostics.into_error());
    };
    debug!("entry section {}", pool[entry].id);

    let symbols = SymbolTable::build(&pool);

    let mut graph = DiGraph::<usize, ()>::with_capacity(pool.len(), 0);
    let nodes = (0..pool.len()).map(|index| graph.add_node(index)).collect::<Vec<NodeIndex>>();
    let mut problems = Vec::new();
    for (index, section) in pool.iter().enumerate() {
        for reference in &section.references {
            let resolution = symbols.resolve(&pool, index, &reference.symbol_name());
            match &resolution {
                Resolution::Private(target) | Resolution::Global(target) => {
                    graph.add_edge(nodes[index], nodes[target.section], ());
                }
                Resolution::Ambiguous { private, .. } => {
                    graph.add_edge(nodes[index], nodes[private.section], ());
                    problems.push((index, reference, resolution));
                }
                Resolution::Unresolved => problems.push((index, reference, resolution)),
            }
        }
        for complex in &section.complex_references {
            for key in complex_symbols(complex) {
                if let Resolution::Private(target) | Resolution::Global(target) =
                    symbols.resolve(&pool, index, &key)
                {
                    graph.add_edge(nodes[index], nodes[target.section], ());
                }
            }
        }
    }

    let mut kept = BTreeSet::new();
    let mut dfs = Dfs::new(&graph, nodes[entry]);
    while let Some(node) = dfs.next(&graph) {
        kept.insert(graph[node]);
    }
    debug!("{} of {} section(s) reachable", kept.len(), pool.len());

    for (index, reference, resolution) in &problems {
        if kept.contains(index) {
            report_problem(&pool, reference, resolution, &mut diagnostics);
        }
    }
    for (index, section) in pool.iter().enumerate() {
        if !kept.contains(&index) {
            if options.pedantic {
                diagnostics.warning(
                    MessageCode::UnreferencedSection,
                    format!("Section '{}' is not referenced and was left out.", section.id),
                    section.source_line.clone(),
                );
            }
        } else if index != entry && section.section_type != SectionType::Fragment {
            diagnostics.error(WixError::with_location(
                MessageCode::IllegalSectionType,
                format!(
                    "Section '{}' of type {} is referenced from the {} entry section; only fragments can be linked in.",
                    section.id,
                    section.section_type.keyword(),
                    pool[entry].section_type.keyword()
                ),
                section.source_line.clone(),
            ));
        }
    }
    symbols.collapse_duplicates(&mut pool, &kept, options.pedantic, &mut diagnostics);
    if diagnostics.has_errors() {
        return Err(diagnostics.into_error());
    }

    let mut output = flatten(&pool, entry, &kept, options.output_type, &mut diagnostics);
    let complex_references = kept
        .iter()
        .flat_map(|index| pool[*index].complex_references.iter())
        .collect::<Vec<&ComplexReference>>();
    complex::apply(&complex_references, &mut output, definitions, &mut diagnostics);

    for library in libraries {
        merge_localizations(&mut output.localizations, &library.localizations, &mut diagnostics);
    }

    info!(
        "linked {} table(s) from {} section(s)",
        output.tables.len(),
        output.section_ids.len()
    );
    diagnostics.finish(output)
}

fn find_entry(pool: &[Section], output_type: OutputType, diagnostics: &mut Diagnostics<'_>) -> Option<usize> {
    let Some(expected) = output_type.entry_section_type() else {
        diagnostics.error(WixError::new(
            MessageCode::MissingEntrySection,
            format!("A {} output cannot be produced by linking.", output_type.keyword()),
        ));
        return None;
    };
    let candidates = pool
        .iter()
        .enumerate()
        .filter(|(_, section)| section.section_type == expected)
        .map(|(index, _)| index)
        .collect::<Vec<_>>();
    match candidates.as_slice() {
        [] => {
            diagnostics.error(WixError::new(
                MessageCode::MissingEntrySection,
                format!("Could not find a {} section to start the link.", expected.keyword()),
            ));
            None
        }
        [entry] => Some(*entry),
        [first, rest @ ..] => {
            for duplicate in rest {
                diagnostics.error(WixError::with_location(
                    MessageCode::MultipleEntrySections,
                    format!(
                        "Section '{}' and section '{}' are both {} entry sections.",
                        pool[*first].id,
                        pool[*duplicate].id,
                        expected.keyword()
                    ),
                    pool[*duplicate].source_line.clone(),
                ));
            }
            None
        }
    }
}

/// Symbol names of the entities a complex reference connects.
fn complex_symbols(reference: &ComplexReference) -> Vec<String> {
    let parent = match reference.parent_type {
        Parent::Feature => Some("Feature"),
        Parent::ComponentGroup => Some("WixComponentGroup"),
        Parent::Module | Parent::Product => None,
    };
    let child = match reference.child_type {
        Child::Component => "Component",
        Child::ComponentGroup => "WixComponentGroup",
        Child::Feature => "Feature",
    };
    parent
        .map(|table| format!("{}:{}", table, reference.parent_id))
        .into_iter()
        .chain(std::iter::once(format!("{}:{}", child, reference.child_id)))
        .collect()
}

fn report_problem(
    pool: &[Section],
    reference: &SimpleReference,
    resolution: &Resolution,
    diagnostics: &mut Diagnostics<'_>,
) {
    match resolution {
        Resolution::Unresolved => diagnostics.error(WixError::with_location(
            MessageCode::UnresolvedReference,
            format!("Unresolved reference to symbol '{}'.", reference.symbol_name()),
            reference.source_line.clone(),
        )),
        Resolution::Ambiguous { private, global } => diagnostics.error(WixError::with_location(
            MessageCode::AmbiguousReference,
            format!(
                "Reference to symbol '{}' is ambiguous: it matches a private row at {} and a row at {}.",
                reference.symbol_name(),
                private.get(pool).source_line,
                global.get(pool).source_line
            ),
            reference.source_line.clone(),
        )),
        Resolution::Private(_) | Resolution::Global(_) => {}
    }
}

fn flatten(
    pool: &[Section],
    entry: usize,
    kept: &BTreeSet<usize>,
    output_type: OutputType,
    diagnostics: &mut Diagnostics<'_>,
) -> Output {
    let mut output = Output::new(output_type);
    output.codepage = pool[entry].codepage;
    output.entry_section_id = Some(pool[entry].id.clone());
    let mut keys = BTreeMap::<String, BTreeMap<String, SourceLineNumber>>::new();

    for index in kept {
        let section = &pool[*index];
        output.section_ids.insert(section.id.clone());
        for table in section.tables.values() {
            let has_key = table.definition().primary_key_columns().next().is_some();
            for row in &table.rows {
                if row.redundant {
                    continue;
                }
                if has_key {
                    let key = row.primary_key();
                    let seen = keys.entry(table.name().to_string()).or_default();
                    if let Some(first) = seen.get(&key) {
                        let duplicate = output
                            .table(table.name())
                            .and_then(|existing| existing.find(&key))
                            .is_some_and(|existing| !existing.is_identical(row));
                        if duplicate {
                            diagnostics.error(WixError::with_location(
                                MessageCode::DuplicatePrimaryKey,
                                format!(
                                    "Table '{}' already has a row with key '{}' (first at {}).",
                                    table.name(),
                                    key,
                                    first
                                ),
                                row.source_line.clone(),
                            ));
                        } else {
                            trace!("dropping identical {} row {}", table.name(), key);
                        }
                        continue;
                    }
                    seen.insert(key, row.source_line.clone());
                }
                let mut row = row.clone();
                row.redundant = false;
                output.ensure_table(table.definition()).rows.push(row);
            }
        }
    }
    output
}

#[cfg(test)]
mod linker_tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::create_library;
    use wx_compiler::Compiler;
    use wx_core::columns::{feature_components, module_components};
    use wx_parser::{preprocess_xml_map, PreprocessOptions};

    const PRODUCT_OPEN: &str = r#"<Product Id="{11111111-2222-3333-4444-555555555555}" Name="Demo" Version="1.0.0" Manufacturer="Acme" Language="1033">"#;

    fn compile(path: &str, body: &str) -> Intermediate {
        let messaging = Messaging::default();
        let text = format!(r#"<Wix xmlns="http://wixtoolset.org/schemas/v4/wxs">{body}</Wix>"#);
        let files = BTreeMap::from([(path.to_string(), text)]);
        let document =
            preprocess_xml_map(&files, path, &PreprocessOptions::default(), &messaging).expect("preprocess");
        let intermediate = Compiler::new().compile(&document, &messaging);
        assert!(
            !messaging.encountered_error(),
            "unexpected compile errors: {:?}",
            messaging.messages()
        );
        intermediate
    }

    fn product(body: &str) -> Intermediate {
        compile("product.wxs", &format!("{PRODUCT_OPEN}{body}</Product>"))
    }

    fn link_with(intermediates: &[Intermediate], libraries: &[Library], pedantic: bool) -> (Result<Output, LinkError>, Messaging) {
        let messaging = Messaging::default();
        let options = LinkOptions {
            output_type: OutputType::Product,
            pedantic,
        };
        let result = link(intermediates, libraries, TableDefinitions::builtin(), &options, &messaging);
        (result, messaging)
    }

    fn link_ok(intermediates: &[Intermediate]) -> Output {
        let (result, messaging) = link_with(intermediates, &[], false);
        result.unwrap_or_else(|error| panic!("link failed: {error}; {:?}", messaging.messages()))
    }

    fn link_err(intermediates: &[Intermediate], libraries: &[Library]) -> LinkError {
        link_with(intermediates, libraries, false).0.expect_err("link should fail")
    }

    #[test]
    fn reachable_fragments_are_linked_and_groups_flattened() {
        let product = product(
            r#"<Feature Id="Complete"><ComponentGroupRef Id="AppFiles"/></Feature>"#,
        );
        let fragments = compile(
            "fragments.wxs",
            r#"
<Fragment Id="Files">
  <ComponentGroup Id="AppFiles" Directory="INSTALLFOLDER">
    <Component Id="MainComponent" Guid="*"><File Source="bin/demo.exe"/></Component>
  </ComponentGroup>
</Fragment>
<Fragment Id="Layout">
  <Directory Id="TARGETDIR"><Directory Id="INSTALLFOLDER" Name="Demo"/></Directory>
</Fragment>
<Fragment Id="Unused"><Property Id="UNUSED" Value="1"/></Fragment>"#,
        );

        let output = link_ok(&[product, fragments]);
        assert!(output.section_ids.contains("Files"));
        assert!(output.section_ids.contains("Layout"));
        assert!(!output.section_ids.contains("Unused"));
        assert_eq!(output.property("UNUSED"), None);
        assert_eq!(output.property("ProductName"), Some("Demo"));
        assert_eq!(
            output.entry_section_id.as_deref(),
            Some("{11111111-2222-3333-4444-555555555555}")
        );
        let pairs = output
            .rows("FeatureComponents")
            .map(|row| {
                (
                    row.get_string(feature_components::FEATURE).unwrap_or_default().to_string(),
                    row.get_string(feature_components::COMPONENT).unwrap_or_default().to_string(),
                )
            })
            .collect::<Vec<_>>();
        assert_eq!(pairs, vec![("Complete".to_string(), "MainComponent".to_string())]);
        assert_eq!(output.rows("Directory").count(), 2);
    }

    const SHARED_TWICE: &str = r#"
<Fragment Id="A"><Property Id="Shared" Value="1"/></Fragment>
<Fragment Id="B"><Property Id="Shared" Value="1"/></Fragment>"#;

    #[test]
    fn identical_duplicates_collapse_and_warn_when_pedantic() {
        let product = product(r#"<PropertyRef Id="Shared"/>"#);
        let fragments = compile("shared.wxs", SHARED_TWICE);

        let (result, messaging) = link_with(&[product.clone(), fragments.clone()], &[], false);
        let output = result.expect("link");
        assert_eq!(output.rows("Property").filter(|row| row.primary_key() == "Shared").count(), 1);
        assert!(output.section_ids.contains("A"));
        assert!(!output.section_ids.contains("B"));
        assert!(!messaging.has_code(MessageCode::IdenticalDuplicateSymbol));

        let (result, messaging) = link_with(&[product, fragments], &[], true);
        assert!(result.is_ok());
        assert!(messaging.has_code(MessageCode::IdenticalDuplicateSymbol));
        assert!(messaging.has_code(MessageCode::UnreferencedSection));
    }

    #[test]
    fn redundant_row_is_kept_when_its_survivor_is_pruned() {
        let product = product(r#"<PropertyRef Id="Other"/>"#);
        let fragments = compile(
            "shared.wxs",
            r#"
<Fragment Id="A"><Property Id="Shared" Value="1"/></Fragment>
<Fragment Id="B"><Property Id="Shared" Value="1"/><Property Id="Other" Value="2"/></Fragment>"#,
        );
        let output = link_ok(&[product, fragments]);
        assert_eq!(output.property("Shared"), Some("1"));
        assert!(!output.section_ids.contains("A"));
    }

    #[test]
    fn conflicting_duplicates_fail_the_link() {
        let product = product(r#"<PropertyRef Id="Shared"/>"#);
        let fragments = compile(
            "shared.wxs",
            r#"
<Fragment Id="A"><Property Id="Shared" Value="1"/></Fragment>
<Fragment Id="B"><Property Id="Shared" Value="2"/></Fragment>"#,
        );
        let error = link_err(&[product, fragments], &[]);
        assert!(error.has_code(MessageCode::DuplicateSymbol));
    }

    #[test]
    fn references_follow_the_duplicate_they_can_see() {
        let other = compile(
            "other.wxs",
            r#"<Fragment Id="A1"><Property Id="internal Shared" Value="1"/><Property Id="LeakedFromOther" Value="x"/></Fragment>"#,
        );
        let mine = compile(
            "mine.wxs",
            &format!(
                r#"{PRODUCT_OPEN}<PropertyRef Id="Shared"/></Product>
<Fragment Id="B2"><Property Id="internal Shared" Value="1"/><Property Id="NeededFromMine" Value="y"/></Fragment>"#
            ),
        );

        let output = link_ok(&[other, mine]);
        assert!(output.section_ids.contains("B2"));
        assert!(!output.section_ids.contains("A1"));
        assert_eq!(output.property("NeededFromMine"), Some("y"));
        assert_eq!(output.property("LeakedFromOther"), None);
        assert_eq!(output.property("Shared"), Some("1"));
    }

    #[test]
    fn conflicting_alternatives_nobody_references_are_ignored() {
        let alternatives = compile(
            "modes.wxs",
            r#"
<Fragment Id="Alt1"><Property Id="Mode" Value="a"/></Fragment>
<Fragment Id="Alt2"><Property Id="Mode" Value="b"/></Fragment>"#,
        );
        let messaging = Messaging::default();
        let library = create_library("modes", &[alternatives], &[], &messaging).expect("library");

        let (result, messaging) = link_with(&[product("")], &[library.clone()], false);
        let output = result.unwrap_or_else(|error| panic!("{error}: {:?}", messaging.messages()));
        assert_eq!(output.property("Mode"), None);
        assert!(!messaging.has_code(MessageCode::DuplicateSymbol));

        let error = link_err(&[product(r#"<PropertyRef Id="Mode"/>"#)], &[library]);
        assert!(error.has_code(MessageCode::DuplicateSymbol));
    }

    #[test]
    fn unresolved_references_only_matter_when_reachable() {
        let unreachable = compile(
            "extra.wxs",
            r#"<Fragment Id="Orphan"><PropertyRef Id="Nowhere"/></Fragment>"#,
        );
        link_ok(&[product(""), unreachable]);

        let error = link_err(&[product(r#"<PropertyRef Id="Nowhere"/>"#)], &[]);
        assert!(error.has_code(MessageCode::UnresolvedReference));
    }

    #[test]
    fn private_symbols_resolve_only_inside_their_section() {
        let fragments = compile(
            "secret.wxs",
            r#"
<Fragment Id="A">
  <Property Id="private Secret" Value="s"/>
  <Property Id="Anchor" Value="a"/>
  <PropertyRef Id="Secret"/>
</Fragment>"#,
        );
        let output = link_ok(&[product(r#"<PropertyRef Id="Anchor"/>"#), fragments.clone()]);
        assert_eq!(output.property("Secret"), Some("s"));

        let error = link_err(&[product(r#"<PropertyRef Id="Secret"/>"#), fragments], &[]);
        assert!(error.has_code(MessageCode::UnresolvedReference));
    }

    #[test]
    fn internal_and_protected_symbols_follow_object_and_library_boundaries() {
        let declaring = compile(
            "lib1.wxs",
            r#"
<Fragment Id="Declares">
  <Property Id="internal Inner" Value="i"/>
  <Property Id="protected Guarded" Value="g"/>
</Fragment>"#,
        );
        let consuming = compile(
            "lib2.wxs",
            r#"<Fragment Id="Consumes"><Property Id="Anchor" Value="a"/><PropertyRef Id="Guarded"/></Fragment>"#,
        );
        let messaging = Messaging::default();
        let library = create_library("common", &[declaring.clone(), consuming.clone()], &[], &messaging)
            .expect("library");

        let (result, messaging) = link_with(&[product(r#"<PropertyRef Id="Anchor"/>"#)], &[library.clone()], false);
        let output = result.unwrap_or_else(|error| panic!("{error}: {:?}", messaging.messages()));
        assert_eq!(output.property("Guarded"), Some("g"));

        let error = link_err(&[product(r#"<PropertyRef Id="Anchor"/>"#), declaring, consuming], &[]);
        assert!(error.has_code(MessageCode::UnresolvedReference));

        let error = link_err(&[product(r#"<PropertyRef Id="Inner"/>"#)], &[library]);
        assert!(error.has_code(MessageCode::UnresolvedReference));
    }

    #[test]
    fn private_and_public_twins_with_different_values_are_ambiguous() {
        let fragments = compile(
            "twins.wxs",
            r#"
<Fragment Id="A">
  <Property Id="private Twin" Value="1"/>
  <Property Id="Anchor" Value="a"/>
  <PropertyRef Id="Twin"/>
</Fragment>
<Fragment Id="B"><Property Id="Twin" Value="2"/></Fragment>"#,
        );
        let error = link_err(&[product(r#"<PropertyRef Id="Anchor"/>"#), fragments], &[]);
        assert!(error.has_code(MessageCode::AmbiguousReference));
    }

    #[test]
    fn entry_section_must_be_unique() {
        let fragment = compile("only.wxs", r#"<Fragment Id="Only"/>"#);
        let error = link_err(&[fragment], &[]);
        assert!(error.has_code(MessageCode::MissingEntrySection));

        let second = compile(
            "second.wxs",
            r#"<Product Id="{99999999-2222-3333-4444-555555555555}" Name="Other" Version="1.0.0" Manufacturer="Acme" Language="1033"/>"#,
        );
        let error = link_err(&[product(""), second], &[]);
        assert!(error.has_code(MessageCode::MultipleEntrySections));
    }

    #[test]
    fn components_without_features_are_orphaned() {
        let product = product(
            r#"<Directory Id="TARGETDIR"><Component Id="Lonely" Guid="*"><File Source="a.txt"/></Component></Directory>"#,
        );
        let error = link_err(&[product], &[]);
        assert!(error.has_code(MessageCode::OrphanedComponent));
    }

    #[test]
    fn a_component_cannot_have_two_primary_features() {
        let product = product(
            r#"
<Directory Id="TARGETDIR"/>
<Feature Id="First"><Component Id="Shared" Directory="TARGETDIR" Guid="*"><File Source="a.txt"/></Component></Feature>
<Feature Id="Second"><ComponentRef Id="Shared" Primary="yes"/></Feature>"#,
        );
        let error = link_err(&[product], &[]);
        assert!(error.has_code(MessageCode::MultiplePrimaryReferences));
    }

    #[test]
    fn component_group_cycles_are_reported() {
        let product = product(
            r#"
<Feature Id="Complete"><ComponentGroupRef Id="G1"/></Feature>
<ComponentGroup Id="G1"><ComponentGroupRef Id="G2"/></ComponentGroup>
<ComponentGroup Id="G2"><ComponentGroupRef Id="G1"/></ComponentGroup>"#,
        );
        let error = link_err(&[product], &[]);
        assert!(error.has_code(MessageCode::ReferenceCycle));
    }

    #[test]
    fn modules_list_every_component() {
        let module = compile(
            "module.wxs",
            r#"
<Module Id="Widgets" Language="1033" Version="1.2.0">
  <Directory Id="TARGETDIR">
    <Component Id="WidgetCore" Guid="*"><File Source="core.dll"/></Component>
  </Directory>
</Module>"#,
        );
        let messaging = Messaging::default();
        let options = LinkOptions {
            output_type: OutputType::Module,
            pedantic: false,
        };
        let output = link(&[module], &[], TableDefinitions::builtin(), &options, &messaging).expect("link");
        let row = output.rows("ModuleComponents").next().expect("module component");
        assert_eq!(row.get_string(module_components::COMPONENT), Some("WidgetCore"));
        assert_eq!(row.get_string(module_components::MODULE_ID), Some("Widgets"));
        assert_eq!(row.get_number(module_components::LANGUAGE), Some(1033));
        assert_eq!(output.rows("FeatureComponents").count(), 0);
    }

    #[test]
    fn linked_in_entry_sections_are_illegal() {
        let module = compile(
            "module.wxs",
            r#"<Module Id="Widgets" Language="1033" Version="1.2.0"><Property Id="FromModule" Value="m"/></Module>"#,
        );
        let error = link_err(&[product(r#"<PropertyRef Id="FromModule"/>"#), module], &[]);
        assert!(error.has_code(MessageCode::IllegalSectionType));
    }

    #[test]
    fn library_localizations_reach_the_output() {
        let mut strings = wx_core::Localization::new("en-us");
        strings.strings.insert(
            "Title".to_string(),
            wx_core::LocalizedString {
                id: "Title".to_string(),
                value: "Demo".to_string(),
                overridable: false,
                source_line: SourceLineNumber::at("en-us.wxl", 2),
            },
        );
        let messaging = Messaging::default();
        let library = create_library("strings", &[], &[strings], &messaging).expect("library");
        let (result, _) = link_with(&[product("")], &[library], false);
        let output = result.expect("link");
        assert_eq!(output.localizations.len(), 1);
        assert_eq!(output.localizations[0].get("Title"), Some("Demo"));
    }
}
