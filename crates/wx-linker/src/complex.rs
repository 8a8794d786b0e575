//! Group membership flattening.
//!
//! Complex references from kept sections describe a tree of features,
//! component groups and components. Products get one `FeatureComponents`
//! row per (feature, component) pair reached through that tree; modules
//! get one `ModuleComponents` row per component.

use std::collections::{BTreeMap, BTreeSet};

use log::debug;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use wx_core::columns::{feature_components, module_components, module_signature};
use wx_core::{
    ComplexReference, ComplexReferenceChildType as Child, ComplexReferenceParentType as Parent, MessageCode,
    Output, OutputType, Row, SourceLineNumber, TableDefinitions, WixError,
};

use crate::diagnostics::Diagnostics;

struct Membership<'r> {
    feature: &'r str,
    primary: bool,
    location: &'r SourceLineNumber,
}

pub(crate) fn apply(
    references: &[&ComplexReference],
    output: &mut Output,
    definitions: &TableDefinitions,
    diagnostics: &mut Diagnostics<'_>,
) {
    match output.output_type {
        OutputType::Product => feature_components(references, output, definitions, diagnostics),
        OutputType::Module => module_components(output, definitions, diagnostics),
        _ => {}
    }
}

fn feature_components(
    references: &[&ComplexReference],
    output: &mut Output,
    definitions: &TableDefinitions,
    diagnostics: &mut Diagnostics<'_>,
) {
    let mut groups = BTreeMap::<&str, Vec<&ComplexReference>>::new();
    for reference in references {
        if reference.parent_type == Parent::ComponentGroup {
            groups.entry(&reference.parent_id).or_default().push(reference);
        }
    }
    if report_cycles(&groups, diagnostics) {
        return;
    }

    let mut members = BTreeMap::<String, Vec<Membership<'_>>>::new();
    for reference in references.iter().filter(|reference| reference.parent_type == Parent::Feature) {
        let components = match reference.child_type {
            Child::Component => vec![reference.child_id.clone()],
            Child::ComponentGroup => group_components(&reference.child_id, &groups),
            Child::Feature => continue,
        };
        for component in components {
            members.entry(component).or_default().push(Membership {
                feature: &reference.parent_id,
                primary: reference.primary,
                location: &reference.source_line,
            });
        }
    }

    let mut rows = Vec::new();
    for (component, memberships) in &members {
        let primaries = memberships
            .iter()
            .filter(|membership| membership.primary)
            .map(|membership| membership.feature)
            .collect::<BTreeSet<_>>();
        if primaries.len() > 1 {
            let location = memberships
                .iter()
                .filter(|membership| membership.primary)
                .last()
                .map(|membership| membership.location.clone())
                .unwrap_or_else(SourceLineNumber::synthetic);
            diagnostics.error(WixError::with_location(
                MessageCode::MultiplePrimaryReferences,
                format!(
                    "Component '{}' has more than one primary feature: {}.",
                    component,
                    primaries.into_iter().collect::<Vec<_>>().join(", ")
                ),
                location,
            ));
        }

        let mut seen = BTreeSet::new();
        for membership in memberships {
            if seen.insert(membership.feature) {
                rows.push((membership.feature, component.as_str(), membership.location.clone()));
            }
        }
    }

    let orphans = output
        .rows("Component")
        .filter(|row| !members.contains_key(&row.primary_key()))
        .map(|row| (row.primary_key(), row.source_line.clone()))
        .collect::<Vec<_>>();
    for (component, location) in orphans {
        diagnostics.error(WixError::with_location(
            MessageCode::OrphanedComponent,
            format!("Component '{}' is not assigned to any feature.", component),
            location,
        ));
    }

    if rows.is_empty() {
        return;
    }
    let definition = match definitions.require("FeatureComponents") {
        Ok(definition) => definition,
        Err(error) => return diagnostics.error(error),
    };
    debug!("flattened {} feature component pair(s)", rows.len());
    let table = output.ensure_table(&definition);
    for (feature, component, location) in rows {
        let mut row = Row::new(definition.clone(), location);
        row.synthesized = true;
        let filled = row
            .set_string(feature_components::FEATURE, feature)
            .and_then(|_| row.set_string(feature_components::COMPONENT, component));
        match filled.and_then(|_| table.push(row)) {
            Ok(()) => {}
            Err(error) => diagnostics.error(error),
        }
    }
}

/// Reports every group that can reach itself. Returns whether any did.
fn report_cycles(groups: &BTreeMap<&str, Vec<&ComplexReference>>, diagnostics: &mut Diagnostics<'_>) -> bool {
    let mut graph = DiGraph::<&str, ()>::new();
    let mut nodes = BTreeMap::<&str, NodeIndex>::new();
    for (parent, references) in groups {
        for reference in references {
            if reference.child_type == Child::ComponentGroup {
                let from = group_node(&mut graph, &mut nodes, parent);
                let to = group_node(&mut graph, &mut nodes, &reference.child_id);
                graph.add_edge(from, to, ());
            }
        }
    }

    let mut found = false;
    for scc in tarjan_scc(&graph) {
        if scc.len() == 1 && !graph.neighbors(scc[0]).any(|next| next == scc[0]) {
            continue;
        }
        found = true;
        let mut members = scc.iter().map(|index| graph[*index]).collect::<Vec<_>>();
        members.sort_unstable();
        let location = groups
            .get(members[0])
            .into_iter()
            .flatten()
            .find(|reference| reference.child_type == Child::ComponentGroup)
            .map(|reference| reference.source_line.clone())
            .unwrap_or_else(SourceLineNumber::synthetic);
        diagnostics.error(WixError::with_location(
            MessageCode::ReferenceCycle,
            format!("Component groups reference each other in a cycle: {}.", members.join(" -> ")),
            location,
        ));
    }
    found
}

fn group_node<'a>(
    graph: &mut DiGraph<&'a str, ()>,
    nodes: &mut BTreeMap<&'a str, NodeIndex>,
    id: &'a str,
) -> NodeIndex {
    *nodes.entry(id).or_insert_with(|| graph.add_node(id))
}

fn group_components(group: &str, groups: &BTreeMap<&str, Vec<&ComplexReference>>) -> Vec<String> {
    let mut components = Vec::new();
    let mut pending = vec![group];
    let mut visited = BTreeSet::new();
    while let Some(current) = pending.pop() {
        if !visited.insert(current) {
            continue;
        }
        for reference in groups.get(current).into_iter().flatten() {
            match reference.child_type {
                Child::Component => components.push(reference.child_id.clone()),
                Child::ComponentGroup => pending.push(&reference.child_id),
                Child::Feature => {}
            }
        }
    }
    components.sort();
    components.dedup();
    components
}

fn module_components(output: &mut Output, definitions: &TableDefinitions, diagnostics: &mut Diagnostics<'_>) {
    let Some((module_id, language)) = output.rows("ModuleSignature").next().and_then(|row| {
        Some((
            row.get_string(module_signature::MODULE_ID)?.to_string(),
            row.get_number(module_signature::LANGUAGE)?,
        ))
    }) else {
        debug!("module output has no signature; skipping module components");
        return;
    };
    let components = output
        .rows("Component")
        .map(|row| (row.primary_key(), row.source_line.clone()))
        .collect::<Vec<_>>();
    if components.is_empty() {
        return;
    }
    let definition = match definitions.require("ModuleComponents") {
        Ok(definition) => definition,
        Err(error) => return diagnostics.error(error),
    };
    let table = output.ensure_table(&definition);
    for (component, location) in components {
        let mut row = Row::new(definition.clone(), location);
        row.synthesized = true;
        let filled = row
            .set_string(module_components::COMPONENT, &component)
            .and_then(|_| row.set_string(module_components::MODULE_ID, &module_id))
            .and_then(|_| row.set_number(module_components::LANGUAGE, language));
        if let Err(error) = filled.and_then(|_| table.push(row)) {
            diagnostics.error(error);
        }
    }
}
