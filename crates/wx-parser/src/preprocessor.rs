//! Source preprocessing.
//!
//! Directives are XML processing instructions, so the raw document is parsed
//! first and directives are applied while copying the tree. Conditional and
//! `foreach` blocks are delimited by sibling instructions and therefore must
//! open and close under the same parent element.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use log::{debug, trace};
use regex::Regex;
use roxmltree::{Document, Node, NodeType};
use wx_core::{MessageCode, Messaging, SourceLineNumber, WixError};

use crate::condition::evaluate_condition;
use crate::variables::Variables;
use crate::xml::{ExtensionAttribute, SourceDocument, XmlElementNode, XmlNode, XmlTextNode};

/// Supplies source text by virtual path.
pub trait SourceResolver {
    fn read(&self, path: &str) -> Option<String>;
}

impl SourceResolver for BTreeMap<String, String> {
    fn read(&self, path: &str) -> Option<String> {
        self.get(path).cloned()
    }
}

/// Reads sources from disk; virtual paths are relative to `root`.
#[derive(Debug, Clone)]
pub struct FileSystemResolver {
    pub root: PathBuf,
}

impl SourceResolver for FileSystemResolver {
    fn read(&self, path: &str) -> Option<String> {
        std::fs::read_to_string(self.root.join(path)).ok()
    }
}

#[derive(Debug, Clone, Default)]
pub struct PreprocessOptions {
    pub variables: Variables,
    /// Searched, in order, after the including file's directory.
    pub include_paths: Vec<String>,
}

pub fn preprocess(
    resolver: &dyn SourceResolver,
    entry: &str,
    options: &PreprocessOptions,
    messaging: &Messaging,
) -> Result<SourceDocument, WixError> {
    let path = normalize_virtual_path(entry);
    let text = resolver.read(&path).ok_or_else(|| {
        WixError::new(
            MessageCode::FileNotFound,
            format!("Source file \"{}\" not found.", path),
        )
    })?;
    debug!("preprocessing {}", path);

    let mut context = Context {
        resolver,
        include_paths: &options.include_paths,
        messaging,
        variables: options.variables.clone(),
        include_stack: vec![path.clone()],
    };
    context.variables.set_source_file(&path);

    let document = parse(&text, &path)?;
    let parent = Frame {
        file: &path,
        document: &document,
        include_chain: None,
    };
    let children = document.root().children().collect::<Vec<_>>();
    let mut nodes = Vec::new();
    context.process_siblings(&children, &parent, &mut nodes)?;

    let root = nodes
        .into_iter()
        .find_map(|node| match node {
            XmlNode::Element(element) => Some(element),
            XmlNode::Text(_) => None,
        })
        .ok_or_else(|| {
            WixError::new(
                MessageCode::ExpectedRootElement,
                format!("\"{}\" has no root element after preprocessing.", path),
            )
        })?;

    Ok(SourceDocument { path, root })
}

/// Convenience wrapper over an in-memory file map.
pub fn preprocess_xml_map(
    xml_by_path: &BTreeMap<String, String>,
    entry: &str,
    options: &PreprocessOptions,
    messaging: &Messaging,
) -> Result<SourceDocument, WixError> {
    preprocess(xml_by_path, entry, options, messaging)
}

struct Context<'a> {
    resolver: &'a dyn SourceResolver,
    include_paths: &'a [String],
    messaging: &'a Messaging,
    variables: Variables,
    include_stack: Vec<String>,
}

/// Document being copied and how it was reached.
struct Frame<'f, 'input> {
    file: &'f str,
    document: &'f Document<'input>,
    /// Location of the `<?include?>` that pulled this document in.
    include_chain: Option<&'f SourceLineNumber>,
}

impl Frame<'_, '_> {
    fn location(&self, node: Node<'_, '_>) -> SourceLineNumber {
        let line = self.document.text_pos_at(node.range().start).row as usize;
        let here = SourceLineNumber::at(self.file, line);
        match self.include_chain {
            Some(parent) => here.within(parent),
            None => here,
        }
    }
}

struct Conditional {
    parent_active: bool,
    taken: bool,
    active: bool,
    seen_else: bool,
    location: SourceLineNumber,
}

impl Context<'_> {
    fn process_siblings(
        &mut self,
        nodes: &[Node<'_, '_>],
        frame: &Frame<'_, '_>,
        out: &mut Vec<XmlNode>,
    ) -> Result<(), WixError> {
        let mut conditionals: Vec<Conditional> = Vec::new();
        let mut index = 0;

        while index < nodes.len() {
            let node = nodes[index];
            index += 1;
            let active = conditionals.last().map_or(true, |top| top.active);

            match node.node_type() {
                NodeType::PI => {
                    let Some(pi) = node.pi() else { continue };
                    let location = frame.location(node);
                    let value = pi.value.unwrap_or_default().trim();
                    trace!("directive <?{} {}?> at {}", pi.target, value, location);

                    match pi.target {
                        "if" | "ifdef" | "ifndef" => {
                            let taken = active && self.test(pi.target, value, &location)?;
                            conditionals.push(Conditional {
                                parent_active: active,
                                taken,
                                active: taken,
                                seen_else: false,
                                location,
                            });
                        }
                        "elseif" => {
                            let Some(top) = conditionals.last() else {
                                return Err(unbalanced("<?elseif?> without <?if?>", location));
                            };
                            if top.seen_else {
                                return Err(unbalanced("<?elseif?> after <?else?>", location));
                            }
                            let evaluate = top.parent_active && !top.taken;
                            let result = evaluate && self.test("if", value, &location)?;
                            if let Some(top) = conditionals.last_mut() {
                                top.active = result;
                                top.taken |= result;
                            }
                        }
                        "else" => {
                            let Some(top) = conditionals.last_mut() else {
                                return Err(unbalanced("<?else?> without <?if?>", location));
                            };
                            if top.seen_else {
                                return Err(unbalanced("duplicate <?else?>", location));
                            }
                            top.seen_else = true;
                            top.active = top.parent_active && !top.taken;
                            top.taken = true;
                        }
                        "endif" => {
                            if conditionals.pop().is_none() {
                                return Err(unbalanced("<?endif?> without <?if?>", location));
                            }
                        }
                        "foreach" => {
                            let end = matching_endforeach(nodes, index).ok_or_else(|| {
                                unbalanced("<?foreach?> without <?endforeach?>", location.clone())
                            })?;
                            if active {
                                self.foreach(value, &nodes[index..end], frame, &location, out)?;
                            }
                            index = end + 1;
                        }
                        "endforeach" => {
                            return Err(unbalanced("<?endforeach?> without <?foreach?>", location));
                        }
                        _ if !active => {}
                        "define" => self.define(value, &location)?,
                        "undef" => {
                            let name = value.trim();
                            if self.variables.undefine(name).is_none() {
                                self.messaging.warning(
                                    MessageCode::PreprocessorWarning,
                                    format!("Variable '{}' was not defined.", name),
                                    Some(location),
                                );
                            }
                        }
                        "include" => {
                            let target = self.variables.substitute(value, &location)?;
                            self.include(&target, frame.file, &location, out)?;
                        }
                        "error" => {
                            let message = self.variables.substitute(value, &location)?;
                            return Err(WixError::with_location(
                                MessageCode::PreprocessorError,
                                message,
                                location,
                            ));
                        }
                        "warning" => {
                            let message = self.variables.substitute(value, &location)?;
                            self.messaging.warning(
                                MessageCode::PreprocessorWarning,
                                message,
                                Some(location),
                            );
                        }
                        other => {
                            return Err(WixError::with_location(
                                MessageCode::IllegalDirective,
                                format!("Unknown preprocessor directive '<?{}?>'.", other),
                                location,
                            ));
                        }
                    }
                }
                _ if !active => {}
                NodeType::Element => out.push(XmlNode::Element(self.element(node, frame)?)),
                NodeType::Text => {
                    let raw = node.text().unwrap_or_default();
                    if raw.trim().is_empty() {
                        continue;
                    }
                    let location = frame.location(node);
                    let value = self.variables.substitute(raw, &location)?;
                    out.push(XmlNode::Text(XmlTextNode { value, location }));
                }
                _ => {}
            }
        }

        if let Some(open) = conditionals.pop() {
            return Err(unbalanced("<?if?> without <?endif?>", open.location));
        }
        Ok(())
    }

    fn test(&self, directive: &str, value: &str, location: &SourceLineNumber) -> Result<bool, WixError> {
        match directive {
            "ifdef" => Ok(self.variables.is_defined(value.trim())),
            "ifndef" => Ok(!self.variables.is_defined(value.trim())),
            _ => {
                let expression = self.variables.substitute(value, location)?;
                evaluate_condition(&expression, &self.variables, location)
            }
        }
    }

    fn define(&mut self, value: &str, location: &SourceLineNumber) -> Result<(), WixError> {
        let captures = define_regex().captures(value).ok_or_else(|| {
            WixError::with_location(
                MessageCode::PreprocessorError,
                format!("Malformed <?define {}?>.", value),
                location.clone(),
            )
        })?;
        let name = captures.get(1).map_or("", |m| m.as_str());
        let raw = captures.get(2).map_or("", |m| m.as_str()).trim();
        let unquoted = raw
            .strip_prefix('"')
            .and_then(|inner| inner.strip_suffix('"'))
            .unwrap_or(raw);
        let resolved = self.variables.substitute(unquoted, location)?;
        let name = name.strip_prefix("var.").unwrap_or(name);
        if self.variables.define(name, resolved).is_some() {
            self.messaging.warning(
                MessageCode::PreprocessorWarning,
                format!("Variable '{}' was redefined.", name),
                Some(location.clone()),
            );
        }
        Ok(())
    }

    fn foreach(
        &mut self,
        value: &str,
        body: &[Node<'_, '_>],
        frame: &Frame<'_, '_>,
        location: &SourceLineNumber,
        out: &mut Vec<XmlNode>,
    ) -> Result<(), WixError> {
        let (name, list) = value.split_once(" in ").ok_or_else(|| {
            WixError::with_location(
                MessageCode::PreprocessorError,
                format!("Malformed <?foreach {}?>; expected 'name in a;b;c'.", value),
                location.clone(),
            )
        })?;
        let name = name.trim();
        let name = name.strip_prefix("var.").unwrap_or(name).to_string();
        let list = self.variables.substitute(list.trim(), location)?;

        let previous = self.variables.undefine(&name);
        for item in list.split(';').map(str::trim).filter(|item| !item.is_empty()) {
            self.variables.define(name.clone(), item);
            self.process_siblings(body, frame, out)?;
        }
        self.variables.undefine(&name);
        if let Some(previous) = previous {
            self.variables.define(name, previous);
        }
        Ok(())
    }

    fn include(
        &mut self,
        target: &str,
        including_file: &str,
        location: &SourceLineNumber,
        out: &mut Vec<XmlNode>,
    ) -> Result<(), WixError> {
        let (path, text) = self.resolve_include(target, including_file).ok_or_else(|| {
            WixError::with_location(
                MessageCode::IncludeNotFound,
                format!(
                    "Include \"{}\" referenced by \"{}\" not found.",
                    target, including_file
                ),
                location.clone(),
            )
        })?;

        if self.include_stack.contains(&path) {
            let mut cycle = self.include_stack.clone();
            cycle.push(path);
            return Err(WixError::with_location(
                MessageCode::IncludeCycle,
                format!("Include cycle detected: {}", cycle.join(" -> ")),
                location.clone(),
            ));
        }

        debug!("including {} from {}", path, including_file);
        let document = parse(&text, &path)?;
        let root = document.root_element();
        if root.tag_name().name() != "Include" {
            return Err(WixError::with_location(
                MessageCode::PreprocessorError,
                format!(
                    "Included file \"{}\" must have an <Include> root, found <{}>.",
                    path,
                    root.tag_name().name()
                ),
                location.clone(),
            ));
        }

        self.include_stack.push(path.clone());
        let previous_source = self.variables.set_source_file(&path);
        let frame = Frame {
            file: &path,
            document: &document,
            include_chain: Some(location),
        };
        let children = root.children().collect::<Vec<_>>();
        let result = self.process_siblings(&children, &frame, out);
        self.variables.set_source_file(&previous_source);
        self.include_stack.pop();
        result
    }

    fn resolve_include(&self, target: &str, including_file: &str) -> Option<(String, String)> {
        let mut candidates = vec![resolve_include_path(including_file, target)];
        for include_path in self.include_paths {
            candidates.push(normalize_virtual_path(
                Path::new(include_path).join(target).to_string_lossy().as_ref(),
            ));
        }
        candidates
            .into_iter()
            .find_map(|path| self.resolver.read(&path).map(|text| (path, text)))
    }

    fn element(&mut self, node: Node<'_, '_>, frame: &Frame<'_, '_>) -> Result<XmlElementNode, WixError> {
        let location = frame.location(node);
        let mut attributes = BTreeMap::new();
        let mut extension_attributes = Vec::new();
        for attribute in node.attributes() {
            let value = self.variables.substitute(attribute.value(), &location)?;
            match attribute.namespace() {
                Some(namespace) => extension_attributes.push(ExtensionAttribute {
                    namespace: namespace.to_string(),
                    name: attribute.name().to_string(),
                    value,
                }),
                None => {
                    attributes.insert(attribute.name().to_string(), value);
                }
            }
        }

        let children = node.children().collect::<Vec<_>>();
        let mut processed = Vec::new();
        self.process_siblings(&children, frame, &mut processed)?;

        Ok(XmlElementNode {
            namespace: node.tag_name().namespace().map(str::to_string),
            name: node.tag_name().name().to_string(),
            attributes,
            extension_attributes,
            children: processed,
            location,
        })
    }
}

fn parse<'input>(text: &'input str, path: &str) -> Result<Document<'input>, WixError> {
    Document::parse(text).map_err(|error| {
        WixError::with_location(
            MessageCode::XmlParseError,
            format!("Failed to parse \"{}\": {}", path, error),
            SourceLineNumber::at(path, error.pos().row as usize),
        )
    })
}

fn matching_endforeach(nodes: &[Node<'_, '_>], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (offset, node) in nodes[start..].iter().enumerate() {
        match node.pi().map(|pi| pi.target) {
            Some("foreach") => depth += 1,
            Some("endforeach") if depth == 0 => return Some(start + offset),
            Some("endforeach") => depth -= 1,
            _ => {}
        }
    }
    None
}

fn unbalanced(detail: &str, location: SourceLineNumber) -> WixError {
    WixError::with_location(
        MessageCode::UnbalancedDirective,
        format!("Unbalanced preprocessor directive: {}.", detail),
        location,
    )
}

fn define_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r#"^\s*([A-Za-z_][A-Za-z0-9_.]*)\s*(?:=\s*(.*?))?\s*$"#)
            .expect("define regex must compile")
    })
}

pub(crate) fn resolve_include_path(current_path: &str, include: &str) -> String {
    let parent = match Path::new(current_path).parent() {
        Some(parent) => parent,
        None => Path::new(""),
    };
    let joined = if include.starts_with('/') {
        PathBuf::from(include)
    } else {
        parent.join(include)
    };
    normalize_virtual_path(joined.to_string_lossy().as_ref())
}

pub fn normalize_virtual_path(path: &str) -> String {
    let mut stack: Vec<String> = Vec::new();
    for part in path.replace('\\', "/").split('/') {
        if part.is_empty() || part == "." {
            continue;
        }
        if part == ".." {
            stack.pop();
            continue;
        }
        stack.push(part.to_string());
    }
    stack.join("/")
}
