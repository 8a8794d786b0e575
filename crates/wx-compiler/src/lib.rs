//! Compiles preprocessed source documents into intermediates.

mod context;
mod handlers;
mod ids;
mod localization;
mod registry;

use log::{debug, info};
use wx_core::{Intermediate, MessageCode, Messaging, TableDefinitions, WixError, WXS_NAMESPACE};
use wx_parser::{preprocess, PreprocessOptions, SourceDocument, SourceResolver};

pub use context::{
    CompileContext, ElementContext, COMPONENT_GROUP_ID, COMPONENT_ID, DIRECTORY_ID, FEATURE_ID,
};
pub use ids::{generate_guid, generate_identifier};
pub use localization::compile_localization;
pub use registry::{AttributeHandler, CompilerExtension, ElementHandler, HandlerRegistry};

#[derive(Debug, Clone)]
pub struct Compiler {
    registry: HandlerRegistry,
    definitions: TableDefinitions,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler {
    pub fn new() -> Self {
        let mut registry = HandlerRegistry::default();
        handlers::register_builtin(&mut registry).expect("built-in element names are unique");
        Self {
            registry,
            definitions: TableDefinitions::builtin().clone(),
        }
    }

    pub fn register_extension(&mut self, extension: &dyn CompilerExtension) -> Result<(), WixError> {
        if extension.namespace() == WXS_NAMESPACE {
            return Err(WixError::new(
                MessageCode::InvalidCommandLine,
                "Extensions cannot claim the core source namespace.",
            ));
        }
        if let Some(definitions) = extension.table_definitions() {
            self.definitions.extend(definitions)?;
        }
        extension.register(&mut self.registry)?;
        debug!("registered compiler extension for {}", extension.namespace());
        Ok(())
    }

    /// Adds tables that are not tied to a compiler extension.
    pub fn add_table_definitions(&mut self, definitions: TableDefinitions) -> Result<(), WixError> {
        self.definitions.extend(definitions)
    }

    pub fn definitions(&self) -> &TableDefinitions {
        &self.definitions
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Compiles one document. Errors go to `messaging`; the returned
    /// intermediate holds whatever compiled cleanly.
    pub fn compile(&self, document: &SourceDocument, messaging: &Messaging) -> Intermediate {
        let mut context = CompileContext::new(&self.registry, &self.definitions, messaging, &document.path);
        let root = &document.root;
        if !root.is(WXS_NAMESPACE, "Wix") {
            context.error(
                MessageCode::ExpectedRootElement,
                format!(
                    "\"{}\" must have a Wix root element in namespace '{}'.",
                    document.path, WXS_NAMESPACE
                ),
                &root.location,
            );
            return context.finish();
        }
        context.check_attributes(root, &[]);
        context.parse_children(root, &ElementContext::default());

        let intermediate = context.finish();
        info!(
            "compiled {} into {} section(s)",
            document.path,
            intermediate.sections.len()
        );
        intermediate
    }

    /// Preprocesses and compiles every entry, one worker per source.
    /// Results keep input order; sources that fail to preprocess are
    /// reported and skipped.
    pub fn compile_sources(
        &self,
        resolver: &(dyn SourceResolver + Sync),
        entries: &[String],
        options: &PreprocessOptions,
        messaging: &Messaging,
    ) -> Vec<Intermediate> {
        std::thread::scope(|scope| {
            let workers = entries
                .iter()
                .map(|entry| {
                    scope.spawn(move || match preprocess(resolver, entry, options, messaging) {
                        Ok(document) => Some(self.compile(&document, messaging)),
                        Err(error) => {
                            messaging.error(error);
                            None
                        }
                    })
                })
                .collect::<Vec<_>>();
            workers
                .into_iter()
                .filter_map(|worker| match worker.join() {
                    Ok(result) => result,
                    Err(_) => {
                        messaging.error(WixError::unexpected("a compile worker panicked"));
                        None
                    }
                })
                .collect()
        })
    }
}
