use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use log::{debug, info};
use wx_binder::{Binder, BinderExtension, FileManager};
use wx_compiler::{Compiler, CompilerExtension};
use wx_core::{Library, MessageCode, Output, Table, TableDefinitions, WixError, WXS_NAMESPACE};

/// Turns tables back into source. Only the claiming half of the contract
/// is modelled here.
pub trait DecompilerExtension: Send + Sync {
    /// Whether this extension decompiles `table` itself.
    fn decompile_table(&self, table: &Table) -> bool {
        let _ = table;
        false
    }

    /// A library whose rows should be dropped from decompiled output,
    /// usually the extension's own standard library.
    fn library_to_remove(&self) -> Option<Library> {
        None
    }
}

/// The single registration entry point of an extension. Every capability
/// is optional.
pub trait Extension: Send + Sync {
    fn name(&self) -> &str;

    fn compiler(&self) -> Option<Arc<dyn CompilerExtension>> {
        None
    }

    fn binder(&self) -> Option<Arc<dyn BinderExtension>> {
        None
    }

    fn file_manager(&self) -> Option<Arc<dyn FileManager>> {
        None
    }

    fn decompiler(&self) -> Option<Arc<dyn DecompilerExtension>> {
        None
    }

    /// Tables used by the binder or decompiler but not by a compiler
    /// extension.
    fn table_definitions(&self) -> Option<TableDefinitions> {
        None
    }
}

/// The extensions of one tool invocation, in registration order.
pub struct ExtensionSet {
    extensions: Vec<Arc<dyn Extension>>,
    definitions: TableDefinitions,
    file_manager: Option<Arc<dyn FileManager>>,
}

impl Default for ExtensionSet {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtensionSet {
    pub fn new() -> Self {
        Self {
            extensions: Vec::new(),
            definitions: TableDefinitions::builtin().clone(),
            file_manager: None,
        }
    }

    pub fn register(&mut self, extension: Arc<dyn Extension>) -> Result<(), WixError> {
        let name = extension.name().to_string();
        if self.extensions.iter().any(|existing| existing.name() == name) {
            return Err(WixError::new(
                MessageCode::InvalidCommandLine,
                format!("Extension '{}' is registered twice.", name),
            ));
        }
        if let Some(compiler) = extension.compiler() {
            if compiler.namespace() == WXS_NAMESPACE {
                return Err(WixError::new(
                    MessageCode::InvalidCommandLine,
                    format!("Extension '{}' cannot claim the core source namespace.", name),
                ));
            }
            if let Some(definitions) = compiler.table_definitions() {
                self.definitions.extend(definitions)?;
            }
        }
        if let Some(definitions) = extension.table_definitions() {
            self.definitions.extend(definitions)?;
        }
        if let Some(file_manager) = extension.file_manager() {
            if self.file_manager.is_none() {
                debug!("using the file manager of extension '{}'", name);
                self.file_manager = Some(file_manager);
            } else {
                debug!("ignoring the file manager of extension '{}'", name);
            }
        }
        info!("registered extension '{}'", name);
        self.extensions.push(extension);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    /// Built-in tables plus every extension's tables.
    pub fn definitions(&self) -> &TableDefinitions {
        &self.definitions
    }

    pub fn compiler(&self) -> Result<Compiler, WixError> {
        let mut compiler = Compiler::new();
        for extension in &self.extensions {
            if let Some(handler) = extension.compiler() {
                compiler.register_extension(handler.as_ref())?;
            }
            if let Some(definitions) = extension.table_definitions() {
                compiler.add_table_definitions(definitions)?;
            }
        }
        Ok(compiler)
    }

    /// A binder with every binder extension. `fallback` is used when no
    /// extension supplies a file manager.
    pub fn binder(&self, fallback: Arc<dyn FileManager>) -> Binder {
        let file_manager = self.file_manager.clone().unwrap_or(fallback);
        let mut binder = Binder::new(file_manager);
        for extension in &self.extensions {
            if let Some(hooks) = extension.binder() {
                binder.add_extension(hooks);
            }
        }
        binder
    }

    /// Which extension decompiles each table of `output`. Tables nobody
    /// claims are left to the core decompiler.
    pub fn claimed_tables(&self, output: &Output) -> BTreeMap<String, String> {
        let decompilers = self
            .extensions
            .iter()
            .filter_map(|extension| Some((extension.name(), extension.decompiler()?)))
            .collect::<Vec<_>>();
        output
            .tables
            .values()
            .filter_map(|table| {
                decompilers
                    .iter()
                    .find(|(_, decompiler)| decompiler.decompile_table(table))
                    .map(|(name, _)| (table.name().to_string(), (*name).to_string()))
            })
            .collect()
    }

    /// Drops rows that came from the extensions' libraries. Returns how
    /// many rows were removed.
    pub fn remove_library_rows(&self, output: &mut Output) -> usize {
        let mut keys = BTreeMap::<String, BTreeSet<String>>::new();
        for library in self
            .extensions
            .iter()
            .filter_map(|extension| extension.decompiler()?.library_to_remove())
        {
            for table in library.sections.iter().flat_map(|section| section.tables.values()) {
                keys.entry(table.name().to_string())
                    .or_default()
                    .extend(table.rows.iter().map(|row| row.primary_key()));
            }
        }

        let mut removed = 0;
        for (name, keys) in &keys {
            let Some(table) = output.table_mut(name) else { continue };
            let before = table.rows.len();
            table.rows.retain(|row| !keys.contains(&row.primary_key()));
            removed += before - table.rows.len();
            if table.rows.is_empty() {
                output.tables.remove(name);
            }
        }
        debug!("removed {} library row(s)", removed);
        removed
    }
}
