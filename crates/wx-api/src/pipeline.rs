use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::panic::{self, catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};

use log::{debug, info};
use thiserror::Error;
use wx_binder::{changed_payloads, BindError, BindOptions, BindPath, BindSummary, DefaultFileManager};
use wx_compiler::compile_localization;
use wx_core::format::{load_path, LoadOptions, LoadedFile};
use wx_core::{Intermediate, Library, Localization, Messaging, Output, WixError};
use wx_differ::{diff, diff_with_payloads, DiffError, DiffOptions};
use wx_linker::{create_library, link, LinkError, LinkOptions};
use wx_parser::{preprocess, FileSystemResolver, PreprocessOptions, SourceResolver};

use crate::extension::ExtensionSet;

/// Why a pipeline step stopped. Every underlying error has already been
/// reported to the messaging sink.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Wix(#[from] WixError),
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error(transparent)]
    Bind(#[from] BindError),
    #[error(transparent)]
    Diff(#[from] DiffError),
    #[error("{0} error(s) reported while compiling")]
    Compile(usize),
}

/// Inputs of `lib` and `link`, sorted by file kind.
#[derive(Debug, Clone, Default)]
pub struct LoadedInputs {
    pub intermediates: Vec<Intermediate>,
    pub libraries: Vec<Library>,
    pub outputs: Vec<Output>,
}

#[derive(Debug, Clone, Default)]
pub struct PackageOptions {
    pub link: LinkOptions,
    pub bind: BindOptions,
    pub bind_paths: Vec<BindPath>,
    pub cabinet_cache: Option<PathBuf>,
    /// Localizations from `.wxl` files, ahead of library localizations.
    pub localizations: Vec<Localization>,
}

thread_local! {
    static PANIC_BACKTRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

static BACKTRACE_HOOK: Once = Once::new();

/// Chains a hook in front of the current panic hook that keeps the
/// backtrace of the last panic on this thread.
fn install_backtrace_hook() {
    BACKTRACE_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let backtrace = Backtrace::force_capture().to_string();
            PANIC_BACKTRACE.with(|slot| *slot.borrow_mut() = Some(backtrace));
            previous(info);
        }));
    });
}

/// Runs `step`, turning a panic into an `UNEXPECTED_EXCEPTION` error that
/// carries the panic message and the backtrace of the panicking frame.
pub fn guarded<T>(messaging: &Messaging, step: impl FnOnce() -> Result<T, ApiError>) -> Result<T, ApiError> {
    install_backtrace_hook();
    PANIC_BACKTRACE.with(|slot| slot.borrow_mut().take());
    match catch_unwind(AssertUnwindSafe(step)) {
        Ok(result) => result,
        Err(payload) => {
            let mut message = panic_message(payload.as_ref());
            if let Some(backtrace) = PANIC_BACKTRACE.with(|slot| slot.borrow_mut().take()) {
                message.push_str("\nbacktrace:\n");
                message.push_str(backtrace.trim_end());
            }
            let error = WixError::unexpected(message);
            messaging.error(error.clone());
            Err(ApiError::Wix(error))
        }
    }
}

fn reported(messaging: &Messaging, error: WixError) -> WixError {
    messaging.error(error.clone());
    error
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Preprocesses and compiles `entries`, read through `resolver`. Fails when
/// any source reported an error.
pub fn compile_with_resolver(
    resolver: &(dyn SourceResolver + Sync),
    entries: &[String],
    options: &PreprocessOptions,
    extensions: &ExtensionSet,
    messaging: &Messaging,
) -> Result<Vec<Intermediate>, ApiError> {
    guarded(messaging, || {
        let compiler = extensions.compiler().map_err(|error| reported(messaging, error))?;
        let before = messaging.error_count();
        let intermediates = compiler.compile_sources(resolver, entries, options, messaging);
        let errors = messaging.error_count() - before;
        if errors > 0 {
            return Err(ApiError::Compile(errors));
        }
        info!("compiled {} source(s)", intermediates.len());
        Ok(intermediates)
    })
}

/// Compiles source files below `root`; entries are relative to it.
pub fn compile_files(
    root: &Path,
    entries: &[String],
    options: &PreprocessOptions,
    extensions: &ExtensionSet,
    messaging: &Messaging,
) -> Result<Vec<Intermediate>, ApiError> {
    let resolver = FileSystemResolver {
        root: root.to_path_buf(),
    };
    compile_with_resolver(&resolver, entries, options, extensions, messaging)
}

pub fn compile_sources_from_xml_map(
    sources: &BTreeMap<String, String>,
    entries: &[String],
    options: &PreprocessOptions,
    extensions: &ExtensionSet,
    messaging: &Messaging,
) -> Result<Vec<Intermediate>, ApiError> {
    compile_with_resolver(sources, entries, options, extensions, messaging)
}

/// Preprocesses and compiles `.wxl` files.
pub fn compile_localizations(
    resolver: &dyn SourceResolver,
    entries: &[String],
    options: &PreprocessOptions,
    messaging: &Messaging,
) -> Result<Vec<Localization>, ApiError> {
    guarded(messaging, || {
        let before = messaging.error_count();
        let mut localizations = Vec::new();
        for entry in entries {
            let document =
                preprocess(resolver, entry, options, messaging).map_err(|error| reported(messaging, error))?;
            if let Some(localization) = compile_localization(&document, messaging) {
                debug!("{}: culture {}", entry, localization.culture);
                localizations.push(localization);
            }
        }
        let errors = messaging.error_count() - before;
        if errors > 0 {
            return Err(ApiError::Compile(errors));
        }
        Ok(localizations)
    })
}

/// Reads object, library and output files. Tables unknown to `extensions`
/// are an error unless `allow_incomplete` drops them with a warning.
pub fn load_inputs(
    paths: &[PathBuf],
    extensions: &ExtensionSet,
    allow_incomplete: bool,
    messaging: &Messaging,
) -> Result<LoadedInputs, ApiError> {
    let options = LoadOptions {
        definitions: extensions.definitions(),
        allow_incomplete,
        messaging,
    };
    let mut inputs = LoadedInputs::default();
    for path in paths {
        let loaded = load_path(path, &options).map_err(|error| reported(messaging, error.into_wix_error()))?;
        match loaded {
            LoadedFile::Object(intermediate) => inputs.intermediates.push(intermediate),
            LoadedFile::Library(library) => inputs.libraries.push(library),
            LoadedFile::Output(output) => inputs.outputs.push(output),
        }
    }
    debug!(
        "loaded {} object(s), {} library(ies), {} output(s)",
        inputs.intermediates.len(),
        inputs.libraries.len(),
        inputs.outputs.len()
    );
    Ok(inputs)
}

pub fn build_library(
    id: &str,
    intermediates: &[Intermediate],
    localizations: &[Localization],
    messaging: &Messaging,
) -> Result<Library, ApiError> {
    guarded(messaging, || Ok(create_library(id, intermediates, localizations, messaging)?))
}

/// Links inputs into an output without binding it.
pub fn link_output(
    intermediates: &[Intermediate],
    libraries: &[Library],
    extensions: &ExtensionSet,
    options: &LinkOptions,
    localizations: &[Localization],
    messaging: &Messaging,
) -> Result<Output, ApiError> {
    guarded(messaging, || {
        let mut output = link(intermediates, libraries, extensions.definitions(), options, messaging)?;
        if !localizations.is_empty() {
            let mut merged = localizations.to_vec();
            merged.append(&mut output.localizations);
            output.localizations = merged;
        }
        Ok(output)
    })
}

/// Links and binds into the package at `package_path`.
pub fn build_package(
    intermediates: &[Intermediate],
    libraries: &[Library],
    extensions: &ExtensionSet,
    options: &PackageOptions,
    package_path: &Path,
    messaging: &Messaging,
) -> Result<BindSummary, ApiError> {
    let output = link_output(
        intermediates,
        libraries,
        extensions,
        &options.link,
        &options.localizations,
        messaging,
    )?;
    bind_output(output, extensions, options, package_path, messaging)
}

pub fn bind_output(
    output: Output,
    extensions: &ExtensionSet,
    options: &PackageOptions,
    package_path: &Path,
    messaging: &Messaging,
) -> Result<BindSummary, ApiError> {
    guarded(messaging, || {
        let fallback = DefaultFileManager::new(options.bind_paths.clone(), options.cabinet_cache.clone());
        let binder = extensions.binder(Arc::new(fallback));
        Ok(binder.bind(output, package_path, &options.bind, messaging)?)
    })
}

pub fn create_transform(
    target: &Output,
    updated: &Output,
    options: &DiffOptions,
    messaging: &Messaging,
) -> Result<Output, ApiError> {
    guarded(messaging, || Ok(diff(target, updated, options, messaging)?))
}

/// Diffs two builds and also modifies File rows whose payload content
/// changed. Payloads resolve through the `Target` and `Updated` bind paths.
pub fn create_patch_transform(
    target: &Output,
    updated: &Output,
    options: &DiffOptions,
    bind_paths: &[BindPath],
    messaging: &Messaging,
) -> Result<Output, ApiError> {
    guarded(messaging, || {
        let file_manager = DefaultFileManager::new(bind_paths.to_vec(), None);
        let changed = changed_payloads(target, updated, &file_manager).map_err(|error| reported(messaging, error))?;
        debug!("{} payload(s) changed", changed.len());
        Ok(diff_with_payloads(target, updated, options, &changed, messaging)?)
    })
}

#[cfg(test)]
mod pipeline_tests {
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::extension::Extension;
    use wx_binder::{BindStage, BinderExtension};
    use wx_compiler::{CompileContext, CompilerExtension, ElementContext, ElementHandler, HandlerRegistry};
    use wx_core::{MessageCode, TableDefinitions};
    use wx_parser::XmlElementNode;

    const GREETING_NS: &str = "http://wix.rs/schemas/greeting";

    fn map(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn product() -> String {
        format!(
            r##"<Wix xmlns="http://wixtoolset.org/schemas/v4/wxs" xmlns:g="{GREETING_NS}">
<Product Id="{{11111111-2222-3333-4444-555555555555}}" Name="Demo" Version="1.0.0" Manufacturer="Acme" Language="1033">
  <Package Compressed="yes"/>
  <Media Id="1" Cabinet="demo.cab" EmbedCab="yes"/>
  <Directory Id="TARGETDIR">
    <Directory Id="INSTALLFOLDER" Name="Demo">
      <Component Id="MainComponent" Guid="*">
        <File Id="AppExe" Source="app.exe"/>
      </Component>
    </Directory>
  </Directory>
  <Feature Id="Complete" Title="!(loc.FeatureTitle)">
    <ComponentRef Id="MainComponent"/>
  </Feature>
  <g:Greeting Id="Hello" Text="hello world"/>
</Product>
</Wix>"##
        )
    }

    const ENGLISH: &str = r#"<WixLocalization xmlns="http://wixtoolset.org/schemas/v4/wxl" Culture="en-US">
  <String Id="FeatureTitle">Everything</String>
</WixLocalization>"#;

    struct GreetingHandler;

    impl ElementHandler for GreetingHandler {
        fn parents(&self) -> &[&'static str] {
            &["Product", "Fragment"]
        }

        fn parse_element(
            &self,
            compiler: &mut CompileContext<'_>,
            _parent: &XmlElementNode,
            element: &XmlElementNode,
            _context: &ElementContext,
        ) {
            let Some(identifier) = compiler.required_identifier(element, "Id") else { return };
            let text = element.attribute("Text").unwrap_or_default().to_string();
            compiler.add_row("Greeting", &element.location, Some(&identifier), |row| row.set_string(1, &text));
        }
    }

    struct GreetingCompiler;

    impl CompilerExtension for GreetingCompiler {
        fn namespace(&self) -> &str {
            GREETING_NS
        }

        fn register(&self, registry: &mut HandlerRegistry) -> Result<(), WixError> {
            registry.register_element(GREETING_NS, "Greeting", Arc::new(GreetingHandler))
        }

        fn table_definitions(&self) -> Option<TableDefinitions> {
            TableDefinitions::load_xml(
                r#"<tableDefinitions>
  <tableDefinition name="Greeting">
    <columnDefinition name="Greeting" type="string" length="72" primaryKey="yes" category="identifier"/>
    <columnDefinition name="Text" type="string" length="255" nullable="yes" category="formatted"/>
  </tableDefinition>
</tableDefinitions>"#,
            )
            .ok()
        }
    }

    #[derive(Default)]
    struct Shouting {
        calls: AtomicUsize,
    }

    impl BinderExtension for Shouting {
        fn after_resolved_fields(&self, output: &mut Output) -> Result<(), WixError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(table) = output.table_mut("Greeting") {
                for row in &mut table.rows {
                    let loud = row.get_string(1).unwrap_or_default().to_uppercase();
                    row.set_string(1, &loud)?;
                }
            }
            Ok(())
        }
    }

    struct GreetingExtension {
        binder: Arc<Shouting>,
    }

    impl Extension for GreetingExtension {
        fn name(&self) -> &str {
            "greeting"
        }

        fn compiler(&self) -> Option<Arc<dyn CompilerExtension>> {
            Some(Arc::new(GreetingCompiler))
        }

        fn binder(&self) -> Option<Arc<dyn BinderExtension>> {
            Some(self.binder.clone())
        }
    }

    fn greeting_set() -> (ExtensionSet, Arc<Shouting>) {
        let shouting = Arc::new(Shouting::default());
        let mut set = ExtensionSet::new();
        set.register(Arc::new(GreetingExtension {
            binder: shouting.clone(),
        }))
        .expect("register");
        (set, shouting)
    }

    #[test]
    fn extension_tables_flow_from_compile_to_package() {
        let (extensions, shouting) = greeting_set();
        let messaging = Messaging::default();
        let sources = map(&[("product.wxs", &product()), ("en-US.wxl", ENGLISH)]);
        let options = PreprocessOptions::default();

        let intermediates = compile_sources_from_xml_map(
            &sources,
            &["product.wxs".to_string()],
            &options,
            &extensions,
            &messaging,
        )
        .expect("compile");
        let localizations =
            compile_localizations(&sources, &["en-US.wxl".to_string()], &options, &messaging).expect("loc");

        let payload = tempfile::tempdir().expect("payload");
        fs::write(payload.path().join("app.exe"), b"MZ").expect("app");
        let out = tempfile::tempdir().expect("out");
        let package_path = out.path().join("demo.msi");
        let summary = build_package(
            &intermediates,
            &[],
            &extensions,
            &PackageOptions {
                bind: BindOptions {
                    culture: Some("en-US".to_string()),
                    cabinet_threads: 1,
                    ..BindOptions::default()
                },
                bind_paths: vec![BindPath::parse(&payload.path().to_string_lossy(), BindStage::Normal)],
                localizations,
                ..PackageOptions::default()
            },
            &package_path,
            &messaging,
        )
        .expect("package");

        assert!(package_path.is_file());
        assert_eq!(shouting.calls.load(Ordering::SeqCst), 1);
        let greeting = summary.output.table("Greeting").expect("greeting table");
        assert_eq!(greeting.rows[0].get_string(1), Some("HELLO WORLD"));
        assert!(!messaging.encountered_error(), "{:?}", messaging.messages());
    }

    #[test]
    fn unknown_extension_elements_fail_the_compile() {
        let messaging = Messaging::default();
        let sources = map(&[("product.wxs", &product())]);
        let error = compile_sources_from_xml_map(
            &sources,
            &["product.wxs".to_string()],
            &PreprocessOptions::default(),
            &ExtensionSet::new(),
            &messaging,
        )
        .expect_err("greeting has no handler");
        assert!(matches!(error, ApiError::Compile(count) if count > 0));
    }

    #[test]
    fn panics_become_unexpected_exceptions() {
        let messaging = Messaging::default();
        let result: Result<(), ApiError> = guarded(&messaging, || panic!("handler exploded"));
        match result {
            Err(ApiError::Wix(error)) => {
                assert_eq!(error.code, MessageCode::UnexpectedException);
                assert!(error.message.starts_with("handler exploded\nbacktrace:\n"));
            }
            other => panic!("expected an unexpected exception, got {:?}", other.map(|_| ())),
        }
        assert!(messaging.has_code(MessageCode::UnexpectedException));

        let calm: Result<u8, ApiError> = guarded(&messaging, || Ok(7));
        assert_eq!(calm.expect("no panic"), 7);
        assert_eq!(PANIC_BACKTRACE.with(|slot| slot.borrow().clone()), None);
    }

    #[test]
    fn identical_outputs_make_no_transform() {
        let (extensions, _) = greeting_set();
        let messaging = Messaging::default();
        let sources = map(&[("product.wxs", &product())]);
        let intermediates = compile_sources_from_xml_map(
            &sources,
            &["product.wxs".to_string()],
            &PreprocessOptions::default(),
            &extensions,
            &messaging,
        )
        .expect("compile");
        let output = link_output(&intermediates, &[], &extensions, &LinkOptions::default(), &[], &messaging)
            .expect("link");
        let error = create_transform(&output, &output, &DiffOptions::default(), &messaging).expect_err("no diff");
        assert!(matches!(error, ApiError::Diff(ref diff) if diff.has_code(MessageCode::NoDifferences)));
    }

    #[test]
    fn changed_payload_content_alone_makes_a_transform() {
        let (extensions, _) = greeting_set();
        let messaging = Messaging::default();
        let sources = map(&[("product.wxs", &product())]);
        let intermediates = compile_sources_from_xml_map(
            &sources,
            &["product.wxs".to_string()],
            &PreprocessOptions::default(),
            &extensions,
            &messaging,
        )
        .expect("compile");
        let output = link_output(&intermediates, &[], &extensions, &LinkOptions::default(), &[], &messaging)
            .expect("link");

        let root = tempfile::tempdir().expect("temp");
        for (build, content) in [("v1", "MZ1"), ("v2", "MZ2"), ("v3", "MZ1")] {
            fs::create_dir_all(root.path().join(build)).expect("mkdir");
            fs::write(root.path().join(build).join("app.exe"), content).expect("payload");
        }
        let bind_path = |build: &str, stage: BindStage| BindPath {
            name: None,
            path: root.path().join(build),
            stage,
        };

        let changed = [bind_path("v1", BindStage::Target), bind_path("v2", BindStage::Updated)];
        let transform = create_patch_transform(&output, &output, &DiffOptions::default(), &changed, &messaging)
            .expect("payload changed");
        let row = transform.table("File").and_then(|table| table.find("AppExe")).expect("AppExe");
        assert_eq!(row.operation, wx_core::RowOperation::Modify);

        let same = [bind_path("v1", BindStage::Target), bind_path("v3", BindStage::Updated)];
        let error = create_patch_transform(&output, &output, &DiffOptions::default(), &same, &Messaging::default())
            .expect_err("same content");
        assert!(matches!(error, ApiError::Diff(ref diff) if diff.has_code(MessageCode::NoDifferences)));
    }
}
