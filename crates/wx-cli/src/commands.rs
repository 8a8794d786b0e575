use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use wx_api::{
    build_library, build_package, compile_files, compile_localizations, create_patch_transform, link_output,
    load_inputs, ExtensionSet, LoadedInputs, PackageOptions,
};
use wx_binder::{BindOptions, BindPath, BindStage};
use wx_core::format::{write_intermediate, write_library, write_output, FileFormat};
use wx_core::{Localization, MessageCode, Messaging, Output, OutputType, WixError};
use wx_differ::{DiffOptions, TransformFlags};
use wx_linker::LinkOptions;
use wx_parser::{FileSystemResolver, PreprocessOptions};

use crate::cli_args::{CompileArgs, DiffArgs, LibArgs, LinkArgs, OutputKind};
use crate::config::WxConfig;
use crate::error_map::{map_io, map_write};
use crate::source_loader::{expand_inputs, source_root};
use crate::{CliError, CommonArgs};

pub(crate) fn run_compile(args: &CompileArgs, config: &WxConfig, messaging: &Messaging) -> Result<(), CliError> {
    let files = expand_inputs(&args.sources, &["wxs"])?;
    let root = source_root(&files)?;

    let mut options = PreprocessOptions::default();
    for (name, value) in &config.compile.defines {
        options.variables.define(name.clone(), value.clone());
    }
    for define in &args.defines {
        let (name, value) = define.split_once('=').unwrap_or((define.as_str(), ""));
        options.variables.define(name, value);
    }
    options.include_paths = config
        .compile
        .include_paths
        .iter()
        .chain(&args.include_paths)
        .map(|path| root.relative(path).unwrap_or_else(|| path.to_string_lossy().replace('\\', "/")))
        .collect();

    let intermediates = compile_files(&root.root, &root.entries, &options, &ExtensionSet::new(), messaging)?;
    fs::create_dir_all(&args.out).map_err(|error| map_io(&args.out, error))?;
    for (file, intermediate) in files.iter().zip(&intermediates) {
        let stem = file.file_stem().unwrap_or_default();
        let path = args
            .out
            .join(stem)
            .with_extension(FileFormat::Object.extension());
        write_file(&path, &write_intermediate(intermediate)?)?;
        println!("{}", path.display());
    }
    Ok(())
}

pub(crate) fn run_lib(args: &LibArgs, config: &WxConfig, messaging: &Messaging) -> Result<(), CliError> {
    let extensions = ExtensionSet::new();
    let files = expand_inputs(&args.inputs, &[FileFormat::Object.extension()])?;
    let inputs = load_inputs(&files, &extensions, config.link.allow_incomplete_sections, messaging)?;
    expect_only(&inputs, FileFormat::Object)?;
    let localizations = load_localizations(&args.localizations, messaging)?;

    let id = args
        .out
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "library".to_string());
    let library = build_library(&id, &inputs.intermediates, &localizations, messaging)?;
    write_file(&args.out, &write_library(&library)?)?;
    println!("{}", args.out.display());
    Ok(())
}

pub(crate) fn run_link(
    args: &LinkArgs,
    common: &CommonArgs,
    config: &WxConfig,
    messaging: &Messaging,
) -> Result<(), CliError> {
    let extensions = ExtensionSet::new();
    let files = expand_inputs(
        &args.inputs,
        &[FileFormat::Object.extension(), FileFormat::Library.extension()],
    )?;
    let inputs = load_inputs(&files, &extensions, config.link.allow_incomplete_sections, messaging)?;
    if !inputs.outputs.is_empty() {
        return Err(WixError::new(
            MessageCode::UnexpectedFileFormat,
            "Linked outputs cannot be linked again.",
        )
        .into());
    }
    let localizations = load_localizations(&args.localizations, messaging)?;
    let link = LinkOptions {
        output_type: match args.output_type {
            OutputKind::Product => OutputType::Product,
            OutputKind::Module => OutputType::Module,
        },
        pedantic: common.pedantic || config.compile.pedantic,
    };

    let stops_after_link = args
        .out
        .extension()
        .is_some_and(|extension| extension.eq_ignore_ascii_case(FileFormat::Output.extension()));
    if stops_after_link {
        let output = link_output(
            &inputs.intermediates,
            &inputs.libraries,
            &extensions,
            &link,
            &localizations,
            messaging,
        )?;
        write_file(&args.out, &write_output(&output)?)?;
        println!("{}", args.out.display());
        return Ok(());
    }

    let defaults = BindOptions::default();
    let options = PackageOptions {
        link,
        bind: BindOptions {
            culture: args.culture.clone().or_else(|| config.bind.culture.clone()),
            cabinet_threads: args
                .cabinet_threads
                .or(config.bind.cabinet_threads)
                .unwrap_or(defaults.cabinet_threads),
            tidy: config.bind.tidy && !args.no_tidy,
            ..defaults
        },
        bind_paths: config
            .bind
            .bind_paths
            .iter()
            .chain(&args.bind_paths)
            .map(|path| BindPath::parse(path, BindStage::Normal))
            .collect(),
        cabinet_cache: args.cabinet_cache.clone().or_else(|| config.bind.cabinet_cache.clone()),
        localizations,
    };
    let summary = build_package(
        &inputs.intermediates,
        &inputs.libraries,
        &extensions,
        &options,
        &args.out,
        messaging,
    )?;
    if let Some(wixout) = &args.wixout {
        write_file(wixout, &write_output(&summary.output)?)?;
    }
    info!(
        "{} cabinet(s), {} uncompressed file(s)",
        summary.cabinets.len(),
        summary.layout_files.len()
    );
    println!("{}", summary.package_path.display());
    Ok(())
}

pub(crate) fn run_diff(args: &DiffArgs, config: &WxConfig, messaging: &Messaging) -> Result<(), CliError> {
    let extensions = ExtensionSet::new();
    let target = load_output(&args.target, &extensions, config, messaging)?;
    let updated = load_output(&args.updated, &extensions, config, messaging)?;
    let options = DiffOptions {
        preserve_unchanged_rows: args.preserve_unchanged,
        flags: args
            .flags
            .map(TransformFlags::from_bits)
            .unwrap_or(TransformFlags::DEFAULT_VALIDATION),
    };
    let bind_paths = args
        .target_bind_paths
        .iter()
        .map(|path| BindPath::parse(path, BindStage::Target))
        .chain(args.updated_bind_paths.iter().map(|path| BindPath::parse(path, BindStage::Updated)))
        .collect::<Vec<_>>();
    let transform = create_patch_transform(&target, &updated, &options, &bind_paths, messaging)?;
    write_file(&args.out, &write_output(&transform)?)?;
    println!("{}", args.out.display());
    Ok(())
}

fn load_output(
    path: &Path,
    extensions: &ExtensionSet,
    config: &WxConfig,
    messaging: &Messaging,
) -> Result<Output, CliError> {
    let mut inputs = load_inputs(
        &[path.to_path_buf()],
        extensions,
        config.link.allow_incomplete_sections,
        messaging,
    )?;
    expect_only(&inputs, FileFormat::Output)?;
    inputs.outputs.pop().ok_or_else(|| {
        CliError::Wix(WixError::new(
            MessageCode::UnexpectedFileFormat,
            format!("'{}' is not a linked output.", path.display()),
        ))
    })
}

fn expect_only(inputs: &LoadedInputs, format: FileFormat) -> Result<(), WixError> {
    let others = match format {
        FileFormat::Object => inputs.libraries.len() + inputs.outputs.len(),
        FileFormat::Library => inputs.intermediates.len() + inputs.outputs.len(),
        FileFormat::Output => inputs.intermediates.len() + inputs.libraries.len(),
    };
    if others > 0 {
        return Err(WixError::new(
            MessageCode::UnexpectedFileFormat,
            format!("Expected only {} files as input.", format),
        ));
    }
    Ok(())
}

/// Each `.wxl` is read relative to its own directory.
fn load_localizations(paths: &[PathBuf], messaging: &Messaging) -> Result<Vec<Localization>, CliError> {
    let mut localizations = Vec::new();
    for path in expand_inputs(paths, &["wxl"])? {
        let resolver = FileSystemResolver {
            root: path.parent().map(Path::to_path_buf).unwrap_or_default(),
        };
        let entry = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        localizations.extend(compile_localizations(
            &resolver,
            &[entry],
            &PreprocessOptions::default(),
            messaging,
        )?);
    }
    Ok(localizations)
}

fn write_file(path: &Path, text: &str) -> Result<(), WixError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|error| map_io(parent, error))?;
    }
    fs::write(path, text).map_err(|error| map_write(path, error))
}
