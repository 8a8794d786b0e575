use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info, warn};
use wx_core::columns::{binary, directory, file, media, wix_file};
use wx_core::{MessageCode, Messaging, Output, WixError};

use crate::cabinet::{build_cabinets, CabinetCodec, CabinetFile, CabinetJob, CabinetPlan, StoredCabinetCodec};
use crate::error::{BindError, Problems};
use crate::fields::{resolve_fields, validate_file_references, Pass};
use crate::file_manager::{io_error, BindStage, BuildOption, DefaultFileManager, FileManager};
use crate::package::write_package;
use crate::sequence::{assign_sequences, long_name, MediaLayout};
use crate::validate::validate_rows;

/// Hooks into the bind steps. Every method may rewrite the output.
pub trait BinderExtension: Send + Sync {
    fn initialize(&self, output: &mut Output) -> Result<(), WixError> {
        let _ = output;
        Ok(())
    }

    /// Runs once `!(loc|wix|bind.property)` variables are substituted.
    fn after_resolved_fields(&self, output: &mut Output) -> Result<(), WixError> {
        let _ = output;
        Ok(())
    }

    /// Runs after cabinets are built, before the package is written.
    fn finish(&self, output: &mut Output) -> Result<(), WixError> {
        let _ = output;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct BindOptions {
    pub culture: Option<String>,
    /// `!(wix.X)` values from the command line.
    pub variables: BTreeMap<String, String>,
    pub cabinet_threads: usize,
    /// Delete the temp workspace when binding ends.
    pub tidy: bool,
    /// Where uncompressed files and external cabinets go. Defaults to the
    /// package's directory.
    pub layout_directory: Option<PathBuf>,
}

impl Default for BindOptions {
    fn default() -> Self {
        Self {
            culture: None,
            variables: BTreeMap::new(),
            cabinet_threads: std::thread::available_parallelism().map_or(1, usize::from),
            tidy: true,
            layout_directory: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BindSummary {
    pub package_path: PathBuf,
    /// External cabinets written next to the package.
    pub cabinets: Vec<PathBuf>,
    /// Uncompressed files copied into the layout.
    pub layout_files: Vec<PathBuf>,
    /// Temp workspace left behind because `tidy` was off.
    pub retained_temp: Option<PathBuf>,
    /// The output as written, with fields resolved and files sequenced.
    pub output: Output,
}

pub struct Binder {
    extensions: Vec<Arc<dyn BinderExtension>>,
    file_manager: Arc<dyn FileManager>,
    codec: Arc<dyn CabinetCodec>,
}

impl Default for Binder {
    fn default() -> Self {
        Self::new(Arc::new(DefaultFileManager::default()))
    }
}

impl Binder {
    pub fn new(file_manager: Arc<dyn FileManager>) -> Self {
        Self {
            extensions: Vec::new(),
            file_manager,
            codec: Arc::new(StoredCabinetCodec),
        }
    }

    pub fn with_codec(mut self, codec: Arc<dyn CabinetCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn add_extension(&mut self, extension: Arc<dyn BinderExtension>) {
        self.extensions.push(extension);
    }

    pub fn file_manager(&self) -> &Arc<dyn FileManager> {
        &self.file_manager
    }

    /// Binds `output` into the package at `package_path`.
    pub fn bind(
        &self,
        output: Output,
        package_path: &Path,
        options: &BindOptions,
        messaging: &Messaging,
    ) -> Result<BindSummary, BindError> {
        let mut problems = Problems::new(messaging);
        let temp = tempfile::Builder::new()
            .prefix("wx-bind")
            .tempdir()
            .map_err(|error| problems.fail(io_error(&std::env::temp_dir(), error)))?;
        info!("binding {} into {}", output.output_type.keyword(), package_path.display());

        let mut written = Vec::new();
        let result = self.bind_in(output, package_path, options, temp.path(), &mut written, &mut problems);
        let retained = if options.tidy {
            None
        } else {
            let kept = temp.keep();
            info!("temp files retained in {}", kept.display());
            Some(kept)
        };

        match result {
            Ok(mut summary) => {
                summary.retained_temp = retained;
                Ok(summary)
            }
            Err(error) => {
                for path in written.iter().map(PathBuf::as_path).chain([package_path]) {
                    if path.is_file() {
                        warn!("removing partial output {}", path.display());
                        let _ = fs::remove_file(path);
                    }
                }
                Err(error)
            }
        }
    }

    /// Every file placed outside `temp` is recorded in `written`.
    fn bind_in(
        &self,
        mut output: Output,
        package_path: &Path,
        options: &BindOptions,
        temp: &Path,
        written: &mut Vec<PathBuf>,
        problems: &mut Problems<'_>,
    ) -> Result<BindSummary, BindError> {
        let culture = options.culture.as_deref();
        self.run_extensions(&mut output, problems, |extension, output| extension.initialize(output))?;

        resolve_fields(&mut output, culture, &options.variables, Pass::Fields, problems);
        problems.check()?;
        self.run_extensions(&mut output, problems, |extension, output| {
            extension.after_resolved_fields(output)
        })?;

        self.resolve_files(&mut output, problems);
        problems.check()?;
        resolve_fields(&mut output, culture, &options.variables, Pass::FileSizes, problems);
        validate_file_references(&output, problems);
        problems.check()?;

        let layout = assign_sequences(&mut output, problems);
        problems.check()?;
        let plans = plan_cabinets(&mut output, &layout, problems);
        validate_rows(&output, problems);
        problems.check()?;

        let layout_directory = options
            .layout_directory
            .clone()
            .or_else(|| package_path.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));
        let jobs = self.cabinet_jobs(plans, temp, &layout_directory, problems)?;
        written.extend(jobs.iter().filter(|job| !job.plan.embedded).map(|job| job.destination.clone()));
        for error in build_cabinets(&jobs, self.codec.as_ref(), self.file_manager.as_ref(), options.cabinet_threads) {
            problems.error(error);
        }
        problems.check()?;

        let layout_files = self.copy_uncompressed(&output, &layout, &layout_directory, problems);
        written.extend(layout_files.iter().cloned());
        problems.check()?;
        self.run_extensions(&mut output, problems, |extension, output| extension.finish(output))?;

        let embedded = jobs
            .iter()
            .filter(|job| job.plan.embedded)
            .map(|job| (job.plan.name.clone(), job.destination.clone()))
            .collect::<Vec<_>>();
        let bytes = write_package(&output, &embedded).map_err(|error| problems.fail(error))?;
        let staged = temp.join("package.tmp");
        fs::write(&staged, bytes).map_err(|error| problems.fail(write_failed(&staged, error)))?;
        self.file_manager
            .move_file(&staged, package_path, true)
            .map_err(|error| problems.fail(error))?;
        info!("wrote {} with {} cabinet(s)", package_path.display(), jobs.len());

        Ok(BindSummary {
            package_path: package_path.to_path_buf(),
            cabinets: jobs
                .iter()
                .filter(|job| !job.plan.embedded)
                .map(|job| job.destination.clone())
                .collect(),
            layout_files,
            retained_temp: None,
            output,
        })
    }

    fn run_extensions(
        &self,
        output: &mut Output,
        problems: &mut Problems<'_>,
        hook: impl Fn(&dyn BinderExtension, &mut Output) -> Result<(), WixError>,
    ) -> Result<(), BindError> {
        for extension in &self.extensions {
            if let Err(error) = hook(extension.as_ref(), output) {
                problems.error(error);
            }
        }
        problems.check()
    }

    /// Points `WixFile.Source` and `Binary.Data` at real files and records
    /// file sizes.
    fn resolve_files(&self, output: &mut Output, problems: &mut Problems<'_>) {
        let mut sizes = BTreeMap::new();
        if let Some(table) = output.table_mut("WixFile") {
            for row in &mut table.rows {
                let Some(source) = row.get_string(wix_file::SOURCE).map(str::to_string) else { continue };
                let resolved = match self.file_manager.resolve_file(&source, BindStage::Normal, &row.source_line) {
                    Ok(resolved) => resolved,
                    Err(error) => {
                        problems.error(error);
                        continue;
                    }
                };
                debug!("{} -> {}", source, resolved.display());
                let size = fs::metadata(&resolved)
                    .map_err(|error| io_error(&resolved, error))
                    .and_then(|metadata| {
                        i32::try_from(metadata.len()).map_err(|_| io_error(&resolved, "file is too large"))
                    });
                match size {
                    Ok(size) => {
                        sizes.insert(row.primary_key(), size);
                    }
                    Err(error) => problems.error(error),
                }
                if let Err(error) = row.set_object(wix_file::SOURCE, &resolved.to_string_lossy()) {
                    problems.error(error);
                }
            }
        }

        if let Some(table) = output.table_mut("File") {
            for row in &mut table.rows {
                let Some(size) = sizes.get(&row.primary_key()) else { continue };
                if let Err(error) = row.set_number(file::FILE_SIZE, *size) {
                    problems.error(error);
                }
            }
        }

        if let Some(table) = output.table_mut("Binary") {
            for row in &mut table.rows {
                let Some(source) = row.get_string(binary::DATA).map(str::to_string) else { continue };
                match self.file_manager.resolve_file(&source, BindStage::Normal, &row.source_line) {
                    Ok(resolved) => {
                        if let Err(error) = row.set_object(binary::DATA, &resolved.to_string_lossy()) {
                            problems.error(error);
                        }
                    }
                    Err(error) => problems.error(error),
                }
            }
        }
    }

    fn cabinet_jobs(
        &self,
        plans: Vec<CabinetPlan>,
        temp: &Path,
        layout_directory: &Path,
        problems: &mut Problems<'_>,
    ) -> Result<Vec<CabinetJob>, BindError> {
        let scratch = temp.join("cabinets");
        let mut jobs = Vec::with_capacity(plans.len());
        for plan in plans {
            let prepared = plan.content_hash().and_then(|sha256| {
                let resolved = self.file_manager.resolve_cabinet(&plan.name, &sha256, &scratch)?;
                Ok((sha256, resolved))
            });
            let (sha256, resolved) = match prepared {
                Ok(prepared) => prepared,
                Err(error) => {
                    problems.error(error);
                    continue;
                }
            };
            if resolved.build_option == BuildOption::Copy {
                problems.warning(
                    MessageCode::CabinetReused,
                    format!("Reusing cached cabinet '{}'.", resolved.path.display()),
                    None,
                );
            }
            let destination = if plan.embedded {
                temp.join("embedded").join(&plan.name)
            } else {
                self.file_manager.resolve_media(plan.disk_id, layout_directory).join(&plan.name)
            };
            jobs.push(CabinetJob {
                plan,
                sha256,
                resolved,
                destination,
            });
        }
        problems.check()?;
        Ok(jobs)
    }

    fn copy_uncompressed(
        &self,
        output: &Output,
        layout: &MediaLayout,
        layout_directory: &Path,
        problems: &mut Problems<'_>,
    ) -> Vec<PathBuf> {
        let mut copied = Vec::new();
        for payload in layout.files().filter(|payload| !payload.compressed) {
            let destination = self
                .file_manager
                .resolve_media(payload.disk_id, layout_directory)
                .join(directory_path(output, &payload.directory))
                .join(&payload.file_name);
            match self.file_manager.copy_file(&payload.source, &destination, true) {
                Ok(()) => copied.push(destination),
                Err(error) => problems.error(error),
            }
        }
        copied
    }
}

/// One cabinet per disk that has compressed files. Disks without a cabinet
/// name get `cab{DiskId}.cab`, written back to the Media row.
fn plan_cabinets(output: &mut Output, layout: &MediaLayout, problems: &mut Problems<'_>) -> Vec<CabinetPlan> {
    let mut plans = Vec::new();
    let Some(table) = output.table_mut("Media") else { return plans };
    for row in &mut table.rows {
        let Some(disk_id) = row.get_number(media::DISK_ID) else { continue };
        let files = layout
            .disks
            .get(&disk_id)
            .map(|files| {
                files
                    .iter()
                    .filter(|payload| payload.compressed)
                    .map(|payload| CabinetFile {
                        token: payload.id.clone(),
                        path: payload.source.clone(),
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        if files.is_empty() {
            continue;
        }
        let cabinet = match row.get_string(media::CABINET) {
            Some(cabinet) => cabinet.to_string(),
            None => {
                let name = format!("cab{}.cab", disk_id);
                if let Err(error) = row.set_string(media::CABINET, &name) {
                    problems.error(error);
                }
                name
            }
        };
        let (name, embedded) = match cabinet.strip_prefix('#') {
            Some(name) => (name.to_string(), true),
            None => (cabinet, false),
        };
        debug!("disk {} -> cabinet {} with {} file(s)", disk_id, name, files.len());
        plans.push(CabinetPlan {
            disk_id,
            name,
            embedded,
            files,
        });
    }
    plans
}

/// Source-side relative path of a directory, from its `DefaultDir` chain.
pub(crate) fn directory_path(output: &Output, id: &str) -> PathBuf {
    let Some(table) = output.table("Directory") else { return PathBuf::new() };
    let mut parts = Vec::new();
    let mut current = Some(id.to_string());
    let mut remaining = table.len();
    while let Some(key) = current.take() {
        let Some(row) = table.find(&key) else { break };
        let default_dir = row.get_string(directory::DEFAULT_DIR).unwrap_or_default();
        let source = default_dir.split_once(':').map_or(default_dir, |(_, source)| source);
        let name = long_name(source);
        if !matches!(name, "" | "." | "SourceDir") {
            parts.push(name.to_string());
        }
        remaining = remaining.saturating_sub(1);
        if remaining == 0 {
            break;
        }
        current = row
            .get_string(directory::PARENT)
            .filter(|parent| *parent != key)
            .map(str::to_string);
    }
    parts.iter().rev().collect()
}

fn write_failed(path: &Path, error: impl std::fmt::Display) -> WixError {
    WixError::new(
        MessageCode::OutputWriteFailed,
        format!("Failed to write '{}': {}.", path.display(), error),
    )
}
