//! Locating payload files and deciding how cabinets are produced.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use log::{debug, trace};
use serde::{Deserialize, Serialize};
use wx_core::{MessageCode, SourceLineNumber, WixError};

/// Which build a bind path belongs to. Only differs from `Normal` when two
/// builds are bound side by side for patching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BindStage {
    #[default]
    Normal,
    Target,
    Updated,
}

/// A search directory, optionally named for `!(bindpath.name)` sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindPath {
    pub name: Option<String>,
    pub path: PathBuf,
    pub stage: BindStage,
}

impl BindPath {
    /// Parses `dir` or `name=dir`.
    pub fn parse(text: &str, stage: BindStage) -> Self {
        match text.split_once('=') {
            Some((name, path)) if !name.is_empty() && !name.contains(['/', '\\']) => Self {
                name: Some(name.to_string()),
                path: PathBuf::from(path),
                stage,
            },
            _ => Self {
                name: None,
                path: PathBuf::from(text),
                stage,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BuildOption {
    /// Build into the temp workspace, then move to the destination.
    BuildAndMove,
    /// Build into the cabinet cache, then copy to the destination.
    BuildAndCopy,
    /// Reuse the cached cabinet as-is.
    Copy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCabinet {
    pub build_option: BuildOption,
    /// Where the cabinet is built (or found, for `Copy`).
    pub path: PathBuf,
}

/// Manifest stored next to each cached cabinet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CabinetManifest {
    pub cabinet: String,
    pub sha256: String,
    pub files: Vec<String>,
}

/// Pluggable strategy for everything the binder does with the file system.
pub trait FileManager: Send + Sync {
    /// Turns an authored source into an existing path.
    fn resolve_file(
        &self,
        source: &str,
        stage: BindStage,
        location: &SourceLineNumber,
    ) -> Result<PathBuf, WixError>;

    /// Decides how the cabinet `name` with content hash `sha256` is
    /// produced. `scratch` is the temp directory for fresh builds.
    fn resolve_cabinet(
        &self,
        name: &str,
        sha256: &str,
        scratch: &Path,
    ) -> Result<ResolvedCabinet, WixError>;

    /// Directory that receives uncompressed files of disk `disk_id`.
    fn resolve_media(&self, disk_id: i32, layout_directory: &Path) -> PathBuf {
        let _ = disk_id;
        layout_directory.to_path_buf()
    }

    /// Expands a download url template; `{0}` is the file name.
    fn resolve_url(&self, template: &str, file_name: &str) -> String {
        template.replace("{0}", file_name)
    }

    /// Whether two files have the same content.
    fn compare_files(&self, target: &Path, updated: &Path) -> Result<bool, WixError> {
        Ok(read(target)? == read(updated)?)
    }

    fn copy_file(&self, from: &Path, to: &Path, overwrite: bool) -> Result<(), WixError> {
        if !overwrite && to.exists() {
            return Err(io_error(to, "already exists"));
        }
        ensure_parent(to)?;
        fs::copy(from, to).map_err(|error| io_error(to, error))?;
        Ok(())
    }

    fn move_file(&self, from: &Path, to: &Path, overwrite: bool) -> Result<(), WixError> {
        if to.exists() {
            if !overwrite {
                return Err(io_error(to, "already exists"));
            }
            fs::remove_file(to).map_err(|error| io_error(to, error))?;
        }
        ensure_parent(to)?;
        if fs::rename(from, to).is_err() {
            fs::copy(from, to).map_err(|error| io_error(to, error))?;
            fs::remove_file(from).map_err(|error| io_error(from, error))?;
        }
        Ok(())
    }
}

/// Bind-path search plus a content-hashed cabinet cache.
#[derive(Debug, Clone, Default)]
pub struct DefaultFileManager {
    bind_paths: Vec<BindPath>,
    cabinet_cache: Option<PathBuf>,
}

impl DefaultFileManager {
    pub fn new(bind_paths: Vec<BindPath>, cabinet_cache: Option<PathBuf>) -> Self {
        Self {
            bind_paths,
            cabinet_cache,
        }
    }

    pub fn bind_paths(&self) -> &[BindPath] {
        &self.bind_paths
    }

    fn search<'a>(&'a self, stage: BindStage, name: Option<&'a str>) -> impl Iterator<Item = &'a Path> + 'a {
        self.bind_paths
            .iter()
            .filter(move |bind_path| bind_path.stage == stage && bind_path.name.as_deref() == name)
            .map(|bind_path| bind_path.path.as_path())
    }
}

impl FileManager for DefaultFileManager {
    fn resolve_file(
        &self,
        source: &str,
        stage: BindStage,
        location: &SourceLineNumber,
    ) -> Result<PathBuf, WixError> {
        let not_found = |searched: &str| {
            WixError::with_location(
                MessageCode::FileNotFound,
                format!("The system cannot find the file '{}'{}.", source, searched),
                location.clone(),
            )
        };

        if let Some(rest) = source.strip_prefix("!(bindpath.") {
            let Some((name, relative)) = rest.split_once(')') else {
                return Err(not_found(""));
            };
            let relative = relative.trim_start_matches(['\\', '/']);
            let found = self
                .search(stage, Some(name))
                .map(|directory| directory.join(relative))
                .find(|candidate| candidate.is_file());
            return found.ok_or_else(|| not_found(&format!(" in bind path '{}'", name)));
        }

        let path = Path::new(source);
        if path.is_absolute() {
            return if path.is_file() {
                Ok(path.to_path_buf())
            } else {
                Err(not_found(""))
            };
        }
        for directory in self.search(stage, None) {
            let candidate = directory.join(path);
            trace!("probing {}", candidate.display());
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        Err(not_found(""))
    }

    fn resolve_cabinet(
        &self,
        name: &str,
        sha256: &str,
        scratch: &Path,
    ) -> Result<ResolvedCabinet, WixError> {
        let Some(cache) = &self.cabinet_cache else {
            return Ok(ResolvedCabinet {
                build_option: BuildOption::BuildAndMove,
                path: scratch.join(name),
            });
        };
        let cached = cache.join(name);
        let manifest_path = manifest_path(&cached);
        if cached.is_file() && manifest_path.is_file() {
            let text = fs::read_to_string(&manifest_path).map_err(|error| io_error(&manifest_path, error))?;
            let manifest: CabinetManifest = serde_json::from_str(&text).map_err(|error| {
                WixError::new(
                    MessageCode::CabinetCacheCorrupt,
                    format!("Cabinet cache manifest '{}' is unreadable: {}.", manifest_path.display(), error),
                )
            })?;
            if manifest.sha256 == sha256 {
                debug!("cabinet {} is up to date in the cache", name);
                return Ok(ResolvedCabinet {
                    build_option: BuildOption::Copy,
                    path: cached,
                });
            }
        }
        Ok(ResolvedCabinet {
            build_option: BuildOption::BuildAndCopy,
            path: cached,
        })
    }
}

pub fn manifest_path(cabinet: &Path) -> PathBuf {
    let mut name = cabinet.file_name().unwrap_or_default().to_os_string();
    name.push(".json");
    cabinet.with_file_name(name)
}

fn read(path: &Path) -> Result<Vec<u8>, WixError> {
    let mut bytes = Vec::new();
    fs::File::open(path)
        .and_then(|mut file| file.read_to_end(&mut bytes))
        .map_err(|error| io_error(path, error))?;
    Ok(bytes)
}

fn ensure_parent(path: &Path) -> Result<(), WixError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).map_err(|error| io_error(parent, error))
        }
        _ => Ok(()),
    }
}

pub(crate) fn io_error(path: &Path, error: impl std::fmt::Display) -> WixError {
    WixError::new(MessageCode::IoError, format!("{}: {}", path.display(), error))
}

#[cfg(test)]
mod file_manager_tests {
    use super::*;

    fn write(path: &Path, text: &str) {
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, text).expect("write");
    }

    #[test]
    fn bind_paths_are_searched_in_order_and_by_name() {
        let root = tempfile::tempdir().expect("tempdir");
        write(&root.path().join("first/app.exe"), "one");
        write(&root.path().join("second/app.exe"), "two");
        write(&root.path().join("named/tool.exe"), "tool");
        let manager = DefaultFileManager::new(
            vec![
                BindPath::parse(&root.path().join("first").to_string_lossy(), BindStage::Normal),
                BindPath::parse(&root.path().join("second").to_string_lossy(), BindStage::Normal),
                BindPath {
                    name: Some("tools".to_string()),
                    path: root.path().join("named"),
                    stage: BindStage::Normal,
                },
            ],
            None,
        );
        let location = SourceLineNumber::at("product.wxs", 3);

        let found = manager.resolve_file("app.exe", BindStage::Normal, &location).expect("found");
        assert_eq!(found, root.path().join("first/app.exe"));
        let named = manager
            .resolve_file("!(bindpath.tools)\\tool.exe", BindStage::Normal, &location)
            .expect("named");
        assert_eq!(named, root.path().join("named/tool.exe"));

        let missing = manager
            .resolve_file("app.exe", BindStage::Updated, &location)
            .expect_err("no updated paths");
        assert_eq!(missing.code, MessageCode::FileNotFound);
        assert_eq!(missing.location, Some(location));
    }

    #[test]
    fn named_bind_paths_parse_from_text() {
        let parsed = BindPath::parse("bin=out/release", BindStage::Target);
        assert_eq!(parsed.name.as_deref(), Some("bin"));
        assert_eq!(parsed.path, PathBuf::from("out/release"));
        assert_eq!(BindPath::parse("C:/tools", BindStage::Normal).name, None);
    }

    #[test]
    fn cabinet_cache_decides_between_reuse_and_rebuild() {
        let cache = tempfile::tempdir().expect("cache");
        let scratch = tempfile::tempdir().expect("scratch");
        let manager = DefaultFileManager::new(Vec::new(), Some(cache.path().to_path_buf()));

        let first = manager.resolve_cabinet("a.cab", "abc", scratch.path()).expect("resolve");
        assert_eq!(first.build_option, BuildOption::BuildAndCopy);

        fs::write(cache.path().join("a.cab"), b"cab").expect("cab");
        let manifest = CabinetManifest {
            cabinet: "a.cab".to_string(),
            sha256: "abc".to_string(),
            files: vec!["app.exe".to_string()],
        };
        fs::write(
            manifest_path(&cache.path().join("a.cab")),
            serde_json::to_string(&manifest).expect("json"),
        )
        .expect("manifest");
        let reused = manager.resolve_cabinet("a.cab", "abc", scratch.path()).expect("resolve");
        assert_eq!(reused.build_option, BuildOption::Copy);
        let stale = manager.resolve_cabinet("a.cab", "def", scratch.path()).expect("resolve");
        assert_eq!(stale.build_option, BuildOption::BuildAndCopy);

        fs::write(manifest_path(&cache.path().join("a.cab")), "{not json").expect("corrupt");
        let corrupt = manager.resolve_cabinet("a.cab", "abc", scratch.path()).expect_err("corrupt");
        assert_eq!(corrupt.code, MessageCode::CabinetCacheCorrupt);

        let uncached = DefaultFileManager::default()
            .resolve_cabinet("a.cab", "abc", scratch.path())
            .expect("resolve");
        assert_eq!(uncached.build_option, BuildOption::BuildAndMove);
        assert_eq!(uncached.path, scratch.path().join("a.cab"));
    }
}
