use std::path::{Path, PathBuf};

use walkdir::WalkDir;
use wx_core::{MessageCode, WixError};

use crate::error_map::map_io;

/// Source files relative to their deepest shared directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SourceRoot {
    pub(crate) root: PathBuf,
    pub(crate) entries: Vec<String>,
}

impl SourceRoot {
    /// `path` as a virtual path below the root, when it is below it.
    pub(crate) fn relative(&self, path: &Path) -> Option<String> {
        let absolute = absolute(path).ok()?;
        absolute.strip_prefix(&self.root).ok().map(virtual_path)
    }
}

/// Files named on the command line, with directories walked for files of
/// the given extensions. Order is command-line order, then path order
/// within a directory.
pub(crate) fn expand_inputs(paths: &[PathBuf], extensions: &[&str]) -> Result<Vec<PathBuf>, WixError> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_file() {
            files.push(path.clone());
            continue;
        }
        if !path.is_dir() {
            return Err(WixError::new(
                MessageCode::FileNotFound,
                format!("Input '{}' does not exist.", path.display()),
            ));
        }

        let mut found = WalkDir::new(path)
            .follow_links(false)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|file| has_extension(file, extensions))
            .collect::<Vec<_>>();
        found.sort();
        if found.is_empty() {
            return Err(WixError::new(
                MessageCode::FileNotFound,
                format!(
                    "No .{} files under {}",
                    extensions.join("/."),
                    path.display()
                ),
            ));
        }
        files.extend(found);
    }
    Ok(files)
}

pub(crate) fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|extension| extension.to_str())
        .is_some_and(|extension| extensions.iter().any(|wanted| extension.eq_ignore_ascii_case(wanted)))
}

pub(crate) fn source_root(files: &[PathBuf]) -> Result<SourceRoot, WixError> {
    let absolute_files = files.iter().map(|file| absolute(file)).collect::<Result<Vec<_>, _>>()?;
    let mut root = absolute_files
        .first()
        .and_then(|file| file.parent())
        .map(Path::to_path_buf)
        .unwrap_or_default();
    for file in &absolute_files {
        while !file.starts_with(&root) {
            if !root.pop() {
                break;
            }
        }
    }

    let entries = absolute_files
        .iter()
        .map(|file| {
            file.strip_prefix(&root)
                .map(virtual_path)
                .map_err(|error| WixError::unexpected(error.to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(SourceRoot { root, entries })
}

fn absolute(path: &Path) -> Result<PathBuf, WixError> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let current = std::env::current_dir().map_err(|error| map_io(Path::new("."), error))?;
    Ok(current.join(path))
}

fn virtual_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
