use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use walkdir::WalkDir;

use crate::{TestCase, WxToolError, TESTCASE_SCHEMA_V1};

const SOURCE_EXTENSIONS: [&str; 2] = [".wxs", ".wxi"];

/// `.wxs` and `.wxi` files under `fixture_dir`, keyed by their
/// `/`-separated path relative to it.
pub fn read_sources_from_dir(fixture_dir: &Path) -> Result<BTreeMap<String, String>, WxToolError> {
    let mut sources = BTreeMap::new();

    for entry in WalkDir::new(fixture_dir)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let path_str = path.to_string_lossy();
        if !SOURCE_EXTENSIONS.iter().any(|extension| path_str.ends_with(extension)) {
            continue;
        }

        let Ok(relative) = path.strip_prefix(fixture_dir) else {
            continue;
        };
        let relative = relative.to_string_lossy().replace('\\', "/");

        let content = fs::read_to_string(path).map_err(|source| WxToolError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        sources.insert(relative, content);
    }

    if !sources.keys().any(|key| key.ends_with(".wxs")) {
        return Err(WxToolError::SourceEmpty {
            path: fixture_dir.to_path_buf(),
        });
    }

    Ok(sources)
}

/// Entries named by the case, or every `.wxs` source in path order.
pub fn case_entries(case: &TestCase, sources: &BTreeMap<String, String>) -> Result<Vec<String>, WxToolError> {
    if case.entries.is_empty() {
        return Ok(sources.keys().filter(|key| key.ends_with(".wxs")).cloned().collect());
    }
    for entry in &case.entries {
        if !sources.contains_key(entry) {
            return Err(WxToolError::MissingEntry { entry: entry.clone() });
        }
    }
    Ok(case.entries.clone())
}

pub fn read_test_case(case_path: &Path) -> Result<TestCase, WxToolError> {
    let raw = fs::read_to_string(case_path).map_err(|source| WxToolError::ReadFile {
        path: case_path.to_path_buf(),
        source,
    })?;
    let parsed: TestCase = serde_json::from_str(&raw).map_err(|source| WxToolError::ParseCase {
        path: case_path.to_path_buf(),
        source,
    })?;

    if parsed.schema_version != TESTCASE_SCHEMA_V1 {
        return Err(WxToolError::InvalidSchemaVersion {
            expected: TESTCASE_SCHEMA_V1.to_string(),
            found: parsed.schema_version,
        });
    }

    Ok(parsed)
}
