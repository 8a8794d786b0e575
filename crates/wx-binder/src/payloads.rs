//! Payload comparison between a target and an updated build.

use std::collections::{BTreeMap, BTreeSet};

use log::debug;
use wx_core::columns::wix_file;
use wx_core::{Output, SourceLineNumber, WixError};

use crate::file_manager::{BindStage, FileManager};

/// Keys of the files present in both builds whose content differs. Target
/// sources resolve through [`BindStage::Target`] bind paths, updated
/// sources through [`BindStage::Updated`].
pub fn changed_payloads(
    target: &Output,
    updated: &Output,
    file_manager: &dyn FileManager,
) -> Result<BTreeSet<String>, WixError> {
    let target_sources = payload_sources(target);
    let mut changed = BTreeSet::new();
    for (key, (updated_source, updated_line)) in payload_sources(updated) {
        let Some((target_source, target_line)) = target_sources.get(&key) else {
            continue;
        };
        let target_path = file_manager.resolve_file(target_source, BindStage::Target, target_line)?;
        let updated_path = file_manager.resolve_file(updated_source, BindStage::Updated, updated_line)?;
        if !file_manager.compare_files(&target_path, &updated_path)? {
            debug!("payload of {} changed", key);
            changed.insert(key);
        }
    }
    Ok(changed)
}

fn payload_sources(output: &Output) -> BTreeMap<String, (&str, &SourceLineNumber)> {
    output
        .rows("WixFile")
        .filter_map(|row| {
            let source = row.get_string(wix_file::SOURCE)?;
            Some((row.primary_key(), (source, &row.source_line)))
        })
        .collect()
}

#[cfg(test)]
mod payloads_tests {
    use std::fs;
    use std::path::Path;

    use super::*;
    use crate::file_manager::{BindPath, DefaultFileManager};
    use wx_core::{OutputType, TableDefinitions};

    fn output(files: &[(&str, &str)]) -> Output {
        let definition = TableDefinitions::builtin().require("WixFile").expect("WixFile");
        let mut output = Output::new(OutputType::Product);
        let table = output.ensure_table(&definition);
        for (key, source) in files {
            let row = table.create_row(SourceLineNumber::at("product.wxs", 4));
            row.set_string(wix_file::FILE, key).expect("key");
            row.set_string(wix_file::DIRECTORY, "INSTALLFOLDER").expect("directory");
            row.set_number(wix_file::DISK_ID, 1).expect("disk");
            row.set_object(wix_file::SOURCE, source).expect("source");
        }
        output
    }

    fn stage(root: &Path, name: &str, stage: BindStage, files: &[(&str, &str)]) -> BindPath {
        let directory = root.join(name);
        fs::create_dir_all(&directory).expect("mkdir");
        for (file, content) in files {
            fs::write(directory.join(file), content).expect("write");
        }
        BindPath {
            name: None,
            path: directory,
            stage,
        }
    }

    #[test]
    fn payloads_resolve_per_build_and_compare_by_content() {
        let root = tempfile::tempdir().expect("temp");
        let manager = DefaultFileManager::new(
            vec![
                stage(root.path(), "v1", BindStage::Target, &[("app.exe", "MZ1"), ("readme.txt", "hi")]),
                stage(root.path(), "v2", BindStage::Updated, &[("app.exe", "MZ2"), ("readme.txt", "hi")]),
            ],
            None,
        );
        let target = output(&[("AppExe", "app.exe"), ("Readme", "readme.txt"), ("Old", "old.dll")]);
        let updated = output(&[("AppExe", "app.exe"), ("Readme", "readme.txt"), ("New", "new.dll")]);

        let changed = changed_payloads(&target, &updated, &manager).expect("compare");
        assert_eq!(changed, BTreeSet::from(["AppExe".to_string()]));
    }

    #[test]
    fn missing_payloads_are_reported_with_their_location() {
        let root = tempfile::tempdir().expect("temp");
        let manager = DefaultFileManager::new(
            vec![stage(root.path(), "v1", BindStage::Target, &[("app.exe", "MZ")])],
            None,
        );
        let both = output(&[("AppExe", "app.exe")]);
        let error = changed_payloads(&both, &both, &manager).expect_err("no updated bind path");
        assert_eq!(error.code, wx_core::MessageCode::FileNotFound);
        assert_eq!(error.location, Some(SourceLineNumber::at("product.wxs", 4)));
    }
}
