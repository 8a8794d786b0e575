use std::path::PathBuf;

use walkdir::WalkDir;

pub const CASE_FILE: &str = "case.json";

pub fn workspace_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
}

pub fn fixtures_root() -> PathBuf {
    workspace_root().join("fixtures")
}

pub fn fixture_dir(name: &str) -> PathBuf {
    fixtures_root().join(name)
}

pub fn case_path(name: &str) -> PathBuf {
    fixture_dir(name).join(CASE_FILE)
}

/// Fixture directories holding a `case.json`, in name order.
pub fn fixture_dirs() -> Vec<PathBuf> {
    let mut dirs = WalkDir::new(fixtures_root())
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_dir())
        .map(|entry| entry.into_path())
        .filter(|dir| dir.join(CASE_FILE).is_file())
        .collect::<Vec<_>>();
    dirs.sort();
    dirs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspace_root_points_to_workspace() {
        assert!(workspace_root().join("Cargo.toml").exists());
    }

    #[test]
    fn fixtures_root_points_to_fixtures_directory() {
        assert!(fixtures_root().is_dir());
    }

    #[test]
    fn fixture_dir_joins_name() {
        assert!(fixture_dir("identical-duplicates").is_dir());
    }

    #[test]
    fn case_path_joins_default_filename() {
        let path = case_path("identical-duplicates");
        assert!(path.ends_with(CASE_FILE));
        assert!(path.is_file());
    }

    #[test]
    fn fixture_dirs_are_sorted_and_complete() {
        let dirs = fixture_dirs();
        assert!(dirs.len() >= 4);
        assert!(dirs.windows(2).all(|pair| pair[0] < pair[1]));
    }
}
