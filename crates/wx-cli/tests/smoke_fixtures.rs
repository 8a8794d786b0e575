use std::path::Path;
use std::process::{Command, Output};

use wx_test_fixtures::{fixture_dirs, CASE_FILE};
use wx_tool::read_test_case;

fn run_wx(args: &[String]) -> Output {
    let bin = env!("CARGO_BIN_EXE_wx");
    Command::new(bin)
        .args(args)
        .output()
        .expect("wx should run")
}

fn path_arg(path: &Path) -> String {
    path.to_str().expect("path should be utf-8").to_string()
}

#[test]
fn fixtures_compile_and_link_through_the_binary() {
    let dirs = fixture_dirs();
    assert!(!dirs.is_empty());

    for dir in dirs {
        let case = read_test_case(&dir.join(CASE_FILE)).expect("case should load");
        let work = tempfile::tempdir().expect("temp dir");
        let objects = work.path().join("obj");

        let mut compile = vec!["compile".to_string()];
        if case.entries.is_empty() {
            compile.push(path_arg(&dir));
        } else {
            compile.extend(case.entries.iter().map(|entry| path_arg(&dir.join(entry))));
        }
        compile.extend(["-o".to_string(), path_arg(&objects)]);
        for (name, value) in &case.defines {
            compile.push(format!("-d{name}={value}"));
        }
        let compiled = run_wx(&compile);

        let outcome = if compiled.status.success() {
            let mut link = vec![
                "link".to_string(),
                path_arg(&objects),
                "-o".to_string(),
                path_arg(&work.path().join("out.wixout")),
            ];
            if case.pedantic {
                link.push("--pedantic".to_string());
            }
            run_wx(&link)
        } else {
            compiled
        };

        let stderr = String::from_utf8_lossy(&outcome.stderr);
        assert_eq!(
            outcome.status.success(),
            !case.expects_failure(),
            "fixture {} exited with {:?}: {}",
            dir.display(),
            outcome.status.code(),
            stderr
        );
        if case.expects_failure() {
            assert!(
                stderr.contains(": error WX"),
                "fixture {} expected {:?} but printed: {}",
                dir.display(),
                case.expected_errors,
                stderr
            );
        }
        if outcome.status.success() {
            assert!(work.path().join("out.wixout").is_file());
        }
    }
}
