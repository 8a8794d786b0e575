//! `wx.toml` loading.
//!
//! Search order: the `--config` path, then `wx.toml` in the working
//! directory, then built-in defaults. Command-line flags override every
//! value read here.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::Deserialize;
use wx_core::{MessageCode, MessagingPolicy, WixError};

pub(crate) const LOCAL_CONFIG: &str = "wx.toml";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct WxConfig {
    pub(crate) compile: CompileConfig,
    pub(crate) link: LinkConfig,
    pub(crate) bind: BindConfig,
    pub(crate) messages: MessagesConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct CompileConfig {
    pub(crate) defines: BTreeMap<String, String>,
    pub(crate) include_paths: Vec<PathBuf>,
    pub(crate) pedantic: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct LinkConfig {
    /// Drop tables without a definition instead of failing the load.
    pub(crate) allow_incomplete_sections: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct BindConfig {
    pub(crate) bind_paths: Vec<String>,
    pub(crate) cabinet_cache: Option<PathBuf>,
    pub(crate) cabinet_threads: Option<usize>,
    pub(crate) tidy: bool,
    pub(crate) culture: Option<String>,
}

impl Default for BindConfig {
    fn default() -> Self {
        Self {
            bind_paths: Vec::new(),
            cabinet_cache: None,
            cabinet_threads: None,
            tidy: true,
            culture: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct MessagesConfig {
    pub(crate) suppress: Vec<u32>,
    pub(crate) elevate: Vec<u32>,
    pub(crate) suppress_all_warnings: bool,
    pub(crate) warnings_as_errors: bool,
}

impl MessagesConfig {
    pub(crate) fn policy(&self) -> MessagingPolicy {
        MessagingPolicy {
            suppress_all_warnings: self.suppress_all_warnings,
            warnings_as_errors: self.warnings_as_errors,
            suppressed: self.suppress.iter().copied().collect::<BTreeSet<_>>(),
            elevated: self.elevate.iter().copied().collect::<BTreeSet<_>>(),
        }
    }
}

pub(crate) fn load_config(explicit_path: Option<&Path>) -> Result<WxConfig, WixError> {
    if let Some(path) = explicit_path {
        info!("loading configuration from {}", path.display());
        return load_config_file(path);
    }

    let local = Path::new(LOCAL_CONFIG);
    if local.exists() {
        info!("loading configuration from {}", local.display());
        return load_config_file(local);
    }

    debug!("no configuration file found, using defaults");
    Ok(WxConfig::default())
}

pub(crate) fn load_config_file(path: &Path) -> Result<WxConfig, WixError> {
    let content = fs::read_to_string(path).map_err(|error| {
        WixError::new(
            MessageCode::FileNotFound,
            format!("Cannot read configuration '{}': {}", path.display(), error),
        )
    })?;
    let config = parse_config(&content).map_err(|error| {
        WixError::new(error.code, format!("{}: {}", path.display(), error.message))
    })?;
    Ok(config)
}

pub(crate) fn parse_config(content: &str) -> Result<WxConfig, WixError> {
    let config: WxConfig = toml::from_str(content)
        .map_err(|error| WixError::new(MessageCode::ConfigInvalid, error.to_string()))?;
    if config.bind.cabinet_threads == Some(0) {
        return Err(WixError::new(
            MessageCode::ConfigInvalid,
            "bind.cabinet_threads must be at least 1.",
        ));
    }
    Ok(config)
}

#[cfg(test)]
mod config_tests {
    use super::*;

    #[test]
    fn sections_are_optional_and_default() {
        let config = parse_config("").expect("empty config");
        assert_eq!(config, WxConfig::default());
        assert!(config.bind.tidy);
    }

    #[test]
    fn every_section_parses() {
        let config = parse_config(
            r#"
[compile]
defines = { Version = "1.2.3" }
include_paths = ["include"]

[link]
allow_incomplete_sections = true

[bind]
bind_paths = ["payload", "media=assets"]
cabinet_threads = 2
tidy = false
culture = "de-DE"

[messages]
suppress = [1004]
warnings_as_errors = true
"#,
        )
        .expect("config");
        assert_eq!(config.compile.defines.get("Version").map(String::as_str), Some("1.2.3"));
        assert!(config.link.allow_incomplete_sections);
        assert_eq!(config.bind.bind_paths.len(), 2);
        assert!(!config.bind.tidy);
        let policy = config.messages.policy();
        assert!(policy.suppressed.contains(&1004));
        assert!(policy.warnings_as_errors);
    }

    #[test]
    fn unknown_keys_and_zero_threads_are_rejected() {
        let error = parse_config("[bind]\nthreads = 4\n").expect_err("unknown key");
        assert_eq!(error.code, MessageCode::ConfigInvalid);
        let error = parse_config("[bind]\ncabinet_threads = 0\n").expect_err("zero threads");
        assert!(error.message.contains("cabinet_threads"));
    }

    #[test]
    fn explicit_path_must_exist() {
        let error = load_config(Some(Path::new("/nonexistent/wx.toml"))).expect_err("missing");
        assert_eq!(error.code, MessageCode::FileNotFound);
    }
}
