use std::collections::BTreeMap;

use wx_core::{MessageCode, SourceLineNumber, WixError};

/// Preprocessor variable scopes.
///
/// `var.` values come from `-d` definitions and `<?define?>`; `env.` values
/// are a snapshot so a run never observes the environment changing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Variables {
    defines: BTreeMap<String, String>,
    environment: BTreeMap<String, String>,
    current_dir: String,
    source_file: String,
}

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshots the process environment and working directory.
    pub fn from_process() -> Self {
        Self {
            defines: BTreeMap::new(),
            environment: std::env::vars().collect(),
            current_dir: std::env::current_dir()
                .map(|dir| dir.to_string_lossy().into_owned())
                .unwrap_or_default(),
            source_file: String::new(),
        }
    }

    pub fn define(&mut self, name: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.defines.insert(name.into(), value.into())
    }

    pub fn undefine(&mut self, name: &str) -> Option<String> {
        self.defines.remove(name)
    }

    pub fn set_environment(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.environment.insert(name.into(), value.into());
    }

    pub fn set_current_dir(&mut self, dir: impl Into<String>) {
        self.current_dir = dir.into();
    }

    pub(crate) fn set_source_file(&mut self, path: &str) -> String {
        std::mem::replace(&mut self.source_file, path.to_string())
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    /// Looks up `var.X`, `env.X`, `sys.X` or bare `X` (same as `var.X`).
    pub fn lookup(&self, name: &str) -> Option<String> {
        let (scope, key) = name.split_once('.').unwrap_or(("var", name));
        match scope {
            "var" => self.defines.get(key).cloned(),
            "env" => self.environment.get(key).cloned(),
            "sys" => self.system(key),
            // Dotted names such as `Product.Version` live in `var`.
            _ => self.defines.get(name).cloned(),
        }
    }

    fn system(&self, key: &str) -> Option<String> {
        match key {
            "SOURCEFILEPATH" => Some(self.source_file.clone()),
            "SOURCEFILEDIR" => {
                let dir = match self.source_file.rfind('/') {
                    Some(index) => &self.source_file[..=index],
                    None => "",
                };
                Some(dir.to_string())
            }
            "CURRENTDIR" => Some(self.current_dir.clone()),
            _ => None,
        }
    }

    /// Replaces `$(name)` references and `$$` escapes in `text`.
    ///
    /// Bind-time `!(...)` expressions pass through untouched.
    pub fn substitute(&self, text: &str, location: &SourceLineNumber) -> Result<String, WixError> {
        if !text.contains('$') {
            return Ok(text.to_string());
        }

        let mut result = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(index) = rest.find('$') {
            result.push_str(&rest[..index]);
            let tail = &rest[index..];
            if let Some(after) = tail.strip_prefix("$$") {
                result.push('$');
                rest = after;
            } else if let Some(body) = tail.strip_prefix("$(") {
                let Some(end) = body.find(')') else {
                    return Err(WixError::with_location(
                        MessageCode::PreprocessorError,
                        format!("Unterminated variable reference in '{}'.", text),
                        location.clone(),
                    ));
                };
                let name = body[..end].trim();
                let value = self.lookup(name).ok_or_else(|| {
                    WixError::with_location(
                        MessageCode::UndefinedVariable,
                        format!("Undefined preprocessor variable '$({})'.", name),
                        location.clone(),
                    )
                })?;
                result.push_str(&value);
                rest = &body[end + 1..];
            } else {
                result.push('$');
                rest = &tail[1..];
            }
        }
        result.push_str(rest);
        Ok(result)
    }
}
