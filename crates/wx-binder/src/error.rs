use thiserror::Error;
use wx_core::{MessageCode, Messaging, SourceLineNumber, WixError};

/// Resource or data errors that stopped a bind. Every error has also been
/// reported to the messaging sink.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("binding failed with {} error(s); first: {}", .errors.len(), first(.errors))]
pub struct BindError {
    pub errors: Vec<WixError>,
}

impl BindError {
    pub fn has_code(&self, code: MessageCode) -> bool {
        self.errors.iter().any(|error| error.code == code)
    }
}

fn first(errors: &[WixError]) -> String {
    errors.first().map(ToString::to_string).unwrap_or_default()
}

/// Errors of one bind step, forwarded to `Messaging` as they happen.
pub(crate) struct Problems<'m> {
    messaging: &'m Messaging,
    errors: Vec<WixError>,
}

impl<'m> Problems<'m> {
    pub fn new(messaging: &'m Messaging) -> Self {
        Self {
            messaging,
            errors: Vec::new(),
        }
    }

    pub fn error(&mut self, error: WixError) {
        self.messaging.error(error.clone());
        self.errors.push(error);
    }

    pub fn warning(&self, code: MessageCode, message: impl Into<String>, location: Option<SourceLineNumber>) {
        self.messaging.warning(code, message, location);
    }

    /// Fails the step if anything was reported so far.
    pub fn check(&mut self) -> Result<(), BindError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(BindError {
                errors: std::mem::take(&mut self.errors),
            })
        }
    }

    /// Reports `error` and fails immediately.
    pub fn fail(&mut self, error: WixError) -> BindError {
        self.error(error);
        BindError {
            errors: std::mem::take(&mut self.errors),
        }
    }
}
