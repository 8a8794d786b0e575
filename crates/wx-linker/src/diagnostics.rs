use thiserror::Error;
use wx_core::{MessageCode, Messaging, SourceLineNumber, WixError};

/// Symbol errors that stopped a link or library build. Every error has
/// also been reported to the messaging sink.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{} error(s); first: {}", .errors.len(), first(.errors))]
pub struct LinkError {
    pub errors: Vec<WixError>,
}

impl LinkError {
    pub fn has_code(&self, code: MessageCode) -> bool {
        self.errors.iter().any(|error| error.code == code)
    }
}

fn first(errors: &[WixError]) -> String {
    errors.first().map(ToString::to_string).unwrap_or_default()
}

/// Forwards to `Messaging` and remembers the errors of one phase.
pub(crate) struct Diagnostics<'m> {
    messaging: &'m Messaging,
    errors: Vec<WixError>,
}

impl<'m> Diagnostics<'m> {
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

    pub fn warning(&self, code: MessageCode, message: impl Into<String>, location: SourceLineNumber) {
        self.messaging.warning(code, message, Some(location));
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn into_error(self) -> LinkError {
        LinkError { errors: self.errors }
    }

    pub fn finish<T>(self, value: T) -> Result<T, LinkError> {
        if self.errors.is_empty() {
            Ok(value)
        } else {
            Err(self.into_error())
        }
    }
}
