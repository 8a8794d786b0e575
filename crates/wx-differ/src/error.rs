use thiserror::Error;
use wx_core::{MessageCode, Messaging, WixError};

/// Why a diff or a transform application was refused. Every error has also
/// been reported to the messaging sink.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{} error(s); first: {}", .errors.len(), first(.errors))]
pub struct DiffError {
    pub errors: Vec<WixError>,
}

impl DiffError {
    pub fn has_code(&self, code: MessageCode) -> bool {
        self.errors.iter().any(|error| error.code == code)
    }
}

fn first(errors: &[WixError]) -> String {
    errors.first().map(ToString::to_string).unwrap_or_default()
}

pub(crate) struct Report<'m> {
    messaging: &'m Messaging,
    errors: Vec<WixError>,
}

impl<'m> Report<'m> {
    pub fn new(messaging: &'m Messaging) -> Self {
        Self {
            messaging,
            errors: Vec::new(),
        }
    }

    pub fn error(&mut self, code: MessageCode, message: impl Into<String>) {
        self.push(WixError::new(code, message));
    }

    pub fn push(&mut self, error: WixError) {
        self.messaging.error(error.clone());
        self.errors.push(error);
    }

    pub fn fail(mut self, code: MessageCode, message: impl Into<String>) -> DiffError {
        self.error(code, message);
        DiffError { errors: self.errors }
    }

    pub fn finish<T>(self, value: T) -> Result<T, DiffError> {
        if self.errors.is_empty() {
            Ok(value)
        } else {
            Err(DiffError { errors: self.errors })
        }
    }
}
