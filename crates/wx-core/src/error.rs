use thiserror::Error;

use crate::codes::MessageCode;
use crate::source::SourceLineNumber;

#[derive(Debug, Error, Clone, PartialEq)]
#[error("{code}: {message}")]
pub struct WixError {
    pub code: MessageCode,
    pub message: String,
    pub location: Option<SourceLineNumber>,
}

impl WixError {
    pub fn new(code: MessageCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            location: None,
        }
    }

    pub fn with_location(
        code: MessageCode,
        message: impl Into<String>,
        location: SourceLineNumber,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            location: Some(location),
        }
    }

    pub fn number(&self) -> u32 {
        self.code.number()
    }

    pub fn unexpected(detail: impl Into<String>) -> Self {
        Self::new(MessageCode::UnexpectedException, detail)
    }
}
