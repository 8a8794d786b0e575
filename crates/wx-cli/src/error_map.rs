use std::fmt::Display;
use std::path::Path;

use thiserror::Error;
use wx_api::ApiError;
use wx_core::{MessageCode, Messaging, WixError};

/// A failed command. `Reported` errors are already in the messaging sink.
#[derive(Debug, Error)]
pub(crate) enum CliError {
    #[error(transparent)]
    Reported(#[from] ApiError),
    #[error(transparent)]
    Wix(#[from] WixError),
}

fn map_error(code: MessageCode, path: &Path, error: impl Display) -> WixError {
    WixError::new(code, format!("{}: {}", path.display(), error))
}

pub(crate) fn map_io(path: &Path, error: std::io::Error) -> WixError {
    map_error(MessageCode::IoError, path, error)
}

pub(crate) fn map_write(path: &Path, error: impl Display) -> WixError {
    map_error(MessageCode::OutputWriteFailed, path, error)
}

/// Reports `error` if needed and returns the process exit code.
pub(crate) fn emit_error(messaging: &Messaging, error: CliError) -> i32 {
    if let CliError::Wix(error) = error {
        messaging.error(error);
    }
    exit_code(messaging).max(1)
}

/// The number of the last reported error, `0` when none was reported.
pub(crate) fn exit_code(messaging: &Messaging) -> i32 {
    i32::try_from(messaging.last_error_number()).unwrap_or(1)
}

#[cfg(test)]
mod error_map_tests {
    use super::*;

    #[test]
    fn exit_code_is_the_last_error_number() {
        let messaging = Messaging::default();
        assert_eq!(exit_code(&messaging), 0);
        let code = emit_error(&messaging, CliError::Wix(map_io(Path::new("a.wxs"), std::io::Error::other("io"))));
        assert_eq!(code, i32::try_from(MessageCode::IoError.number()).expect("small"));
        assert!(messaging.has_code(MessageCode::IoError));
    }

    #[test]
    fn reported_errors_are_not_reported_twice() {
        let messaging = Messaging::default();
        messaging.error(WixError::new(MessageCode::NoDifferences, "same"));
        let error = CliError::Reported(ApiError::Compile(1));
        emit_error(&messaging, error);
        assert_eq!(messaging.error_count(), 1);
        assert_eq!(map_write(Path::new("out.msi"), "denied").code, MessageCode::OutputWriteFailed);
    }
}
