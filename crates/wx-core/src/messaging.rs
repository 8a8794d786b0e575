//! Diagnostics sink shared by every phase.
//!
//! A [`Messaging`] value is created by the driver and passed by reference
//! into each phase. It is `Sync`: parallel compile threads and cabinet
//! workers may emit into the same sink.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use log::{error, warn};
use serde::{Deserialize, Serialize};

use crate::codes::MessageCode;
use crate::error::WixError;
use crate::source::SourceLineNumber;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Error,
    Warning,
}

impl Severity {
    pub fn is_error(&self) -> bool {
        matches!(self, Severity::Error)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub severity: Severity,
    pub code: MessageCode,
    pub text: String,
    pub location: Option<SourceLineNumber>,
}

impl Message {
    pub fn error(code: MessageCode, text: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            code,
            text: text.into(),
            location: None,
        }
    }

    pub fn warning(code: MessageCode, text: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            code,
            text: text.into(),
            location: None,
        }
    }

    pub fn at(mut self, location: SourceLineNumber) -> Self {
        self.location = Some(location);
        self
    }
}

impl From<WixError> for Message {
    fn from(error: WixError) -> Self {
        Self {
            severity: if error.code.is_warning() {
                Severity::Warning
            } else {
                Severity::Error
            },
            code: error.code,
            text: error.message,
            location: error.location,
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{} : ", location)?,
            None => write!(f, "wx : ")?,
        }
        write!(
            f,
            "{} WX{:04}: {}",
            self.severity,
            self.code.number(),
            self.text
        )
    }
}

/// Warning suppression and elevation (`-sw` / `-wx`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagingPolicy {
    pub suppress_all_warnings: bool,
    pub warnings_as_errors: bool,
    pub suppressed: BTreeSet<u32>,
    pub elevated: BTreeSet<u32>,
}

#[derive(Debug, Default)]
pub struct Messaging {
    policy: MessagingPolicy,
    messages: Mutex<Vec<Message>>,
    errors: AtomicUsize,
    warnings: AtomicUsize,
    last_error: AtomicU32,
}

impl Messaging {
    pub fn new(policy: MessagingPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    pub fn policy(&self) -> &MessagingPolicy {
        &self.policy
    }

    pub fn emit(&self, mut message: Message) {
        if message.severity == Severity::Warning {
            let number = message.code.number();
            if self.policy.suppress_all_warnings || self.policy.suppressed.contains(&number) {
                return;
            }
            if self.policy.warnings_as_errors || self.policy.elevated.contains(&number) {
                message.severity = Severity::Error;
            }
        }

        match message.severity {
            Severity::Error => {
                error!("{message}");
                self.errors.fetch_add(1, Ordering::SeqCst);
                self.last_error
                    .store(message.code.number(), Ordering::SeqCst);
            }
            Severity::Warning => {
                warn!("{message}");
                self.warnings.fetch_add(1, Ordering::SeqCst);
            }
        }

        self.lock().push(message);
    }

    pub fn error(&self, error: WixError) {
        self.emit(Message::from(error));
    }

    pub fn warning(
        &self,
        code: MessageCode,
        text: impl Into<String>,
        location: Option<SourceLineNumber>,
    ) {
        let mut message = Message::warning(code, text);
        message.location = location;
        self.emit(message);
    }

    pub fn encountered_error(&self) -> bool {
        self.errors.load(Ordering::SeqCst) > 0
    }

    pub fn error_count(&self) -> usize {
        self.errors.load(Ordering::SeqCst)
    }

    pub fn warning_count(&self) -> usize {
        self.warnings.load(Ordering::SeqCst)
    }

    /// Number of the most recent error, `0` when none was reported.
    pub fn last_error_number(&self) -> u32 {
        self.last_error.load(Ordering::SeqCst)
    }

    pub fn messages(&self) -> Vec<Message> {
        self.lock().clone()
    }

    pub fn has_code(&self, code: MessageCode) -> bool {
        self.lock().iter().any(|message| message.code == code)
    }

    /// Folds a child sink (e.g. from a worker thread) into this one.
    ///
    /// The child's messages were already filtered by its own policy, so they
    /// are appended as-is.
    pub fn merge(&self, child: Messaging) {
        let child_messages = child
            .messages
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for message in &child_messages {
            if message.severity.is_error() {
                self.errors.fetch_add(1, Ordering::SeqCst);
                self.last_error
                    .store(message.code.number(), Ordering::SeqCst);
            } else {
                self.warnings.fetch_add(1, Ordering::SeqCst);
            }
        }
        self.lock().extend(child_messages);
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Message>> {
        self.messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod messaging_tests {
    use super::*;
    use std::thread;

    #[test]
    fn errors_set_encountered_flag_and_last_number() {
        let messaging = Messaging::default();
        assert!(!messaging.encountered_error());
        messaging.error(WixError::new(MessageCode::ExpectedAttribute, "missing Id"));
        messaging.error(WixError::new(MessageCode::UnresolvedReference, "missing P"));
        assert!(messaging.encountered_error());
        assert_eq!(messaging.error_count(), 2);
        assert_eq!(messaging.last_error_number(), 94);
    }

    #[test]
    fn suppressed_warnings_are_dropped() {
        let mut policy = MessagingPolicy::default();
        policy.suppressed.insert(MessageCode::PreprocessorWarning.number());
        let messaging = Messaging::new(policy);
        messaging.warning(MessageCode::PreprocessorWarning, "hello", None);
        assert_eq!(messaging.warning_count(), 0);
        assert!(messaging.messages().is_empty());
    }

    #[test]
    fn elevated_warnings_become_errors() {
        let mut policy = MessagingPolicy::default();
        policy
            .elevated
            .insert(MessageCode::IdenticalDuplicateSymbol.number());
        let messaging = Messaging::new(policy);
        messaging.warning(MessageCode::IdenticalDuplicateSymbol, "dup", None);
        assert!(messaging.encountered_error());
        assert_eq!(messaging.last_error_number(), 1001);

        let all = Messaging::new(MessagingPolicy {
            warnings_as_errors: true,
            ..MessagingPolicy::default()
        });
        all.warning(MessageCode::UnreferencedSection, "unused", None);
        assert!(all.encountered_error());
    }

    #[test]
    fn message_renders_as_single_line() {
        let message = Message::error(MessageCode::DuplicateSymbol, "Duplicate symbol 'Directory:D'.")
            .at(SourceLineNumber::at("a.wxs", 4));
        assert_eq!(
            message.to_string(),
            "a.wxs(4) : error WX0092: Duplicate symbol 'Directory:D'."
        );
    }

    #[test]
    fn concurrent_emitters_are_all_counted() {
        let messaging = Messaging::default();
        thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..25 {
                        messaging.warning(MessageCode::CabinetReused, "reused", None);
                    }
                });
            }
        });
        assert_eq!(messaging.warning_count(), 100);
        assert_eq!(messaging.messages().len(), 100);
    }

    #[test]
    fn merge_folds_child_counters() {
        let parent = Messaging::default();
        let child = Messaging::default();
        child.error(WixError::new(MessageCode::IllegalGuid, "bad guid"));
        parent.merge(child);
        assert!(parent.encountered_error());
        assert_eq!(parent.last_error_number(), 25);
    }
}
