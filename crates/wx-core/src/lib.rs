pub mod codes;
pub mod columns;
pub mod data;
pub mod definitions;
pub mod error;
pub mod format;
pub mod identifier;
pub mod messaging;
pub mod output;
pub mod source;

pub use codes::MessageCode;
pub use data::*;
pub use definitions::{ColumnCategory, ColumnDefinition, ColumnType, TableDefinition, TableDefinitions};
pub use error::WixError;
pub use format::{FileFormat, LoadError, LoadOptions, LoadedFile};
pub use identifier::{is_legal_identifier, parse_identifier, AccessModifier, Identifier};
pub use messaging::{Message, Messaging, MessagingPolicy, Severity};
pub use output::*;
pub use source::{SourceFrame, SourceLineNumber};

/// Namespace of core source elements.
pub const WXS_NAMESPACE: &str = "http://wixtoolset.org/schemas/v4/wxs";
/// Namespace of localization (`.wxl`) documents.
pub const WXL_NAMESPACE: &str = "http://wixtoolset.org/schemas/v4/wxl";
