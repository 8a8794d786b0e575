//! Diagnostic codes.
//!
//! Numbers are grouped by phase:
//! - `1-9` general
//! - `10-19` preprocessor
//! - `20-39` compiler
//! - `40-49` file formats and table data
//! - `90-109` linker
//! - `200-229` binder
//! - `300-319` differ
//! - `400-409` command line and configuration
//! - `1000+` warnings

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MessageCode {
    UnexpectedException,
    XmlParseError,
    FileNotFound,

    IncludeNotFound,
    IncludeCycle,
    PreprocessorError,
    UndefinedVariable,
    IllegalDirective,
    InvalidCondition,
    UnbalancedDirective,

    ExpectedAttribute,
    IllegalAttributeValue,
    UnexpectedAttribute,
    UnexpectedElement,
    IllegalIdentifier,
    IllegalGuid,
    ExpectedElement,
    DuplicateSection,
    ExpectedRootElement,
    DuplicateLocalizationString,

    UnknownTable,
    UnexpectedFileFormat,
    MalformedFile,
    UnsupportedFormatVersion,
    FieldTypeMismatch,
    FieldCountMismatch,

    MissingEntrySection,
    MultipleEntrySections,
    DuplicateSymbol,
    UnresolvedReference,
    AmbiguousReference,
    DuplicatePrimaryKey,
    ReferenceCycle,
    OrphanedComponent,
    MultiplePrimaryReferences,
    IllegalSectionType,

    UndefinedLocalizationVariable,
    UndefinedWixVariable,
    UndefinedBindVariable,
    UnresolvedFileReference,
    MediaNotFound,
    InvalidForeignKey,
    CabinetCreationFailed,
    InsufficientDiskSpace,
    CabinetCacheCorrupt,
    OutputWriteFailed,
    MissingLocalization,
    NullInNonNullableColumn,
    WixVariableCollision,

    NoDifferences,
    OutputTypeMismatch,
    InvalidTransformInput,
    ProductCodeMismatch,
    UpgradeCodeMismatch,
    LanguageMismatch,
    MajorVersionMismatch,
    AddExistingRow,
    DeleteMissingRow,
    UpdateMissingRow,
    CodepageChanged,
    AddExistingTable,
    DeleteMissingTable,

    InvalidCommandLine,
    ConfigInvalid,
    IoError,

    PreprocessorWarning,
    IdenticalDuplicateSymbol,
    UnknownTableIgnored,
    UnreferencedSection,
    CabinetReused,
}

impl MessageCode {
    pub fn number(self) -> u32 {
        match self {
            Self::UnexpectedException => 1,
            Self::XmlParseError => 2,
            Self::FileNotFound => 3,

            Self::IncludeNotFound => 10,
            Self::IncludeCycle => 11,
            Self::PreprocessorError => 12,
            Self::UndefinedVariable => 13,
            Self::IllegalDirective => 14,
            Self::InvalidCondition => 15,
            Self::UnbalancedDirective => 16,

            Self::ExpectedAttribute => 20,
            Self::IllegalAttributeValue => 21,
            Self::UnexpectedAttribute => 22,
            Self::UnexpectedElement => 23,
            Self::IllegalIdentifier => 24,
            Self::IllegalGuid => 25,
            Self::ExpectedElement => 26,
            Self::DuplicateSection => 27,
            Self::ExpectedRootElement => 28,
            Self::DuplicateLocalizationString => 29,

            Self::UnknownTable => 40,
            Self::UnexpectedFileFormat => 41,
            Self::MalformedFile => 42,
            Self::UnsupportedFormatVersion => 43,
            Self::FieldTypeMismatch => 44,
            Self::FieldCountMismatch => 45,

            Self::MissingEntrySection => 90,
            Self::MultipleEntrySections => 91,
            Self::DuplicateSymbol => 92,
            Self::UnresolvedReference => 94,
            Self::AmbiguousReference => 95,
            Self::DuplicatePrimaryKey => 96,
            Self::ReferenceCycle => 97,
            Self::OrphanedComponent => 98,
            Self::MultiplePrimaryReferences => 99,
            Self::IllegalSectionType => 100,

            Self::UndefinedLocalizationVariable => 200,
            Self::UndefinedWixVariable => 201,
            Self::UndefinedBindVariable => 202,
            Self::UnresolvedFileReference => 203,
            Self::MediaNotFound => 204,
            Self::InvalidForeignKey => 205,
            Self::CabinetCreationFailed => 206,
            Self::InsufficientDiskSpace => 207,
            Self::CabinetCacheCorrupt => 208,
            Self::OutputWriteFailed => 209,
            Self::MissingLocalization => 210,
            Self::NullInNonNullableColumn => 211,
            Self::WixVariableCollision => 212,

            Self::NoDifferences => 300,
            Self::OutputTypeMismatch => 301,
            Self::InvalidTransformInput => 302,
            Self::ProductCodeMismatch => 303,
            Self::UpgradeCodeMismatch => 304,
            Self::LanguageMismatch => 305,
            Self::MajorVersionMismatch => 306,
            Self::AddExistingRow => 307,
            Self::DeleteMissingRow => 308,
            Self::UpdateMissingRow => 309,
            Self::CodepageChanged => 310,
            Self::AddExistingTable => 311,
            Self::DeleteMissingTable => 312,

            Self::InvalidCommandLine => 400,
            Self::ConfigInvalid => 401,
            Self::IoError => 402,

            Self::PreprocessorWarning => 1000,
            Self::IdenticalDuplicateSymbol => 1001,
            Self::UnknownTableIgnored => 1002,
            Self::UnreferencedSection => 1003,
            Self::CabinetReused => 1004,
        }
    }

    pub fn is_warning(self) -> bool {
        self.number() >= 1000
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::UnexpectedException => "UNEXPECTED_EXCEPTION",
            Self::XmlParseError => "XML_PARSE_ERROR",
            Self::FileNotFound => "FILE_NOT_FOUND",
            Self::IncludeNotFound => "INCLUDE_NOT_FOUND",
            Self::IncludeCycle => "INCLUDE_CYCLE",
            Self::PreprocessorError => "PREPROCESSOR_ERROR",
            Self::UndefinedVariable => "UNDEFINED_VARIABLE",
            Self::IllegalDirective => "ILLEGAL_DIRECTIVE",
            Self::InvalidCondition => "INVALID_CONDITION",
            Self::UnbalancedDirective => "UNBALANCED_DIRECTIVE",
            Self::ExpectedAttribute => "EXPECTED_ATTRIBUTE",
            Self::IllegalAttributeValue => "ILLEGAL_ATTRIBUTE_VALUE",
            Self::UnexpectedAttribute => "UNEXPECTED_ATTRIBUTE",
            Self::UnexpectedElement => "UNEXPECTED_ELEMENT",
            Self::IllegalIdentifier => "ILLEGAL_IDENTIFIER",
            Self::IllegalGuid => "ILLEGAL_GUID",
            Self::ExpectedElement => "EXPECTED_ELEMENT",
            Self::DuplicateSection => "DUPLICATE_SECTION",
            Self::ExpectedRootElement => "EXPECTED_ROOT_ELEMENT",
            Self::DuplicateLocalizationString => "DUPLICATE_LOCALIZATION_STRING",
            Self::UnknownTable => "UNKNOWN_TABLE",
            Self::UnexpectedFileFormat => "UNEXPECTED_FILE_FORMAT",
            Self::MalformedFile => "MALFORMED_FILE",
            Self::UnsupportedFormatVersion => "UNSUPPORTED_FORMAT_VERSION",
            Self::FieldTypeMismatch => "FIELD_TYPE_MISMATCH",
            Self::FieldCountMismatch => "FIELD_COUNT_MISMATCH",
            Self::MissingEntrySection => "MISSING_ENTRY_SECTION",
            Self::MultipleEntrySections => "MULTIPLE_ENTRY_SECTIONS",
            Self::DuplicateSymbol => "DUPLICATE_SYMBOL",
            Self::UnresolvedReference => "UNRESOLVED_REFERENCE",
            Self::AmbiguousReference => "AMBIGUOUS_REFERENCE",
            Self::DuplicatePrimaryKey => "DUPLICATE_PRIMARY_KEY",
            Self::ReferenceCycle => "REFERENCE_CYCLE",
            Self::OrphanedComponent => "ORPHANED_COMPONENT",
            Self::MultiplePrimaryReferences => "MULTIPLE_PRIMARY_REFERENCES",
            Self::IllegalSectionType => "ILLEGAL_SECTION_TYPE",
            Self::UndefinedLocalizationVariable => "UNDEFINED_LOCALIZATION_VARIABLE",
            Self::UndefinedWixVariable => "UNDEFINED_WIX_VARIABLE",
            Self::UndefinedBindVariable => "UNDEFINED_BIND_VARIABLE",
            Self::UnresolvedFileReference => "UNRESOLVED_FILE_REFERENCE",
            Self::MediaNotFound => "MEDIA_NOT_FOUND",
            Self::InvalidForeignKey => "INVALID_FOREIGN_KEY",
            Self::CabinetCreationFailed => "CABINET_CREATION_FAILED",
            Self::InsufficientDiskSpace => "INSUFFICIENT_DISK_SPACE",
            Self::CabinetCacheCorrupt => "CABINET_CACHE_CORRUPT",
            Self::OutputWriteFailed => "OUTPUT_WRITE_FAILED",
            Self::MissingLocalization => "MISSING_LOCALIZATION",
            Self::NullInNonNullableColumn => "NULL_IN_NON_NULLABLE_COLUMN",
            Self::WixVariableCollision => "WIX_VARIABLE_COLLISION",
            Self::NoDifferences => "NO_DIFFERENCES",
            Self::OutputTypeMismatch => "OUTPUT_TYPE_MISMATCH",
            Self::InvalidTransformInput => "INVALID_TRANSFORM_INPUT",
            Self::ProductCodeMismatch => "PRODUCT_CODE_MISMATCH",
            Self::UpgradeCodeMismatch => "UPGRADE_CODE_MISMATCH",
            Self::LanguageMismatch => "LANGUAGE_MISMATCH",
            Self::MajorVersionMismatch => "MAJOR_VERSION_MISMATCH",
            Self::AddExistingRow => "ADD_EXISTING_ROW",
            Self::DeleteMissingRow => "DELETE_MISSING_ROW",
            Self::UpdateMissingRow => "UPDATE_MISSING_ROW",
            Self::CodepageChanged => "CODEPAGE_CHANGED",
            Self::AddExistingTable => "ADD_EXISTING_TABLE",
            Self::DeleteMissingTable => "DELETE_MISSING_TABLE",
            Self::InvalidCommandLine => "INVALID_COMMAND_LINE",
            Self::ConfigInvalid => "CONFIG_INVALID",
            Self::IoError => "IO_ERROR",
            Self::PreprocessorWarning => "PREPROCESSOR_WARNING",
            Self::IdenticalDuplicateSymbol => "IDENTICAL_DUPLICATE_SYMBOL",
            Self::UnknownTableIgnored => "UNKNOWN_TABLE_IGNORED",
            Self::UnreferencedSection => "UNREFERENCED_SECTION",
            Self::CabinetReused => "CABINET_REUSED",
        }
    }
}

impl fmt::Display for MessageCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
