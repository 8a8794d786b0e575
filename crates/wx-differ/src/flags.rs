use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

/// Transform error-suppression and validation bits, laid out as the
/// installer engine stores them in the transform summary (`PID_CHARCOUNT`):
/// error conditions in the low word, validation checks in the high word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransformFlags(u32);

impl TransformFlags {
    pub const NONE: Self = Self(0);

    pub const ERROR_ADD_EXISTING_ROW: Self = Self(0x0001);
    pub const ERROR_DELETE_MISSING_ROW: Self = Self(0x0002);
    pub const ERROR_ADD_EXISTING_TABLE: Self = Self(0x0004);
    pub const ERROR_DELETE_MISSING_TABLE: Self = Self(0x0008);
    pub const ERROR_UPDATE_MISSING_ROW: Self = Self(0x0010);
    pub const ERROR_CHANGE_CODEPAGE: Self = Self(0x0020);
    pub const VIEW_TRANSFORM: Self = Self(0x0100);

    pub const VALIDATE_LANGUAGE: Self = Self(0x0001_0000);
    pub const VALIDATE_PRODUCT: Self = Self(0x0002_0000);
    pub const VALIDATE_PLATFORM: Self = Self(0x0004_0000);
    pub const VALIDATE_MAJOR_VERSION: Self = Self(0x0008_0000);
    pub const VALIDATE_MINOR_VERSION: Self = Self(0x0010_0000);
    pub const VALIDATE_UPDATE_VERSION: Self = Self(0x0020_0000);
    pub const VALIDATE_UPGRADE_CODE: Self = Self(0x0800_0000);

    /// Every error condition is fatal.
    pub const ALL_ERRORS: Self = Self(0x003f);
    /// Language, product and upgrade code plus the major version.
    pub const DEFAULT_VALIDATION: Self = Self(0x080b_0000);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn error_bits(self) -> Self {
        Self(self.0 & 0xffff)
    }

    pub const fn validation_bits(self) -> Self {
        Self(self.0 & 0xffff_0000)
    }
}

impl BitOr for TransformFlags {
    type Output = Self;

    fn bitor(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl BitOrAssign for TransformFlags {
    fn bitor_assign(&mut self, other: Self) {
        self.0 |= other.0;
    }
}

impl fmt::Display for TransformFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[cfg(test)]
mod flags_tests {
    use super::*;

    #[test]
    fn named_sets_are_unions_of_single_bits() {
        let errors = TransformFlags::ERROR_ADD_EXISTING_ROW
            | TransformFlags::ERROR_DELETE_MISSING_ROW
            | TransformFlags::ERROR_ADD_EXISTING_TABLE
            | TransformFlags::ERROR_DELETE_MISSING_TABLE
            | TransformFlags::ERROR_UPDATE_MISSING_ROW
            | TransformFlags::ERROR_CHANGE_CODEPAGE;
        assert_eq!(errors, TransformFlags::ALL_ERRORS);

        let mut validation = TransformFlags::VALIDATE_LANGUAGE | TransformFlags::VALIDATE_PRODUCT;
        validation |= TransformFlags::VALIDATE_MAJOR_VERSION | TransformFlags::VALIDATE_UPGRADE_CODE;
        assert_eq!(validation, TransformFlags::DEFAULT_VALIDATION);

        let combined = errors | validation;
        assert_eq!(combined.error_bits(), errors);
        assert_eq!(combined.validation_bits(), validation);
        assert!(combined.contains(TransformFlags::VALIDATE_PRODUCT));
        assert!(!combined.contains(TransformFlags::VALIDATE_PLATFORM));
        assert_eq!(TransformFlags::VALIDATE_UPGRADE_CODE.to_string(), "0x8000000");
    }
}
