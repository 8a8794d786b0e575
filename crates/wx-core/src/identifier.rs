use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Visibility of an identifier, ordered from narrowest to widest scope.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum AccessModifier {
    /// Only the declaring section.
    Private,
    /// Sections compiled from the same source document.
    Internal,
    /// Sections from the same source document or the same library.
    Protected,
    #[default]
    Public,
}

impl AccessModifier {
    pub const ALL: [AccessModifier; 4] = [
        AccessModifier::Private,
        AccessModifier::Internal,
        AccessModifier::Protected,
        AccessModifier::Public,
    ];

    pub fn keyword(self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Internal => "internal",
            Self::Protected => "protected",
            Self::Public => "public",
        }
    }

    pub fn from_keyword(keyword: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|access| access.keyword() == keyword)
    }
}

impl fmt::Display for AccessModifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identifier {
    pub access: AccessModifier,
    pub id: String,
}

impl Identifier {
    pub fn new(access: AccessModifier, id: impl Into<String>) -> Self {
        Self {
            access,
            id: id.into(),
        }
    }

    pub fn public(id: impl Into<String>) -> Self {
        Self::new(AccessModifier::Public, id)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.access {
            AccessModifier::Public => f.write_str(&self.id),
            access => write!(f, "{} {}", access, self.id),
        }
    }
}

/// Splits an optional leading access keyword off `token`.
///
/// Returns `None` for the invalid identifier (an empty token, or a keyword
/// with nothing after it). A first word that is not one of the four
/// keywords stays part of the id and the access defaults to public.
pub fn parse_identifier(token: &str) -> Option<Identifier> {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Some((first, rest)) = trimmed.split_once(char::is_whitespace) {
        if let Some(access) = AccessModifier::from_keyword(first) {
            let rest = rest.trim();
            if rest.is_empty() {
                return None;
            }
            return Some(Identifier::new(access, rest));
        }
    } else if AccessModifier::from_keyword(trimmed).is_some() {
        return None;
    }

    Some(Identifier::public(trimmed))
}

pub fn is_legal_identifier(id: &str) -> bool {
    id.len() <= 72 && identifier_regex().is_match(id)
}

fn identifier_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_.]*$").expect("identifier regex must compile")
    })
}
