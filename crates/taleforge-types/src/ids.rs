//! Type-safe identifier wrappers.
//!
//! Drafts and arc threads carry UUID v7 (time-ordered) identifiers so that
//! scene log rows sort naturally by creation. Projects are addressed by a
//! human-chosen [`ProjectKey`] slug instead, because operators type them on
//! the command line and in dashboard URLs.

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

/// Generates a newtype wrapper around [`Uuid`] with standard derives.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
        #[ts(export, export_to = "bindings/")]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new identifier using UUID v7 (time-ordered).
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Return the inner [`Uuid`] value.
            pub const fn into_inner(self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl core::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s.trim()).map(Self)
            }
        }
    };
}

define_id! {
    /// Unique identifier for one candidate draft of a scene.
    DraftId
}

define_id! {
    /// Unique identifier for a plot thread in the arc ledger.
    ArcId
}

/// Maximum length of a project key.
const MAX_PROJECT_KEY_LEN: usize = 64;

/// Errors produced when validating a [`ProjectKey`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProjectKeyError {
    /// The key was empty after trimming.
    #[error("project key must not be empty")]
    Empty,

    /// The key exceeded the maximum length.
    #[error("project key longer than 64 characters")]
    TooLong,

    /// The key contained a character outside `[a-z0-9_-]`.
    #[error("project key contains invalid character {0:?}")]
    InvalidChar(char),
}

/// Slug identifying one story project (e.g. `lantern-keeper`).
///
/// Lowercase ASCII letters, digits, `-` and `_` only, so the key is safe to
/// use in URLs, file names, and SQL parameters without escaping.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(try_from = "String", into = "String")]
#[ts(export, export_to = "bindings/")]
pub struct ProjectKey(String);

impl ProjectKey {
    /// Validate and wrap a project key.
    pub fn parse(raw: &str) -> Result<Self, ProjectKeyError> {
        let key = raw.trim();
        if key.is_empty() {
            return Err(ProjectKeyError::Empty);
        }
        if key.len() > MAX_PROJECT_KEY_LEN {
            return Err(ProjectKeyError::TooLong);
        }
        if let Some(bad) = key
            .chars()
            .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-' || *c == '_'))
        {
            return Err(ProjectKeyError::InvalidChar(bad));
        }
        Ok(Self(key.to_owned()))
    }

    /// Borrow the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ProjectKey {
    type Error = ProjectKeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ProjectKey> for String {
    fn from(key: ProjectKey) -> Self {
        key.0
    }
}

impl core::fmt::Display for ProjectKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_key_accepts_slug() {
        let key = ProjectKey::parse("  lantern-keeper_2 ");
        assert_eq!(key.map(|k| k.as_str().to_owned()), Ok("lantern-keeper_2".to_owned()));
    }

    #[test]
    fn project_key_rejects_bad_input() {
        assert_eq!(ProjectKey::parse("   "), Err(ProjectKeyError::Empty));
        assert_eq!(
            ProjectKey::parse("Lantern"),
            Err(ProjectKeyError::InvalidChar('L'))
        );
        assert_eq!(
            ProjectKey::parse(&"a".repeat(65)),
            Err(ProjectKeyError::TooLong)
        );
    }

    #[test]
    fn project_key_serde_validates() {
        let ok: Result<ProjectKey, _> = serde_json::from_str("\"harbor\"");
        assert!(ok.is_ok());
        let bad: Result<ProjectKey, _> = serde_json::from_str("\"has space\"");
        assert!(bad.is_err());
    }

    #[test]
    fn draft_ids_are_time_ordered() {
        let first = DraftId::new();
        let second = DraftId::new();
        assert!(first <= second);
        let parsed: Result<DraftId, _> = first.to_string().parse();
        assert_eq!(parsed.ok(), Some(first));
    }
}
