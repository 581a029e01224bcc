//! Newtype wrappers for record identifiers.
//!
//! All newtypes serialize/deserialize as plain strings so stored records stay
//! readable with any JSON tool.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

/// Length of the short identifiers derived from runtime ids.
pub const UID_LEN: usize = 10;

macro_rules! string_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

string_newtype!(
    /// Short (10-character) identifier of a built image.
    ImageUid
);

string_newtype!(
    /// Short (10-character) identifier of a created container, taken from
    /// the runtime's own container id.
    ContainerUid
);

string_newtype!(
    /// `<vendor>-<package>-<solver>`, lowercased.
    SolverUid
);

string_newtype!(
    /// Blake3 hash of a stored build log.
    LogId
);

/// Derive a short uid from a runtime-issued identifier.
///
/// Strips a leading `sha256:` digest prefix and keeps the first
/// [`UID_LEN`] characters. Returns `None` when the id is too short or is not
/// plain ASCII, which would make the short form ambiguous.
pub fn short_uid(runtime_id: &str) -> Option<&str> {
    let id = runtime_id.trim();
    let id = id.strip_prefix("sha256:").unwrap_or(id);
    if id.len() < UID_LEN || !id.is_ascii() {
        return None;
    }
    Some(&id[..UID_LEN])
}
