//! Typed identifier wrappers for type safety across releaseforge.
//!
//! Episode identities, quality labels, and the opaque handles returned by
//! publishers and notification channels are all strings on the wire and in the
//! database. The newtypes here keep them from being mixed up.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a raw string value.
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Borrow the raw string value.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id! {
    /// Stable key of one episode, derived from series name and episode number.
    ///
    /// Two candidates for the same episode always produce the same identity,
    /// so re-ingestion collapses onto the same release record.
    Identity
}

string_id! {
    /// Label of a quality profile (e.g. `"720"`, `"1080"`).
    QualityLabel
}

string_id! {
    /// Opaque handle returned by the primary artifact publisher.
    ArtifactHandle
}

string_id! {
    /// Opaque handle of the shared public release post for an episode.
    PublishPostHandle
}

impl Identity {
    /// Build the identity for `episode` of `series`.
    ///
    /// The series name is normalized to a lowercase slug so that spacing,
    /// punctuation, and case differences between feed entries collapse.
    pub fn from_parts(series: &str, episode: u32) -> Self {
        Self(format!("{}:{}", slugify(series), episode))
    }
}

/// Identifier of a delivery recipient (a chat user id on the notification channel).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecipientId(i64);

impl RecipientId {
    /// Wrap a raw recipient id.
    #[must_use]
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// The raw recipient id.
    pub fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for RecipientId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for RecipientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lowercase `input`, keep alphanumerics, and join the remaining runs with `-`.
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut pending_dash = false;

    for c in input.chars() {
        if c.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.extend(c.to_lowercase());
        } else {
            pending_dash = true;
        }
    }

    slug
}
