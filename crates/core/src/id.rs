// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Identifier newtypes.

/// Returns a string slice truncated to at most `n` characters.
pub fn short(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((end, _)) => &s[..end],
        None => s,
    }
}

/// Maximum length accepted for caller-supplied identifiers.
pub const MAX_ID_LEN: usize = 128;

/// Check that a caller-supplied identifier is usable as a job or deployment id.
///
/// Ids end up in Kubernetes object names and log lines, so only ASCII
/// alphanumerics plus `-`, `_` and `.` are accepted.
pub fn is_valid_id(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= MAX_ID_LEN
        && s.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Define a newtype ID wrapper around `SmolStr` with a type prefix.
///
/// Generated ids have the form `{prefix}{nanoid}`; caller-supplied ids are
/// kept verbatim. The macro provides `generate()`, `new()`, `as_str()`,
/// `short()`, `Display`, `From<&str>`, `From<String>`, `Borrow<str>` and
/// `Deref<Target = str>`.
///
/// ```ignore
/// define_id! {
///     /// Identifier of a job.
///     pub struct JobId("job-");
/// }
/// ```
#[macro_export]
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        pub struct $name:ident($prefix:literal);
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub smol_str::SmolStr);

        impl $name {
            pub const PREFIX: &'static str = $prefix;

            /// Generate a fresh random id carrying the type prefix.
            pub fn generate() -> Self {
                Self(smol_str::SmolStr::new(format!("{}{}", Self::PREFIX, nanoid::nanoid!(19))))
            }

            /// Wrap an existing id (caller-supplied or deserialized).
            pub fn new(id: impl Into<smol_str::SmolStr>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Id without its type prefix, truncated to at most `n` characters.
            pub fn short(&self, n: usize) -> &str {
                let suffix = self.0.strip_prefix(Self::PREFIX).unwrap_or(&self.0);
                $crate::id::short(suffix, n)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::new(s)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self::new(s)
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;

            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }
    };
}

#[cfg(test)]
#[path = "id_tests.rs"]
mod tests;
