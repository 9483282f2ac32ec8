// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Taskmill Authors

//! Opaque prefixed identifiers.

/// Length of the random suffix appended to an id prefix.
pub const ID_SUFFIX_LEN: usize = 19;

/// Define a newtype id wrapper around `String` with a type prefix.
///
/// Generates `generate()` for random ids, `from_string()` for parsing,
/// `as_str()`, `Display`, `From<String>`, `From<&str>`, `PartialEq<&str>`,
/// and `Borrow<str>` implementations.
///
/// The id format is `{prefix}{nanoid}`: a short type indicator followed by
/// a 19-character random suffix. Callers outside this crate must treat ids
/// as opaque strings.
///
/// ```ignore
/// define_id! {
///     /// Doc comment for the id type.
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
        #[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub const PREFIX: &'static str = $prefix;

            /// Generate a new random id with the type prefix.
            pub fn generate() -> Self {
                Self(format!("{}{}", Self::PREFIX, nanoid::nanoid!({ $crate::id::ID_SUFFIX_LEN })))
            }

            /// Wrap an existing string (parsing, deserialization, tests).
            pub fn from_string(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Returns the id suffix truncated to at most `n` characters,
            /// for compact log output.
            pub fn short(&self, n: usize) -> &str {
                let suffix = self.0.strip_prefix(Self::PREFIX).unwrap_or(&self.0);
                &suffix[..suffix.len().min(n)]
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

crate::define_id! {
    /// Unique identifier for a job.
    ///
    /// Globally unique, opaque to callers. Doubles as the job's on-disk
    /// directory name, so it never contains path separators.
    pub struct JobId("job-");
}

#[cfg(test)]
#[path = "id_tests.rs"]
mod tests;
