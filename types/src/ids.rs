//! String identifiers for sessions, chains, tokens and users.
//!
//! Identifiers double as persistence keys, so they are restricted to a
//! conservative alphabet: no separators that the storage backends use to
//! build composite keys.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::TypesError;

/// Characters accepted in an identifier besides ASCII alphanumerics.
const EXTRA_ID_CHARS: &[char] = &['-', '_', '.', '@'];

/// Maximum identifier length in bytes.
pub const MAX_ID_LEN: usize = 128;

fn validate(raw: &str) -> Result<(), TypesError> {
    let ok = !raw.is_empty()
        && raw.len() <= MAX_ID_LEN
        && raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || EXTRA_ID_CHARS.contains(&c));
    if ok {
        Ok(())
    } else {
        Err(TypesError::InvalidId(raw.to_string()))
    }
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// Build an identifier, rejecting empty or malformed input.
            pub fn parse(raw: impl Into<String>) -> Result<Self, TypesError> {
                let raw = raw.into();
                validate(&raw)?;
                Ok(Self(raw))
            }

            /// Build an identifier from a value already known to be well formed.
            ///
            /// # Panics
            /// Panics if `raw` is not a valid identifier.
            pub fn new(raw: impl Into<String>) -> Self {
                let raw = raw.into();
                assert!(validate(&raw).is_ok(), "malformed identifier: {raw:?}");
                Self(raw)
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// Identifies a class session.
    SessionId
);
string_id!(
    /// Identifies a chain within a session.
    ChainId
);
string_id!(
    /// Identifies a token within a session.
    TokenId
);
string_id!(
    /// Identifies a teacher or student.
    UserId
);
