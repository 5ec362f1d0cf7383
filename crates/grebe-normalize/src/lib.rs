//! Package and extra names in the canonical form the index compares them in.
//!
//! PyPI treats `Friendly-Bard`, `friendly.bard` and `FRIENDLY__BARD` as the same
//! project. Everything inside the resolver keys on the canonical rendition (lowercase,
//! every run of `-`, `_` and `.` collapsed to one `-`); callers that care about the
//! original spelling keep it next to the canonical name for display.
//!
//! See: <https://packaging.python.org/en/latest/specifications/name-normalization/>

use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// Why a string cannot be used as a package or extra name.
#[derive(Debug, Clone, thiserror::Error)]
pub enum InvalidNameError {
    #[error("a package or extra name must not be empty")]
    Empty,

    #[error(
        "\"{name}\" contains the forbidden character {character:?} at byte {index}; \
         names may only contain letters, digits, `-`, `_` and `.`"
    )]
    ForbiddenCharacter {
        name: String,
        character: char,
        index: usize,
    },

    #[error("\"{0}\" must start and end with a letter or digit")]
    Boundary(String),
}

/// Canonicalize a name, reporting where it went wrong when it cannot be.
fn canonicalize(name: &str) -> Result<String, InvalidNameError> {
    let mut canonical = String::with_capacity(name.len());
    // Whether a run of separators is open and still needs its single `-`.
    let mut run = false;
    for (index, character) in name.char_indices() {
        if character.is_ascii_alphanumeric() {
            if run {
                canonical.push('-');
                run = false;
            }
            canonical.push(character.to_ascii_lowercase());
        } else if matches!(character, '-' | '_' | '.') {
            if canonical.is_empty() {
                return Err(InvalidNameError::Boundary(name.to_string()));
            }
            run = true;
        } else {
            return Err(InvalidNameError::ForbiddenCharacter {
                name: name.to_string(),
                character,
                index,
            });
        }
    }
    if run {
        // The name ended inside a separator run.
        return Err(InvalidNameError::Boundary(name.to_string()));
    }
    if canonical.is_empty() {
        return Err(InvalidNameError::Empty);
    }
    Ok(canonical)
}

/// Whether a name is already in canonical form, so [`new`](PackageName::new) can keep
/// the allocation it was handed.
fn is_canonical(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('-')
        && !name.ends_with('-')
        && !name.contains("--")
        && name
            .bytes()
            .all(|byte| byte.is_ascii_lowercase() || byte.is_ascii_digit() || byte == b'-')
}

/// Package and extra names share the same grammar and normalization but must stay
/// distinct types; the impls differ only in the wrapped newtype.
macro_rules! normalized_name {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(String);

        impl $name {
            /// Canonicalize a name, reusing the allocation when it already is.
            pub fn new(name: String) -> Result<Self, InvalidNameError> {
                if is_canonical(&name) {
                    Ok(Self(name))
                } else {
                    canonicalize(&name).map(Self)
                }
            }
        }

        impl FromStr for $name {
            type Err = InvalidNameError;

            fn from_str(name: &str) -> Result<Self, Self::Err> {
                canonicalize(name).map(Self)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                let name = String::deserialize(deserializer)?;
                Self::new(name).map_err(de::Error::custom)
            }
        }
    };
}

normalized_name!(
    /// The canonical name of a package. Equality, ordering and hashing all operate on
    /// the canonical form.
    PackageName
);

normalized_name!(
    /// The canonical name of an optional dependency group (PEP 685 normalizes extras
    /// with the same rules as package names).
    ExtraName
);
