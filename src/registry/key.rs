//! Entry Key - `namespace:id` identifier for a collectable

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Stable identifier of a catalog entry, written `namespace:id`.
///
/// The namespace names the category (repository) the entry belongs to.
/// Both halves are lowercase; the id may additionally contain `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntryKey {
    namespace: String,
    id: String,
}

impl EntryKey {
    /// Build a key from its two halves.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidKey`] if either half is empty or contains
    /// characters outside the allowed set.
    pub fn new(namespace: impl Into<String>, id: impl Into<String>) -> Result<Self> {
        let namespace = namespace.into();
        let id = id.into();
        if !valid_namespace(&namespace) || !valid_id(&id) {
            return Err(Error::InvalidKey(format!("{namespace}:{id}")));
        }
        Ok(Self { namespace, id })
    }

    /// Parse `namespace:id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidKey`] if the separator is missing or a half is
    /// malformed.
    pub fn parse(raw: &str) -> Result<Self> {
        let (namespace, id) = raw
            .split_once(':')
            .ok_or_else(|| Error::InvalidKey(raw.to_string()))?;
        Self::new(namespace, id)
    }

    /// Category namespace.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Id within the namespace.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}

pub(super) fn valid_namespace(s: &str) -> bool {
    !s.is_empty()
        && s.bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'_' | b'-' | b'.'))
}

fn valid_id(s: &str) -> bool {
    !s.is_empty()
        && s.bytes().all(|b| {
            b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'_' | b'-' | b'.' | b'/')
        })
}

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.id)
    }
}

impl FromStr for EntryKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for EntryKey {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<EntryKey> for String {
    fn from(key: EntryKey) -> Self {
        key.to_string()
    }
}
