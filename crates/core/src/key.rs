//! Content keys and hashing.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Maximum length of a content key (matches the identity column width).
pub const MAX_KEY_LEN: usize = 255;

/// Identifier of one stored binary value.
///
/// Keys are opaque strings. Keys produced by [`ContentKey::compute`] are the
/// lowercase hex SHA-256 of the payload, so identical payloads share a key.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentKey(String);

impl ContentKey {
    /// Wrap an existing key string.
    pub fn new(key: impl Into<String>) -> crate::Result<Self> {
        let key = key.into();
        if key.is_empty() {
            return Err(crate::Error::InvalidKey("key is empty".to_string()));
        }
        if key.len() > MAX_KEY_LEN {
            return Err(crate::Error::InvalidKey(format!(
                "key is {} bytes long (max: {MAX_KEY_LEN})",
                key.len()
            )));
        }
        if key.chars().any(char::is_whitespace) {
            return Err(crate::Error::InvalidKey(format!(
                "key contains whitespace: {key:?}"
            )));
        }
        Ok(Self(key))
    }

    /// Compute the key of a payload.
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = Self::hasher();
        hasher.update(data);
        hasher.finalize()
    }

    /// Create an incremental hasher.
    pub fn hasher() -> ContentKeyHasher {
        ContentKeyHasher(Sha256::new())
    }

    /// Get the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let end = self.0.char_indices().nth(16).map_or(self.0.len(), |(i, _)| i);
        write!(f, "ContentKey({})", &self.0[..end])
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ContentKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ContentKey {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::new(value)
    }
}

impl TryFrom<&str> for ContentKey {
    type Error = crate::Error;

    fn try_from(value: &str) -> crate::Result<Self> {
        Self::new(value)
    }
}

impl std::str::FromStr for ContentKey {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::new(s)
    }
}

impl From<ContentKey> for String {
    fn from(key: ContentKey) -> Self {
        key.0
    }
}

/// Incremental SHA-256 hasher producing a [`ContentKey`].
pub struct ContentKeyHasher(Sha256);

impl ContentKeyHasher {
    /// Update the hasher with data.
    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    /// Finalize and return the key.
    pub fn finalize(self) -> ContentKey {
        let digest = self.0.finalize();
        ContentKey(digest.iter().map(|b| format!("{b:02x}")).collect())
    }
}

impl Default for ContentKeyHasher {
    fn default() -> Self {
        ContentKey::hasher()
    }
}
