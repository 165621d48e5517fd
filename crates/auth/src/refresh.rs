//! Opaque refresh tokens.
//!
//! Refresh token values only ever live in the client's cookie jar and in the
//! response that hands them out. Stores keep the SHA-256 digest.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// A refresh token value as presented by, or handed to, a client.
#[derive(Clone, PartialEq, Eq)]
pub struct RefreshToken(String);

impl RefreshToken {
    /// Generate a fresh random token (244 bits of entropy, hex encoded).
    pub fn generate() -> Self {
        Self(format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple()))
    }

    /// Wrap a value presented by a client.
    pub fn from_presented(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn digest(&self) -> RefreshTokenHash {
        let digest = Sha256::digest(self.0.as_bytes());
        RefreshTokenHash(format!("{:x}", digest))
    }
}

impl core::fmt::Debug for RefreshToken {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("RefreshToken(<redacted>)")
    }
}

/// Lowercase hex SHA-256 digest of a refresh token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RefreshTokenHash(String);

impl RefreshTokenHash {
    /// Rehydrate a digest read back from persistent storage.
    pub fn from_stored(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for RefreshTokenHash {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        // Short prefix is enough to correlate log lines.
        f.write_str(&self.0[..self.0.len().min(12)])
    }
}
