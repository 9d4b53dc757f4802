//! Upload identity for deduplication.
//!
//! Two uploads are equivalent when they agree on file name, byte length,
//! rotation angle, and page order after normalization. The registry keys
//! on a SHA-256 digest of the canonical form rather than the raw tuple so
//! key size stays bounded and hostile inputs cannot craft collisions.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Direction the source pages are consumed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PageOrder {
    /// First page first.
    Norm,
    /// Last page first (the whole document is reversed before packing).
    Rev,
}

#[derive(Debug, Error)]
#[error("unknown page order: {0:?} (expected Norm or Rev)")]
pub struct ParseOrderError(pub String);

impl PageOrder {
    /// Canonical upper-case token used in digests and output filenames.
    pub fn token(self) -> &'static str {
        match self {
            PageOrder::Norm => "NORM",
            PageOrder::Rev => "REV",
        }
    }
}

impl std::str::FromStr for PageOrder {
    type Err = ParseOrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NORM" => Ok(PageOrder::Norm),
            "REV" => Ok(PageOrder::Rev),
            _ => Err(ParseOrderError(s.to_string())),
        }
    }
}

impl std::fmt::Display for PageOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.token())
    }
}

/// Value object identifying one upload for idempotency purposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fingerprint {
    pub file_name: String,
    pub size_bytes: i64,
    pub rotation: i32,
    pub order: PageOrder,
}

impl Fingerprint {
    /// Build a fingerprint, normalizing the file name (whitespace trim).
    pub fn new(file_name: &str, size_bytes: i64, rotation: i32, order: PageOrder) -> Self {
        Self {
            file_name: file_name.trim().to_string(),
            size_bytes,
            rotation,
            order,
        }
    }

    /// Canonical serialization hashed into the registry key.
    fn canonical(&self) -> String {
        format!(
            "{}\n{}\n{}\n{}",
            self.file_name,
            self.size_bytes,
            self.rotation,
            self.order.token()
        )
    }

    /// Lowercase hex SHA-256 of the canonical form (64 chars).
    pub fn digest(&self) -> String {
        hex::encode(Sha256::digest(self.canonical().as_bytes()))
    }
}
