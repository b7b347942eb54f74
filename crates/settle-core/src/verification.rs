//! # Verification Codes
//!
//! Normalisation and digests for single-use proof-of-purchase codes.
//!
//! Codes are never stored in clear text:
//! ```text
//! " ab12-cd34 " ──► trim + upper ──► "AB12-CD34" ──► SHA-256 hex  (lookup key)
//!                                                 └─► "CD34"       (last 4, display)
//! ```
//! Import and redemption both go through [`normalize_code`], so a code
//! typed in lower case still matches.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use ts_rs::TS;

use crate::error::ValidationError;
use crate::validation::{non_blank, ValidationResult};

/// Trims and upper-cases a code.
#[inline]
pub fn normalize_code(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// SHA-256 of the normalised code, lowercase hex.
pub fn hash_code(raw: &str) -> String {
    let digest = Sha256::digest(normalize_code(raw).as_bytes());
    hex::encode(digest)
}

/// Last four characters of the normalised code.
pub fn last4(raw: &str) -> String {
    let normalized = normalize_code(raw);
    let chars: Vec<char> = normalized.chars().collect();
    let start = chars.len().saturating_sub(4);
    chars[start..].iter().collect()
}

/// The stored form of a code/security-code pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeDigest {
    pub code_hash: String,
    pub security_hash: String,
    pub code_last4: String,
    pub security_last4: String,
}

impl CodeDigest {
    /// Digests a pair. Both halves must be non-blank.
    ///
    /// ```rust
    /// use settle_core::verification::CodeDigest;
    ///
    /// let a = CodeDigest::new("abcd-1234", "x9y8").unwrap();
    /// let b = CodeDigest::new(" ABCD-1234 ", "X9Y8").unwrap();
    /// assert_eq!(a, b);
    /// assert_eq!(a.code_last4, "1234");
    /// ```
    pub fn new(code: &str, security_code: &str) -> ValidationResult<Self> {
        let code = required("code", code)?;
        let security_code = required("security code", security_code)?;

        Ok(CodeDigest {
            code_hash: hash_code(&code),
            security_hash: hash_code(&security_code),
            code_last4: last4(&code),
            security_last4: last4(&security_code),
        })
    }
}

fn required(field: &str, value: &str) -> ValidationResult<String> {
    non_blank(Some(value)).ok_or_else(|| ValidationError::Required {
        field: field.to_string(),
    })
}

/// One row of a bulk import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CodeImportRow {
    pub code: String,
    pub security_code: String,
    pub batch: Option<String>,
    pub product_id: Option<String>,
}

/// Outcome of a bulk import.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ImportReport {
    pub imported: i64,
    /// Last-4 of codes skipped as already present (or repeated in the batch).
    pub duplicates: Vec<String>,
    /// Row index and reason for rows rejected by validation.
    pub rejected: Vec<(usize, String)>,
}

/// Registry counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CodeStats {
    pub total: i64,
    pub used: i64,
    pub unused: i64,
}
