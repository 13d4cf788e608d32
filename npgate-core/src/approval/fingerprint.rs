//! Deterministic content fingerprints for network policies.
//!
//! A fingerprint is the SHA-256 digest of the canonical JSON encoding of
//! `{name, namespace, spec}`. Object keys are sorted at every level and no
//! whitespace is emitted, so the digest does not depend on the key order
//! produced by whatever decoded the policy, nor on whether
//! `serde_json/preserve_order` is enabled somewhere in the dependency graph.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt::{self, Write as _};
use thiserror::Error;

use super::types::PolicyIdentity;

/// Maximum nesting depth accepted by the canonical encoder.
const MAX_CANONICAL_DEPTH: usize = 64;

/// Hex length of a SHA-256 digest.
const FINGERPRINT_LEN: usize = 64;

// ============================================================================
// Fingerprint
// ============================================================================

/// Lowercase hex SHA-256 digest identifying a policy's approved content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Parses a stored fingerprint, rejecting anything that is not 64 hex chars.
    ///
    /// Stored values come from annotations and secret data that anyone with
    /// write access can edit, so a malformed value is treated as absent.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.len() == FINGERPRINT_LEN && raw.bytes().all(|b| b.is_ascii_hexdigit()) {
            Some(Self(raw.to_ascii_lowercase()))
        } else {
            None
        }
    }

    /// Parses fingerprint bytes as stored in token data.
    #[must_use]
    pub fn from_bytes(raw: &[u8]) -> Option<Self> {
        std::str::from_utf8(raw).ok().and_then(Self::parse)
    }

    /// Returns the hex digest.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a short prefix for log lines.
    #[must_use]
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Failures while encoding policy content for hashing.
///
/// Both are permanent: the same input fails the same way on every retry.
#[derive(Debug, Error)]
pub enum FingerprintError {
    /// Policy content nests deeper than the encoder accepts.
    #[error("policy content nesting exceeds maximum depth of {max}")]
    TooDeep {
        /// Depth limit that was exceeded
        max: usize,
    },

    /// A leaf value could not be encoded.
    #[error("failed to encode policy content: {0}")]
    Encode(#[from] serde_json::Error),
}

// ============================================================================
// Hashing
// ============================================================================

/// Computes the fingerprint of a policy identity and its `spec` content.
///
/// # Errors
///
/// Returns `FingerprintError` if the policy content cannot be encoded.
pub fn fingerprint(identity: &PolicyIdentity, spec: &Value) -> Result<Fingerprint, FingerprintError> {
    let envelope = serde_json::json!({
        "name": identity.name,
        "namespace": identity.namespace,
        "spec": spec,
    });
    let encoded = canonical_json(&envelope)?;
    let digest = Sha256::digest(encoded.as_bytes());
    Ok(Fingerprint(format!("{digest:x}")))
}

/// Encodes a JSON value with sorted object keys and no whitespace.
///
/// # Errors
///
/// Returns `FingerprintError::TooDeep` past [`MAX_CANONICAL_DEPTH`] levels.
pub fn canonical_json(value: &Value) -> Result<String, FingerprintError> {
    let mut out = String::new();
    write_canonical(value, 0, &mut out)?;
    Ok(out)
}

fn write_canonical(value: &Value, depth: usize, out: &mut String) -> Result<(), FingerprintError> {
    if depth > MAX_CANONICAL_DEPTH {
        return Err(FingerprintError::TooDeep {
            max: MAX_CANONICAL_DEPTH,
        });
    }

    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key)?);
                out.push(':');
                write_canonical(item, depth + 1, out)?;
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, depth + 1, out)?;
            }
            out.push(']');
        }
        leaf => {
            // Infallible for String targets; keeps the `?` path for Encode.
            let _ = write!(out, "{}", serde_json::to_string(leaf)?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn identity() -> PolicyIdentity {
        PolicyIdentity::new("team-a", "allow-dns")
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let spec = json!({"podSelector": {}, "policyTypes": ["Ingress"]});
        let first = fingerprint(&identity(), &spec).unwrap();
        let second = fingerprint(&identity(), &spec).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.as_str().len(), 64);
    }

    #[test]
    fn test_fingerprint_ignores_key_order() {
        let a: Value =
            serde_json::from_str(r#"{"podSelector":{"matchLabels":{"a":"1","b":"2"}},"policyTypes":["Egress"]}"#)
                .unwrap();
        let b: Value =
            serde_json::from_str(r#"{"policyTypes":["Egress"],"podSelector":{"matchLabels":{"b":"2","a":"1"}}}"#)
                .unwrap();
        assert_eq!(fingerprint(&identity(), &a).unwrap(), fingerprint(&identity(), &b).unwrap());
    }

    #[test]
    fn test_fingerprint_changes_with_content() {
        let base = json!({"podSelector": {}, "policyTypes": ["Ingress"]});
        let changed = json!({"podSelector": {}, "policyTypes": ["Ingress", "Egress"]});
        assert_ne!(
            fingerprint(&identity(), &base).unwrap(),
            fingerprint(&identity(), &changed).unwrap()
        );
    }

    #[test]
    fn test_fingerprint_changes_with_identity() {
        let spec = json!({"podSelector": {}});
        let renamed = PolicyIdentity::new("team-a", "modified-policy");
        let moved = PolicyIdentity::new("team-b", "allow-dns");
        let original = fingerprint(&identity(), &spec).unwrap();
        assert_ne!(original, fingerprint(&renamed, &spec).unwrap());
        assert_ne!(original, fingerprint(&moved, &spec).unwrap());
    }

    #[test]
    fn test_array_order_is_significant() {
        let a = json!({"policyTypes": ["Ingress", "Egress"]});
        let b = json!({"policyTypes": ["Egress", "Ingress"]});
        assert_ne!(fingerprint(&identity(), &a).unwrap(), fingerprint(&identity(), &b).unwrap());
    }

    #[test]
    fn test_canonical_json_sorts_and_compacts() {
        let value = json!({"b": [1, {"d": null, "c": true}], "a": "x"});
        assert_eq!(
            canonical_json(&value).unwrap(),
            r#"{"a":"x","b":[1,{"c":true,"d":null}]}"#
        );
    }

    #[test]
    fn test_canonical_json_rejects_deep_nesting() {
        let mut value = json!(0);
        for _ in 0..(MAX_CANONICAL_DEPTH + 2) {
            value = json!([value]);
        }
        assert!(matches!(
            canonical_json(&value),
            Err(FingerprintError::TooDeep { .. })
        ));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Fingerprint::parse("old-hash").is_none());
        assert!(Fingerprint::parse(&"g".repeat(64)).is_none());
        let upper = "A".repeat(64);
        assert_eq!(Fingerprint::parse(&upper).unwrap().as_str(), "a".repeat(64));
    }
}
