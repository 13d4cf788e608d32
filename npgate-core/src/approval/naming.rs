//! Deterministic names for approval requests and tokens.

use super::types::PolicyIdentity;

/// Derives the request (and token) name for a policy: `<prefix>-<namespace>-<name>`.
///
/// The derivation is not injective across namespaces containing dashes
/// (`a-b/c` and `a/b-c` collide). The request's identity annotations are the
/// source of truth, so a collision surfaces as a request targeting another
/// policy rather than a false approval.
#[must_use]
pub fn request_name(prefix: &str, identity: &PolicyIdentity) -> String {
    format!("{prefix}-{}-{}", identity.namespace, identity.name)
}

/// Whether `prefix` can start a DNS-1123 subdomain name.
#[must_use]
pub fn is_valid_prefix(prefix: &str) -> bool {
    !prefix.is_empty()
        && prefix.len() <= 63
        && prefix
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'.')
        && prefix
            .bytes()
            .next()
            .is_some_and(|b| b.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_name_format() {
        let id = PolicyIdentity::new("default", "test-policy");
        assert_eq!(request_name("np-approval", &id), "np-approval-default-test-policy");
    }

    #[test]
    fn test_prefix_validation() {
        assert!(is_valid_prefix("np-approval"));
        assert!(is_valid_prefix("gate.v2"));
        assert!(!is_valid_prefix(""));
        assert!(!is_valid_prefix("-leading"));
        assert!(!is_valid_prefix("Upper"));
        assert!(!is_valid_prefix("under_score"));
    }
}
