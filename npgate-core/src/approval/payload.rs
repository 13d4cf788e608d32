//! PKCS#10 certificate request payloads for approval requests.
//!
//! The key pair is generated per request and discarded: the signed artifact
//! is only ever used as proof that an approver acted, never to authenticate.

use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use thiserror::Error;

/// Organization placed in every approval request subject.
pub const SUBJECT_ORGANIZATION: &str = "networkpolicy-approval";

/// Failure to build a certificate request.
#[derive(Debug, Error)]
#[error("failed to build certificate request for {name}: {source}")]
pub struct PayloadError {
    /// Request name the payload was being built for
    pub name: String,
    /// Underlying generator error
    #[source]
    pub source: rcgen::Error,
}

/// Builds a PEM-encoded certificate request with `name` as CN and DNS SAN.
///
/// # Errors
///
/// Returns `PayloadError` if key generation or encoding fails.
pub fn certificate_request_pem(name: &str) -> Result<Vec<u8>, PayloadError> {
    build(name).map_err(|source| PayloadError {
        name: name.to_string(),
        source,
    })
}

fn build(name: &str) -> Result<Vec<u8>, rcgen::Error> {
    let key = KeyPair::generate()?;
    let mut params = CertificateParams::new(vec![name.to_string()])?;
    let mut subject = DistinguishedName::new();
    subject.push(DnType::CommonName, name);
    subject.push(DnType::OrganizationName, SUBJECT_ORGANIZATION);
    params.distinguished_name = subject;
    let pem = params.serialize_request(&key)?.pem()?;
    Ok(pem.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_is_pem_csr() {
        let pem = certificate_request_pem("np-approval-default-test").unwrap();
        let text = String::from_utf8(pem).unwrap();
        assert!(text.starts_with("-----BEGIN CERTIFICATE REQUEST-----"));
        assert!(text.trim_end().ends_with("-----END CERTIFICATE REQUEST-----"));
    }

    #[test]
    fn test_payloads_use_fresh_keys() {
        let a = certificate_request_pem("same").unwrap();
        let b = certificate_request_pem("same").unwrap();
        assert_ne!(a, b);
    }
}
