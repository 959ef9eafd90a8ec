//! SAML assertion fixtures.
//!
//! The SAML authentication step attaches an encoded assertion to its span so that downstream consumers can exercise
//! assertion validation. A corrupted assertion is a fixture for testing corruption detection downstream: whether to
//! corrupt is always an explicit argument, never derived from the identity.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use md5::{Digest as _, Md5};

/// Identity whose SAML attempts always fail and carry a corrupted assertion.
pub const KNOWN_BAD_IDENTITY: &str = "user_13";

const ISSUER: &str = "https://idp.example.com/saml2";

/// Number of characters damaged in a corrupted assertion.
const CORRUPTED_CHARS: usize = 4;

/// Builds a base64-encoded SAML assertion for `identity`, issued at `issued_at_secs`.
///
/// When `corrupt` is `true`, a handful of characters in the encoded form are replaced with bytes outside of the base64
/// alphabet and the padding is stripped, so decoding fails. Positions are derived from an MD5 digest of the identity and
/// issue time, so the same inputs always produce the same corruption.
pub fn saml_assertion(identity: &str, issued_at_secs: f64, corrupt: bool) -> String {
    let secs = issued_at_secs.floor() as i64;
    let issue_instant = DateTime::<Utc>::from_timestamp(secs, 0)
        .unwrap_or_default()
        .format("%Y-%m-%dT%H:%M:%SZ");

    let digest = Md5::new()
        .chain_update(identity.as_bytes())
        .chain_update(b":")
        .chain_update(secs.to_string().as_bytes())
        .finalize();
    let assertion_id: String = digest.iter().map(|b| format!("{:02x}", b)).collect();

    let document = format!(
        concat!(
            r#"<saml:Assertion xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="_{id}" "#,
            r#"IssueInstant="{instant}" Version="2.0">"#,
            r#"<saml:Issuer>{issuer}</saml:Issuer>"#,
            r#"<saml:Subject><saml:NameID>{identity}</saml:NameID></saml:Subject>"#,
            r#"</saml:Assertion>"#
        ),
        id = assertion_id,
        instant = issue_instant,
        issuer = ISSUER,
        identity = identity,
    );

    let encoded = STANDARD.encode(document.as_bytes());
    if corrupt {
        corrupt_encoded(encoded, &digest)
    } else {
        encoded
    }
}

fn corrupt_encoded(encoded: String, digest: &[u8]) -> String {
    let mut bytes = encoded.trim_end_matches('=').as_bytes().to_vec();
    if bytes.is_empty() {
        return encoded;
    }

    let len = bytes.len();
    for chunk in digest.chunks(2).take(CORRUPTED_CHARS) {
        let position = usize::from(u16::from_be_bytes([chunk[0], chunk[1]])) % len;
        bytes[position] = b'%';
    }

    // Only ASCII was written into an ASCII string.
    String::from_utf8_lossy(&bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use base64::{engine::general_purpose::STANDARD, Engine as _};

    use super::*;

    #[test]
    fn valid_assertion_decodes() {
        let encoded = saml_assertion("user_7", 1_700_000_000.5, false);
        let decoded = String::from_utf8(STANDARD.decode(encoded).unwrap()).unwrap();

        assert!(decoded.contains("<saml:NameID>user_7</saml:NameID>"));
        assert!(decoded.contains(r#"IssueInstant="2023-11-14T22:13:20Z""#));
    }

    #[test]
    fn corrupted_assertion_does_not_decode() {
        let encoded = saml_assertion(KNOWN_BAD_IDENTITY, 1_700_000_000.0, true);
        assert!(encoded.contains('%'));
        assert!(STANDARD.decode(encoded).is_err());
    }

    #[test]
    fn corruption_is_deterministic() {
        let first = saml_assertion(KNOWN_BAD_IDENTITY, 1_700_000_000.0, true);
        let second = saml_assertion(KNOWN_BAD_IDENTITY, 1_700_000_000.0, true);
        assert_eq!(first, second);
        assert_ne!(first, saml_assertion(KNOWN_BAD_IDENTITY, 1_700_000_000.0, false));
    }
}
