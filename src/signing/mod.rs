// src/signing/mod.rs
//! HMAC request signing for the deployment API.
//!
//! The server recomputes the signature from the same canonical message, so
//! every byte matters:
//!
//! ```text
//! message   = client_id + METHOD + path_and_query + timestamp + nonce + base64(md5(body))
//! signature = base64(hmac_sha256(base64_decode(secret), message))
//! header    = "<scheme> client_id:timestamp:nonce:signature"
//! ```

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use md5::{Digest, Md5};
use sha2::Sha256;
use std::fmt;

use crate::config::DEFAULT_AUTH_SCHEME;
use crate::error::{ClientError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Parsed form of the Authorization header value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationHeader {
    pub scheme: String,
    pub client_id: String,
    pub timestamp: String,
    pub nonce: String,
    pub signature: String,
}

impl fmt::Display for AuthorizationHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}:{}:{}:{}",
            self.scheme, self.client_id, self.timestamp, self.nonce, self.signature
        )
    }
}

/// Produces legacy-compatible Authorization headers
#[derive(Debug, Clone)]
pub struct SignatureGenerator {
    scheme: String,
}

impl Default for SignatureGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_AUTH_SCHEME)
    }
}

impl SignatureGenerator {
    pub fn new(scheme: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
        }
    }

    /// Sign with a fresh timestamp and nonce
    pub fn sign(
        &self,
        client_id: &str,
        client_secret_b64: &str,
        method: &str,
        path_and_query: &str,
        body: &str,
    ) -> Result<String> {
        let timestamp = chrono::Utc::now().timestamp_millis().to_string();
        let nonce = new_nonce();
        self.sign_at(
            client_id,
            client_secret_b64,
            method,
            path_and_query,
            body,
            &timestamp,
            &nonce,
        )
        .map(|header| header.to_string())
    }

    /// Sign with caller-supplied timestamp and nonce. Deterministic.
    #[allow(clippy::too_many_arguments)]
    pub fn sign_at(
        &self,
        client_id: &str,
        client_secret_b64: &str,
        method: &str,
        path_and_query: &str,
        body: &str,
        timestamp: &str,
        nonce: &str,
    ) -> Result<AuthorizationHeader> {
        let key = STANDARD
            .decode(client_secret_b64.trim())
            .map_err(|e| ClientError::Auth(format!("client secret is not valid base64: {}", e)))?;

        let message = canonical_message(client_id, method, path_and_query, timestamp, nonce, body);

        let mut mac = HmacSha256::new_from_slice(&key)
            .map_err(|e| ClientError::Auth(format!("unusable signing key: {}", e)))?;
        mac.update(message.as_bytes());
        let signature = STANDARD.encode(mac.finalize().into_bytes());

        Ok(AuthorizationHeader {
            scheme: self.scheme.clone(),
            client_id: client_id.to_string(),
            timestamp: timestamp.to_string(),
            nonce: nonce.to_string(),
            signature,
        })
    }
}

/// base64(MD5(body)); an empty body hashes the empty byte string
pub fn body_hash(body: &str) -> String {
    STANDARD.encode(Md5::digest(body.as_bytes()))
}

/// The exact byte sequence that gets signed
pub fn canonical_message(
    client_id: &str,
    method: &str,
    path_and_query: &str,
    timestamp: &str,
    nonce: &str,
    body: &str,
) -> String {
    format!(
        "{}{}{}{}{}{}",
        client_id,
        method.to_uppercase(),
        path_and_query,
        timestamp,
        nonce,
        body_hash(body)
    )
}

/// Random UUID v4 with hyphens stripped
pub fn new_nonce() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    // base64("super-secret-key-material-0123456789")
    const SECRET: &str = "c3VwZXItc2VjcmV0LWtleS1tYXRlcmlhbC0wMTIzNDU2Nzg5";
    const PATH: &str =
        "/api/v1.0/projects/2a561398-d517-4634-9bc4-c8e3c1a0e1f2/environments/Integration/deployments";
    const TS: &str = "1700000000000";
    const NONCE: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn test_body_hash_known_values() {
        assert_eq!(body_hash(""), "1B2M2Y8AsgTpgAmY7PhCfg==");
        assert_eq!(body_hash(r#"{"sourceApps":["cms"]}"#), "RJtEid5rwWoBzIfj0J92NQ==");
    }

    #[test]
    fn test_known_answer_post() {
        let signer = SignatureGenerator::default();
        let header = signer
            .sign_at("test-client", SECRET, "post", PATH, r#"{"sourceApps":["cms"]}"#, TS, NONCE)
            .unwrap();

        assert_eq!(header.signature, "N3d1KMUW9UKKrX3WyrIlPJMrs/9U/lo/GD/7idMOZqk=");
        assert_eq!(
            header.to_string(),
            format!(
                "epi-hmac test-client:{}:{}:N3d1KMUW9UKKrX3WyrIlPJMrs/9U/lo/GD/7idMOZqk=",
                TS, NONCE
            )
        );
    }

    #[test]
    fn test_known_answer_get_with_empty_body() {
        let signer = SignatureGenerator::default();
        let header = signer
            .sign_at(
                "test-client",
                SECRET,
                "GET",
                "/api/v1.0/projects/p1/environments",
                "",
                TS,
                NONCE,
            )
            .unwrap();
        assert_eq!(header.signature, "fGPSy0IDb4W7aZRP7KF7BxOCvbmL8dWnrOmpwc6iRRI=");
    }

    #[test]
    fn test_deterministic_for_fixed_inputs() {
        let signer = SignatureGenerator::default();
        let a = signer.sign_at("c", SECRET, "POST", "/x?y=1", "{}", TS, NONCE).unwrap();
        let b = signer.sign_at("c", SECRET, "POST", "/x?y=1", "{}", TS, NONCE).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_single_body_character_changes_signature() {
        let signer = SignatureGenerator::default();
        let body = r#"{"sourceApps":["cms"]}"#;
        let base = signer.sign_at("c", SECRET, "POST", PATH, body, TS, NONCE).unwrap();

        for i in 0..body.len() {
            let mut flipped = body.as_bytes().to_vec();
            flipped[i] = if flipped[i] == b'x' { b'y' } else { b'x' };
            let flipped = String::from_utf8(flipped).unwrap();
            let other = signer.sign_at("c", SECRET, "POST", PATH, &flipped, TS, NONCE).unwrap();
            assert_ne!(base.signature, other.signature, "flip at {} kept signature", i);
        }
    }

    #[test]
    fn test_method_is_uppercased() {
        assert_eq!(
            canonical_message("c", "get", "/p", "1", "n", ""),
            canonical_message("c", "GET", "/p", "1", "n", "")
        );
        assert!(canonical_message("c", "get", "/p", "1", "n", "").starts_with("cGET/p1n"));
    }

    #[test]
    fn test_invalid_secret_is_auth_error() {
        let signer = SignatureGenerator::default();
        let result = signer.sign("c", "not base64 !!", "GET", "/", "");
        assert!(matches!(result, Err(ClientError::Auth(_))));
    }

    #[test]
    fn test_fresh_sign_uses_new_nonce_and_ms_timestamp() {
        let signer = SignatureGenerator::new("custom-hmac");
        let a = signer.sign("client", SECRET, "GET", "/", "").unwrap();
        let b = signer.sign("client", SECRET, "GET", "/", "").unwrap();
        assert_ne!(a, b);

        let rest = a.strip_prefix("custom-hmac client:").unwrap();
        let parts: Vec<&str> = rest.split(':').collect();
        assert_eq!(parts.len(), 3);
        assert!(parts[0].len() >= 13 && parts[0].chars().all(|c| c.is_ascii_digit()));
        assert_eq!(parts[1].len(), 32);
        assert!(!parts[1].contains('-'));
    }
}
