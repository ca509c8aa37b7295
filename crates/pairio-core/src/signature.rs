//! Request signatures
//!
//! A client proves knowledge of its channel password without sending it.
//! The signed payload is the compact JSON object
//!
//! ```text
//! {"collection":..,"key":..,"name":<"get"|"set">,"password":..[,"value":..]}
//! ```
//!
//! with keys in alphabetical order, hashed and hex-encoded. `value` is present
//! only for operations that carry one.

use crate::admission::OperationKind;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use subtle::ConstantTimeEq;
use tracing::warn;

/// Digest used to sign requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureAlgorithm {
    /// 160-bit digest understood by existing clients
    Sha1,
    #[default]
    Sha256,
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignatureAlgorithm::Sha1 => write!(f, "sha1"),
            SignatureAlgorithm::Sha256 => write!(f, "sha256"),
        }
    }
}

impl FromStr for SignatureAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha1" | "sha-1" => Ok(SignatureAlgorithm::Sha1),
            "sha256" | "sha-256" => Ok(SignatureAlgorithm::Sha256),
            other => Err(format!("Unknown signature algorithm: {}", other)),
        }
    }
}

// Field order is the serialization order; keep it alphabetical.
#[derive(Serialize)]
struct SignedFields<'a> {
    collection: &'a str,
    key: &'a str,
    name: &'a str,
    password: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<&'a str>,
}

/// Canonical JSON text that gets hashed
pub fn canonical_payload(
    operation: OperationKind,
    collection: &str,
    key: &str,
    value: Option<&str>,
    password: &str,
) -> String {
    let fields = SignedFields {
        collection,
        key,
        name: operation.as_str(),
        password,
        value: match operation {
            OperationKind::Read => None,
            OperationKind::Write => value,
        },
    };
    serde_json::to_string(&fields).expect("string-only struct always serializes")
}

/// Compute the hex signature of a request
pub fn sign(
    algorithm: SignatureAlgorithm,
    operation: OperationKind,
    collection: &str,
    key: &str,
    value: Option<&str>,
    password: &str,
) -> String {
    let payload = canonical_payload(operation, collection, key, value, password);
    match algorithm {
        SignatureAlgorithm::Sha1 => hex::encode(Sha1::digest(payload.as_bytes())),
        SignatureAlgorithm::Sha256 => hex::encode(Sha256::digest(payload.as_bytes())),
    }
}

/// SHA-1 hex digest of a key, as clients send it on the wire
pub fn hash_key(key: &str) -> String {
    hex::encode(Sha1::digest(key.as_bytes()))
}

/// Check a provided signature against the expected digest.
///
/// Comparison is constant-time in the signature contents.
pub fn verify(
    algorithm: SignatureAlgorithm,
    operation: OperationKind,
    collection: &str,
    key: &str,
    value: Option<&str>,
    password: &str,
    provided: &str,
) -> bool {
    let expected = sign(algorithm, operation, collection, key, value, password);
    constant_time_eq(expected.as_bytes(), provided.as_bytes())
}

fn constant_time_eq(expected: &[u8], provided: &[u8]) -> bool {
    expected.len() == provided.len() && expected.ct_eq(provided).into()
}

/// Signature verifier with an optional test bypass.
///
/// The bypass accepts a fixed secret in place of a real signature. It only
/// takes effect when both the secret and the opt-in flag are set.
#[derive(Clone, Default)]
pub struct SignatureVerifier {
    algorithm: SignatureAlgorithm,
    test_signature: Option<String>,
    allow_test_signature: bool,
}

impl fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("algorithm", &self.algorithm)
            .field(
                "test_signature",
                &self.test_signature.as_ref().map(|_| "[REDACTED]"),
            )
            .field("allow_test_signature", &self.allow_test_signature)
            .finish()
    }
}

impl SignatureVerifier {
    pub fn new(algorithm: SignatureAlgorithm) -> Self {
        Self {
            algorithm,
            test_signature: None,
            allow_test_signature: false,
        }
    }

    /// Configure the test bypass secret and whether it is honored
    pub fn with_test_signature(mut self, secret: impl Into<String>, allow: bool) -> Self {
        self.test_signature = Some(secret.into());
        self.allow_test_signature = allow;
        self
    }

    pub fn algorithm(&self) -> SignatureAlgorithm {
        self.algorithm
    }

    /// Whether the test bypass is active
    /// Whether the test bypass is active. An empty secret counts as unset.
    pub fn test_bypass_enabled(&self) -> bool {
        self.allow_test_signature && self.test_secret().is_some()
    }

    fn test_secret(&self) -> Option<&str> {
        self.test_signature.as_deref().filter(|secret| !secret.is_empty())
    }

    pub fn verify(
        &self,
        operation: OperationKind,
        collection: &str,
        key: &str,
        value: Option<&str>,
        password: &str,
        provided: &str,
    ) -> bool {
        if self.allow_test_signature {
            if let Some(secret) = self.test_secret() {
                if constant_time_eq(secret.as_bytes(), provided.as_bytes()) {
                    warn!(
                        "WARNING: {} {}/{} verified using the configured test signature",
                        operation, collection, key
                    );
                    return true;
                }
            }
        }
        verify(
            self.algorithm,
            operation,
            collection,
            key,
            value,
            password,
            provided,
        )
    }
}
