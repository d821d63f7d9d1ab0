//! Proof Key for Code Exchange (RFC 7636).

use base64::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// `code_challenge_method` values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CodeChallengeMethod {
    #[serde(rename = "plain")]
    Plain,
    S256,
}

/// Methods advertised in discovery
pub const SUPPORTED_CODE_CHALLENGE_METHODS: &[CodeChallengeMethod] =
    &[CodeChallengeMethod::Plain, CodeChallengeMethod::S256];

impl CodeChallengeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::S256 => "S256",
        }
    }

    /// Parse a method name. Absent means `plain` per RFC 7636 section 4.3.
    pub fn parse(value: Option<&str>) -> Option<Self> {
        match value {
            None => Some(Self::Plain),
            Some(value) => SUPPORTED_CODE_CHALLENGE_METHODS
                .iter()
                .find(|method| method.as_str() == value)
                .copied(),
        }
    }
}

/// Challenges and verifiers share the same syntax: 43-128 unreserved characters.
pub fn is_well_formed(value: &str) -> bool {
    (43..=128).contains(&value.len())
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~'))
}

/// Compute the challenge a verifier produces under `method`.
pub fn compute_challenge(code_verifier: &str, method: CodeChallengeMethod) -> String {
    match method {
        CodeChallengeMethod::Plain => code_verifier.to_string(),
        CodeChallengeMethod::S256 => {
            BASE64_URL_SAFE_NO_PAD.encode(Sha256::digest(code_verifier.as_bytes()))
        }
    }
}

/// Constant-time check that the verifier matches the recorded challenge.
///
/// Only the transform is checked; verifier syntax is not enforced here.
pub fn verify_pkce(code_verifier: &str, code_challenge: &str, method: CodeChallengeMethod) -> bool {
    if code_verifier.is_empty() {
        return false;
    }
    let computed = compute_challenge(code_verifier, method);
    computed.as_bytes().ct_eq(code_challenge.as_bytes()).into()
}
