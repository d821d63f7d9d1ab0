//! Claim sets for ID tokens and JWT access tokens.

use base64::prelude::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256, Sha384};

use crate::keys::SigningAlgorithm;
use crate::oauth::types::ResourceOwner;

/// JWT `typ` header for ID tokens
pub const ID_TOKEN_TYPE: &str = "JWT";

/// JWT `typ` header for access tokens (RFC 9068)
pub const ACCESS_TOKEN_TYPE: &str = "at+jwt";

/// Claims the profile provider may not override
const PROTOCOL_CLAIMS: &[&str] = &[
    "iss", "sub", "aud", "exp", "iat", "nbf", "auth_time", "nonce", "sid", "idp", "amr",
    "at_hash", "c_hash", "jti", "azp",
];

/// OpenID Connect ID Token Claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdTokenClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    pub auth_time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idp: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub amr: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub at_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub c_hash: Option<String>,
    /// Profile claims
    #[serde(flatten)]
    pub additional_claims: Map<String, Value>,
}

impl IdTokenClaims {
    pub fn new(
        issuer: &str,
        owner: &ResourceOwner,
        client_id: &str,
        issued_at: DateTime<Utc>,
        lifetime: chrono::Duration,
    ) -> Self {
        Self {
            iss: issuer.to_string(),
            sub: owner.subject.clone(),
            aud: client_id.to_string(),
            exp: (issued_at + lifetime).timestamp(),
            iat: issued_at.timestamp(),
            auth_time: owner.auth_time.timestamp(),
            nonce: None,
            sid: owner.session_id.clone(),
            idp: owner.idp.clone(),
            amr: owner.amr.clone(),
            at_hash: None,
            c_hash: None,
            additional_claims: Map::new(),
        }
    }

    pub fn with_nonce(mut self, nonce: Option<String>) -> Self {
        self.nonce = nonce;
        self
    }

    pub fn with_at_hash(mut self, access_token: &str, algorithm: SigningAlgorithm) -> Self {
        self.at_hash = Some(left_half_hash(access_token, algorithm));
        self
    }

    pub fn with_c_hash(mut self, code: &str, algorithm: SigningAlgorithm) -> Self {
        self.c_hash = Some(left_half_hash(code, algorithm));
        self
    }

    /// Merge profile claims, never replacing protocol claims.
    pub fn with_profile_claims(mut self, claims: Map<String, Value>) -> Self {
        for (name, value) in claims {
            if !PROTOCOL_CLAIMS.contains(&name.as_str()) {
                self.additional_claims.insert(name, value);
            }
        }
        self
    }
}

/// JWT access token claims (RFC 9068)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub iss: String,
    /// Resource owner subject, or the client id when there is none
    pub sub: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aud: Vec<String>,
    pub exp: i64,
    pub iat: i64,
    pub nbf: i64,
    pub jti: String,
    pub client_id: String,
    pub scope: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idp: Option<String>,
}

impl AccessTokenClaims {
    pub fn new(
        issuer: &str,
        client_id: &str,
        owner: Option<&ResourceOwner>,
        audiences: Vec<String>,
        scope: Vec<String>,
        issued_at: DateTime<Utc>,
        lifetime: chrono::Duration,
    ) -> Self {
        Self {
            iss: issuer.to_string(),
            sub: owner
                .map(|owner| owner.subject.clone())
                .unwrap_or_else(|| client_id.to_string()),
            aud: audiences,
            exp: (issued_at + lifetime).timestamp(),
            iat: issued_at.timestamp(),
            nbf: issued_at.timestamp(),
            jti: uuid::Uuid::new_v4().simple().to_string(),
            client_id: client_id.to_string(),
            scope,
            sid: owner.and_then(|owner| owner.session_id.clone()),
            auth_time: owner.map(|owner| owner.auth_time.timestamp()),
            idp: owner.and_then(|owner| owner.idp.clone()),
        }
    }
}

/// `at_hash` / `c_hash`: base64url of the left half of the hash matching the signing algorithm
pub fn left_half_hash(value: &str, algorithm: SigningAlgorithm) -> String {
    let digest: Vec<u8> = match algorithm {
        SigningAlgorithm::RS256 => Sha256::digest(value.as_bytes()).to_vec(),
        SigningAlgorithm::RS384 | SigningAlgorithm::ES384 => {
            Sha384::digest(value.as_bytes()).to_vec()
        }
    };
    BASE64_URL_SAFE_NO_PAD.encode(&digest[..digest.len() / 2])
}
