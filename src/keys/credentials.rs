//! Signing credentials: an asymmetric key pair with its algorithm and key id.

use std::fmt;
use std::str::FromStr;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, encode};
use p384::SecretKey as EcSecretKey;
use p384::ecdsa::SigningKey as EcSigningKey;
use p384::pkcs8::{DecodePrivateKey as EcDecodePrivateKey, EncodePrivateKey as EcEncodePrivateKey};
use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use serde::{Deserialize, Serialize};

use crate::errors::KeyError;

/// Asymmetric signing algorithms supported for issued tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SigningAlgorithm {
    RS256,
    RS384,
    ES384,
}

/// Algorithms accepted in configuration and advertised in discovery, in preference order
pub const SUPPORTED_SIGNING_ALGORITHMS: &[SigningAlgorithm] = &[
    SigningAlgorithm::RS256,
    SigningAlgorithm::RS384,
    SigningAlgorithm::ES384,
];

impl SigningAlgorithm {
    pub fn to_jwt_algorithm(self) -> Algorithm {
        match self {
            Self::RS256 => Algorithm::RS256,
            Self::RS384 => Algorithm::RS384,
            Self::ES384 => Algorithm::ES384,
        }
    }

    pub fn from_jwt_algorithm(algorithm: Algorithm) -> Option<Self> {
        match algorithm {
            Algorithm::RS256 => Some(Self::RS256),
            Algorithm::RS384 => Some(Self::RS384),
            Algorithm::ES384 => Some(Self::ES384),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RS256 => "RS256",
            Self::RS384 => "RS384",
            Self::ES384 => "ES384",
        }
    }

    pub fn is_rsa(&self) -> bool {
        matches!(self, Self::RS256 | Self::RS384)
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SigningAlgorithm {
    type Err = KeyError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        SUPPORTED_SIGNING_ALGORITHMS
            .iter()
            .find(|algorithm| algorithm.as_str().eq_ignore_ascii_case(value.trim()))
            .copied()
            .ok_or_else(|| KeyError::InvalidKey(format!("unsupported algorithm {}", value)))
    }
}

/// Public key components for JWK export.
#[derive(Debug, Clone)]
pub enum PublicKeyData {
    Rsa { n: Vec<u8>, e: Vec<u8> },
    Ec { x: Vec<u8>, y: Vec<u8> },
}

/// JSON Web Key for the public half of a signing key.
///
/// Field order is fixed so serialized key sets are byte-stable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    pub kid: String,
    #[serde(rename = "use", default = "default_use")]
    pub use_: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

fn default_use() -> String {
    "sig".to_string()
}

impl Jwk {
    /// Build a decoding key from the public components.
    pub fn decoding_key(&self) -> Result<DecodingKey, KeyError> {
        match (self.kty.as_str(), &self.n, &self.e, &self.x, &self.y) {
            ("RSA", Some(n), Some(e), _, _) => DecodingKey::from_rsa_components(n, e)
                .map_err(|e| KeyError::InvalidKey(e.to_string())),
            ("EC", _, _, Some(x), Some(y)) => DecodingKey::from_ec_components(x, y)
                .map_err(|e| KeyError::InvalidKey(e.to_string())),
            (kty, ..) => Err(KeyError::InvalidKey(format!(
                "unsupported or incomplete {} key",
                kty
            ))),
        }
    }

    pub fn algorithm(&self) -> Option<SigningAlgorithm> {
        self.alg.as_deref().and_then(|alg| alg.parse().ok())
    }
}

/// JSON Web Key Set document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

/// A signing key pair with algorithm identifier and key id.
pub struct SigningCredentials {
    pub kid: String,
    pub algorithm: SigningAlgorithm,
    pub created_at: DateTime<Utc>,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    public_key_data: PublicKeyData,
}

impl fmt::Debug for SigningCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningCredentials")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

impl SigningCredentials {
    /// Generate a fresh key pair for the algorithm.
    pub fn generate(algorithm: SigningAlgorithm) -> Result<Self, KeyError> {
        if algorithm.is_rsa() {
            Self::generate_rsa(algorithm)
        } else {
            Self::generate_ec()
        }
    }

    fn generate_rsa(algorithm: SigningAlgorithm) -> Result<Self, KeyError> {
        let private_key = RsaPrivateKey::new(&mut OsRng, 2048)
            .map_err(|e| KeyError::GenerationFailed(e.to_string()))?;
        Self::from_rsa_private_key(uuid::Uuid::new_v4().to_string(), algorithm, private_key)
    }

    fn generate_ec() -> Result<Self, KeyError> {
        let secret_key = EcSecretKey::random(&mut OsRng);
        Self::from_ec_secret_key(uuid::Uuid::new_v4().to_string(), secret_key)
    }

    /// Load a PKCS#8 PEM private key.
    pub fn from_pem(
        kid: impl Into<String>,
        algorithm: SigningAlgorithm,
        private_pem: &str,
    ) -> Result<Self, KeyError> {
        let kid = kid.into();
        if algorithm.is_rsa() {
            let private_key = RsaPrivateKey::from_pkcs8_pem(private_pem)
                .map_err(|e| KeyError::InvalidKey(e.to_string()))?;
            Self::from_rsa_private_key(kid, algorithm, private_key)
        } else {
            let secret_key = EcSecretKey::from_pkcs8_pem(private_pem)
                .map_err(|e| KeyError::InvalidKey(e.to_string()))?;
            Self::from_ec_secret_key(kid, secret_key)
        }
    }

    fn from_rsa_private_key(
        kid: String,
        algorithm: SigningAlgorithm,
        private_key: RsaPrivateKey,
    ) -> Result<Self, KeyError> {
        let public_key = private_key.to_public_key();
        let n = public_key.n().to_bytes_be();
        let e = public_key.e().to_bytes_be();

        let private_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| KeyError::InvalidKey(e.to_string()))?;
        let encoding_key = EncodingKey::from_rsa_pem(private_pem.as_bytes())
            .map_err(|e| KeyError::InvalidKey(e.to_string()))?;
        let public_pem = public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| KeyError::InvalidKey(e.to_string()))?;
        let decoding_key = DecodingKey::from_rsa_pem(public_pem.as_bytes())
            .map_err(|e| KeyError::InvalidKey(e.to_string()))?;

        Ok(Self {
            kid,
            algorithm,
            created_at: Utc::now(),
            encoding_key,
            decoding_key,
            public_key_data: PublicKeyData::Rsa { n, e },
        })
    }

    fn from_ec_secret_key(kid: String, secret_key: EcSecretKey) -> Result<Self, KeyError> {
        let signing_key = EcSigningKey::from(&secret_key);
        let point = signing_key.verifying_key().to_encoded_point(false);
        let x = point
            .x()
            .ok_or_else(|| KeyError::InvalidKey("missing x coordinate".to_string()))?;
        let y = point
            .y()
            .ok_or_else(|| KeyError::InvalidKey("missing y coordinate".to_string()))?;

        let private_pem = secret_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| KeyError::InvalidKey(e.to_string()))?;
        let encoding_key = EncodingKey::from_ec_pem(private_pem.as_bytes())
            .map_err(|e| KeyError::InvalidKey(e.to_string()))?;
        let decoding_key = DecodingKey::from_ec_components(
            &URL_SAFE_NO_PAD.encode(x.as_slice()),
            &URL_SAFE_NO_PAD.encode(y.as_slice()),
        )
        .map_err(|e| KeyError::InvalidKey(e.to_string()))?;

        Ok(Self {
            kid,
            algorithm: SigningAlgorithm::ES384,
            created_at: Utc::now(),
            encoding_key,
            decoding_key,
            public_key_data: PublicKeyData::Ec {
                x: x.to_vec(),
                y: y.to_vec(),
            },
        })
    }

    /// Sign claims as a compact JWT, setting `kid` and `typ` in the header.
    pub fn sign<T: Serialize>(&self, claims: &T, typ: &str) -> Result<String, KeyError> {
        let mut header = Header::new(self.algorithm.to_jwt_algorithm());
        header.kid = Some(self.kid.clone());
        header.typ = Some(typ.to_string());
        encode(&header, claims, &self.encoding_key).map_err(|e| KeyError::SigningFailed(e.to_string()))
    }

    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }

    /// Export the public key as a JWK.
    pub fn to_jwk(&self) -> Jwk {
        match &self.public_key_data {
            PublicKeyData::Rsa { n, e } => Jwk {
                kty: "RSA".to_string(),
                kid: self.kid.clone(),
                use_: default_use(),
                alg: Some(self.algorithm.as_str().to_string()),
                n: Some(URL_SAFE_NO_PAD.encode(n)),
                e: Some(URL_SAFE_NO_PAD.encode(e)),
                crv: None,
                x: None,
                y: None,
            },
            PublicKeyData::Ec { x, y } => Jwk {
                kty: "EC".to_string(),
                kid: self.kid.clone(),
                use_: default_use(),
                alg: Some(self.algorithm.as_str().to_string()),
                n: None,
                e: None,
                crv: Some("P-384".to_string()),
                x: Some(URL_SAFE_NO_PAD.encode(x)),
                y: Some(URL_SAFE_NO_PAD.encode(y)),
            },
        }
    }
}
