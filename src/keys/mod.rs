//! Signing key material: credentials, JWK export, and the rotating key provider.

pub mod credentials;
pub mod provider;

pub use credentials::{
    Jwk, Jwks, SUPPORTED_SIGNING_ALGORITHMS, SigningAlgorithm, SigningCredentials,
};
pub use provider::{KeyMaterialProvider, KeySet, load_key_directory};
