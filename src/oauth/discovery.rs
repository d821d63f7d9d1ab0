//! OpenID Provider metadata and JWKS generation.
//!
//! Both are derived from the registry and the current key snapshot only, with fields
//! in a fixed order, so repeated calls over unchanged state serialize identically.

use serde::{Deserialize, Serialize};

use crate::errors::OAuthError;
use crate::keys::{Jwks, KeyMaterialProvider};
use crate::oauth::pkce::SUPPORTED_CODE_CHALLENGE_METHODS;
use crate::oauth::types::*;
use crate::storage::ResourceStore;

pub const AUTHORIZE_PATH: &str = "/oauth/authorize";
pub const TOKEN_PATH: &str = "/oauth/token";
pub const DISCOVERY_PATH: &str = "/.well-known/openid-configuration";
pub const JWKS_PATH: &str = "/.well-known/jwks.json";

/// Claims every ID token may carry regardless of scope
const STANDARD_CLAIMS: &[&str] = &[
    "iss", "sub", "aud", "exp", "iat", "auth_time", "nonce", "sid", "idp", "amr", "at_hash",
    "c_hash",
];

pub fn token_endpoint(issuer: &str) -> String {
    format!("{}{}", issuer, TOKEN_PATH)
}

/// OpenID Connect Discovery 1.0 provider metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryDocument {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub jwks_uri: String,
    pub scopes_supported: Vec<String>,
    pub claims_supported: Vec<String>,
    pub response_types_supported: Vec<String>,
    pub response_modes_supported: Vec<String>,
    pub grant_types_supported: Vec<String>,
    pub subject_types_supported: Vec<String>,
    pub id_token_signing_alg_values_supported: Vec<String>,
    pub token_endpoint_auth_methods_supported: Vec<String>,
    pub token_endpoint_auth_signing_alg_values_supported: Vec<String>,
    pub code_challenge_methods_supported: Vec<String>,
    pub prompt_values_supported: Vec<String>,
    pub claims_parameter_supported: bool,
    pub request_parameter_supported: bool,
    pub request_uri_parameter_supported: bool,
    pub authorization_response_iss_parameter_supported: bool,
}

pub struct DiscoveryGenerator<'a> {
    resources: &'a dyn ResourceStore,
    keys: &'a KeyMaterialProvider,
}

impl<'a> DiscoveryGenerator<'a> {
    pub fn new(resources: &'a dyn ResourceStore, keys: &'a KeyMaterialProvider) -> Self {
        Self { resources, keys }
    }

    pub async fn discovery_document(&self, issuer: &str) -> Result<DiscoveryDocument, OAuthError> {
        let registry = self.resources.find_all_resources().await?;

        let mut scopes_supported: Vec<String> = registry
            .identity_scopes
            .iter()
            .chain(registry.api_scopes.iter())
            .filter(|scope| scope.show_in_discovery)
            .map(|scope| scope.name.clone())
            .collect();
        scopes_supported.push(OFFLINE_ACCESS.to_string());

        let mut claims_supported: Vec<String> =
            STANDARD_CLAIMS.iter().map(|claim| claim.to_string()).collect();
        for claim in registry
            .identity_scopes
            .iter()
            .filter(|scope| scope.show_in_discovery)
            .flat_map(|scope| scope.user_claims.iter())
        {
            if !claims_supported.contains(claim) {
                claims_supported.push(claim.clone());
            }
        }

        let signing_algorithms: Vec<String> = self
            .keys
            .signing_algorithms()
            .iter()
            .map(|algorithm| algorithm.as_str().to_string())
            .collect();

        Ok(DiscoveryDocument {
            issuer: issuer.to_string(),
            authorization_endpoint: format!("{}{}", issuer, AUTHORIZE_PATH),
            token_endpoint: token_endpoint(issuer),
            jwks_uri: format!("{}{}", issuer, JWKS_PATH),
            scopes_supported,
            claims_supported,
            response_types_supported: names(SUPPORTED_RESPONSE_TYPES, ResponseType::as_str),
            response_modes_supported: names(SUPPORTED_RESPONSE_MODES, ResponseMode::as_str),
            grant_types_supported: names(SUPPORTED_GRANT_TYPES, GrantType::as_str),
            subject_types_supported: vec!["public".to_string()],
            id_token_signing_alg_values_supported: signing_algorithms,
            token_endpoint_auth_methods_supported: names(
                SUPPORTED_CLIENT_AUTH_METHODS,
                ClientAuthMethod::as_str,
            ),
            token_endpoint_auth_signing_alg_values_supported: names(
                crate::keys::SUPPORTED_SIGNING_ALGORITHMS,
                crate::keys::SigningAlgorithm::as_str,
            ),
            code_challenge_methods_supported: names(
                SUPPORTED_CODE_CHALLENGE_METHODS,
                crate::oauth::pkce::CodeChallengeMethod::as_str,
            ),
            prompt_values_supported: names(SUPPORTED_PROMPT_VALUES, Prompt::as_str),
            claims_parameter_supported: true,
            request_parameter_supported: false,
            request_uri_parameter_supported: false,
            authorization_response_iss_parameter_supported: true,
        })
    }

    /// Public keys of the current snapshot.
    pub fn jwks(&self) -> Jwks {
        self.keys.public_key_set()
    }
}

fn names<T>(values: &[T], name: fn(&T) -> &'static str) -> Vec<String> {
    values.iter().map(|value| name(value).to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{KeySet, SigningAlgorithm, SigningCredentials};
    use crate::storage::MemoryOAuthStorage;

    fn fixture() -> (MemoryOAuthStorage, KeyMaterialProvider) {
        let storage = MemoryOAuthStorage::new();
        storage.store_scope(Scope::openid()).unwrap();
        storage.store_scope(Scope::email()).unwrap();
        let mut hidden = Scope::api("internal.admin");
        hidden.show_in_discovery = false;
        storage.store_scope(hidden).unwrap();
        storage.store_scope(Scope::api("orders.read")).unwrap();
        storage
            .store_api_resource(ApiResource::new("https://orders", &["orders.read", "internal.admin"]))
            .unwrap();
        let keys = KeyMaterialProvider::new(KeySet::new(vec![
            SigningCredentials::generate(SigningAlgorithm::ES384).unwrap(),
        ]));
        (storage, keys)
    }

    #[tokio::test]
    async fn test_discovery_document() {
        let (storage, keys) = fixture();
        let document = DiscoveryGenerator::new(&storage, &keys)
            .discovery_document("https://id.example")
            .await
            .unwrap();

        assert_eq!(document.token_endpoint, "https://id.example/oauth/token");
        assert_eq!(document.jwks_uri, "https://id.example/.well-known/jwks.json");
        assert_eq!(
            document.scopes_supported,
            vec!["openid", "email", "orders.read", "offline_access"]
        );
        assert!(document.claims_supported.contains(&"email_verified".to_string()));
        assert_eq!(
            document.response_types_supported,
            vec!["code", "id_token", "code id_token"]
        );
        assert_eq!(document.id_token_signing_alg_values_supported, vec!["ES384"]);
        assert_eq!(document.code_challenge_methods_supported, vec!["plain", "S256"]);
        assert!(document.authorization_response_iss_parameter_supported);
    }

    #[tokio::test]
    async fn test_outputs_are_byte_stable() {
        let (storage, keys) = fixture();
        let generator = DiscoveryGenerator::new(&storage, &keys);

        let first = serde_json::to_string(&generator.discovery_document("https://id").await.unwrap())
            .unwrap();
        let second = serde_json::to_string(&generator.discovery_document("https://id").await.unwrap())
            .unwrap();
        assert_eq!(first, second);
        assert!(first.starts_with("{\"issuer\":\"https://id\",\"authorization_endpoint\""));

        let jwks_first = serde_json::to_string(&generator.jwks()).unwrap();
        let jwks_second = serde_json::to_string(&generator.jwks()).unwrap();
        assert_eq!(jwks_first, jwks_second);

        keys.rotate_in(SigningCredentials::generate(SigningAlgorithm::ES384).unwrap());
        assert_ne!(serde_json::to_string(&generator.jwks()).unwrap(), jwks_first);
    }
}
