//! Client authentication at the token endpoint.
//!
//! Supports `client_secret_basic`, `client_secret_post`, `private_key_jwt`
//! (RFC 7523) and `none` for public clients.

use base64::prelude::*;
use chrono::{DateTime, Utc};
use http::HeaderMap;
use jsonwebtoken::{Validation, decode, decode_header};
use serde::Deserialize;
use subtle::ConstantTimeEq;

use crate::errors::OAuthError;
use crate::keys::{Jwk, SigningAlgorithm};
use crate::oauth::token_request::TokenForm;
use crate::oauth::types::{ClientAuthMethod, OAuthClient, SecretType, hash_secret};
use crate::storage::AssertionReplayStore;

pub const JWT_BEARER_ASSERTION_TYPE: &str =
    "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// Client credentials presented with a token request
#[derive(Clone)]
pub struct ClientAuthentication {
    pub client_id: String,
    pub method: ClientAuthMethod,
    pub client_secret: Option<String>,
    pub client_assertion: Option<String>,
}

impl std::fmt::Debug for ClientAuthentication {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientAuthentication")
            .field("client_id", &self.client_id)
            .field("method", &self.method)
            .finish_non_exhaustive()
    }
}

/// Extract client credentials from the Authorization header and form.
///
/// Presenting more than one authentication method is rejected.
pub fn extract_client_auth(
    headers: &HeaderMap,
    form: &TokenForm,
) -> Result<ClientAuthentication, OAuthError> {
    let basic = basic_credentials(headers)?;

    let form_methods = usize::from(form.client_secret.is_some())
        + usize::from(form.client_assertion.is_some());
    if form_methods > 1 || (basic.is_some() && form_methods > 0) {
        return Err(OAuthError::InvalidRequest(
            "multiple client authentication methods".to_string(),
        ));
    }

    if let Some((client_id, client_secret)) = basic {
        if form.client_id.as_deref().is_some_and(|id| id != client_id) {
            return Err(OAuthError::InvalidClient(
                "client_id does not match Authorization header".to_string(),
            ));
        }
        return Ok(ClientAuthentication {
            client_id,
            method: ClientAuthMethod::ClientSecretBasic,
            client_secret: Some(client_secret),
            client_assertion: None,
        });
    }

    if let Some(client_assertion) = &form.client_assertion {
        if form.client_assertion_type.as_deref() != Some(JWT_BEARER_ASSERTION_TYPE) {
            return Err(OAuthError::InvalidRequest(
                "unsupported client_assertion_type".to_string(),
            ));
        }
        let client_id = match &form.client_id {
            Some(client_id) => client_id.clone(),
            None => unverified_assertion_subject(client_assertion)?,
        };
        return Ok(ClientAuthentication {
            client_id,
            method: ClientAuthMethod::PrivateKeyJwt,
            client_secret: None,
            client_assertion: Some(client_assertion.clone()),
        });
    }

    let client_id = form
        .client_id
        .clone()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| OAuthError::InvalidClient("client authentication required".to_string()))?;
    Ok(ClientAuthentication {
        client_id,
        method: if form.client_secret.is_some() {
            ClientAuthMethod::ClientSecretPost
        } else {
            ClientAuthMethod::None
        },
        client_secret: form.client_secret.clone(),
        client_assertion: None,
    })
}

fn basic_credentials(headers: &HeaderMap) -> Result<Option<(String, String)>, OAuthError> {
    let Some(auth_header) = headers.get(http::header::AUTHORIZATION) else {
        return Ok(None);
    };
    let Some(encoded) = auth_header
        .to_str()
        .ok()
        .and_then(|value| value.strip_prefix("Basic "))
    else {
        return Ok(None);
    };
    let invalid = || OAuthError::InvalidClient("malformed Basic credentials".to_string());
    let decoded = BASE64_STANDARD.decode(encoded.trim()).map_err(|_| invalid())?;
    let credentials = String::from_utf8(decoded).map_err(|_| invalid())?;
    let (client_id, client_secret) = credentials.split_once(':').ok_or_else(invalid)?;
    Ok(Some((
        form_decode(client_id),
        form_decode(client_secret),
    )))
}

/// Basic credentials are form-urlencoded before base64 (RFC 6749 section 2.3.1).
fn form_decode(value: &str) -> String {
    url::form_urlencoded::parse(format!("v={}", value).as_bytes())
        .next()
        .map(|(_, decoded)| decoded.into_owned())
        .unwrap_or_default()
}

#[derive(Debug, Deserialize)]
struct AssertionSubject {
    sub: String,
}

/// Read `sub` without verifying, only to locate the client record.
fn unverified_assertion_subject(assertion: &str) -> Result<String, OAuthError> {
    let invalid = || OAuthError::InvalidClient("malformed client assertion".to_string());
    let payload = assertion.split('.').nth(1).ok_or_else(invalid)?;
    let json = BASE64_URL_SAFE_NO_PAD.decode(payload).map_err(|_| invalid())?;
    let subject: AssertionSubject = serde_json::from_slice(&json).map_err(|_| invalid())?;
    Ok(subject.sub)
}

#[derive(Debug, Deserialize)]
struct ClientAssertionClaims {
    exp: i64,
    jti: Option<String>,
}

/// Authenticate a client against its registration.
pub async fn authenticate_client(
    client: &OAuthClient,
    auth: &ClientAuthentication,
    token_endpoint: &str,
    issuer: &str,
    replay_store: &dyn AssertionReplayStore,
) -> Result<(), OAuthError> {
    if !client.token_endpoint_auth_methods.contains(&auth.method) {
        tracing::debug!(client_id = %client.client_id, method = auth.method.as_str(), "authentication method not allowed");
        return Err(OAuthError::InvalidClient(format!(
            "{} is not allowed for this client",
            auth.method.as_str()
        )));
    }

    let now = Utc::now();
    match auth.method {
        ClientAuthMethod::None => Ok(()),
        ClientAuthMethod::ClientSecretBasic | ClientAuthMethod::ClientSecretPost => {
            let provided = auth
                .client_secret
                .as_deref()
                .ok_or_else(|| OAuthError::InvalidClient("missing client secret".to_string()))?;
            if verify_shared_secret(client, provided, now) {
                Ok(())
            } else {
                tracing::warn!(client_id = %client.client_id, "invalid client secret");
                Err(OAuthError::InvalidClient("invalid client secret".to_string()))
            }
        }
        ClientAuthMethod::PrivateKeyJwt => {
            let assertion = auth.client_assertion.as_deref().ok_or_else(|| {
                OAuthError::InvalidClient("missing client_assertion".to_string())
            })?;
            let (jti, expires_at) =
                verify_client_assertion(client, assertion, &[token_endpoint, issuer], now)
                    .inspect_err(|error| {
                        tracing::warn!(client_id = %client.client_id, error = %error, "client assertion rejected");
                    })?;
            if !replay_store
                .record_assertion_id(&client.client_id, &jti, expires_at)
                .await?
            {
                tracing::warn!(client_id = %client.client_id, "client assertion replayed");
                return Err(OAuthError::InvalidClient(
                    "client assertion already used".to_string(),
                ));
            }
            Ok(())
        }
    }
}

/// Constant-time comparison against every unexpired shared secret.
fn verify_shared_secret(client: &OAuthClient, provided: &str, now: DateTime<Utc>) -> bool {
    let provided_hash = hash_secret(provided);
    let mut matched = subtle::Choice::from(0u8);
    for secret in client
        .active_secrets(now)
        .filter(|secret| secret.secret_type == SecretType::SharedSecret)
    {
        matched |= secret.value.as_bytes().ct_eq(provided_hash.as_bytes());
    }
    matched.into()
}

/// Verify an RFC 7523 assertion. Returns the `jti` and the assertion expiry.
fn verify_client_assertion(
    client: &OAuthClient,
    assertion: &str,
    audiences: &[&str],
    now: DateTime<Utc>,
) -> Result<(String, DateTime<Utc>), OAuthError> {
    let header = decode_header(assertion)
        .map_err(|_| OAuthError::InvalidClient("malformed client assertion".to_string()))?;
    let algorithm = SigningAlgorithm::from_jwt_algorithm(header.alg).ok_or_else(|| {
        OAuthError::InvalidClient(format!("unsupported assertion algorithm {:?}", header.alg))
    })?;

    let keys: Vec<Jwk> = client
        .active_secrets(now)
        .filter(|secret| secret.secret_type == SecretType::JsonWebKey)
        .filter_map(|secret| serde_json::from_str::<Jwk>(&secret.value).ok())
        .collect();
    let key = keys
        .iter()
        .find(|key| match &header.kid {
            Some(kid) => &key.kid == kid,
            None => key.algorithm().is_none_or(|alg| alg == algorithm),
        })
        .ok_or_else(|| OAuthError::InvalidClient("no matching client key".to_string()))?;
    if key.algorithm().is_some_and(|alg| alg != algorithm) {
        return Err(OAuthError::InvalidClient(
            "assertion algorithm does not match client key".to_string(),
        ));
    }
    let decoding_key = key
        .decoding_key()
        .map_err(|_| OAuthError::InvalidClient("unusable client key".to_string()))?;

    let mut validation = Validation::new(algorithm.to_jwt_algorithm());
    validation.set_issuer(&[client.client_id.as_str()]);
    validation.set_audience(audiences);
    validation.sub = Some(client.client_id.clone());
    validation.set_required_spec_claims(&["exp", "iss", "sub", "aud"]);

    let data = decode::<ClientAssertionClaims>(assertion, &decoding_key, &validation)
        .map_err(|e| OAuthError::InvalidClient(format!("invalid client assertion: {}", e)))?;
    let jti = data
        .claims
        .jti
        .filter(|jti| !jti.is_empty())
        .ok_or_else(|| OAuthError::InvalidClient("client assertion requires jti".to_string()))?;
    let expires_at = DateTime::from_timestamp(data.claims.exp, 0)
        .ok_or_else(|| OAuthError::InvalidClient("invalid exp".to_string()))?;
    Ok((jti, expires_at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::SigningCredentials;
    use crate::oauth::types::Secret;
    use crate::storage::MemoryOAuthStorage;
    use chrono::Duration;
    use serde_json::json;

    const TOKEN_ENDPOINT: &str = "https://id.example/connect/token";
    const ISSUER: &str = "https://id.example";

    fn confidential_client() -> OAuthClient {
        let mut client = OAuthClient::new("service");
        client.secrets = vec![
            Secret::shared("old-secret").with_expiration(Utc::now() - Duration::days(1)),
            Secret::shared("s3cret"),
        ];
        client.token_endpoint_auth_methods = vec![
            ClientAuthMethod::ClientSecretBasic,
            ClientAuthMethod::ClientSecretPost,
        ];
        client
    }

    fn form(client_id: Option<&str>, client_secret: Option<&str>) -> TokenForm {
        TokenForm {
            grant_type: "client_credentials".to_string(),
            client_id: client_id.map(str::to_string),
            client_secret: client_secret.map(str::to_string),
            ..TokenForm::default()
        }
    }

    fn basic_headers(credentials: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::AUTHORIZATION,
            format!("Basic {}", BASE64_STANDARD.encode(credentials))
                .parse()
                .unwrap(),
        );
        headers
    }

    #[tokio::test]
    async fn test_client_secret_basic() {
        let storage = MemoryOAuthStorage::new();
        let client = confidential_client();

        let auth = extract_client_auth(&basic_headers("service:s3cret"), &form(None, None)).unwrap();
        assert_eq!(auth.method, ClientAuthMethod::ClientSecretBasic);
        authenticate_client(&client, &auth, TOKEN_ENDPOINT, ISSUER, &storage)
            .await
            .unwrap();

        let wrong = extract_client_auth(&basic_headers("service:nope"), &form(None, None)).unwrap();
        let error = authenticate_client(&client, &wrong, TOKEN_ENDPOINT, ISSUER, &storage)
            .await
            .unwrap_err();
        assert_eq!(error.error_code(), "invalid_client");
    }

    #[tokio::test]
    async fn test_expired_secret_is_skipped() {
        let storage = MemoryOAuthStorage::new();
        let auth = extract_client_auth(
            &HeaderMap::new(),
            &form(Some("service"), Some("old-secret")),
        )
        .unwrap();
        assert_eq!(auth.method, ClientAuthMethod::ClientSecretPost);
        assert!(
            authenticate_client(&confidential_client(), &auth, TOKEN_ENDPOINT, ISSUER, &storage)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_method_must_be_registered() {
        let storage = MemoryOAuthStorage::new();
        let auth = extract_client_auth(&HeaderMap::new(), &form(Some("service"), None)).unwrap();
        assert_eq!(auth.method, ClientAuthMethod::None);
        let error = authenticate_client(&confidential_client(), &auth, TOKEN_ENDPOINT, ISSUER, &storage)
            .await
            .unwrap_err();
        assert_eq!(error.error_code(), "invalid_client");
    }

    #[test]
    fn test_multiple_methods_rejected() {
        let error = extract_client_auth(
            &basic_headers("service:s3cret"),
            &form(Some("service"), Some("s3cret")),
        )
        .unwrap_err();
        assert_eq!(error.error_code(), "invalid_request");

        assert!(extract_client_auth(&HeaderMap::new(), &form(None, None)).is_err());
    }

    #[test]
    fn test_basic_credentials_are_form_decoded() {
        let auth = extract_client_auth(&basic_headers("my%3Aclient:p%40ss+word"), &form(None, None))
            .unwrap();
        assert_eq!(auth.client_id, "my:client");
        assert_eq!(auth.client_secret.as_deref(), Some("p@ss word"));
    }

    #[tokio::test]
    async fn test_private_key_jwt() {
        let storage = MemoryOAuthStorage::new();
        let client_key = SigningCredentials::generate(SigningAlgorithm::ES384).unwrap();
        let mut client = OAuthClient::new("jwt-client");
        client.token_endpoint_auth_methods = vec![ClientAuthMethod::PrivateKeyJwt];
        client.secrets = vec![Secret::json_web_key(
            &serde_json::to_string(&client_key.to_jwk()).unwrap(),
        )];

        let assertion = |jti: &str, aud: &str| {
            client_key
                .sign(
                    &json!({
                        "iss": "jwt-client",
                        "sub": "jwt-client",
                        "aud": aud,
                        "jti": jti,
                        "exp": (Utc::now() + Duration::minutes(2)).timestamp(),
                        "iat": Utc::now().timestamp(),
                    }),
                    "JWT",
                )
                .unwrap()
        };
        let assertion_form = |assertion: String| TokenForm {
            grant_type: "client_credentials".to_string(),
            client_assertion_type: Some(JWT_BEARER_ASSERTION_TYPE.to_string()),
            client_assertion: Some(assertion),
            ..TokenForm::default()
        };

        let auth = extract_client_auth(&HeaderMap::new(), &assertion_form(assertion("1", TOKEN_ENDPOINT)))
            .unwrap();
        assert_eq!(auth.client_id, "jwt-client");
        authenticate_client(&client, &auth, TOKEN_ENDPOINT, ISSUER, &storage)
            .await
            .unwrap();

        // replayed jti
        assert!(
            authenticate_client(&client, &auth, TOKEN_ENDPOINT, ISSUER, &storage)
                .await
                .is_err()
        );

        // issuer as audience is accepted
        let auth = extract_client_auth(&HeaderMap::new(), &assertion_form(assertion("2", ISSUER))).unwrap();
        authenticate_client(&client, &auth, TOKEN_ENDPOINT, ISSUER, &storage)
            .await
            .unwrap();

        // foreign audience
        let auth = extract_client_auth(
            &HeaderMap::new(),
            &assertion_form(assertion("3", "https://elsewhere")),
        )
        .unwrap();
        assert!(
            authenticate_client(&client, &auth, TOKEN_ENDPOINT, ISSUER, &storage)
                .await
                .is_err()
        );

        // signed by a key the client does not own
        let stranger = SigningCredentials::generate(SigningAlgorithm::ES384).unwrap();
        let forged = stranger
            .sign(
                &json!({
                    "iss": "jwt-client",
                    "sub": "jwt-client",
                    "aud": TOKEN_ENDPOINT,
                    "jti": "4",
                    "exp": (Utc::now() + Duration::minutes(2)).timestamp(),
                }),
                "JWT",
            )
            .unwrap();
        let auth = extract_client_auth(&HeaderMap::new(), &assertion_form(forged)).unwrap();
        assert!(
            authenticate_client(&client, &auth, TOKEN_ENDPOINT, ISSUER, &storage)
                .await
                .is_err()
        );
    }
}
