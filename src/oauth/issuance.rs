//! Token issuance and authorization response generation.
//!
//! Every artifact of a response is produced before anything is returned, so a
//! signing failure leaves nothing behind once the request context rolls back.

use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::errors::OAuthError;
use crate::keys::{KeyMaterialProvider, SigningAlgorithm};
use crate::oauth::authorize::ValidAuthorizeRequest;
use crate::oauth::openid::{ACCESS_TOKEN_TYPE, AccessTokenClaims, ID_TOKEN_TYPE, IdTokenClaims};
use crate::oauth::protocol_error::{AuthorizationRedirect, render_authorization_response};
use crate::oauth::request_context::RequestContext;
use crate::oauth::token_request::{ValidatedGrant, ValidatedTokenRequest};
use crate::oauth::types::*;
use crate::storage::{ProfileClaims, UserProfileProvider};

pub struct TokenIssuer<'a> {
    keys: &'a KeyMaterialProvider,
    profiles: &'a dyn UserProfileProvider,
}

impl<'a> TokenIssuer<'a> {
    pub fn new(keys: &'a KeyMaterialProvider, profiles: &'a dyn UserProfileProvider) -> Self {
        Self { keys, profiles }
    }

    /// Build the token endpoint response for a validated grant.
    pub async fn issue(
        &self,
        context: &mut RequestContext,
        request: ValidatedTokenRequest,
    ) -> Result<TokenResponse, OAuthError> {
        let now = Utc::now();
        let client = &request.client;
        let scope_names = request.resources.scope_names();

        let access_credentials = self
            .keys
            .select_preferred(&access_token_algorithms(&request.resources))?;
        let access_claims = AccessTokenClaims::new(
            context.issuer(),
            &client.client_id,
            request.owner.as_ref(),
            request.resources.audiences(),
            scope_names.clone(),
            now,
            client.access_token_lifetime,
        );
        let access_token = access_credentials.sign(&access_claims, ACCESS_TOKEN_TYPE)?;

        let id_token = match &request.owner {
            Some(owner) if request.resources.is_openid() => {
                let credentials = self
                    .keys
                    .select_preferred(&client.allowed_identity_token_signing_algorithms)?;
                let nonce = match request.grant {
                    ValidatedGrant::AuthorizationCode { .. } => request.nonce.clone(),
                    _ => None,
                };
                let profile = self
                    .profile_claims(owner, &request.resources, &request.requested_claims)
                    .await?
                    .ok_or_else(|| {
                        OAuthError::InvalidGrant("resource owner is not active".to_string())
                    })?;
                let claims = IdTokenClaims::new(
                    context.issuer(),
                    owner,
                    &client.client_id,
                    now,
                    client.identity_token_lifetime,
                )
                .with_nonce(nonce)
                .with_at_hash(&access_token, credentials.algorithm)
                .with_profile_claims(profile);
                Some(credentials.sign(&claims, ID_TOKEN_TYPE)?)
            }
            _ => None,
        };

        let refresh_token = if request.issues_refresh_token() {
            Some(self.next_refresh_token(context, &request, now).await?)
        } else {
            None
        };

        tracing::info!(
            client_id = %client.client_id,
            grant_type = request.grant_type().as_str(),
            jti = %access_claims.jti,
            id_token = id_token.is_some(),
            refresh_token = refresh_token.is_some(),
            "tokens issued"
        );

        Ok(TokenResponse {
            access_token,
            token_type: TokenType::Bearer,
            expires_in: u64::try_from(client.access_token_lifetime.num_seconds()).unwrap_or_default(),
            refresh_token,
            id_token,
            scope: Some(join_scopes(&scope_names)),
        })
    }

    /// Mint, rotate or extend the refresh token for this grant. Returns the handle to hand out.
    async fn next_refresh_token(
        &self,
        context: &mut RequestContext,
        request: &ValidatedTokenRequest,
        now: DateTime<Utc>,
    ) -> Result<String, OAuthError> {
        let client = &request.client;
        let Some(owner) = &request.owner else {
            return Err(OAuthError::ServerError(
                "refresh token requested without a resource owner".to_string(),
            ));
        };

        match &request.grant {
            ValidatedGrant::AuthorizationCode { code } => {
                let lineage_expires_at = now + client.absolute_refresh_token_lifetime;
                let token = RefreshToken {
                    lineage_id: code.id,
                    generation: 0,
                    client_id: client.client_id.clone(),
                    owner: owner.clone(),
                    scopes: request.resources.scope_names(),
                    resource_indicators: request.resource_indicator.iter().cloned().collect(),
                    nonce: code.nonce.clone(),
                    created_at: now,
                    expires_at: refresh_expiry(client, now, lineage_expires_at),
                    lineage_expires_at,
                    consumed_at: None,
                    revoked: false,
                };
                context.create_refresh_token(token).await
            }
            ValidatedGrant::RefreshToken { handle, token } => match client.refresh_token_usage {
                RefreshTokenUsage::OneTimeOnly => {
                    let next = RefreshToken {
                        generation: token.generation + 1,
                        created_at: now,
                        expires_at: refresh_expiry(client, now, token.lineage_expires_at),
                        consumed_at: None,
                        ..token.clone()
                    };
                    tracing::debug!(
                        lineage_id = %next.lineage_id,
                        generation = next.generation,
                        "refresh token rotated"
                    );
                    context.create_refresh_token(next).await
                }
                RefreshTokenUsage::ReUse => {
                    if client.refresh_token_expiration == RefreshTokenExpiration::Sliding {
                        let extended = RefreshToken {
                            expires_at: refresh_expiry(client, now, token.lineage_expires_at),
                            ..token.clone()
                        };
                        context.update_refresh_token(handle, extended).await?;
                    }
                    Ok(handle.clone())
                }
            },
            ValidatedGrant::ClientCredentials => Err(OAuthError::ServerError(
                "client_credentials never carries a refresh token".to_string(),
            )),
        }
    }

    /// Create the code and/or ID token for a consented authorize request and render the response.
    pub async fn create_authorization_response(
        &self,
        context: &mut RequestContext,
        request: &ValidAuthorizeRequest,
        owner: &ResourceOwner,
        resources: &ResolvedResources,
    ) -> Result<AuthorizationRedirect, OAuthError> {
        let now = Utc::now();
        let client = &request.client;
        let mut params: Vec<(String, String)> = Vec::new();

        let code_handle = if request.response_type.includes_code() {
            let code = AuthorizationCode {
                id: Uuid::new_v4(),
                client_id: client.client_id.clone(),
                owner: owner.clone(),
                redirect_uri: request.target.redirect_uri.clone(),
                scopes: resources.scope_names(),
                resource_indicators: request.resource_indicator.iter().cloned().collect(),
                code_challenge: request.code_challenge.clone(),
                code_challenge_method: request.code_challenge_method,
                nonce: request.nonce.clone(),
                requested_claims: request.requested_claims.clone(),
                created_at: now,
                expires_at: now + client.authorization_code_lifetime,
                consumed_at: None,
            };
            let handle = context.create_code(code).await?;
            params.push(("code".to_string(), handle.clone()));
            Some(handle)
        } else {
            None
        };

        if request.response_type.includes_id_token() {
            let credentials = self
                .keys
                .select_preferred(&client.allowed_identity_token_signing_algorithms)?;
            let mut claims = IdTokenClaims::new(
                context.issuer(),
                owner,
                &client.client_id,
                now,
                client.identity_token_lifetime,
            )
            .with_nonce(request.nonce.clone());
            if let Some(handle) = &code_handle {
                claims = claims.with_c_hash(handle, credentials.algorithm);
            }
            // Hybrid responses leave profile claims to the token endpoint unless the client opts in
            if code_handle.is_none() || client.always_include_user_claims_in_id_token {
                let profile = self
                    .profile_claims(owner, resources, &request.requested_claims)
                    .await?
                    .ok_or_else(|| {
                        OAuthError::LoginRequired("resource owner is not active".to_string())
                    })?;
                claims = claims.with_profile_claims(profile);
            }
            params.push(("id_token".to_string(), credentials.sign(&claims, ID_TOKEN_TYPE)?));
        }

        tracing::info!(
            client_id = %client.client_id,
            response_type = request.response_type.as_str(),
            response_mode = request.target.response_mode.as_str(),
            "authorization response issued"
        );
        Ok(render_authorization_response(&request.target, params))
    }

    /// Profile claims for the identity scopes plus explicitly requested claims; `None` when inactive.
    async fn profile_claims(
        &self,
        owner: &ResourceOwner,
        resources: &ResolvedResources,
        requested_claims: &[String],
    ) -> Result<Option<Map<String, Value>>, OAuthError> {
        let mut claim_types = resources.identity_claim_types();
        for claim in requested_claims {
            if !claim_types.contains(claim) {
                claim_types.push(claim.clone());
            }
        }
        match self.profiles.profile_claims(owner, &claim_types).await? {
            ProfileClaims::Active(claims) => Ok(Some(claims)),
            ProfileClaims::Inactive => {
                tracing::warn!(subject = %owner.subject, "profile lookup for inactive resource owner");
                Ok(None)
            }
        }
    }
}

/// The first resource that states a preference decides the access token algorithm.
fn access_token_algorithms(resources: &ResolvedResources) -> Vec<SigningAlgorithm> {
    resources
        .api_resources
        .iter()
        .map(|resource| &resource.allowed_signing_algorithms)
        .find(|algorithms| !algorithms.is_empty())
        .cloned()
        .unwrap_or_default()
}

/// Sliding expiry never passes the lineage's absolute expiry.
fn refresh_expiry(
    client: &OAuthClient,
    now: DateTime<Utc>,
    lineage_expires_at: DateTime<Utc>,
) -> DateTime<Utc> {
    match client.refresh_token_expiration {
        RefreshTokenExpiration::Absolute => lineage_expires_at,
        RefreshTokenExpiration::Sliding => {
            let sliding: Duration = client.sliding_refresh_token_lifetime;
            (now + sliding).min(lineage_expires_at)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KeySet;
    use crate::keys::SigningCredentials;
    use crate::oauth::openid::left_half_hash;
    use crate::oauth::protocol_error::RedirectTarget;
    use crate::storage::{MemoryOAuthStorage, MemoryResourceOwners, MemoryUser};
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    const ISSUER: &str = "https://id.example";

    fn keys() -> KeyMaterialProvider {
        KeyMaterialProvider::new(KeySet::new(vec![
            SigningCredentials::generate(SigningAlgorithm::ES384).unwrap(),
        ]))
    }

    fn owners() -> MemoryResourceOwners {
        let owners = MemoryResourceOwners::new();
        owners
            .store_user(MemoryUser::new(
                "alice",
                json!({"name": "Alice", "email": "alice@example.com"})
                    .as_object()
                    .cloned()
                    .unwrap(),
            ))
            .unwrap();
        owners
    }

    fn client() -> OAuthClient {
        let mut client = OAuthClient::new("web-app");
        client.allow_offline_access = true;
        client.refresh_token_expiration = RefreshTokenExpiration::Sliding;
        client.sliding_refresh_token_lifetime = Duration::days(1);
        client
    }

    fn resources() -> ResolvedResources {
        ResolvedResources {
            identity_scopes: vec![Scope::openid(), Scope::profile()],
            api_scopes: vec![Scope::api("orders.read")],
            api_resources: vec![ApiResource::new("https://orders", &["orders.read"])],
            offline_access: true,
        }
    }

    fn code_request() -> ValidatedTokenRequest {
        let code = AuthorizationCode {
            id: Uuid::new_v4(),
            client_id: "web-app".to_string(),
            owner: ResourceOwner::new("alice", Utc::now()).with_session_id("s1"),
            redirect_uri: "https://app/cb".to_string(),
            scopes: resources().scope_names(),
            resource_indicators: Vec::new(),
            code_challenge: None,
            code_challenge_method: None,
            nonce: Some("n-1".to_string()),
            requested_claims: Vec::new(),
            created_at: Utc::now(),
            expires_at: Utc::now() + Duration::minutes(5),
            consumed_at: Some(Utc::now()),
        };
        ValidatedTokenRequest {
            client: client(),
            owner: Some(code.owner.clone()),
            resources: resources(),
            resource_indicator: None,
            nonce: code.nonce.clone(),
            requested_claims: Vec::new(),
            grant: ValidatedGrant::AuthorizationCode { code },
        }
    }

    async fn context(storage: &MemoryOAuthStorage) -> RequestContext {
        RequestContext::begin(storage, ISSUER, CancellationToken::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_code_grant_response() {
        let storage = MemoryOAuthStorage::new();
        let keys = keys();
        let owners = owners();
        let issuer = TokenIssuer::new(&keys, &owners);
        let mut context = context(&storage).await;

        let response = issuer.issue(&mut context, code_request()).await.unwrap();
        context.commit().await.unwrap();

        assert_eq!(response.expires_in, 3600);
        assert_eq!(response.scope.as_deref(), Some("openid profile orders.read offline_access"));
        assert!(response.refresh_token.is_some());

        let access = keys
            .verify::<Value>(&response.access_token, ISSUER, Some("https://orders"))
            .unwrap();
        assert_eq!(access.header.typ.as_deref(), Some("at+jwt"));
        assert_eq!(access.claims["sub"], "alice");
        assert_eq!(access.claims["client_id"], "web-app");
        assert_eq!(access.claims["sid"], "s1");

        let id_token = keys
            .verify::<Value>(response.id_token.as_deref().unwrap(), ISSUER, Some("web-app"))
            .unwrap();
        assert_eq!(id_token.claims["nonce"], "n-1");
        assert_eq!(id_token.claims["name"], "Alice");
        assert!(id_token.claims.get("email").is_none());
        assert_eq!(
            id_token.claims["at_hash"],
            left_half_hash(&response.access_token, SigningAlgorithm::ES384)
        );

        let stored = crate::storage::RefreshTokenStore::find_refresh_token(
            &storage,
            response.refresh_token.as_deref().unwrap(),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(stored.generation, 0);
        assert!(stored.expires_at < stored.lineage_expires_at);
    }

    #[tokio::test]
    async fn test_client_credentials_response_has_no_user_tokens() {
        let storage = MemoryOAuthStorage::new();
        let keys = keys();
        let owners = owners();
        let mut request = code_request();
        request.grant = ValidatedGrant::ClientCredentials;
        request.owner = None;
        request.resources.identity_scopes.clear();
        request.resources.offline_access = false;

        let mut context = context(&storage).await;
        let response = TokenIssuer::new(&keys, &owners)
            .issue(&mut context, request)
            .await
            .unwrap();
        assert!(response.id_token.is_none());
        assert!(response.refresh_token.is_none());
        let access = keys
            .verify::<Value>(&response.access_token, ISSUER, Some("https://orders"))
            .unwrap();
        assert_eq!(access.claims["sub"], "web-app");
    }

    #[tokio::test]
    async fn test_missing_key_fails_whole_response() {
        let storage = MemoryOAuthStorage::new();
        let keys = keys();
        let owners = owners();
        let mut request = code_request();
        request.client.allowed_identity_token_signing_algorithms = vec![SigningAlgorithm::RS256];

        let mut context = context(&storage).await;
        let error = TokenIssuer::new(&keys, &owners)
            .issue(&mut context, request)
            .await
            .unwrap_err();
        assert_eq!(error.error_code(), "server_error");
        context.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_reuse_refresh_returns_same_handle() {
        let storage = MemoryOAuthStorage::new();
        let keys = keys();
        let owners = owners();
        let mut request = code_request();
        request.client.refresh_token_usage = RefreshTokenUsage::ReUse;
        let token = RefreshToken {
            lineage_id: Uuid::new_v4(),
            generation: 0,
            client_id: "web-app".to_string(),
            owner: ResourceOwner::new("alice", Utc::now()),
            scopes: resources().scope_names(),
            resource_indicators: Vec::new(),
            nonce: None,
            created_at: Utc::now(),
            expires_at: Utc::now() + Duration::hours(1),
            lineage_expires_at: Utc::now() + Duration::days(30),
            consumed_at: None,
            revoked: false,
        };
        request.grant = ValidatedGrant::RefreshToken {
            handle: "existing-handle".to_string(),
            token,
        };

        let mut context = context(&storage).await;
        let response = TokenIssuer::new(&keys, &owners)
            .issue(&mut context, request)
            .await
            .unwrap();
        assert_eq!(response.refresh_token.as_deref(), Some("existing-handle"));
        let id_token = keys
            .verify::<Value>(response.id_token.as_deref().unwrap(), ISSUER, Some("web-app"))
            .unwrap();
        assert!(id_token.claims.get("nonce").is_none());
    }

    #[tokio::test]
    async fn test_hybrid_authorization_response() {
        let storage = MemoryOAuthStorage::new();
        let keys = keys();
        let owners = owners();
        let request = ValidAuthorizeRequest {
            client: client(),
            target: RedirectTarget {
                redirect_uri: "https://app/cb".to_string(),
                response_mode: ResponseMode::Fragment,
                state: Some("xyz".to_string()),
                issuer: ISSUER.to_string(),
            },
            response_type: ResponseType::CodeIdToken,
            resources: resources(),
            nonce: Some("n-2".to_string()),
            code_challenge: None,
            code_challenge_method: None,
            prompt: Vec::new(),
            max_age: None,
            requested_claims: Vec::new(),
            resource_indicator: None,
            login_hint: None,
        };
        let owner = ResourceOwner::new("alice", Utc::now());

        let mut context = context(&storage).await;
        let redirect = TokenIssuer::new(&keys, &owners)
            .create_authorization_response(&mut context, &request, &owner, &request.resources)
            .await
            .unwrap();
        context.commit().await.unwrap();

        let AuthorizationRedirect::Location(location) = redirect else {
            panic!("expected fragment redirect");
        };
        let (_, fragment) = location.split_once('#').unwrap();
        let params: std::collections::HashMap<String, String> =
            url::form_urlencoded::parse(fragment.as_bytes()).into_owned().collect();
        assert_eq!(params["state"], "xyz");
        assert_eq!(params["iss"], ISSUER);

        let id_token = keys
            .verify::<Value>(&params["id_token"], ISSUER, Some("web-app"))
            .unwrap();
        assert_eq!(id_token.claims["nonce"], "n-2");
        assert_eq!(
            id_token.claims["c_hash"],
            left_half_hash(&params["code"], SigningAlgorithm::ES384)
        );
        assert!(id_token.claims.get("name").is_none());
    }
}
