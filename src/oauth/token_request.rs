//! Token endpoint request validation for the supported grant types.

use chrono::Utc;
use http::HeaderMap;
use serde::Deserialize;

use crate::errors::OAuthError;
use crate::oauth::client_auth::{authenticate_client, extract_client_auth};
use crate::oauth::pkce::{self, CodeChallengeMethod};
use crate::oauth::request_context::RequestContext;
use crate::oauth::types::*;
use crate::storage::{CodeConsumeOutcome, OAuthStorage, RefreshConsumeOutcome, ResourceOwnerProvider};

/// Token request form data
#[derive(Clone, Default, Deserialize)]
pub struct TokenForm {
    #[serde(default)]
    pub grant_type: String,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub code_verifier: Option<String>,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
    pub resource: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub client_assertion: Option<String>,
    pub client_assertion_type: Option<String>,
}

/// The grant-specific record that backs a validated request
#[derive(Debug, Clone)]
pub enum ValidatedGrant {
    AuthorizationCode { code: AuthorizationCode },
    ClientCredentials,
    RefreshToken { handle: String, token: RefreshToken },
}

/// A token request that passed client authentication and grant validation
#[derive(Debug, Clone)]
pub struct ValidatedTokenRequest {
    pub client: OAuthClient,
    pub grant: ValidatedGrant,
    /// Scopes and audiences for the tokens about to be issued
    pub resources: ResolvedResources,
    pub owner: Option<ResourceOwner>,
    pub resource_indicator: Option<String>,
    pub nonce: Option<String>,
    pub requested_claims: Vec<String>,
}

impl ValidatedTokenRequest {
    pub fn grant_type(&self) -> GrantType {
        match self.grant {
            ValidatedGrant::AuthorizationCode { .. } => GrantType::AuthorizationCode,
            ValidatedGrant::ClientCredentials => GrantType::ClientCredentials,
            ValidatedGrant::RefreshToken { .. } => GrantType::RefreshToken,
        }
    }

    /// Refresh tokens need an owner and a client that allows offline access. Code grants
    /// must also include `offline_access`; a refresh grant always continues its lineage.
    pub fn issues_refresh_token(&self) -> bool {
        let offline = match &self.grant {
            ValidatedGrant::RefreshToken { .. } => true,
            _ => self.resources.offline_access,
        };
        self.owner.is_some() && self.client.allow_offline_access && offline
    }
}

pub struct TokenRequestValidator<'a> {
    storage: &'a dyn OAuthStorage,
    owners: &'a dyn ResourceOwnerProvider,
    token_endpoint: &'a str,
}

impl<'a> TokenRequestValidator<'a> {
    pub fn new(
        storage: &'a dyn OAuthStorage,
        owners: &'a dyn ResourceOwnerProvider,
        token_endpoint: &'a str,
    ) -> Self {
        Self {
            storage,
            owners,
            token_endpoint,
        }
    }

    pub async fn validate(
        &self,
        context: &mut RequestContext,
        headers: &HeaderMap,
        form: &TokenForm,
    ) -> Result<ValidatedTokenRequest, OAuthError> {
        let grant_type = match form.grant_type.as_str() {
            "" => {
                return Err(OAuthError::InvalidRequest("grant_type is required".to_string()));
            }
            value => GrantType::parse(value).ok_or_else(|| {
                OAuthError::UnsupportedGrantType(format!("{} is not supported", value))
            })?,
        };

        let auth = extract_client_auth(headers, form)?;
        context.checkpoint()?;
        let client = self
            .storage
            .find_enabled_client(&auth.client_id)
            .await?
            .ok_or_else(|| {
                tracing::debug!(client_id = %auth.client_id, "token request from unknown client");
                OAuthError::InvalidClient("unknown or disabled client".to_string())
            })?;
        authenticate_client(&client, &auth, self.token_endpoint, context.issuer(), self.storage)
            .await?;

        if !client.allows_grant_type(grant_type) {
            return Err(OAuthError::UnauthorizedClient(format!(
                "grant_type {} is not allowed for this client",
                grant_type.as_str()
            )));
        }

        let validated = match grant_type {
            GrantType::AuthorizationCode => self.validate_code_grant(context, client, form).await?,
            GrantType::ClientCredentials => self.validate_client_credentials(client, form).await?,
            GrantType::RefreshToken => self.validate_refresh_grant(context, client, form).await?,
        };
        tracing::debug!(
            client_id = %validated.client.client_id,
            grant_type = grant_type.as_str(),
            scopes = %join_scopes(&validated.resources.scope_names()),
            "token request validated"
        );
        Ok(validated)
    }

    async fn validate_code_grant(
        &self,
        context: &mut RequestContext,
        client: OAuthClient,
        form: &TokenForm,
    ) -> Result<ValidatedTokenRequest, OAuthError> {
        let handle = required(&form.code, "code")?;
        let redirect_uri = required(&form.redirect_uri, "redirect_uri")?;

        // Another client must not be able to spend or replay this code
        context.checkpoint()?;
        let foreign = self
            .storage
            .find_code(handle)
            .await?
            .is_some_and(|code| code.client_id != client.client_id);
        if foreign {
            tracing::warn!(client_id = %client.client_id, "authorization code issued to another client");
            return Err(OAuthError::InvalidGrant(
                "authorization code was issued to another client".to_string(),
            ));
        }

        let code = match context.consume_code(handle).await? {
            CodeConsumeOutcome::Consumed(code) => code,
            CodeConsumeOutcome::NotFound | CodeConsumeOutcome::Expired => {
                return Err(OAuthError::InvalidGrant(
                    "authorization code is invalid or expired".to_string(),
                ));
            }
            CodeConsumeOutcome::AlreadyConsumed(code) => {
                tracing::warn!(
                    client_id = %client.client_id,
                    code_id = %code.id,
                    "authorization code replayed; revoking derived tokens"
                );
                self.storage.revoke_lineage(code.id).await?;
                return Err(OAuthError::InvalidGrant(
                    "authorization code has already been used".to_string(),
                ));
            }
        };

        if code.redirect_uri != redirect_uri {
            return Err(OAuthError::InvalidGrant("redirect_uri mismatch".to_string()));
        }
        verify_code_verifier(&code, form.code_verifier.as_deref())?;

        if !self.owners.is_active(&code.owner.subject).await? {
            return Err(OAuthError::InvalidGrant("resource owner is not active".to_string()));
        }

        let resolved = self.storage.find_resources(&code.scopes).await?;
        let resources = resolved.retain_scopes(&code.scopes);
        if resources.is_empty() {
            return Err(OAuthError::InvalidGrant(
                "granted scopes are no longer available".to_string(),
            ));
        }

        let code_resource = code.resource_indicators.first().cloned();
        let resource_indicator = match (form.resource.as_deref(), code_resource) {
            (Some(requested), Some(granted)) if requested != granted => {
                return Err(OAuthError::InvalidTarget(
                    "resource differs from the one authorized".to_string(),
                ));
            }
            (Some(requested), _) => Some(requested.to_string()),
            (None, granted) => granted,
        };
        let resources = match &resource_indicator {
            Some(resource) => self.narrow_to_resource(&resources, resource).await?,
            None => resources,
        };

        Ok(ValidatedTokenRequest {
            client,
            owner: Some(code.owner.clone()),
            resources,
            resource_indicator,
            nonce: code.nonce.clone(),
            requested_claims: code.requested_claims.clone(),
            grant: ValidatedGrant::AuthorizationCode { code },
        })
    }

    async fn validate_client_credentials(
        &self,
        client: OAuthClient,
        form: &TokenForm,
    ) -> Result<ValidatedTokenRequest, OAuthError> {
        let requested = match form.scope.as_deref() {
            Some(scope) if !validate_scope(scope) => {
                return Err(OAuthError::InvalidScope("malformed scope".to_string()));
            }
            Some(scope) => parse_scope(scope),
            None => Vec::new(),
        };

        let resources = if requested.is_empty() {
            // Without a scope parameter the client gets every API scope it may request
            let resolved = self.storage.find_resources(&client.allowed_scopes).await?;
            ResolvedResources {
                api_scopes: resolved.api_scopes,
                api_resources: resolved.api_resources,
                ..ResolvedResources::default()
            }
        } else {
            if let Some(name) = requested
                .iter()
                .find(|name| *name == OPENID || *name == OFFLINE_ACCESS || !client.allows_scope(name))
            {
                return Err(OAuthError::InvalidScope(format!(
                    "scope {} is not allowed for client_credentials",
                    name
                )));
            }
            let resolved = self.storage.find_resources(&requested).await?;
            if !resolved.identity_scopes.is_empty() {
                return Err(OAuthError::InvalidScope(
                    "identity scopes require a resource owner".to_string(),
                ));
            }
            let resolved_names = resolved.scope_names();
            if let Some(unknown) = requested.iter().find(|name| !resolved_names.contains(name)) {
                return Err(OAuthError::InvalidScope(format!("unknown scope {}", unknown)));
            }
            resolved
        };
        if resources.is_empty() {
            return Err(OAuthError::InvalidScope("no scope available to this client".to_string()));
        }

        let resource_indicator = form.resource.clone().filter(|r| !r.is_empty());
        let resources = match &resource_indicator {
            Some(resource) => self.narrow_to_resource(&resources, resource).await?,
            None => resources,
        };

        Ok(ValidatedTokenRequest {
            client,
            grant: ValidatedGrant::ClientCredentials,
            resources,
            owner: None,
            resource_indicator,
            nonce: None,
            requested_claims: Vec::new(),
        })
    }

    async fn validate_refresh_grant(
        &self,
        context: &mut RequestContext,
        client: OAuthClient,
        form: &TokenForm,
    ) -> Result<ValidatedTokenRequest, OAuthError> {
        let handle = required(&form.refresh_token, "refresh_token")?;
        let invalid = || OAuthError::InvalidGrant("refresh token is invalid or expired".to_string());

        context.checkpoint()?;
        let presented = self
            .storage
            .find_refresh_token(handle)
            .await?
            .ok_or_else(invalid)?;
        if presented.client_id != client.client_id {
            tracing::warn!(client_id = %client.client_id, "refresh token issued to another client");
            return Err(invalid());
        }

        // The presenting client owns the token, so its rotation policy applies
        let token = match client.refresh_token_usage {
            RefreshTokenUsage::OneTimeOnly => match context.consume_refresh_token(handle).await? {
                RefreshConsumeOutcome::Consumed(token) => token,
                RefreshConsumeOutcome::Stale(token) => {
                    let revoked = self.storage.revoke_lineage(token.lineage_id).await?;
                    tracing::warn!(
                        client_id = %client.client_id,
                        lineage_id = %token.lineage_id,
                        generation = token.generation,
                        revoked,
                        "rotated refresh token reused; lineage revoked"
                    );
                    return Err(OAuthError::InvalidGrant(
                        "refresh token has already been used".to_string(),
                    ));
                }
                RefreshConsumeOutcome::Revoked
                | RefreshConsumeOutcome::NotFound
                | RefreshConsumeOutcome::Expired => return Err(invalid()),
            },
            RefreshTokenUsage::ReUse if presented.revoked || presented.is_expired(Utc::now()) => {
                return Err(invalid());
            }
            RefreshTokenUsage::ReUse => presented,
        };

        if !client.allow_offline_access {
            return Err(OAuthError::InvalidGrant(
                "offline access is no longer allowed for this client".to_string(),
            ));
        }
        if self
            .owners
            .essential_claims(&token.owner.subject, token.owner.session_id.as_deref())
            .await?
            .is_none()
        {
            return Err(OAuthError::InvalidGrant("resource owner is not active".to_string()));
        }

        let requested = match form.scope.as_deref() {
            Some(scope) if !validate_scope(scope) => {
                return Err(OAuthError::InvalidScope("malformed scope".to_string()));
            }
            Some(scope) if !scope.trim().is_empty() => parse_scope(scope),
            _ => token.scopes.clone(),
        };
        if let Some(widened) = requested.iter().find(|name| !token.scopes.contains(name)) {
            return Err(OAuthError::InvalidScope(format!(
                "scope {} was not part of the original grant",
                widened
            )));
        }

        let resolved = self.storage.find_resources(&requested).await?;
        let resources = resolved.retain_scopes(&requested);
        if resources.is_empty() {
            return Err(OAuthError::InvalidScope("no granted scope remains".to_string()));
        }

        let token_resource = token.resource_indicators.first().cloned();
        let resource_indicator = match (form.resource.as_deref(), token_resource) {
            (Some(requested), Some(granted)) if requested != granted => {
                return Err(OAuthError::InvalidTarget(
                    "resource differs from the one authorized".to_string(),
                ));
            }
            (Some(requested), _) => Some(requested.to_string()),
            (None, granted) => granted,
        };
        let resources = match &resource_indicator {
            Some(resource) => self.narrow_to_resource(&resources, resource).await?,
            None => resources,
        };

        Ok(ValidatedTokenRequest {
            client,
            owner: Some(token.owner.clone()),
            resources,
            resource_indicator,
            nonce: None,
            requested_claims: Vec::new(),
            grant: ValidatedGrant::RefreshToken {
                handle: handle.to_string(),
                token,
            },
        })
    }

    async fn narrow_to_resource(
        &self,
        resources: &ResolvedResources,
        resource: &str,
    ) -> Result<ResolvedResources, OAuthError> {
        if self
            .storage
            .find_enabled_resource_by_identifier(resource)
            .await?
            .is_none()
        {
            return Err(OAuthError::InvalidTarget(format!("unknown resource {}", resource)));
        }
        resources.narrow_to_resource(resource).ok_or_else(|| {
            OAuthError::InvalidTarget(format!("no granted scope belongs to {}", resource))
        })
    }
}

fn required<'f>(value: &'f Option<String>, name: &str) -> Result<&'f str, OAuthError> {
    value
        .as_deref()
        .filter(|value| !value.is_empty())
        .ok_or_else(|| OAuthError::InvalidRequest(format!("{} is required", name)))
}

/// A recorded challenge needs a matching verifier; a verifier without a challenge is rejected.
fn verify_code_verifier(code: &AuthorizationCode, verifier: Option<&str>) -> Result<(), OAuthError> {
    match (&code.code_challenge, verifier) {
        (None, None) => Ok(()),
        (None, Some(_)) => Err(OAuthError::InvalidGrant(
            "code_verifier sent but no code_challenge was recorded".to_string(),
        )),
        (Some(_), None) => Err(OAuthError::InvalidGrant("code_verifier is required".to_string())),
        (Some(challenge), Some(verifier)) => {
            let method = code.code_challenge_method.unwrap_or(CodeChallengeMethod::Plain);
            if pkce::verify_pkce(verifier, challenge, method) {
                Ok(())
            } else {
                tracing::debug!(code_id = %code.id, method = method.as_str(), "PKCE verification failed");
                Err(OAuthError::InvalidGrant("PKCE verification failed".to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{
        MemoryOAuthStorage, MemoryResourceOwners, MemoryUser, RefreshTokenStore, Transactional,
        UnitOfWork,
    };
    use chrono::Duration;
    use serde_json::Map;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    const ISSUER: &str = "https://id.example";
    const TOKEN_ENDPOINT: &str = "https://id.example/oauth/token";
    const VERIFIER: &str = "dBjftJeZ4CVP-mJ92ZqYq0tBY3VvYk1Ay1hV4ZsKdP2";
    const CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

    struct Fixture {
        storage: MemoryOAuthStorage,
        owners: MemoryResourceOwners,
    }

    impl Fixture {
        fn new() -> Self {
            let storage = MemoryOAuthStorage::new();
            let mut web = OAuthClient::new("web-app");
            web.redirect_uris = vec!["https://app/cb".to_string()];
            web.allowed_scopes = vec!["openid".to_string(), "orders.read".to_string()];
            web.allowed_grant_types = vec![GrantType::AuthorizationCode, GrantType::RefreshToken];
            web.allow_offline_access = true;
            storage.store_client(web).unwrap();

            let mut other = OAuthClient::new("other-app");
            other.redirect_uris = vec!["https://app/cb".to_string()];
            other.allowed_scopes = vec!["openid".to_string(), "orders.read".to_string()];
            other.allowed_grant_types = vec![GrantType::AuthorizationCode, GrantType::RefreshToken];
            other.allow_offline_access = true;
            other.refresh_token_usage = RefreshTokenUsage::ReUse;
            storage.store_client(other).unwrap();

            let mut service = OAuthClient::new("service");
            service.secrets = vec![Secret::shared("s3cret")];
            service.token_endpoint_auth_methods = vec![ClientAuthMethod::ClientSecretPost];
            service.allowed_grant_types = vec![GrantType::ClientCredentials];
            service.allowed_scopes = vec!["orders.read".to_string(), "orders.write".to_string()];
            storage.store_client(service).unwrap();

            storage.store_scope(Scope::openid()).unwrap();
            storage.store_scope(Scope::api("orders.read")).unwrap();
            storage.store_scope(Scope::api("orders.write")).unwrap();
            storage.store_scope(Scope::api("invoices.read")).unwrap();
            storage
                .store_api_resource(ApiResource::new("https://orders", &["orders.read", "orders.write"]))
                .unwrap();
            storage
                .store_api_resource(ApiResource::new("https://invoices", &["invoices.read"]))
                .unwrap();

            let owners = MemoryResourceOwners::new();
            owners.store_user(MemoryUser::new("alice", Map::new())).unwrap();
            Self { storage, owners }
        }

        async fn context(&self) -> RequestContext {
            RequestContext::begin(&self.storage, ISSUER, CancellationToken::new())
                .await
                .unwrap()
        }

        /// Validate and settle the unit of work: commit on success, roll back on failure.
        async fn validate(&self, form: &TokenForm) -> Result<ValidatedTokenRequest, OAuthError> {
            let mut context = self.context().await;
            let result = TokenRequestValidator::new(&self.storage, &self.owners, TOKEN_ENDPOINT)
                .validate(&mut context, &HeaderMap::new(), form)
                .await;
            match &result {
                Ok(_) => context.commit().await.unwrap(),
                Err(_) => context.rollback().await.unwrap(),
            }
            result
        }

        async fn store_code(&self, code: AuthorizationCode) -> String {
            let mut unit_of_work = self.storage.begin().await.unwrap();
            let handle = unit_of_work.create_code(code).await.unwrap();
            unit_of_work.commit().await.unwrap();
            handle
        }

        async fn store_refresh_token(&self, token: RefreshToken) -> String {
            let mut unit_of_work = self.storage.begin().await.unwrap();
            let handle = unit_of_work.create_refresh_token(token).await.unwrap();
            unit_of_work.commit().await.unwrap();
            handle
        }
    }

    fn code() -> AuthorizationCode {
        AuthorizationCode {
            id: Uuid::new_v4(),
            client_id: "web-app".to_string(),
            owner: ResourceOwner::new("alice", Utc::now()),
            redirect_uri: "https://app/cb".to_string(),
            scopes: vec!["openid".to_string(), "orders.read".to_string(), OFFLINE_ACCESS.to_string()],
            resource_indicators: Vec::new(),
            code_challenge: Some(CHALLENGE.to_string()),
            code_challenge_method: Some(CodeChallengeMethod::S256),
            nonce: Some("n-1".to_string()),
            requested_claims: Vec::new(),
            created_at: Utc::now(),
            expires_at: Utc::now() + Duration::minutes(5),
            consumed_at: None,
        }
    }

    fn refresh_token(scopes: &[&str]) -> RefreshToken {
        RefreshToken {
            lineage_id: Uuid::new_v4(),
            generation: 0,
            client_id: "web-app".to_string(),
            owner: ResourceOwner::new("alice", Utc::now()),
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
            resource_indicators: Vec::new(),
            nonce: None,
            created_at: Utc::now(),
            expires_at: Utc::now() + Duration::days(1),
            lineage_expires_at: Utc::now() + Duration::days(30),
            consumed_at: None,
            revoked: false,
        }
    }

    fn code_form(handle: &str, verifier: Option<&str>) -> TokenForm {
        TokenForm {
            grant_type: "authorization_code".to_string(),
            code: Some(handle.to_string()),
            redirect_uri: Some("https://app/cb".to_string()),
            code_verifier: verifier.map(str::to_string),
            client_id: Some("web-app".to_string()),
            ..TokenForm::default()
        }
    }

    fn refresh_form(handle: &str, scope: Option<&str>) -> TokenForm {
        TokenForm {
            grant_type: "refresh_token".to_string(),
            refresh_token: Some(handle.to_string()),
            scope: scope.map(str::to_string),
            client_id: Some("web-app".to_string()),
            ..TokenForm::default()
        }
    }

    #[tokio::test]
    async fn test_grant_type_errors() {
        let fixture = Fixture::new();
        let mut form = code_form("x", None);
        form.grant_type = String::new();
        assert_eq!(fixture.validate(&form).await.unwrap_err().error_code(), "invalid_request");

        form.grant_type = "password".to_string();
        assert_eq!(
            fixture.validate(&form).await.unwrap_err().error_code(),
            "unsupported_grant_type"
        );

        let form = TokenForm {
            grant_type: "client_credentials".to_string(),
            client_id: Some("web-app".to_string()),
            ..TokenForm::default()
        };
        assert_eq!(
            fixture.validate(&form).await.unwrap_err().error_code(),
            "unauthorized_client"
        );
    }

    #[tokio::test]
    async fn test_code_grant_with_pkce() {
        let fixture = Fixture::new();
        let handle = fixture.store_code(code()).await;
        let validated = fixture.validate(&code_form(&handle, Some(VERIFIER))).await.unwrap();

        assert_eq!(validated.grant_type(), GrantType::AuthorizationCode);
        assert_eq!(validated.owner.as_ref().unwrap().subject, "alice");
        assert_eq!(validated.nonce.as_deref(), Some("n-1"));
        assert!(validated.issues_refresh_token());
        assert_eq!(
            validated.resources.scope_names(),
            vec!["openid", "orders.read", "offline_access"]
        );

        let replay = fixture.validate(&code_form(&handle, Some(VERIFIER))).await.unwrap_err();
        assert_eq!(replay.error_code(), "invalid_grant");
    }

    #[tokio::test]
    async fn test_code_grant_pkce_failures() {
        let fixture = Fixture::new();
        let handle = fixture.store_code(code()).await;
        let error = fixture
            .validate(&code_form(&handle, Some("wrong-verifier-wrong-verifier-wrong-verifier")))
            .await
            .unwrap_err();
        assert_eq!(error.error_code(), "invalid_grant");

        let handle = fixture.store_code(code()).await;
        assert_eq!(
            fixture.validate(&code_form(&handle, None)).await.unwrap_err().error_code(),
            "invalid_grant"
        );

        let mut without_challenge = code();
        without_challenge.code_challenge = None;
        without_challenge.code_challenge_method = None;
        let handle = fixture.store_code(without_challenge).await;
        assert_eq!(
            fixture
                .validate(&code_form(&handle, Some(VERIFIER)))
                .await
                .unwrap_err()
                .error_code(),
            "invalid_grant"
        );
    }

    #[tokio::test]
    async fn test_code_grant_binding() {
        let fixture = Fixture::new();
        let handle = fixture.store_code(code()).await;
        let mut form = code_form(&handle, Some(VERIFIER));
        form.redirect_uri = Some("https://app/other".to_string());
        assert_eq!(fixture.validate(&form).await.unwrap_err().error_code(), "invalid_grant");

        let mut form = code_form("unknown-handle", Some(VERIFIER));
        form.redirect_uri = None;
        assert_eq!(fixture.validate(&form).await.unwrap_err().error_code(), "invalid_request");

        let mut expired = code();
        expired.expires_at = Utc::now() - Duration::seconds(1);
        let handle = fixture.store_code(expired).await;
        assert_eq!(
            fixture
                .validate(&code_form(&handle, Some(VERIFIER)))
                .await
                .unwrap_err()
                .error_code(),
            "invalid_grant"
        );
    }

    #[tokio::test]
    async fn test_code_grant_inactive_owner() {
        let fixture = Fixture::new();
        fixture.owners.set_active("alice", false).unwrap();
        let handle = fixture.store_code(code()).await;
        assert_eq!(
            fixture
                .validate(&code_form(&handle, Some(VERIFIER)))
                .await
                .unwrap_err()
                .error_code(),
            "invalid_grant"
        );
    }

    #[tokio::test]
    async fn test_client_credentials() {
        let fixture = Fixture::new();
        let form = |scope: Option<&str>| TokenForm {
            grant_type: "client_credentials".to_string(),
            scope: scope.map(str::to_string),
            client_id: Some("service".to_string()),
            client_secret: Some("s3cret".to_string()),
            ..TokenForm::default()
        };

        let all = fixture.validate(&form(None)).await.unwrap();
        assert_eq!(all.resources.scope_names(), vec!["orders.read", "orders.write"]);
        assert!(all.owner.is_none());
        assert!(!all.issues_refresh_token());

        let narrowed = fixture.validate(&form(Some("orders.read"))).await.unwrap();
        assert_eq!(narrowed.resources.audiences(), vec!["https://orders"]);

        for scope in ["openid", "invoices.read", "orders.read offline_access"] {
            assert_eq!(
                fixture.validate(&form(Some(scope))).await.unwrap_err().error_code(),
                "invalid_scope"
            );
        }

        let mut bad_secret = form(None);
        bad_secret.client_secret = Some("nope".to_string());
        assert_eq!(
            fixture.validate(&bad_secret).await.unwrap_err().error_code(),
            "invalid_client"
        );

        let mut wrong_target = form(Some("orders.read"));
        wrong_target.resource = Some("https://invoices".to_string());
        assert_eq!(
            fixture.validate(&wrong_target).await.unwrap_err().error_code(),
            "invalid_target"
        );
    }

    #[tokio::test]
    async fn test_refresh_grant_scope_narrowing() {
        let fixture = Fixture::new();
        let handle = fixture
            .store_refresh_token(refresh_token(&["openid", "orders.read", OFFLINE_ACCESS]))
            .await;
        let validated = fixture
            .validate(&refresh_form(&handle, Some("orders.read")))
            .await
            .unwrap();
        assert_eq!(validated.resources.scope_names(), vec!["orders.read"]);
        assert!(matches!(validated.grant, ValidatedGrant::RefreshToken { .. }));

        let handle = fixture
            .store_refresh_token(refresh_token(&["openid", OFFLINE_ACCESS]))
            .await;
        let error = fixture
            .validate(&refresh_form(&handle, Some("openid orders.read")))
            .await
            .unwrap_err();
        assert_eq!(error.error_code(), "invalid_scope");
    }

    #[tokio::test]
    async fn test_refresh_grant_stale_token_revokes_lineage() {
        let fixture = Fixture::new();
        let first = refresh_token(&["openid", OFFLINE_ACCESS]);
        let lineage_id = first.lineage_id;
        let first_handle = fixture.store_refresh_token(first).await;
        fixture.validate(&refresh_form(&first_handle, None)).await.unwrap();

        let mut second = refresh_token(&["openid", OFFLINE_ACCESS]);
        second.lineage_id = lineage_id;
        second.generation = 1;
        let second_handle = fixture.store_refresh_token(second).await;

        let error = fixture.validate(&refresh_form(&first_handle, None)).await.unwrap_err();
        assert_eq!(error.error_code(), "invalid_grant");

        let error = fixture.validate(&refresh_form(&second_handle, None)).await.unwrap_err();
        assert_eq!(error.error_code(), "invalid_grant");
    }

    #[tokio::test]
    async fn test_foreign_client_cannot_spend_tokens() {
        let fixture = Fixture::new();
        let code_handle = fixture.store_code(code()).await;
        let mut foreign = code_form(&code_handle, Some(VERIFIER));
        foreign.client_id = Some("other-app".to_string());
        assert_eq!(fixture.validate(&foreign).await.unwrap_err().error_code(), "invalid_grant");
        assert!(fixture.validate(&foreign).await.is_err());

        // Neither attempt consumed the code nor counted as a replay
        fixture.validate(&code_form(&code_handle, Some(VERIFIER))).await.unwrap();

        let refresh_handle = fixture
            .store_refresh_token(refresh_token(&["openid", OFFLINE_ACCESS]))
            .await;
        let mut foreign = refresh_form(&refresh_handle, None);
        foreign.client_id = Some("other-app".to_string());
        assert_eq!(fixture.validate(&foreign).await.unwrap_err().error_code(), "invalid_grant");
        assert!(
            fixture
                .storage
                .find_refresh_token(&refresh_handle)
                .await
                .unwrap()
                .unwrap()
                .consumed_at
                .is_none()
        );

        // The owner's one-time policy still applies to its own token
        fixture.validate(&refresh_form(&refresh_handle, None)).await.unwrap();
        let reused = fixture.validate(&refresh_form(&refresh_handle, None)).await.unwrap_err();
        assert_eq!(reused.error_code(), "invalid_grant");
    }

    #[tokio::test]
    async fn test_rejected_requests_leave_grants_redeemable() {
        let fixture = Fixture::new();
        let handle = fixture.store_code(code()).await;
        let error = fixture
            .validate(&code_form(&handle, Some("wrong-verifier")))
            .await
            .unwrap_err();
        assert_eq!(error.error_code(), "invalid_grant");
        fixture.validate(&code_form(&handle, Some(VERIFIER))).await.unwrap();

        let handle = fixture
            .store_refresh_token(refresh_token(&["openid", OFFLINE_ACCESS]))
            .await;
        let error = fixture
            .validate(&refresh_form(&handle, Some("openid orders.read")))
            .await
            .unwrap_err();
        assert_eq!(error.error_code(), "invalid_scope");
        fixture.validate(&refresh_form(&handle, None)).await.unwrap();
    }
}
