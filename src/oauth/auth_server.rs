//! Authorization server facade tying validation, consent, issuance and the unit of work together.
//!
//! Each endpoint method takes ownership of the [`RequestContext`] and settles it:
//! successful responses commit, every failure rolls back. Lineage revocation is
//! written outside the unit of work and is the only effect a failed request keeps.

use chrono::{Duration, Utc};
use http::HeaderMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::errors::OAuthError;
use crate::keys::{Jwks, KeyMaterialProvider};
use crate::oauth::authorize::{AuthorizeQuery, AuthorizeRequestValidator, ValidAuthorizeRequest};
use crate::oauth::consent::{AuthorizeRequestConsent, ConsentEngine};
use crate::oauth::discovery::{DiscoveryDocument, DiscoveryGenerator, token_endpoint};
use crate::oauth::issuance::TokenIssuer;
use crate::oauth::protocol_error::{AuthorizationRedirect, AuthorizeError};
use crate::oauth::request_context::RequestContext;
use crate::oauth::token_request::{TokenForm, TokenRequestValidator};
use crate::oauth::types::{Prompt, ResourceOwner, TokenResponse};
use crate::storage::{OAuthStorage, ResourceOwnerProvider, UserProfileProvider};

/// Outcome of an authorize-endpoint request
#[derive(Debug)]
pub enum AuthorizeResult {
    /// The host must authenticate the resource owner, then resume without `prompt`
    Login(Box<ValidAuthorizeRequest>),
    /// The host must ask the resource owner for consent
    Consent(Box<ValidAuthorizeRequest>),
    Success(AuthorizationRedirect),
    Error(AuthorizeError),
}

/// OAuth 2.0 / OpenID Connect authorization server
pub struct AuthorizationServer {
    storage: Arc<dyn OAuthStorage>,
    owners: Arc<dyn ResourceOwnerProvider>,
    profiles: Arc<dyn UserProfileProvider>,
    keys: Arc<KeyMaterialProvider>,
    issuer: String,
}

impl AuthorizationServer {
    pub fn new(
        storage: Arc<dyn OAuthStorage>,
        owners: Arc<dyn ResourceOwnerProvider>,
        profiles: Arc<dyn UserProfileProvider>,
        keys: Arc<KeyMaterialProvider>,
        issuer: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            owners,
            profiles,
            keys,
            issuer: issuer.into(),
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn keys(&self) -> &Arc<KeyMaterialProvider> {
        &self.keys
    }

    /// Open a request context backed by the configured storage.
    pub async fn begin(&self, cancellation: CancellationToken) -> Result<RequestContext, OAuthError> {
        RequestContext::begin(self.storage.as_ref(), &self.issuer, cancellation).await
    }

    /// Handle an authorization request for an optionally authenticated resource owner.
    pub async fn authorize(
        &self,
        context: RequestContext,
        query: &AuthorizeQuery,
        owner: Option<&ResourceOwner>,
    ) -> AuthorizeResult {
        let mut context = context;
        let result = self.process_authorize(&mut context, query, owner, None).await;
        self.settle_authorize(context, query, result).await
    }

    /// Resume an authorization request with the resource owner's consent decision.
    pub async fn authorize_with_consent(
        &self,
        context: RequestContext,
        query: &AuthorizeQuery,
        owner: &ResourceOwner,
        decision: AuthorizeRequestConsent,
    ) -> AuthorizeResult {
        let mut context = context;
        let result = self
            .process_authorize(&mut context, query, Some(owner), Some(decision))
            .await;
        self.settle_authorize(context, query, result).await
    }

    async fn process_authorize(
        &self,
        context: &mut RequestContext,
        query: &AuthorizeQuery,
        owner: Option<&ResourceOwner>,
        decision: Option<AuthorizeRequestConsent>,
    ) -> AuthorizeResult {
        let request = match AuthorizeRequestValidator::new(self.storage.as_ref())
            .validate(context, query)
            .await
        {
            Ok(request) => request,
            Err(error) => return AuthorizeResult::Error(error),
        };

        let owner = match owner {
            Some(owner) => match self.owners.is_active(&owner.subject).await {
                Ok(true) => Some(owner),
                Ok(false) => {
                    tracing::debug!(subject = %owner.subject, "inactive resource owner must log in again");
                    None
                }
                Err(error) => return AuthorizeResult::Error(request.redirectable(error.into())),
            },
            None => None,
        };

        let prompt_none = request.has_prompt(Prompt::None);
        let Some(owner) = owner.filter(|owner| !self.requires_login(&request, owner, decision.is_some()))
        else {
            if prompt_none {
                return AuthorizeResult::Error(request.redirectable(OAuthError::LoginRequired(
                    "the resource owner is not authenticated".to_string(),
                )));
            }
            return AuthorizeResult::Login(Box::new(request));
        };

        let consent = ConsentEngine::new(self.storage.as_ref());
        let resources = match decision {
            Some(decision) => match consent.process(context, &request, owner, decision).await {
                Ok(resources) => resources,
                Err(error) => return AuthorizeResult::Error(error),
            },
            None => match consent.requires_consent(context, &request, owner).await {
                Ok(false) => request.resources.clone(),
                Ok(true) if prompt_none => {
                    return AuthorizeResult::Error(request.redirectable(
                        OAuthError::ConsentRequired("consent has not been granted".to_string()),
                    ));
                }
                Ok(true) => return AuthorizeResult::Consent(Box::new(request)),
                Err(error) => return AuthorizeResult::Error(request.redirectable(error)),
            },
        };

        match TokenIssuer::new(&self.keys, self.profiles.as_ref())
            .create_authorization_response(context, &request, owner, &resources)
            .await
        {
            Ok(redirect) => AuthorizeResult::Success(redirect),
            Err(error) => AuthorizeResult::Error(request.redirectable(error)),
        }
    }

    /// `prompt=login`, `select_account` and `max_age` force a fresh login. After a consent
    /// decision only `max_age` applies, since the host resumes the request after its login.
    fn requires_login(
        &self,
        request: &ValidAuthorizeRequest,
        owner: &ResourceOwner,
        resuming: bool,
    ) -> bool {
        if !resuming
            && (request.has_prompt(Prompt::Login) || request.has_prompt(Prompt::SelectAccount))
        {
            return true;
        }
        request
            .max_age
            .is_some_and(|max_age| Utc::now() - owner.auth_time > Duration::seconds(max_age))
    }

    async fn settle_authorize(
        &self,
        context: RequestContext,
        query: &AuthorizeQuery,
        result: AuthorizeResult,
    ) -> AuthorizeResult {
        match result {
            AuthorizeResult::Success(redirect) => match context.commit().await {
                Ok(()) => AuthorizeResult::Success(redirect),
                Err(error) => {
                    tracing::error!(error = %error, "failed to commit authorization response");
                    AuthorizeResult::Error(AuthorizeError::unredirectable(
                        error,
                        query.client_id.as_deref(),
                    ))
                }
            },
            other => {
                if let Err(error) = context.rollback().await {
                    tracing::error!(error = %error, "failed to roll back authorize request");
                }
                other
            }
        }
    }

    /// Handle a token request. A rejected request rolls back, so a code or refresh
    /// token it presented stays redeemable unless its lineage was revoked.
    pub async fn token(
        &self,
        context: RequestContext,
        headers: &HeaderMap,
        form: &TokenForm,
    ) -> Result<TokenResponse, OAuthError> {
        let mut context = context;
        let result = self.process_token(&mut context, headers, form).await;
        self.settle_token(context, result).await
    }

    async fn settle_token(
        &self,
        context: RequestContext,
        result: Result<TokenResponse, OAuthError>,
    ) -> Result<TokenResponse, OAuthError> {
        let error = match result {
            Ok(response) => {
                context.commit().await?;
                return Ok(response);
            }
            Err(error) => error,
        };

        if error.is_infrastructure() {
            tracing::error!(error = %error, "token request failed");
        } else {
            tracing::debug!(error = %error, "token request rejected");
        }
        if let Err(rollback_error) = context.rollback().await {
            tracing::error!(error = %rollback_error, "failed to roll back token request");
        }
        Err(error)
    }

    async fn process_token(
        &self,
        context: &mut RequestContext,
        headers: &HeaderMap,
        form: &TokenForm,
    ) -> Result<TokenResponse, OAuthError> {
        let token_endpoint = token_endpoint(&self.issuer);
        let validated = TokenRequestValidator::new(
            self.storage.as_ref(),
            self.owners.as_ref(),
            &token_endpoint,
        )
        .validate(context, headers, form)
        .await?;
        TokenIssuer::new(&self.keys, self.profiles.as_ref())
            .issue(context, validated)
            .await
    }

    pub async fn discovery_document(&self) -> Result<DiscoveryDocument, OAuthError> {
        DiscoveryGenerator::new(self.storage.as_ref(), &self.keys)
            .discovery_document(&self.issuer)
            .await
    }

    pub fn jwks(&self) -> Jwks {
        DiscoveryGenerator::new(self.storage.as_ref(), &self.keys).jwks()
    }
}
