//! Consent decisions and remembered consent.

use chrono::Utc;

use crate::errors::OAuthError;
use crate::oauth::authorize::ValidAuthorizeRequest;
use crate::oauth::protocol_error::AuthorizeError;
use crate::oauth::request_context::RequestContext;
use crate::oauth::types::{Consent, ResolvedResources, ResourceOwner};
use crate::storage::ConsentStore;

/// The resource owner's answer to a consent prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizeRequestConsent {
    Granted {
        /// Scopes the owner agreed to; required scopes are added regardless
        scopes: Vec<String>,
        remember: bool,
    },
    Denied {
        /// Replaces the default `access_denied`
        error: Option<OAuthError>,
    },
}

pub struct ConsentEngine<'a> {
    consents: &'a dyn ConsentStore,
}

impl<'a> ConsentEngine<'a> {
    pub fn new(consents: &'a dyn ConsentStore) -> Self {
        Self { consents }
    }

    /// Whether the owner must be prompted before a response is issued.
    pub async fn requires_consent(
        &self,
        context: &RequestContext,
        request: &ValidAuthorizeRequest,
        owner: &ResourceOwner,
    ) -> Result<bool, OAuthError> {
        if !request.client.require_consent {
            return Ok(false);
        }
        if request.has_prompt(crate::oauth::types::Prompt::Consent) {
            return Ok(true);
        }
        context.checkpoint()?;
        let remembered = self
            .consents
            .find_consent(&owner.subject, &request.client.client_id)
            .await?;
        Ok(match remembered {
            Some(consent) if !consent.is_expired(Utc::now()) => {
                !consent.covers(&request.scope_names())
            }
            _ => true,
        })
    }

    /// Apply a decision, returning the granted subset of the request's resources.
    pub async fn process(
        &self,
        context: &mut RequestContext,
        request: &ValidAuthorizeRequest,
        owner: &ResourceOwner,
        decision: AuthorizeRequestConsent,
    ) -> Result<ResolvedResources, AuthorizeError> {
        let client_id = &request.client.client_id;
        let (selected, remember) = match decision {
            AuthorizeRequestConsent::Denied { error } => {
                tracing::debug!(client_id = %client_id, subject = %owner.subject, "consent denied");
                let error = error.unwrap_or_else(|| {
                    OAuthError::AccessDenied("the resource owner denied the request".to_string())
                });
                return Err(request.redirectable(error));
            }
            AuthorizeRequestConsent::Granted { scopes, remember } => (scopes, remember),
        };

        let requested = request.scope_names();
        let mut granted: Vec<String> = requested
            .iter()
            .filter(|name| selected.contains(name))
            .cloned()
            .collect();
        if granted.is_empty() {
            return Err(request.redirectable(OAuthError::AccessDenied(
                "no requested scope was granted".to_string(),
            )));
        }
        for scope in request
            .resources
            .identity_scopes
            .iter()
            .chain(request.resources.api_scopes.iter())
            .filter(|scope| scope.required)
        {
            if !granted.contains(&scope.name) {
                granted.push(scope.name.clone());
            }
        }
        let resources = request.resources.retain_scopes(&granted);

        let result = if remember && request.client.allow_remember_consent {
            let now = Utc::now();
            context
                .upsert_consent(Consent {
                    subject: owner.subject.clone(),
                    client_id: client_id.clone(),
                    scopes: resources.scope_names().into_iter().collect(),
                    created_at: now,
                    expires_at: request.client.consent_lifetime.map(|lifetime| now + lifetime),
                })
                .await
        } else {
            context.remove_consent(&owner.subject, client_id).await
        };
        result.map_err(|error| request.redirectable(error))?;

        tracing::debug!(
            client_id = %client_id,
            subject = %owner.subject,
            remember,
            "consent granted"
        );
        Ok(resources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::authorize::{AuthorizeQuery, AuthorizeRequestValidator};
    use crate::oauth::types::*;
    use crate::storage::MemoryOAuthStorage;
    use chrono::Duration;
    use tokio_util::sync::CancellationToken;

    const CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

    fn storage(remember: bool) -> MemoryOAuthStorage {
        let storage = MemoryOAuthStorage::new();
        let mut client = OAuthClient::new("web-app");
        client.redirect_uris = vec!["https://app/cb".to_string()];
        client.allowed_scopes = vec!["openid".to_string(), "profile".to_string()];
        client.allow_remember_consent = remember;
        client.consent_lifetime = Some(Duration::days(30));
        storage.store_client(client).unwrap();
        storage.store_scope(Scope::openid()).unwrap();
        storage.store_scope(Scope::profile()).unwrap();
        storage
    }

    async fn request(storage: &MemoryOAuthStorage, prompt: Option<&str>) -> ValidAuthorizeRequest {
        let query = AuthorizeQuery {
            client_id: Some("web-app".to_string()),
            redirect_uri: Some("https://app/cb".to_string()),
            response_type: Some("code".to_string()),
            scope: Some("openid profile".to_string()),
            code_challenge: Some(CHALLENGE.to_string()),
            code_challenge_method: Some("S256".to_string()),
            prompt: prompt.map(str::to_string),
            ..AuthorizeQuery::default()
        };
        let context = RequestContext::read_only("https://id", CancellationToken::new());
        AuthorizeRequestValidator::new(storage)
            .validate(&context, &query)
            .await
            .unwrap()
    }

    async fn decide(
        storage: &MemoryOAuthStorage,
        request: &ValidAuthorizeRequest,
        decision: AuthorizeRequestConsent,
    ) -> Result<ResolvedResources, AuthorizeError> {
        let owner = ResourceOwner::new("alice", Utc::now());
        let mut context = RequestContext::begin(storage, "https://id", CancellationToken::new())
            .await
            .unwrap();
        let result = ConsentEngine::new(storage)
            .process(&mut context, request, &owner, decision)
            .await;
        context.commit().await.unwrap();
        result
    }

    #[tokio::test]
    async fn test_denied_consent_is_access_denied() {
        let storage = storage(true);
        let request = request(&storage, None).await;
        let error = decide(&storage, &request, AuthorizeRequestConsent::Denied { error: None })
            .await
            .unwrap_err();
        assert!(error.is_redirectable());
        assert_eq!(error.error().error_code(), "access_denied");

        let custom = OAuthError::InteractionRequired("the owner walked away".to_string());
        let error = decide(
            &storage,
            &request,
            AuthorizeRequestConsent::Denied {
                error: Some(custom.clone()),
            },
        )
        .await
        .unwrap_err();
        assert_eq!(error.error(), &custom);
    }

    #[tokio::test]
    async fn test_partial_grant_keeps_required_scopes() {
        let storage = storage(false);
        let request = request(&storage, None).await;
        let granted = decide(
            &storage,
            &request,
            AuthorizeRequestConsent::Granted {
                scopes: vec!["profile".to_string(), "email".to_string()],
                remember: false,
            },
        )
        .await
        .unwrap();
        assert_eq!(granted.scope_names(), vec!["openid", "profile"]);

        let error = decide(
            &storage,
            &request,
            AuthorizeRequestConsent::Granted {
                scopes: vec!["email".to_string()],
                remember: false,
            },
        )
        .await
        .unwrap_err();
        assert_eq!(error.error().error_code(), "access_denied");
    }

    #[tokio::test]
    async fn test_remembered_consent_skips_prompt() {
        let storage = storage(true);
        let owner = ResourceOwner::new("alice", Utc::now());
        let request = request(&storage, None).await;
        let engine = ConsentEngine::new(&storage);
        let context = RequestContext::read_only("https://id", CancellationToken::new());
        assert!(engine.requires_consent(&context, &request, &owner).await.unwrap());

        decide(
            &storage,
            &request,
            AuthorizeRequestConsent::Granted {
                scopes: vec!["openid".to_string(), "profile".to_string()],
                remember: true,
            },
        )
        .await
        .unwrap();
        assert!(!engine.requires_consent(&context, &request, &owner).await.unwrap());

        let forced = self::request(&storage, Some("consent")).await;
        assert!(engine.requires_consent(&context, &forced, &owner).await.unwrap());

        // Granting without remember forgets the earlier decision
        decide(
            &storage,
            &request,
            AuthorizeRequestConsent::Granted {
                scopes: vec!["openid".to_string()],
                remember: false,
            },
        )
        .await
        .unwrap();
        assert!(engine.requires_consent(&context, &request, &owner).await.unwrap());
    }

    #[tokio::test]
    async fn test_remember_ignored_when_client_disallows() {
        let storage = storage(false);
        let owner = ResourceOwner::new("alice", Utc::now());
        let request = request(&storage, None).await;
        decide(
            &storage,
            &request,
            AuthorizeRequestConsent::Granted {
                scopes: vec!["openid".to_string(), "profile".to_string()],
                remember: true,
            },
        )
        .await
        .unwrap();
        let context = RequestContext::read_only("https://id", CancellationToken::new());
        assert!(
            ConsentEngine::new(&storage)
                .requires_consent(&context, &request, &owner)
                .await
                .unwrap()
        );
    }
}
