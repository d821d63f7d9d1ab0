//! Authorization endpoint request validation.
//!
//! The client and redirect URI are checked first; failures there are
//! unredirectable. Every later failure is delivered to the verified redirect URI.

use serde::{Deserialize, Serialize};

use crate::errors::OAuthError;
use crate::oauth::pkce::{self, CodeChallengeMethod};
use crate::oauth::protocol_error::{AuthorizeError, RedirectTarget};
use crate::oauth::request_context::RequestContext;
use crate::oauth::types::*;
use crate::storage::OAuthStorage;

/// Authorization request parameters from the query string or form body
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuthorizeQuery {
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub response_type: Option<String>,
    pub response_mode: Option<String>,
    pub scope: Option<String>,
    pub state: Option<String>,
    pub nonce: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub prompt: Option<String>,
    pub max_age: Option<String>,
    pub claims: Option<String>,
    pub resource: Option<String>,
    pub login_hint: Option<String>,
    pub request: Option<String>,
    pub request_uri: Option<String>,
}

impl AuthorizeQuery {
    /// The same request with `prompt` removed, for resuming after a completed login.
    pub fn without_prompt(mut self) -> Self {
        self.prompt = None;
        self
    }
}

/// A fully validated authorization request
#[derive(Debug, Clone)]
pub struct ValidAuthorizeRequest {
    pub client: OAuthClient,
    pub target: RedirectTarget,
    pub response_type: ResponseType,
    /// Requested scopes after intersection with the client registration
    pub resources: ResolvedResources,
    pub nonce: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<CodeChallengeMethod>,
    pub prompt: Vec<Prompt>,
    pub max_age: Option<i64>,
    /// Claim names requested through the `claims` parameter's `id_token` member
    pub requested_claims: Vec<String>,
    pub resource_indicator: Option<String>,
    pub login_hint: Option<String>,
}

impl ValidAuthorizeRequest {
    pub fn scope_names(&self) -> Vec<String> {
        self.resources.scope_names()
    }

    pub fn has_prompt(&self, prompt: Prompt) -> bool {
        self.prompt.contains(&prompt)
    }

    pub fn redirectable(&self, error: OAuthError) -> AuthorizeError {
        AuthorizeError::redirectable(error, &self.client.client_id, &self.target)
    }
}

pub struct AuthorizeRequestValidator<'a> {
    storage: &'a dyn OAuthStorage,
}

impl<'a> AuthorizeRequestValidator<'a> {
    pub fn new(storage: &'a dyn OAuthStorage) -> Self {
        Self { storage }
    }

    pub async fn validate(
        &self,
        context: &RequestContext,
        query: &AuthorizeQuery,
    ) -> Result<ValidAuthorizeRequest, AuthorizeError> {
        let client_id = query.client_id.as_deref().unwrap_or_default();
        let unredirectable = |error: OAuthError| {
            tracing::debug!(client_id = %client_id, error = %error, "unredirectable authorize error");
            AuthorizeError::unredirectable(error, Some(client_id).filter(|id| !id.is_empty()))
        };

        if client_id.is_empty() {
            return Err(unredirectable(OAuthError::InvalidRequest(
                "client_id is required".to_string(),
            )));
        }
        context.checkpoint().map_err(unredirectable)?;
        let client = self
            .storage
            .find_enabled_client(client_id)
            .await
            .map_err(|e| unredirectable(e.into()))?
            .ok_or_else(|| {
                unredirectable(OAuthError::UnauthorizedClient(
                    "unknown or disabled client".to_string(),
                ))
            })?;

        let redirect_uri = query
            .redirect_uri
            .as_deref()
            .filter(|uri| !uri.is_empty())
            .ok_or_else(|| {
                unredirectable(OAuthError::InvalidRequest("redirect_uri is required".to_string()))
            })?;
        if !client.has_redirect_uri(redirect_uri) {
            tracing::warn!(client_id = %client_id, "redirect_uri does not match registration");
            return Err(unredirectable(OAuthError::InvalidRequest(
                "redirect_uri is not registered for this client".to_string(),
            )));
        }

        // The redirect URI is trusted from here on
        let response_type = query.response_type.as_deref().and_then(ResponseType::parse);
        let requested_mode = query.response_mode.as_deref().map(ResponseMode::parse);
        let mut target = RedirectTarget {
            redirect_uri: redirect_uri.to_string(),
            response_mode: match (response_type, requested_mode) {
                (Some(response_type), Some(Some(mode)))
                    if response_type.allowed_response_modes().contains(&mode) =>
                {
                    mode
                }
                (Some(response_type), _) => response_type.default_response_mode(),
                (None, Some(Some(mode))) => mode,
                (None, _) => ResponseMode::Query,
            },
            state: query.state.clone(),
            issuer: context.issuer().to_string(),
        };
        let redirectable = |error: OAuthError, target: &RedirectTarget| {
            tracing::debug!(client_id = %client_id, error = %error, "authorize request rejected");
            AuthorizeError::redirectable(error, client_id, target)
        };

        if query.request.is_some() || query.request_uri.is_some() {
            return Err(redirectable(
                OAuthError::InvalidRequest("request objects are not supported".to_string()),
                &target,
            ));
        }

        let response_type = match (query.response_type.as_deref(), response_type) {
            (None, _) | (Some(""), _) => {
                return Err(redirectable(
                    OAuthError::InvalidRequest("response_type is required".to_string()),
                    &target,
                ));
            }
            (Some(value), None) => {
                return Err(redirectable(
                    OAuthError::UnsupportedResponseType(format!("{} is not supported", value)),
                    &target,
                ));
            }
            (Some(_), Some(response_type)) => response_type,
        };
        if !client.allows_response_type(response_type) {
            return Err(redirectable(
                OAuthError::UnauthorizedClient(format!(
                    "response_type {} is not allowed for this client",
                    response_type.as_str()
                )),
                &target,
            ));
        }

        match requested_mode {
            Some(None) => {
                return Err(redirectable(
                    OAuthError::InvalidRequest("unsupported response_mode".to_string()),
                    &target,
                ));
            }
            Some(Some(mode)) if !response_type.allowed_response_modes().contains(&mode) => {
                return Err(redirectable(
                    OAuthError::InvalidRequest(format!(
                        "response_mode {} is not allowed for response_type {}",
                        mode.as_str(),
                        response_type.as_str()
                    )),
                    &target,
                ));
            }
            _ => {}
        }
        target.response_mode = requested_mode
            .flatten()
            .unwrap_or_else(|| response_type.default_response_mode());

        let resources = self
            .validate_scopes(&client, query.scope.as_deref(), response_type)
            .await
            .map_err(|error| redirectable(error, &target))?;

        let nonce = query.nonce.clone().filter(|nonce| !nonce.is_empty());
        if response_type.includes_id_token() && nonce.is_none() {
            return Err(redirectable(
                OAuthError::InvalidRequest("nonce is required for id_token responses".to_string()),
                &target,
            ));
        }

        let (code_challenge, code_challenge_method) = validate_pkce(&client, response_type, query)
            .map_err(|error| redirectable(error, &target))?;

        let prompt = parse_prompt(query.prompt.as_deref()).map_err(|error| redirectable(error, &target))?;

        let max_age = match query.max_age.as_deref() {
            None | Some("") => None,
            Some(value) => Some(value.parse::<u32>().map(i64::from).map_err(|_| {
                redirectable(
                    OAuthError::InvalidRequest("max_age must be a non-negative integer".to_string()),
                    &target,
                )
            })?),
        };

        let requested_claims = parse_claims_parameter(query.claims.as_deref())
            .map_err(|error| redirectable(error, &target))?;

        let (resources, resource_indicator) = match query.resource.as_deref() {
            None | Some("") => (resources, None),
            Some(resource) => {
                let narrowed = self
                    .narrow_to_resource(&resources, resource)
                    .await
                    .map_err(|error| redirectable(error, &target))?;
                (narrowed, Some(resource.to_string()))
            }
        };

        tracing::debug!(
            client_id = %client_id,
            response_type = response_type.as_str(),
            scopes = %join_scopes(&resources.scope_names()),
            "authorize request validated"
        );

        Ok(ValidAuthorizeRequest {
            client,
            target,
            response_type,
            resources,
            nonce,
            code_challenge,
            code_challenge_method,
            prompt,
            max_age,
            requested_claims,
            resource_indicator,
            login_hint: query.login_hint.clone(),
        })
    }

    /// Resolve requested scopes, dropping those the client may not request.
    async fn validate_scopes(
        &self,
        client: &OAuthClient,
        scope: Option<&str>,
        response_type: ResponseType,
    ) -> Result<ResolvedResources, OAuthError> {
        let scope = scope.unwrap_or_default();
        if !validate_scope(scope) {
            return Err(OAuthError::InvalidScope("malformed scope".to_string()));
        }
        let requested = parse_scope(scope);
        if requested.is_empty() {
            return Err(OAuthError::InvalidScope("scope is required".to_string()));
        }

        let resolved = self.storage.find_resources(&requested).await?;
        let resolved_names = resolved.scope_names();
        if let Some(unknown) = requested.iter().find(|name| !resolved_names.contains(name)) {
            return Err(OAuthError::InvalidScope(format!("unknown scope {}", unknown)));
        }

        let allowed: Vec<String> = requested
            .into_iter()
            .filter(|name| {
                let allowed = client.allows_scope(name);
                if !allowed {
                    tracing::debug!(client_id = %client.client_id, scope = %name, "scope not allowed for client");
                }
                allowed
            })
            .collect();
        let resources = resolved.retain_scopes(&allowed);
        if resources.is_empty() {
            return Err(OAuthError::InvalidScope(
                "no requested scope is allowed for this client".to_string(),
            ));
        }
        if response_type.includes_id_token() && !resources.is_openid() {
            return Err(OAuthError::InvalidRequest(
                "the openid scope is required for id_token responses".to_string(),
            ));
        }
        Ok(resources)
    }

    async fn narrow_to_resource(
        &self,
        resources: &ResolvedResources,
        resource: &str,
    ) -> Result<ResolvedResources, OAuthError> {
        let is_absolute = url::Url::parse(resource).is_ok_and(|url| url.fragment().is_none());
        if !is_absolute {
            return Err(OAuthError::InvalidTarget(
                "resource must be an absolute URI without a fragment".to_string(),
            ));
        }
        if self
            .storage
            .find_enabled_resource_by_identifier(resource)
            .await?
            .is_none()
        {
            return Err(OAuthError::InvalidTarget(format!("unknown resource {}", resource)));
        }
        resources.narrow_to_resource(resource).ok_or_else(|| {
            OAuthError::InvalidTarget(format!("no requested scope belongs to {}", resource))
        })
    }
}

/// PKCE is required when the client mandates it, and for public clients using the code flow.
fn validate_pkce(
    client: &OAuthClient,
    response_type: ResponseType,
    query: &AuthorizeQuery,
) -> Result<(Option<String>, Option<CodeChallengeMethod>), OAuthError> {
    if !response_type.includes_code() {
        return Ok((None, None));
    }
    let required = client.require_pkce || client.is_public();
    let Some(code_challenge) = query.code_challenge.as_deref().filter(|c| !c.is_empty()) else {
        if required {
            return Err(OAuthError::InvalidRequest("code_challenge is required".to_string()));
        }
        return Ok((None, None));
    };

    let method = CodeChallengeMethod::parse(query.code_challenge_method.as_deref()).ok_or_else(|| {
        OAuthError::InvalidRequest("unsupported code_challenge_method".to_string())
    })?;
    if method == CodeChallengeMethod::Plain && !client.allow_plain_text_pkce {
        return Err(OAuthError::InvalidRequest(
            "transform algorithm not supported; use S256".to_string(),
        ));
    }
    if !pkce::is_well_formed(code_challenge) {
        return Err(OAuthError::InvalidRequest("malformed code_challenge".to_string()));
    }
    Ok((Some(code_challenge.to_string()), Some(method)))
}

fn parse_prompt(prompt: Option<&str>) -> Result<Vec<Prompt>, OAuthError> {
    let mut prompts = Vec::new();
    for value in prompt.unwrap_or_default().split_whitespace() {
        let prompt = Prompt::parse(value)
            .ok_or_else(|| OAuthError::InvalidRequest(format!("unsupported prompt {}", value)))?;
        if !prompts.contains(&prompt) {
            prompts.push(prompt);
        }
    }
    if prompts.contains(&Prompt::None) && prompts.len() > 1 {
        return Err(OAuthError::InvalidRequest(
            "prompt=none cannot be combined with other values".to_string(),
        ));
    }
    Ok(prompts)
}

/// Claim names from the `id_token` member of the `claims` parameter.
fn parse_claims_parameter(claims: Option<&str>) -> Result<Vec<String>, OAuthError> {
    let Some(claims) = claims.filter(|c| !c.is_empty()) else {
        return Ok(Vec::new());
    };
    let value: serde_json::Value = serde_json::from_str(claims)
        .map_err(|_| OAuthError::InvalidRequest("claims must be a JSON object".to_string()))?;
    let object = value
        .as_object()
        .ok_or_else(|| OAuthError::InvalidRequest("claims must be a JSON object".to_string()))?;
    Ok(object
        .get("id_token")
        .and_then(|id_token| id_token.as_object())
        .map(|members| members.keys().cloned().collect())
        .unwrap_or_default())
}
