//! Protocol error model and authorization response rendering.
//!
//! Errors raised before the redirect URI is verified are unredirectable and are
//! shown to the user agent directly. Everything after that is delivered to the
//! client in the response mode of the request.

use url::Url;

use crate::errors::OAuthError;
use crate::oauth::types::{OAuthErrorResponse, ResponseMode};

/// A verified destination for an authorization response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectTarget {
    pub redirect_uri: String,
    pub response_mode: ResponseMode,
    pub state: Option<String>,
    pub issuer: String,
}

/// An authorization response ready to hand to the user agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationRedirect {
    /// 302 to this URL
    Location(String),
    /// Auto-submitting form posted to `action`
    FormPost {
        action: String,
        params: Vec<(String, String)>,
    },
}

/// Failure of an authorize-endpoint request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizeError {
    /// The client or redirect URI could not be trusted
    Unredirectable {
        error: OAuthError,
        client_id: Option<String>,
    },
    /// Delivered to the verified redirect URI
    Redirectable {
        error: OAuthError,
        client_id: String,
        target: RedirectTarget,
    },
}

impl AuthorizeError {
    pub fn unredirectable(error: OAuthError, client_id: Option<&str>) -> Self {
        Self::Unredirectable {
            error,
            client_id: client_id.map(str::to_string),
        }
    }

    pub fn redirectable(error: OAuthError, client_id: &str, target: &RedirectTarget) -> Self {
        Self::Redirectable {
            error,
            client_id: client_id.to_string(),
            target: target.clone(),
        }
    }

    pub fn error(&self) -> &OAuthError {
        match self {
            Self::Unredirectable { error, .. } | Self::Redirectable { error, .. } => error,
        }
    }

    pub fn is_redirectable(&self) -> bool {
        matches!(self, Self::Redirectable { .. })
    }

    /// JSON body for the unredirectable case, or the error parameters otherwise.
    pub fn to_error_response(&self) -> OAuthErrorResponse {
        let response = OAuthErrorResponse::from(self.error());
        match self {
            Self::Unredirectable { .. } => response,
            Self::Redirectable { target, .. } => OAuthErrorResponse {
                state: target.state.clone(),
                iss: Some(target.issuer.clone()),
                ..response
            },
        }
    }

    /// Render a redirectable error; `None` for unredirectable ones.
    pub fn to_redirect(&self) -> Option<AuthorizationRedirect> {
        let Self::Redirectable { error, target, .. } = self else {
            return None;
        };
        let mut params = vec![("error".to_string(), error.error_code().to_string())];
        if !error.description().is_empty() {
            params.push((
                "error_description".to_string(),
                error.description().to_string(),
            ));
        }
        Some(render_authorization_response(target, params))
    }
}

/// Build the response in the target's response mode, appending `state` and `iss`.
pub fn render_authorization_response(
    target: &RedirectTarget,
    mut params: Vec<(String, String)>,
) -> AuthorizationRedirect {
    if let Some(state) = &target.state {
        params.push(("state".to_string(), state.clone()));
    }
    params.push(("iss".to_string(), target.issuer.clone()));

    match target.response_mode {
        ResponseMode::FormPost => AuthorizationRedirect::FormPost {
            action: target.redirect_uri.clone(),
            params,
        },
        ResponseMode::Query => match Url::parse(&target.redirect_uri) {
            Ok(mut url) => {
                url.query_pairs_mut().extend_pairs(params.iter());
                AuthorizationRedirect::Location(url.to_string())
            }
            // Redirect URIs are validated as absolute URLs at registration
            Err(_) => AuthorizationRedirect::Location(target.redirect_uri.clone()),
        },
        ResponseMode::Fragment => {
            let fragment = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(params.iter())
                .finish();
            AuthorizationRedirect::Location(format!("{}#{}", target.redirect_uri, fragment))
        }
    }
}
