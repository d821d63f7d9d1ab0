//! Application state shared by the HTTP handlers.

use axum::http::HeaderMap;
use axum_template::engine::Engine;
use minijinja::Environment;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::errors::OAuthError;
use crate::oauth::{AuthorizationServer, ResourceOwner};
use crate::storage::ResourceOwnerProvider;

/// Subject authenticated by the fronting login flow
pub const AUTHENTICATED_SUBJECT_HEADER: &str = "x-authenticated-subject";
/// Session identifier issued by the fronting login flow
pub const SESSION_ID_HEADER: &str = "x-session-id";

/// Template engine for rendering HTML responses
pub type AppEngine = Engine<Environment<'static>>;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub auth_server: Arc<AuthorizationServer>,
    /// Re-establishes the resource owner from the login flow's session headers
    pub owners: Arc<dyn ResourceOwnerProvider>,
    pub template_env: AppEngine,
    /// Cancelled on shutdown; each request works on a child token
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Resolve the signed-in resource owner, if the login flow forwarded one.
    ///
    /// The identity headers are unauthenticated. They are read only when
    /// `TRUST_IDENTITY_HEADERS` is enabled, which is meant for development or for a
    /// deployment where a login proxy sets them and strips them from client requests.
    pub async fn resource_owner(
        &self,
        headers: &HeaderMap,
    ) -> Result<Option<ResourceOwner>, OAuthError> {
        if !self.config.trust_identity_headers {
            return Ok(None);
        }
        let Some(subject) = header_value(headers, AUTHENTICATED_SUBJECT_HEADER) else {
            return Ok(None);
        };
        let session_id = header_value(headers, SESSION_ID_HEADER);
        Ok(self
            .owners
            .essential_claims(subject, session_id)
            .await?)
    }
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
}
