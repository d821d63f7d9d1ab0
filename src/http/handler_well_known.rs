//! Handles the OpenID Provider discovery and JWKS endpoints.

use axum::{Json, extract::State};

use super::context::AppState;
use crate::errors::HttpError;
use crate::keys::Jwks;
use crate::oauth::DiscoveryDocument;

/// OpenID Connect Configuration handler
/// GET /.well-known/openid-configuration
pub async fn openid_configuration_handler(
    State(state): State<AppState>,
) -> Result<Json<DiscoveryDocument>, HttpError> {
    Ok(Json(state.auth_server.discovery_document().await?))
}

/// JWKS (JSON Web Key Set) handler
/// GET /.well-known/jwks.json
pub async fn jwks_handler(State(state): State<AppState>) -> Json<Jwks> {
    Json(state.auth_server.jwks())
}
