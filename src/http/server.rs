//! Main router configuration assembling the OAuth and discovery endpoints.

use axum::{
    Router,
    http::{Method, header},
    routing::{get, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::{
    context::AppState,
    handler_oauth::{handle_oauth_authorize, handle_oauth_authorize_post, handle_oauth_token},
    handler_well_known::{jwks_handler, openid_configuration_handler},
};

/// Build the application router
pub fn build_router(ctx: AppState) -> Router {
    let oauth_routes = Router::new()
        .route(
            "/authorize",
            get(handle_oauth_authorize).post(handle_oauth_authorize_post),
        )
        .route("/token", post(handle_oauth_token));

    let well_known_routes = Router::new()
        .route("/openid-configuration", get(openid_configuration_handler))
        .route("/jwks.json", get(jwks_handler));

    // Browser-based clients call the token and discovery endpoints directly
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT]);

    Router::new()
        .nest("/oauth", oauth_routes)
        .nest("/.well-known", well_known_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::http::context::AUTHENTICATED_SUBJECT_HEADER;
    use crate::keys::{KeyMaterialProvider, KeySet, SigningAlgorithm, SigningCredentials};
    use crate::oauth::{AuthorizationServer, OAuthClient, Scope};
    use crate::storage::{MemoryOAuthStorage, MemoryResourceOwners, MemoryUser};
    use crate::templates;
    use axum::body::{Body, to_bytes};
    use axum_template::engine::Engine;
    use axum::http::{Request, StatusCode};
    use serde_json::{Map, Value};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    const CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

    fn app() -> Router {
        app_with_identity_headers(true)
    }

    fn app_with_identity_headers(trust_identity_headers: bool) -> Router {
        let storage = MemoryOAuthStorage::new();
        let mut client = OAuthClient::new("web-app");
        client.redirect_uris = vec!["https://app/cb".to_string()];
        client.allowed_scopes = vec!["openid".to_string()];
        storage.store_client(client).unwrap();
        storage.store_scope(Scope::openid()).unwrap();

        let owners = MemoryResourceOwners::new();
        owners.store_user(MemoryUser::new("alice", Map::new())).unwrap();
        let keys = KeyMaterialProvider::new(KeySet::new(vec![
            SigningCredentials::generate(SigningAlgorithm::ES384).unwrap(),
        ]));

        let config = Config {
            version: "test".to_string(),
            http_port: "8080".to_string().try_into().unwrap(),
            issuer: "https://id.example".to_string().try_into().unwrap(),
            signing_algorithms: "ES384".to_string().try_into().unwrap(),
            signing_keys_path: None,
            default_access_token_lifetime: "1h".to_string().try_into().unwrap(),
            default_identity_token_lifetime: "5m".to_string().try_into().unwrap(),
            default_authorization_code_lifetime: "5m".to_string().try_into().unwrap(),
            default_consent_lifetime: None,
            key_rotation_check_interval: "10m".to_string().try_into().unwrap(),
            demo_client_secret: None,
            trust_identity_headers,
        };
        let auth_server = AuthorizationServer::new(
            Arc::new(storage),
            Arc::new(owners.clone()),
            Arc::new(owners.clone()),
            Arc::new(keys),
            config.issuer.as_ref(),
        );
        build_router(AppState {
            config: Arc::new(config),
            auth_server: Arc::new(auth_server),
            owners: Arc::new(owners),
            template_env: Engine::new(templates::build_env().unwrap()),
            shutdown: CancellationToken::new(),
        })
    }

    fn authorize_query() -> String {
        format!(
            "client_id=web-app&redirect_uri=https%3A%2F%2Fapp%2Fcb&response_type=code\
             &scope=openid&state=xyz&code_challenge={}&code_challenge_method=S256",
            CHALLENGE
        )
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_discovery_and_jwks() {
        let app = app();
        let response = app
            .clone()
            .oneshot(
                Request::get("/.well-known/openid-configuration")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let document = json_body(response).await;
        assert_eq!(document["issuer"], "https://id.example");
        assert_eq!(document["token_endpoint"], "https://id.example/oauth/token");

        let response = app
            .oneshot(Request::get("/.well-known/jwks.json").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let jwks = json_body(response).await;
        assert_eq!(jwks["keys"].as_array().unwrap().len(), 1);
        assert_eq!(jwks["keys"][0]["alg"], "ES384");
    }

    #[tokio::test]
    async fn test_authorize_requires_login_then_consent() {
        let app = app();
        let uri = format!("/oauth/authorize?{}", authorize_query());

        let response = app
            .clone()
            .oneshot(Request::get(&uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await["interaction"], "login");

        let response = app
            .oneshot(
                Request::get(&uri)
                    .header(AUTHENTICATED_SUBJECT_HEADER, "alice")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["interaction"], "consent");
        assert_eq!(body["required_scopes"], serde_json::json!(["openid"]));
    }

    #[tokio::test]
    async fn test_granted_consent_redirects_with_code() {
        let body = format!("{}&consent=granted&granted_scope=openid", authorize_query());
        let response = app()
            .oneshot(
                Request::post("/oauth/authorize")
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .header(AUTHENTICATED_SUBJECT_HEADER, "alice")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(response.status().is_redirection());
        let location = response.headers()[header::LOCATION].to_str().unwrap();
        assert!(location.starts_with("https://app/cb?code="));
        assert!(location.contains("state=xyz"));
        assert!(location.contains("iss=https%3A%2F%2Fid.example"));
    }

    #[tokio::test]
    async fn test_form_post_response_is_rendered_page() {
        let body = format!(
            "{}&response_mode=form_post&consent=granted&granted_scope=openid",
            authorize_query()
        );
        let response = app()
            .oneshot(
                Request::post("/oauth/authorize")
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .header(AUTHENTICATED_SUBJECT_HEADER, "alice")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(header::LOCATION).is_none());
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
        assert!(
            response.headers()[header::CONTENT_TYPE]
                .to_str()
                .unwrap()
                .starts_with("text/html")
        );

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let html = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(html.contains("method=\"post\""));
        assert!(html.contains("name=\"code\""));
        assert!(html.contains("name=\"state\" value=\"xyz\""));
        assert!(html.contains("name=\"iss\""));
    }

    #[tokio::test]
    async fn test_identity_headers_ignored_unless_trusted() {
        let uri = format!("/oauth/authorize?{}", authorize_query());
        let response = app_with_identity_headers(false)
            .oneshot(
                Request::get(&uri)
                    .header(AUTHENTICATED_SUBJECT_HEADER, "alice")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await["interaction"], "login");
    }

    #[tokio::test]
    async fn test_unknown_client_is_not_redirected() {
        let response = app()
            .oneshot(
                Request::get("/oauth/authorize?client_id=nobody&redirect_uri=https%3A%2F%2Fevil%2Fcb")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response.headers().get(header::LOCATION).is_none());
        assert_eq!(json_body(response).await["error"], "unauthorized_client");
    }

    #[tokio::test]
    async fn test_token_errors_are_not_cached() {
        let response = app()
            .oneshot(
                Request::post("/oauth/token")
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from("grant_type=password&client_id=web-app"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
        assert_eq!(json_body(response).await["error"], "unsupported_grant_type");
    }
}
