//! OpenID Connect authorization server binary.
//!
//! Seeds an in-memory registry from configuration, loads or generates signing keys,
//! and serves the authorize, token and discovery endpoints with graceful shutdown.

use anyhow::Result;
use axum_template::engine::Engine;
use oidc_core::{
    config::Config,
    http::{AppState, build_router},
    keys::{KeyMaterialProvider, load_key_directory},
    oauth::{
        ApiResource, AuthorizationServer, ClientAuthMethod, GrantType, OAuthClient, Scope, Secret,
    },
    storage::{MemoryOAuthStorage, MemoryResourceOwners, MemoryUser},
    templates,
};
use serde_json::json;
use std::{env, sync::Arc};
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "oidc_core=debug,info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().pretty())
        .init();

    let version = oidc_core::config::version()?;

    env::args().for_each(|arg| {
        if arg == "--version" {
            println!("{version}");
            std::process::exit(0);
        }
    });

    tracing::info!(?version, "Starting oidc-core");

    let config = Config::new()?;
    let issuer = config.issuer.as_ref().to_string();

    let keys = match &config.signing_keys_path {
        Some(path) => {
            tracing::info!(path = %path.display(), "Loading signing keys");
            Arc::new(KeyMaterialProvider::new(load_key_directory(path).await?))
        }
        None => {
            tracing::warn!("SIGNING_KEYS_PATH is not set, generating ephemeral signing keys");
            Arc::new(KeyMaterialProvider::generate(config.signing_algorithms.as_ref())?)
        }
    };
    tracing::info!(algorithms = ?keys.signing_algorithms(), "Signing keys ready");

    let storage = Arc::new(MemoryOAuthStorage::new());
    seed_registry(&storage, &config)?;

    let owners = MemoryResourceOwners::new();
    owners.store_user(MemoryUser::new(
        "alice",
        json!({
            "name": "Alice Example",
            "preferred_username": "alice",
            "email": "alice@example.com",
            "email_verified": true,
        })
        .as_object()
        .cloned()
        .unwrap_or_default(),
    ))?;

    let auth_server = Arc::new(AuthorizationServer::new(
        storage.clone(),
        Arc::new(owners.clone()),
        Arc::new(owners.clone()),
        keys.clone(),
        issuer,
    ));

    // Setup graceful shutdown
    let tracker = TaskTracker::new();
    let token = CancellationToken::new();

    if config.trust_identity_headers {
        tracing::warn!(
            "TRUST_IDENTITY_HEADERS is enabled; any caller can assert a subject unless a login proxy strips the headers"
        );
    }

    let app = build_router(AppState {
        config: Arc::new(config.clone()),
        auth_server,
        owners: Arc::new(owners),
        template_env: Engine::new(templates::build_env()?),
        shutdown: token.clone(),
    });

    {
        let tracker = tracker.clone();
        let inner_token = token.clone();

        let ctrl_c = async {
            if let Err(err) = signal::ctrl_c().await {
                tracing::error!("failed to install Ctrl+C handler: {}", err);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(err) => {
                    tracing::error!("failed to install signal handler: {}", err);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::spawn(async move {
            tokio::select! {
                () = inner_token.cancelled() => { },
                _ = terminate => {},
                _ = ctrl_c => {},
            }

            tracker.close();
            inner_token.cancel();
        });
    }

    // Key reload and record cleanup
    {
        let inner_token = token.clone();
        let interval = config
            .key_rotation_check_interval
            .as_ref()
            .to_std()?
            .max(std::time::Duration::from_secs(1));
        let keys_path = config.signing_keys_path.clone();
        let storage = storage.clone();
        tracker.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = inner_token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                if let Some(path) = &keys_path {
                    match load_key_directory(path).await {
                        Ok(key_set) if key_set.is_empty() => {
                            tracing::warn!(path = %path.display(), "key directory is empty, keeping current keys");
                        }
                        Ok(key_set) => {
                            tracing::debug!(count = key_set.len(), "reloaded signing keys");
                            keys.replace(key_set);
                        }
                        Err(err) => tracing::error!(error = %err, "failed to reload signing keys"),
                    }
                }

                match storage.cleanup_expired() {
                    Ok(0) => {}
                    Ok(removed) => tracing::debug!(removed, "removed expired records"),
                    Err(err) => tracing::error!(error = %err, "cleanup failed"),
                }
            }
        });
    }

    // Start HTTP server
    {
        let http_port = *config.http_port.as_ref();
        let inner_token = token.clone();
        tracker.spawn(async move {
            let bind_address = format!("0.0.0.0:{http_port}");
            tracing::info!("Starting server on {bind_address}");
            let listener = match TcpListener::bind(&bind_address).await {
                Ok(listener) => listener,
                Err(err) => {
                    tracing::error!("failed to bind {}: {}", bind_address, err);
                    inner_token.cancel();
                    return;
                }
            };

            let shutdown_token = inner_token.clone();
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    tokio::select! {
                        () = shutdown_token.cancelled() => { }
                    }
                    tracing::info!("axum graceful shutdown complete");
                })
                .await;
            if let Err(err) = result {
                tracing::error!("axum task failed: {}", err);
            }

            inner_token.cancel();
        });
    }

    tracker.wait().await;

    Ok(())
}

/// Register the demo scopes, API resource and clients.
fn seed_registry(storage: &MemoryOAuthStorage, config: &Config) -> Result<()> {
    let issuer = config.issuer.as_ref();

    storage.store_scope(Scope::openid())?;
    storage.store_scope(Scope::profile())?;
    storage.store_scope(Scope::email())?;
    storage.store_scope(Scope::api("api.read"))?;
    storage.store_scope(Scope::api("api.write"))?;
    storage.store_api_resource(ApiResource::new(
        format!("{issuer}/api"),
        &["api.read", "api.write"],
    ))?;

    let mut web_app = OAuthClient::new("web-app");
    web_app.client_name = Some("Demo web application".to_string());
    web_app.redirect_uris = vec!["http://localhost:3000/callback".to_string()];
    web_app.allowed_scopes = ["openid", "profile", "email", "api.read", "offline_access"]
        .iter()
        .map(|scope| scope.to_string())
        .collect();
    web_app.allowed_grant_types = vec![GrantType::AuthorizationCode, GrantType::RefreshToken];
    web_app.allow_offline_access = true;
    apply_lifetimes(&mut web_app, config);
    storage.store_client(web_app)?;

    if let Some(secret) = &config.demo_client_secret {
        let mut service = OAuthClient::new("service");
        service.client_name = Some("Demo service".to_string());
        service.secrets = vec![Secret::shared(secret)];
        service.token_endpoint_auth_methods =
            vec![ClientAuthMethod::ClientSecretBasic, ClientAuthMethod::ClientSecretPost];
        service.allowed_grant_types = vec![GrantType::ClientCredentials];
        service.allowed_scopes = vec!["api.read".to_string(), "api.write".to_string()];
        service.require_consent = false;
        apply_lifetimes(&mut service, config);
        storage.store_client(service)?;
    }

    Ok(())
}

fn apply_lifetimes(client: &mut OAuthClient, config: &Config) {
    client.access_token_lifetime = *config.default_access_token_lifetime.as_ref();
    client.identity_token_lifetime = *config.default_identity_token_lifetime.as_ref();
    client.authorization_code_lifetime = *config.default_authorization_code_lifetime.as_ref();
    client.consent_lifetime = config
        .default_consent_lifetime
        .as_ref()
        .map(|lifetime| *lifetime.as_ref());
}
