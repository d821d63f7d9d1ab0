//! Handles the authorize and token endpoints.
//!
//! The resource owner is identified from headers set by the login flow in front of
//! this service. Consent decisions are resubmitted to the authorize endpoint by POST
//! together with the original request parameters.

use axum::{
    Form, Json,
    extract::{Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Redirect, Response},
};
use axum_template::RenderHtml;
use serde::Deserialize;
use serde_json::json;

use super::context::AppState;
use crate::errors::{HttpError, OAuthError};
use crate::oauth::{
    AuthorizationRedirect, AuthorizeError, AuthorizeQuery, AuthorizeRequestConsent,
    AuthorizeResult, TokenForm, ValidAuthorizeRequest,
};
use crate::templates::{FORM_POST_TEMPLATE, FormPostContext};

/// Consent decision submitted alongside the authorize parameters
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConsentForm {
    #[serde(flatten)]
    pub query: AuthorizeQuery,
    /// `granted` or `denied`
    pub consent: Option<String>,
    /// Space-separated scopes the owner agreed to
    pub granted_scope: Option<String>,
    pub remember: Option<String>,
}

impl ConsentForm {
    fn decision(&self) -> Option<AuthorizeRequestConsent> {
        match self.consent.as_deref()? {
            "granted" => Some(AuthorizeRequestConsent::Granted {
                scopes: self
                    .granted_scope
                    .as_deref()
                    .unwrap_or_default()
                    .split_whitespace()
                    .map(str::to_string)
                    .collect(),
                remember: matches!(self.remember.as_deref(), Some("true" | "on" | "1")),
            }),
            _ => Some(AuthorizeRequestConsent::Denied { error: None }),
        }
    }
}

/// GET /oauth/authorize
pub async fn handle_oauth_authorize(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthorizeQuery>,
) -> Response {
    authorize(&state, &headers, ConsentForm { query, ..ConsentForm::default() }).await
}

/// POST /oauth/authorize
pub async fn handle_oauth_authorize_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<ConsentForm>,
) -> Response {
    authorize(&state, &headers, form).await
}

async fn authorize(state: &AppState, headers: &HeaderMap, form: ConsentForm) -> Response {
    let server = &state.auth_server;
    let owner = match state.resource_owner(headers).await {
        Ok(owner) => owner,
        Err(error) => return unredirectable(AuthorizeError::unredirectable(error, None)),
    };
    let context = match server.begin(state.shutdown.child_token()).await {
        Ok(context) => context,
        Err(error) => {
            let client_id = form.query.client_id.as_deref();
            return unredirectable(AuthorizeError::unredirectable(error, client_id));
        }
    };

    let result = match (form.decision(), owner.as_ref()) {
        (Some(decision), Some(owner)) => {
            server
                .authorize_with_consent(context, &form.query, owner, decision)
                .await
        }
        _ => server.authorize(context, &form.query, owner.as_ref()).await,
    };

    match result {
        AuthorizeResult::Success(redirect) => authorization_response(state, redirect),
        AuthorizeResult::Login(request) => interaction(StatusCode::UNAUTHORIZED, "login", &request),
        AuthorizeResult::Consent(request) => interaction(StatusCode::OK, "consent", &request),
        AuthorizeResult::Error(error) => match error.to_redirect() {
            Some(redirect) => authorization_response(state, redirect),
            None => unredirectable(error),
        },
    }
}

fn authorization_response(state: &AppState, redirect: AuthorizationRedirect) -> Response {
    match redirect {
        AuthorizationRedirect::Location(location) => Redirect::to(&location).into_response(),
        AuthorizationRedirect::FormPost { action, params } => no_store(
            RenderHtml(
                FORM_POST_TEMPLATE,
                state.template_env.clone(),
                FormPostContext::new(&action, &params),
            )
            .into_response(),
        ),
    }
}

/// Tells the login flow what the owner has to do before the request can be resumed.
fn interaction(status: StatusCode, kind: &str, request: &ValidAuthorizeRequest) -> Response {
    let required: Vec<&str> = request
        .resources
        .identity_scopes
        .iter()
        .chain(request.resources.api_scopes.iter())
        .filter(|scope| scope.required)
        .map(|scope| scope.name.as_str())
        .collect();
    let body = json!({
        "interaction": kind,
        "client_id": request.client.client_id,
        "client_name": request.client.client_name,
        "scopes": request.scope_names(),
        "required_scopes": required,
        "login_hint": request.login_hint,
    });
    no_store((status, Json(body)).into_response())
}

fn unredirectable(error: AuthorizeError) -> Response {
    let status = match error.error() {
        OAuthError::ServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        OAuthError::TemporarilyUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::BAD_REQUEST,
    };
    no_store((status, Json(error.to_error_response())).into_response())
}

/// POST /oauth/token
pub async fn handle_oauth_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<TokenForm>,
) -> Result<Response, HttpError> {
    let server = &state.auth_server;
    let context = server.begin(state.shutdown.child_token()).await?;

    match server.token(context, &headers, &form).await {
        Ok(response) => Ok(no_store(Json(response).into_response())),
        Err(error) => {
            // RFC 6749 5.2
            let challenge = matches!(error, OAuthError::InvalidClient(_))
                && headers.contains_key(header::AUTHORIZATION);
            let mut response = HttpError::from(error).into_response();
            if challenge {
                response.headers_mut().insert(
                    header::WWW_AUTHENTICATE,
                    HeaderValue::from_static("Basic realm=\"token\""),
                );
            }
            Ok(no_store(response))
        }
    }
}

fn no_store(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    response
}
