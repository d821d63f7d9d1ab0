//! Standardized error types following the `error-oidc-<domain>-<number>` format.

use axum::{
    Json,
    response::{IntoResponse, Response},
};
use http::{HeaderValue, StatusCode, header};
use thiserror::Error;

use crate::oauth::types::OAuthErrorResponse;

/// Configuration errors that occur during application startup
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Error when a required environment variable is not set
    #[error("error-oidc-config-1 {0} must be set")]
    EnvVarRequired(String),

    /// Error when HTTP_PORT cannot be parsed
    #[error("error-oidc-config-2 Parsing HTTP_PORT into u16 failed: {0:?}")]
    PortParsingFailed(std::num::ParseIntError),

    /// Error when version information is not available
    #[error("error-oidc-config-3 One of GIT_HASH or CARGO_PKG_VERSION must be set")]
    VersionNotSet,

    /// Error when duration string cannot be parsed
    #[error("error-oidc-config-4 Failed to parse duration '{0}': {1}")]
    DurationParsingFailed(String, String),

    /// Error when a signing algorithm name is not supported
    #[error("error-oidc-config-5 Unsupported signing algorithm '{0}'")]
    UnsupportedAlgorithm(String),

    /// Error when the issuer is not an absolute URL
    #[error("error-oidc-config-6 Invalid EXTERNAL_BASE '{0}': {1}")]
    InvalidIssuer(String, String),

    /// Error when a signing key file cannot be loaded
    #[error("error-oidc-config-7 Failed to load signing key '{0}': {1}")]
    SigningKeyLoadFailed(String, String),

    /// Error when a boolean setting is not `true` or `false`
    #[error("error-oidc-config-8 Invalid boolean for {0}: '{1}'")]
    InvalidBoolean(String, String),
}

/// HTTP server errors
#[derive(Debug, Error)]
pub enum HttpError {
    /// A protocol error returned to the client as a JSON error body
    #[error("error-oidc-http-1 Request failed: {0}")]
    OAuth(#[from] OAuthError),
}

/// OAuth 2.0 / OpenID Connect protocol errors.
///
/// Every variant maps onto one registered error code and carries the
/// human-readable `error_description`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OAuthError {
    #[error("error-oidc-oauth-1 Invalid request: {0}")]
    InvalidRequest(String),

    #[error("error-oidc-oauth-2 Invalid client: {0}")]
    InvalidClient(String),

    #[error("error-oidc-oauth-3 Invalid grant: {0}")]
    InvalidGrant(String),

    #[error("error-oidc-oauth-4 Unauthorized client: {0}")]
    UnauthorizedClient(String),

    #[error("error-oidc-oauth-5 Unsupported grant type: {0}")]
    UnsupportedGrantType(String),

    #[error("error-oidc-oauth-6 Unsupported response type: {0}")]
    UnsupportedResponseType(String),

    #[error("error-oidc-oauth-7 Invalid scope: {0}")]
    InvalidScope(String),

    /// Resource indicator rejected (RFC 8707)
    #[error("error-oidc-oauth-8 Invalid target: {0}")]
    InvalidTarget(String),

    #[error("error-oidc-oauth-9 Access denied: {0}")]
    AccessDenied(String),

    #[error("error-oidc-oauth-10 Login required: {0}")]
    LoginRequired(String),

    #[error("error-oidc-oauth-11 Consent required: {0}")]
    ConsentRequired(String),

    #[error("error-oidc-oauth-12 Interaction required: {0}")]
    InteractionRequired(String),

    /// Infrastructure failure: storage, signing, or cancellation
    #[error("error-oidc-oauth-13 Server error: {0}")]
    ServerError(String),

    #[error("error-oidc-oauth-14 Temporarily unavailable: {0}")]
    TemporarilyUnavailable(String),
}

impl OAuthError {
    /// The registered error code sent as the `error` parameter.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidClient(_) => "invalid_client",
            Self::InvalidGrant(_) => "invalid_grant",
            Self::UnauthorizedClient(_) => "unauthorized_client",
            Self::UnsupportedGrantType(_) => "unsupported_grant_type",
            Self::UnsupportedResponseType(_) => "unsupported_response_type",
            Self::InvalidScope(_) => "invalid_scope",
            Self::InvalidTarget(_) => "invalid_target",
            Self::AccessDenied(_) => "access_denied",
            Self::LoginRequired(_) => "login_required",
            Self::ConsentRequired(_) => "consent_required",
            Self::InteractionRequired(_) => "interaction_required",
            Self::ServerError(_) => "server_error",
            Self::TemporarilyUnavailable(_) => "temporarily_unavailable",
        }
    }

    /// The description sent as the `error_description` parameter.
    pub fn description(&self) -> &str {
        match self {
            Self::InvalidRequest(d)
            | Self::InvalidClient(d)
            | Self::InvalidGrant(d)
            | Self::UnauthorizedClient(d)
            | Self::UnsupportedGrantType(d)
            | Self::UnsupportedResponseType(d)
            | Self::InvalidScope(d)
            | Self::InvalidTarget(d)
            | Self::AccessDenied(d)
            | Self::LoginRequired(d)
            | Self::ConsentRequired(d)
            | Self::InteractionRequired(d)
            | Self::ServerError(d)
            | Self::TemporarilyUnavailable(d) => d,
        }
    }

    /// Whether this error came from infrastructure rather than request validation.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, Self::ServerError(_) | Self::TemporarilyUnavailable(_))
    }

    /// HTTP status used when the error is returned directly from the token endpoint.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidClient(_) => StatusCode::UNAUTHORIZED,
            Self::ServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::TemporarilyUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

/// Signing key and JWT errors
#[derive(Debug, Error)]
pub enum KeyError {
    /// No usable key is registered for the requested algorithm
    #[error("error-oidc-key-1 No usable signing key for algorithm {0}")]
    NoUsableKey(String),

    /// Key generation failed
    #[error("error-oidc-key-2 Key generation failed: {0}")]
    GenerationFailed(String),

    /// Key material is malformed
    #[error("error-oidc-key-3 Invalid key: {0}")]
    InvalidKey(String),

    /// Token signing failed
    #[error("error-oidc-key-4 Signing failed: {0}")]
    SigningFailed(String),

    /// Token verification failed
    #[error("error-oidc-key-5 Verification failed: {0}")]
    VerificationFailed(String),
}

/// Storage errors raised by backends
#[derive(Debug, Error)]
pub enum StorageError {
    /// Error when the backend connection fails
    #[error("error-oidc-storage-1 Connection failed: {0}")]
    ConnectionFailed(String),

    /// Error when query execution fails
    #[error("error-oidc-storage-2 Query execution failed: {0}")]
    QueryFailed(String),

    /// Error when a lock or transaction cannot be acquired
    #[error("error-oidc-storage-3 Lock error: {0}")]
    LockFailed(String),

    /// Error when data validation fails
    #[error("error-oidc-storage-4 Invalid data: {0}")]
    InvalidData(String),

    /// Error when a unit of work is used after completion
    #[error("error-oidc-storage-5 Unit of work already completed")]
    TransactionCompleted,
}

impl From<StorageError> for OAuthError {
    fn from(error: StorageError) -> Self {
        tracing::error!(error = ?error, "storage failure");
        OAuthError::ServerError("storage failure".to_string())
    }
}

impl From<KeyError> for OAuthError {
    fn from(error: KeyError) -> Self {
        tracing::error!(error = ?error, "key material failure");
        OAuthError::ServerError("token signing failed".to_string())
    }
}

pub type Result<T> = std::result::Result<T, HttpError>;

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let HttpError::OAuth(error) = self;
        if error.is_infrastructure() {
            tracing::error!(error = ?error, "internal server error");
        }
        let mut response =
            (error.status_code(), Json(OAuthErrorResponse::from(&error))).into_response();
        response
            .headers_mut()
            .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        response
    }
}
