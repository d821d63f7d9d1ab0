//! OAuth 2.0 / OpenID Connect core types and data structures.
//!
//! Defines enums, structs, and helpers for grants, response types, clients,
//! scopes, resources, and the persisted token records.

use base64::prelude::*;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::errors::OAuthError;
use crate::keys::SigningAlgorithm;
use crate::oauth::pkce::CodeChallengeMethod;

/// The `openid` scope that turns an OAuth request into an OpenID Connect request
pub const OPENID: &str = "openid";

/// The scope that requests a refresh token
pub const OFFLINE_ACCESS: &str = "offline_access";

/// Grant types handled by the token endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    AuthorizationCode,
    ClientCredentials,
    RefreshToken,
}

/// Grant types advertised in discovery and accepted by the token endpoint
pub const SUPPORTED_GRANT_TYPES: &[GrantType] = &[
    GrantType::AuthorizationCode,
    GrantType::ClientCredentials,
    GrantType::RefreshToken,
];

impl GrantType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthorizationCode => "authorization_code",
            Self::ClientCredentials => "client_credentials",
            Self::RefreshToken => "refresh_token",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        SUPPORTED_GRANT_TYPES
            .iter()
            .find(|grant_type| grant_type.as_str() == value)
            .copied()
    }
}

/// Response types handled by the authorization endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResponseType {
    #[serde(rename = "code")]
    Code,
    #[serde(rename = "id_token")]
    IdToken,
    #[serde(rename = "code id_token")]
    CodeIdToken,
}

/// Response types advertised in discovery and accepted by the authorization endpoint
pub const SUPPORTED_RESPONSE_TYPES: &[ResponseType] = &[
    ResponseType::Code,
    ResponseType::IdToken,
    ResponseType::CodeIdToken,
];

impl ResponseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::IdToken => "id_token",
            Self::CodeIdToken => "code id_token",
        }
    }

    /// Parse a space-delimited `response_type` value. Token order is irrelevant.
    pub fn parse(value: &str) -> Option<Self> {
        let parts: BTreeSet<&str> = value.split_whitespace().collect();
        SUPPORTED_RESPONSE_TYPES.iter().copied().find(|candidate| {
            let expected: BTreeSet<&str> = candidate.as_str().split(' ').collect();
            expected == parts
        })
    }

    pub fn includes_code(&self) -> bool {
        matches!(self, Self::Code | Self::CodeIdToken)
    }

    pub fn includes_id_token(&self) -> bool {
        matches!(self, Self::IdToken | Self::CodeIdToken)
    }

    /// The response mode used when the request does not name one.
    pub fn default_response_mode(&self) -> ResponseMode {
        match self {
            Self::Code => ResponseMode::Query,
            Self::IdToken | Self::CodeIdToken => ResponseMode::Fragment,
        }
    }

    /// Response modes a request may select for this response type.
    /// Tokens are never placed in the query string.
    pub fn allowed_response_modes(&self) -> &'static [ResponseMode] {
        match self {
            Self::Code => &[
                ResponseMode::Query,
                ResponseMode::Fragment,
                ResponseMode::FormPost,
            ],
            Self::IdToken | Self::CodeIdToken => &[ResponseMode::Fragment, ResponseMode::FormPost],
        }
    }
}

/// How authorization responses are delivered to the redirect URI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseMode {
    Query,
    Fragment,
    FormPost,
}

/// Response modes advertised in discovery
pub const SUPPORTED_RESPONSE_MODES: &[ResponseMode] = &[
    ResponseMode::Query,
    ResponseMode::Fragment,
    ResponseMode::FormPost,
];

impl ResponseMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Fragment => "fragment",
            Self::FormPost => "form_post",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        SUPPORTED_RESPONSE_MODES
            .iter()
            .find(|mode| mode.as_str() == value)
            .copied()
    }
}

/// `prompt` parameter values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Prompt {
    None,
    Login,
    Consent,
    SelectAccount,
}

/// Prompt values advertised in discovery
pub const SUPPORTED_PROMPT_VALUES: &[Prompt] = &[
    Prompt::None,
    Prompt::Login,
    Prompt::Consent,
    Prompt::SelectAccount,
];

impl Prompt {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Login => "login",
            Self::Consent => "consent",
            Self::SelectAccount => "select_account",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        SUPPORTED_PROMPT_VALUES
            .iter()
            .find(|prompt| prompt.as_str() == value)
            .copied()
    }
}

/// Token types issued by the token endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenType {
    Bearer,
}

/// Client authentication methods at the token endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientAuthMethod {
    ClientSecretBasic,
    ClientSecretPost,
    PrivateKeyJwt,
    None,
}

/// Client authentication methods advertised in discovery
pub const SUPPORTED_CLIENT_AUTH_METHODS: &[ClientAuthMethod] = &[
    ClientAuthMethod::ClientSecretBasic,
    ClientAuthMethod::ClientSecretPost,
    ClientAuthMethod::PrivateKeyJwt,
    ClientAuthMethod::None,
];

impl ClientAuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClientSecretBasic => "client_secret_basic",
            Self::ClientSecretPost => "client_secret_post",
            Self::PrivateKeyJwt => "private_key_jwt",
            Self::None => "none",
        }
    }
}

/// Whether refresh tokens rotate on every use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTokenUsage {
    /// Each use invalidates the presented token and mints the next generation
    OneTimeOnly,
    /// The same token is returned on every use
    ReUse,
}

/// How refresh token expiry is computed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTokenExpiration {
    Absolute,
    /// Every use extends expiry by the sliding lifetime, capped by the absolute lifetime
    Sliding,
}

/// Kind of credential held in a [`Secret`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretType {
    /// SHA-256 hash (base64) of a shared secret
    SharedSecret,
    /// Public JSON Web Key used to verify client assertions
    JsonWebKey,
}

/// Credential material owned by a client or API resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Secret {
    pub secret_type: SecretType,
    pub value: String,
    pub description: Option<String>,
    pub expiration: Option<DateTime<Utc>>,
}

impl Secret {
    /// Create a shared secret, hashing the plain value for storage.
    pub fn shared(plain: &str) -> Self {
        Self {
            secret_type: SecretType::SharedSecret,
            value: hash_secret(plain),
            description: None,
            expiration: None,
        }
    }

    /// Create a JSON Web Key secret from its serialized JWK.
    pub fn json_web_key(jwk: &str) -> Self {
        Self {
            secret_type: SecretType::JsonWebKey,
            value: jwk.to_string(),
            description: None,
            expiration: None,
        }
    }

    pub fn with_expiration(mut self, expiration: DateTime<Utc>) -> Self {
        self.expiration = Some(expiration);
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration.is_some_and(|expiration| expiration <= now)
    }
}

/// Registered client application.
///
/// Loaded once per request and treated as an immutable snapshot.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    pub client_id: String,
    pub client_name: Option<String>,
    pub enabled: bool,
    pub secrets: Vec<Secret>,
    pub token_endpoint_auth_methods: Vec<ClientAuthMethod>,
    pub allowed_grant_types: Vec<GrantType>,
    pub allowed_response_types: Vec<ResponseType>,
    /// Exact-match set of redirect URIs
    pub redirect_uris: Vec<String>,
    pub post_logout_redirect_uris: Vec<String>,
    pub allowed_scopes: Vec<String>,
    pub allow_offline_access: bool,
    pub require_pkce: bool,
    pub allow_plain_text_pkce: bool,
    pub require_consent: bool,
    pub allow_remember_consent: bool,
    /// None means remembered consent never expires
    pub consent_lifetime: Option<Duration>,
    pub authorization_code_lifetime: Duration,
    pub access_token_lifetime: Duration,
    pub identity_token_lifetime: Duration,
    pub refresh_token_usage: RefreshTokenUsage,
    pub refresh_token_expiration: RefreshTokenExpiration,
    pub absolute_refresh_token_lifetime: Duration,
    pub sliding_refresh_token_lifetime: Duration,
    /// Empty means the server default algorithm
    pub allowed_identity_token_signing_algorithms: Vec<SigningAlgorithm>,
    pub always_include_user_claims_in_id_token: bool,
}

impl OAuthClient {
    /// Create a client with conservative defaults: authorization code only,
    /// PKCE required, consent required, rotating refresh tokens.
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_name: None,
            enabled: true,
            secrets: Vec::new(),
            token_endpoint_auth_methods: vec![ClientAuthMethod::None],
            allowed_grant_types: vec![GrantType::AuthorizationCode],
            allowed_response_types: vec![ResponseType::Code],
            redirect_uris: Vec::new(),
            post_logout_redirect_uris: Vec::new(),
            allowed_scopes: Vec::new(),
            allow_offline_access: false,
            require_pkce: true,
            allow_plain_text_pkce: false,
            require_consent: true,
            allow_remember_consent: true,
            consent_lifetime: None,
            authorization_code_lifetime: Duration::minutes(5),
            access_token_lifetime: Duration::hours(1),
            identity_token_lifetime: Duration::minutes(5),
            refresh_token_usage: RefreshTokenUsage::OneTimeOnly,
            refresh_token_expiration: RefreshTokenExpiration::Absolute,
            absolute_refresh_token_lifetime: Duration::days(30),
            sliding_refresh_token_lifetime: Duration::days(15),
            allowed_identity_token_signing_algorithms: Vec::new(),
            always_include_user_claims_in_id_token: false,
        }
    }

    /// Public clients hold no shared secrets and authenticate with `none`.
    pub fn is_public(&self) -> bool {
        self.token_endpoint_auth_methods
            .contains(&ClientAuthMethod::None)
    }

    pub fn allows_grant_type(&self, grant_type: GrantType) -> bool {
        self.allowed_grant_types.contains(&grant_type)
    }

    pub fn allows_response_type(&self, response_type: ResponseType) -> bool {
        self.allowed_response_types.contains(&response_type)
    }

    /// Exact string comparison, no prefix or pattern matching.
    pub fn has_redirect_uri(&self, redirect_uri: &str) -> bool {
        self.redirect_uris.iter().any(|uri| uri == redirect_uri)
    }

    pub fn allows_scope(&self, scope: &str) -> bool {
        if scope == OFFLINE_ACCESS {
            return self.allow_offline_access;
        }
        self.allowed_scopes.iter().any(|allowed| allowed == scope)
    }

    /// Secrets that have not expired.
    pub fn active_secrets(&self, now: DateTime<Utc>) -> impl Iterator<Item = &Secret> {
        self.secrets
            .iter()
            .filter(move |secret| !secret.is_expired(now))
    }
}

/// Whether a scope asks for identity data or API access
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    Identity,
    Api,
}

/// A scope definition with its user-claim types and display metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scope {
    pub name: String,
    pub kind: ScopeKind,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub user_claims: Vec<String>,
    pub required: bool,
    pub emphasize: bool,
    pub show_in_discovery: bool,
    pub enabled: bool,
}

impl Scope {
    pub fn identity(name: impl Into<String>, user_claims: &[&str]) -> Self {
        Self {
            name: name.into(),
            kind: ScopeKind::Identity,
            display_name: None,
            description: None,
            user_claims: user_claims.iter().map(|c| c.to_string()).collect(),
            required: false,
            emphasize: false,
            show_in_discovery: true,
            enabled: true,
        }
    }

    pub fn api(name: impl Into<String>) -> Self {
        Self {
            kind: ScopeKind::Api,
            ..Self::identity(name, &[])
        }
    }

    /// The `openid` identity scope. Always required once requested.
    pub fn openid() -> Self {
        Self {
            required: true,
            ..Self::identity(OPENID, &["sub"])
        }
    }

    pub fn profile() -> Self {
        Self::identity(
            "profile",
            &[
                "name",
                "family_name",
                "given_name",
                "middle_name",
                "nickname",
                "preferred_username",
                "profile",
                "picture",
                "website",
                "gender",
                "birthdate",
                "zoneinfo",
                "locale",
                "updated_at",
            ],
        )
    }

    pub fn email() -> Self {
        Self::identity("email", &["email", "email_verified"])
    }
}

/// A protected API identified by an absolute identifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResource {
    /// Identifier used as the access token audience
    pub identifier: String,
    pub display_name: Option<String>,
    /// Names of the API scopes this resource accepts
    pub scopes: Vec<String>,
    pub secrets: Vec<Secret>,
    /// Preferred access token signing algorithms, in order; empty means server default
    pub allowed_signing_algorithms: Vec<SigningAlgorithm>,
    pub user_claims: Vec<String>,
    pub enabled: bool,
}

impl ApiResource {
    pub fn new(identifier: impl Into<String>, scopes: &[&str]) -> Self {
        Self {
            identifier: identifier.into(),
            display_name: None,
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
            secrets: Vec::new(),
            allowed_signing_algorithms: Vec::new(),
            user_claims: Vec::new(),
            enabled: true,
        }
    }

    pub fn owns_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

/// Scopes and resources resolved together for one request
#[derive(Debug, Clone, Default)]
pub struct ResolvedResources {
    pub identity_scopes: Vec<Scope>,
    pub api_scopes: Vec<Scope>,
    pub api_resources: Vec<ApiResource>,
    pub offline_access: bool,
}

impl ResolvedResources {
    /// All scope names in a stable order: identity, api, then offline_access.
    pub fn scope_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .identity_scopes
            .iter()
            .chain(self.api_scopes.iter())
            .map(|scope| scope.name.clone())
            .collect();
        if self.offline_access {
            names.push(OFFLINE_ACCESS.to_string());
        }
        names
    }

    pub fn is_empty(&self) -> bool {
        self.identity_scopes.is_empty() && self.api_scopes.is_empty() && !self.offline_access
    }

    pub fn is_openid(&self) -> bool {
        self.identity_scopes.iter().any(|scope| scope.name == OPENID)
    }

    /// Access token audiences: every enabled resource owning a granted API scope.
    pub fn audiences(&self) -> Vec<String> {
        self.api_resources
            .iter()
            .filter(|resource| {
                self.api_scopes
                    .iter()
                    .any(|scope| resource.owns_scope(&scope.name))
            })
            .map(|resource| resource.identifier.clone())
            .collect()
    }

    /// User-claim types requested through identity scopes.
    pub fn identity_claim_types(&self) -> Vec<String> {
        let mut claims: Vec<String> = Vec::new();
        for claim in self
            .identity_scopes
            .iter()
            .flat_map(|scope| scope.user_claims.iter())
        {
            if !claims.contains(claim) {
                claims.push(claim.clone());
            }
        }
        claims
    }

    /// Keep only the scopes in `names`; resources are trimmed to those still referenced.
    pub fn retain_scopes(&self, names: &[String]) -> Self {
        let keep = |scope: &&Scope| names.iter().any(|name| name == &scope.name);
        let identity_scopes: Vec<Scope> = self.identity_scopes.iter().filter(keep).cloned().collect();
        let api_scopes: Vec<Scope> = self.api_scopes.iter().filter(keep).cloned().collect();
        let api_resources = self
            .api_resources
            .iter()
            .filter(|resource| api_scopes.iter().any(|scope| resource.owns_scope(&scope.name)))
            .cloned()
            .collect();
        Self {
            identity_scopes,
            api_scopes,
            api_resources,
            offline_access: self.offline_access && names.iter().any(|n| n == OFFLINE_ACCESS),
        }
    }

    /// Narrow API scopes and audiences to a single resource (RFC 8707).
    pub fn narrow_to_resource(&self, identifier: &str) -> Option<Self> {
        let resource = self
            .api_resources
            .iter()
            .find(|resource| resource.identifier == identifier)?;
        let api_scopes: Vec<Scope> = self
            .api_scopes
            .iter()
            .filter(|scope| resource.owns_scope(&scope.name))
            .cloned()
            .collect();
        if api_scopes.is_empty() {
            return None;
        }
        Some(Self {
            identity_scopes: self.identity_scopes.clone(),
            api_scopes,
            api_resources: vec![resource.clone()],
            offline_access: self.offline_access,
        })
    }
}

/// The authenticated resource owner as established by the host's login flow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceOwner {
    pub subject: String,
    pub session_id: Option<String>,
    pub auth_time: DateTime<Utc>,
    /// Identity provider that authenticated the owner
    pub idp: Option<String>,
    /// Authentication methods references
    pub amr: Vec<String>,
}

impl ResourceOwner {
    pub fn new(subject: impl Into<String>, auth_time: DateTime<Utc>) -> Self {
        Self {
            subject: subject.into(),
            session_id: None,
            auth_time,
            idp: None,
            amr: Vec::new(),
        }
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// Single-use authorization code record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationCode {
    /// Stable identifier; becomes the lineage id of refresh tokens minted from this code
    pub id: Uuid,
    pub client_id: String,
    pub owner: ResourceOwner,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub resource_indicators: Vec<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<CodeChallengeMethod>,
    pub nonce: Option<String>,
    pub requested_claims: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub consumed_at: Option<DateTime<Utc>>,
}

impl AuthorizationCode {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Refresh token record; one generation within a lineage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshToken {
    pub lineage_id: Uuid,
    pub generation: u32,
    pub client_id: String,
    pub owner: ResourceOwner,
    /// Scopes of the original grant; refreshes may narrow but never widen
    pub scopes: Vec<String>,
    pub resource_indicators: Vec<String>,
    pub nonce: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Absolute expiry shared by the whole lineage
    pub lineage_expires_at: DateTime<Utc>,
    pub consumed_at: Option<DateTime<Utc>>,
    pub revoked: bool,
}

impl RefreshToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now || self.lineage_expires_at <= now
    }
}

/// Remembered consent for a (subject, client) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Consent {
    pub subject: String,
    pub client_id: String,
    pub scopes: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Consent {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    /// Whether this consent covers every requested scope.
    pub fn covers(&self, scopes: &[String]) -> bool {
        scopes.iter().all(|scope| self.scopes.contains(scope))
    }
}

/// Token endpoint success response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: TokenType,
    pub expires_in: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// OAuth error response body and redirect parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

impl From<&OAuthError> for OAuthErrorResponse {
    fn from(error: &OAuthError) -> Self {
        Self {
            error: error.error_code().to_string(),
            error_description: Some(error.description().to_string())
                .filter(|description| !description.is_empty()),
            error_uri: None,
            state: None,
            iss: None,
        }
    }
}

/// Generate a secure random token
pub fn generate_token() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.r#gen();
    BASE64_URL_SAFE_NO_PAD.encode(bytes)
}

/// Storage key for a code or refresh token handle. Raw handles are never persisted.
pub fn hash_handle(handle: &str) -> String {
    BASE64_URL_SAFE_NO_PAD.encode(Sha256::digest(handle.as_bytes()))
}

/// Hash a shared secret the way [`Secret::shared`] stores it.
pub fn hash_secret(plain: &str) -> String {
    BASE64_STANDARD.encode(Sha256::digest(plain.as_bytes()))
}

/// Validate scope string syntax (RFC 6749 section 3.3)
pub fn validate_scope(scope: &str) -> bool {
    scope.split_whitespace().all(|s| {
        s.chars()
            .all(|c| c == '\x21' || ('\x23'..='\x5b').contains(&c) || ('\x5d'..='\x7e').contains(&c))
    })
}

/// Parse a scope string into names, keeping request order and dropping duplicates
pub fn parse_scope(scope: &str) -> Vec<String> {
    let mut scopes: Vec<String> = Vec::new();
    for s in scope.split_whitespace() {
        if !scopes.iter().any(|existing| existing == s) {
            scopes.push(s.to_string());
        }
    }
    scopes
}

/// Join scopes into a space-separated string
pub fn join_scopes(scopes: &[String]) -> String {
    scopes.join(" ")
}
