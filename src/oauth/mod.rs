//! OAuth 2.0 and OpenID Connect protocol engine: request validation, consent, and token issuance.

pub mod auth_server;
pub mod authorize;
pub mod client_auth;
pub mod consent;
pub mod discovery;
pub mod issuance;
pub mod openid;
pub mod pkce;
pub mod protocol_error;
pub mod request_context;
pub mod token_request;
pub mod types;

// Re-export frequently used items from each module
pub use auth_server::{AuthorizationServer, AuthorizeResult};
pub use authorize::{AuthorizeQuery, AuthorizeRequestValidator, ValidAuthorizeRequest};
pub use consent::{AuthorizeRequestConsent, ConsentEngine};
pub use discovery::{DiscoveryDocument, DiscoveryGenerator};
pub use issuance::TokenIssuer;
pub use openid::{AccessTokenClaims, IdTokenClaims};
pub use pkce::CodeChallengeMethod;
pub use protocol_error::{AuthorizationRedirect, AuthorizeError, RedirectTarget};
pub use request_context::RequestContext;
pub use token_request::{TokenForm, TokenRequestValidator, ValidatedGrant, ValidatedTokenRequest};
pub use types::{
    ApiResource, AuthorizationCode, ClientAuthMethod, Consent, GrantType, OAuthClient,
    OAuthErrorResponse, Prompt, RefreshToken, ResolvedResources, ResourceOwner, ResponseMode,
    ResponseType, Scope, Secret, TokenResponse, TokenType,
};
