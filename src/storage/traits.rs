//! Storage trait definitions for the registry, token records, and resource-owner collaborators.
//!
//! Registry lookups return `None` on a miss instead of failing. Mutations that must
//! commit or roll back together with token issuance go through [`UnitOfWork`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::errors::StorageError;
use crate::oauth::types::*;

pub type Result<T> = std::result::Result<T, StorageError>;

/// Result of consuming an authorization code
#[derive(Debug, Clone)]
pub enum CodeConsumeOutcome {
    /// The code was unspent and is now marked spent
    Consumed(AuthorizationCode),
    /// The code was spent by an earlier request
    AlreadyConsumed(AuthorizationCode),
    NotFound,
    Expired,
}

/// Result of consuming a refresh token
#[derive(Debug, Clone)]
pub enum RefreshConsumeOutcome {
    /// The token was the current generation and is now marked spent
    Consumed(RefreshToken),
    /// The token was already rotated; its lineage must be revoked
    Stale(RefreshToken),
    Revoked,
    NotFound,
    Expired,
}

/// Claims returned by the user-profile collaborator
#[derive(Debug, Clone, PartialEq)]
pub enum ProfileClaims {
    Active(Map<String, Value>),
    /// The subject is disabled or gone and must not receive tokens
    Inactive,
}

/// Read-only client registry
#[async_trait]
pub trait ClientStore: Send + Sync {
    /// Enabled client by id; disabled or unknown clients resolve to `None`
    async fn find_enabled_client(&self, client_id: &str) -> Result<Option<OAuthClient>>;
}

/// Read-only scope and resource registry
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Resolve enabled scopes by name together with the enabled resources owning them.
    /// Unknown names are simply absent from the result.
    async fn find_resources(&self, scope_names: &[String]) -> Result<ResolvedResources>;

    async fn find_enabled_resource_by_identifier(
        &self,
        identifier: &str,
    ) -> Result<Option<ApiResource>>;

    /// Every enabled scope and resource, for discovery
    async fn find_all_resources(&self) -> Result<ResolvedResources>;
}

/// Remembered consent lookups
#[async_trait]
pub trait ConsentStore: Send + Sync {
    async fn find_consent(&self, subject: &str, client_id: &str) -> Result<Option<Consent>>;
}

/// Authorization code reads
#[async_trait]
pub trait AuthorizationCodeStore: Send + Sync {
    /// Read a code without consuming it
    async fn find_code(&self, handle: &str) -> Result<Option<AuthorizationCode>>;
}

/// Refresh token reads and lineage revocation
#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    /// Read a refresh token without consuming it. Tokens of a revoked lineage are
    /// reported as revoked.
    async fn find_refresh_token(&self, handle: &str) -> Result<Option<RefreshToken>>;

    /// Revoke every token in the lineage, including tokens of that lineage that a
    /// concurrent unit of work has yet to commit. Applied immediately, outside any
    /// unit of work, so the revocation survives the rollback of the failing request.
    async fn revoke_lineage(&self, lineage_id: Uuid) -> Result<usize>;
}

/// Single-use tracking for client assertion `jti` values
#[async_trait]
pub trait AssertionReplayStore: Send + Sync {
    /// Record a `jti`; returns `false` if it was already seen and is still live
    async fn record_assertion_id(
        &self,
        client_id: &str,
        jti: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool>;
}

/// Source of units of work
#[async_trait]
pub trait Transactional: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>>;
}

/// A transactional boundary for one request.
///
/// Creates become visible on commit. Consumption is a conditional "mark spent only
/// if still unspent" that concurrent consumers observe immediately and that rollback
/// reverses.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    /// Persist a code and return its handle
    async fn create_code(&mut self, code: AuthorizationCode) -> Result<String>;

    async fn consume_code(&mut self, handle: &str) -> Result<CodeConsumeOutcome>;

    /// Persist a refresh token and return its handle
    async fn create_refresh_token(&mut self, token: RefreshToken) -> Result<String>;

    async fn consume_refresh_token(&mut self, handle: &str) -> Result<RefreshConsumeOutcome>;

    /// Replace a token record in place; used to slide expiry of reusable tokens
    async fn update_refresh_token(&mut self, handle: &str, token: RefreshToken) -> Result<()>;

    async fn upsert_consent(&mut self, consent: Consent) -> Result<()>;

    async fn remove_consent(&mut self, subject: &str, client_id: &str) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Combined storage trait
pub trait OAuthStorage:
    ClientStore
    + ResourceStore
    + ConsentStore
    + AuthorizationCodeStore
    + RefreshTokenStore
    + AssertionReplayStore
    + Transactional
{
}

impl<T> OAuthStorage for T where
    T: ClientStore
        + ResourceStore
        + ConsentStore
        + AuthorizationCodeStore
        + RefreshTokenStore
        + AssertionReplayStore
        + Transactional
{
}

/// Resource-owner session collaborator
#[async_trait]
pub trait ResourceOwnerProvider: Send + Sync {
    /// Minimal identity needed to re-establish the owner without a profile lookup
    async fn essential_claims(
        &self,
        subject: &str,
        session_id: Option<&str>,
    ) -> Result<Option<ResourceOwner>>;

    async fn is_active(&self, subject: &str) -> Result<bool>;
}

/// User-profile collaborator
#[async_trait]
pub trait UserProfileProvider: Send + Sync {
    /// The subset of `claim_types` to embed for this owner
    async fn profile_claims(
        &self,
        owner: &ResourceOwner,
        claim_types: &[String],
    ) -> Result<ProfileClaims>;
}
