//! In-memory OAuth storage implementation
//!
//! All state lives behind one lock so a commit applies atomically. Consumption marks
//! records spent immediately and keeps an undo journal; creates are buffered until
//! commit. Revoked lineages are remembered so that tokens committed after the
//! revocation arrive already revoked.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use crate::errors::StorageError;
use crate::oauth::types::*;
use crate::storage::traits::*;

#[derive(Default)]
struct MemoryState {
    clients: HashMap<String, OAuthClient>,
    scopes: Vec<Scope>,
    api_resources: Vec<ApiResource>,
    /// Keyed by hashed handle
    codes: HashMap<String, AuthorizationCode>,
    /// Keyed by hashed handle
    refresh_tokens: HashMap<String, RefreshToken>,
    consents: HashMap<(String, String), Consent>,
    assertion_ids: HashMap<(String, String), DateTime<Utc>>,
    /// Lineage id to revocation time
    revoked_lineages: HashMap<Uuid, DateTime<Utc>>,
}

impl MemoryState {
    fn is_lineage_revoked(&self, lineage_id: Uuid) -> bool {
        self.revoked_lineages.contains_key(&lineage_id)
    }
}

/// How long a revoked lineage with no stored records is remembered; covers units
/// of work that were still in flight when the lineage was revoked.
fn revoked_lineage_retention() -> Duration {
    Duration::hours(1)
}

fn lock(state: &Mutex<MemoryState>) -> Result<MutexGuard<'_, MemoryState>> {
    state
        .lock()
        .map_err(|e| StorageError::LockFailed(format!("Lock error: {}", e)))
}

/// In-memory implementation for OAuth storage
#[derive(Clone, Default)]
pub struct MemoryOAuthStorage {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryOAuthStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a client
    pub fn store_client(&self, client: OAuthClient) -> Result<()> {
        lock(&self.state)?
            .clients
            .insert(client.client_id.clone(), client);
        Ok(())
    }

    /// Register or replace a scope definition
    pub fn store_scope(&self, scope: Scope) -> Result<()> {
        let mut state = lock(&self.state)?;
        state.scopes.retain(|existing| existing.name != scope.name);
        state.scopes.push(scope);
        Ok(())
    }

    /// Register or replace an API resource
    pub fn store_api_resource(&self, resource: ApiResource) -> Result<()> {
        let mut state = lock(&self.state)?;
        state
            .api_resources
            .retain(|existing| existing.identifier != resource.identifier);
        state.api_resources.push(resource);
        Ok(())
    }

    /// Remove expired codes, refresh tokens, consents, and assertion ids.
    /// Spent codes stay until expiry so replays remain detectable. A revoked lineage
    /// is forgotten once no code or token of it remains and the retention has passed.
    pub fn cleanup_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let mut state = lock(&self.state)?;
        let initial_count = state.codes.len()
            + state.refresh_tokens.len()
            + state.consents.len()
            + state.assertion_ids.len();

        state.codes.retain(|_, code| !code.is_expired(now));
        state
            .refresh_tokens
            .retain(|_, token| !token.is_expired(now));
        state.consents.retain(|_, consent| !consent.is_expired(now));
        state.assertion_ids.retain(|_, expires_at| *expires_at > now);

        let live: HashSet<Uuid> = state
            .refresh_tokens
            .values()
            .map(|token| token.lineage_id)
            .chain(state.codes.values().map(|code| code.id))
            .collect();
        let cutoff = now - revoked_lineage_retention();
        state
            .revoked_lineages
            .retain(|lineage_id, revoked_at| live.contains(lineage_id) || *revoked_at > cutoff);

        let remaining = state.codes.len()
            + state.refresh_tokens.len()
            + state.consents.len()
            + state.assertion_ids.len();
        Ok(initial_count - remaining)
    }

    fn resolve(state: &MemoryState, scope_names: Option<&[String]>) -> ResolvedResources {
        let wanted = |name: &str| scope_names.is_none_or(|names| names.iter().any(|n| n == name));

        let mut resolved = ResolvedResources {
            offline_access: scope_names
                .is_some_and(|names| names.iter().any(|n| n == OFFLINE_ACCESS)),
            ..ResolvedResources::default()
        };
        for scope in state.scopes.iter().filter(|s| s.enabled && wanted(&s.name)) {
            match scope.kind {
                ScopeKind::Identity => resolved.identity_scopes.push(scope.clone()),
                ScopeKind::Api => resolved.api_scopes.push(scope.clone()),
            }
        }
        // An API scope resolves only when an enabled resource owns it
        resolved.api_scopes.retain(|scope| {
            state
                .api_resources
                .iter()
                .any(|resource| resource.enabled && resource.owns_scope(&scope.name))
        });
        resolved.api_resources = state
            .api_resources
            .iter()
            .filter(|resource| {
                resource.enabled
                    && resolved
                        .api_scopes
                        .iter()
                        .any(|scope| resource.owns_scope(&scope.name))
            })
            .cloned()
            .collect();
        resolved
    }
}

#[async_trait]
impl ClientStore for MemoryOAuthStorage {
    async fn find_enabled_client(&self, client_id: &str) -> Result<Option<OAuthClient>> {
        let state = lock(&self.state)?;
        Ok(state
            .clients
            .get(client_id)
            .filter(|client| client.enabled)
            .cloned())
    }
}

#[async_trait]
impl ResourceStore for MemoryOAuthStorage {
    async fn find_resources(&self, scope_names: &[String]) -> Result<ResolvedResources> {
        let state = lock(&self.state)?;
        Ok(Self::resolve(&state, Some(scope_names)))
    }

    async fn find_enabled_resource_by_identifier(
        &self,
        identifier: &str,
    ) -> Result<Option<ApiResource>> {
        let state = lock(&self.state)?;
        Ok(state
            .api_resources
            .iter()
            .find(|resource| resource.enabled && resource.identifier == identifier)
            .cloned())
    }

    async fn find_all_resources(&self) -> Result<ResolvedResources> {
        let state = lock(&self.state)?;
        Ok(Self::resolve(&state, None))
    }
}

#[async_trait]
impl ConsentStore for MemoryOAuthStorage {
    async fn find_consent(&self, subject: &str, client_id: &str) -> Result<Option<Consent>> {
        let state = lock(&self.state)?;
        Ok(state
            .consents
            .get(&(subject.to_string(), client_id.to_string()))
            .filter(|consent| !consent.is_expired(Utc::now()))
            .cloned())
    }
}

#[async_trait]
impl AuthorizationCodeStore for MemoryOAuthStorage {
    async fn find_code(&self, handle: &str) -> Result<Option<AuthorizationCode>> {
        let state = lock(&self.state)?;
        Ok(state.codes.get(&hash_handle(handle)).cloned())
    }
}

#[async_trait]
impl RefreshTokenStore for MemoryOAuthStorage {
    async fn find_refresh_token(&self, handle: &str) -> Result<Option<RefreshToken>> {
        let state = lock(&self.state)?;
        Ok(state.refresh_tokens.get(&hash_handle(handle)).map(|token| {
            let mut token = token.clone();
            token.revoked |= state.is_lineage_revoked(token.lineage_id);
            token
        }))
    }

    async fn revoke_lineage(&self, lineage_id: Uuid) -> Result<usize> {
        let mut state = lock(&self.state)?;
        state.revoked_lineages.insert(lineage_id, Utc::now());
        let mut revoked = 0;
        for token in state
            .refresh_tokens
            .values_mut()
            .filter(|token| token.lineage_id == lineage_id && !token.revoked)
        {
            token.revoked = true;
            revoked += 1;
        }
        Ok(revoked)
    }
}

#[async_trait]
impl AssertionReplayStore for MemoryOAuthStorage {
    async fn record_assertion_id(
        &self,
        client_id: &str,
        jti: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = lock(&self.state)?;
        let key = (client_id.to_string(), jti.to_string());
        if state
            .assertion_ids
            .get(&key)
            .is_some_and(|existing| *existing > Utc::now())
        {
            return Ok(false);
        }
        state.assertion_ids.insert(key, expires_at);
        Ok(true)
    }
}

#[async_trait]
impl Transactional for MemoryOAuthStorage {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        Ok(Box::new(MemoryUnitOfWork {
            state: self.state.clone(),
            pending: Vec::new(),
            undo: Vec::new(),
            completed: false,
        }))
    }
}

enum PendingWrite {
    Code(String, AuthorizationCode),
    RefreshToken(String, RefreshToken),
    UpdateRefreshToken(String, RefreshToken),
    UpsertConsent(Consent),
    RemoveConsent(String, String),
}

enum Undo {
    Code(String),
    RefreshToken(String),
}

/// Unit of work over [`MemoryOAuthStorage`]. Dropping it uncommitted rolls back.
pub struct MemoryUnitOfWork {
    state: Arc<Mutex<MemoryState>>,
    pending: Vec<PendingWrite>,
    undo: Vec<Undo>,
    completed: bool,
}

impl MemoryUnitOfWork {
    fn ensure_open(&self) -> Result<()> {
        if self.completed {
            return Err(StorageError::TransactionCompleted);
        }
        Ok(())
    }

    fn revert(&mut self) -> Result<()> {
        let mut state = lock(&self.state)?;
        for undo in self.undo.drain(..).rev() {
            match undo {
                Undo::Code(key) => {
                    if let Some(code) = state.codes.get_mut(&key) {
                        code.consumed_at = None;
                    }
                }
                Undo::RefreshToken(key) => {
                    if let Some(token) = state.refresh_tokens.get_mut(&key) {
                        token.consumed_at = None;
                    }
                }
            }
        }
        self.pending.clear();
        self.completed = true;
        Ok(())
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn create_code(&mut self, code: AuthorizationCode) -> Result<String> {
        self.ensure_open()?;
        let handle = generate_token();
        self.pending
            .push(PendingWrite::Code(hash_handle(&handle), code));
        Ok(handle)
    }

    async fn consume_code(&mut self, handle: &str) -> Result<CodeConsumeOutcome> {
        self.ensure_open()?;
        let key = hash_handle(handle);
        let now = Utc::now();
        let mut state = lock(&self.state)?;
        let Some(code) = state.codes.get_mut(&key) else {
            return Ok(CodeConsumeOutcome::NotFound);
        };
        if code.consumed_at.is_some() {
            return Ok(CodeConsumeOutcome::AlreadyConsumed(code.clone()));
        }
        if code.is_expired(now) {
            return Ok(CodeConsumeOutcome::Expired);
        }
        code.consumed_at = Some(now);
        let consumed = code.clone();
        drop(state);
        self.undo.push(Undo::Code(key));
        Ok(CodeConsumeOutcome::Consumed(consumed))
    }

    async fn create_refresh_token(&mut self, token: RefreshToken) -> Result<String> {
        self.ensure_open()?;
        let handle = generate_token();
        self.pending
            .push(PendingWrite::RefreshToken(hash_handle(&handle), token));
        Ok(handle)
    }

    async fn consume_refresh_token(&mut self, handle: &str) -> Result<RefreshConsumeOutcome> {
        self.ensure_open()?;
        let key = hash_handle(handle);
        let now = Utc::now();
        let mut state = lock(&self.state)?;
        let lineage_revoked = match state.refresh_tokens.get(&key) {
            Some(token) => state.is_lineage_revoked(token.lineage_id),
            None => return Ok(RefreshConsumeOutcome::NotFound),
        };
        let Some(token) = state.refresh_tokens.get_mut(&key) else {
            return Ok(RefreshConsumeOutcome::NotFound);
        };
        if token.revoked || lineage_revoked {
            return Ok(RefreshConsumeOutcome::Revoked);
        }
        if token.consumed_at.is_some() {
            return Ok(RefreshConsumeOutcome::Stale(token.clone()));
        }
        if token.is_expired(now) {
            return Ok(RefreshConsumeOutcome::Expired);
        }
        token.consumed_at = Some(now);
        let consumed = token.clone();
        drop(state);
        self.undo.push(Undo::RefreshToken(key));
        Ok(RefreshConsumeOutcome::Consumed(consumed))
    }

    async fn update_refresh_token(&mut self, handle: &str, token: RefreshToken) -> Result<()> {
        self.ensure_open()?;
        self.pending
            .push(PendingWrite::UpdateRefreshToken(hash_handle(handle), token));
        Ok(())
    }

    async fn upsert_consent(&mut self, consent: Consent) -> Result<()> {
        self.ensure_open()?;
        self.pending.push(PendingWrite::UpsertConsent(consent));
        Ok(())
    }

    async fn remove_consent(&mut self, subject: &str, client_id: &str) -> Result<()> {
        self.ensure_open()?;
        self.pending.push(PendingWrite::RemoveConsent(
            subject.to_string(),
            client_id.to_string(),
        ));
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        self.ensure_open()?;
        let mut state = lock(&self.state)?;
        for write in std::mem::take(&mut self.pending) {
            match write {
                PendingWrite::Code(key, code) => {
                    state.codes.insert(key, code);
                }
                PendingWrite::RefreshToken(key, mut token) => {
                    if state.is_lineage_revoked(token.lineage_id) {
                        tracing::warn!(
                            lineage_id = %token.lineage_id,
                            generation = token.generation,
                            "refresh token committed into a revoked lineage"
                        );
                        token.revoked = true;
                    }
                    state.refresh_tokens.insert(key, token);
                }
                PendingWrite::UpdateRefreshToken(key, token) => {
                    // A lineage revoked by a concurrent request stays revoked
                    let lineage_revoked = state.is_lineage_revoked(token.lineage_id);
                    if let Some(existing) = state.refresh_tokens.get_mut(&key) {
                        let revoked = existing.revoked || lineage_revoked;
                        *existing = token;
                        existing.revoked |= revoked;
                    }
                }
                PendingWrite::UpsertConsent(consent) => {
                    state.consents.insert(
                        (consent.subject.clone(), consent.client_id.clone()),
                        consent,
                    );
                }
                PendingWrite::RemoveConsent(subject, client_id) => {
                    state.consents.remove(&(subject, client_id));
                }
            }
        }
        drop(state);
        self.undo.clear();
        self.completed = true;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        self.ensure_open()?;
        self.revert()
    }
}

impl Drop for MemoryUnitOfWork {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        if let Err(error) = self.revert() {
            tracing::error!(error = ?error, "failed to roll back dropped unit of work");
        }
    }
}
