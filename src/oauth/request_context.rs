//! Per-request unit of work.
//!
//! A [`RequestContext`] owns the optional transactional resource for one request.
//! Every storage side effect goes through it so cancellation is checked first, and
//! exactly one of commit or rollback runs. Dropping an open context rolls back.

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::errors::OAuthError;
use crate::oauth::types::{AuthorizationCode, Consent, RefreshToken};
use crate::storage::{CodeConsumeOutcome, RefreshConsumeOutcome, Transactional, UnitOfWork};

pub struct RequestContext {
    request_id: Uuid,
    issuer: String,
    cancellation: CancellationToken,
    unit_of_work: Option<Box<dyn UnitOfWork>>,
}

impl RequestContext {
    /// Open a context with a fresh unit of work.
    pub async fn begin(
        storage: &dyn Transactional,
        issuer: &str,
        cancellation: CancellationToken,
    ) -> Result<Self, OAuthError> {
        let mut context = Self::read_only(issuer, cancellation);
        context.checkpoint()?;
        context.unit_of_work = Some(storage.begin().await?);
        tracing::debug!(request_id = %context.request_id, "request context opened");
        Ok(context)
    }

    /// A context without a transactional resource, for read-side endpoints.
    pub fn read_only(issuer: &str, cancellation: CancellationToken) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            issuer: issuer.to_string(),
            cancellation,
            unit_of_work: None,
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Fail if the caller cancelled the request.
    pub fn checkpoint(&self) -> Result<(), OAuthError> {
        if self.cancellation.is_cancelled() {
            tracing::debug!(request_id = %self.request_id, "request cancelled");
            return Err(OAuthError::ServerError("request cancelled".to_string()));
        }
        Ok(())
    }

    fn unit_of_work(&mut self) -> Result<&mut Box<dyn UnitOfWork>, OAuthError> {
        self.checkpoint()?;
        self.unit_of_work.as_mut().ok_or_else(|| {
            tracing::error!("storage write attempted on a read-only request context");
            OAuthError::ServerError("no unit of work".to_string())
        })
    }

    pub async fn create_code(&mut self, code: AuthorizationCode) -> Result<String, OAuthError> {
        Ok(self.unit_of_work()?.create_code(code).await?)
    }

    pub async fn consume_code(&mut self, handle: &str) -> Result<CodeConsumeOutcome, OAuthError> {
        Ok(self.unit_of_work()?.consume_code(handle).await?)
    }

    pub async fn create_refresh_token(&mut self, token: RefreshToken) -> Result<String, OAuthError> {
        Ok(self.unit_of_work()?.create_refresh_token(token).await?)
    }

    pub async fn consume_refresh_token(
        &mut self,
        handle: &str,
    ) -> Result<RefreshConsumeOutcome, OAuthError> {
        Ok(self.unit_of_work()?.consume_refresh_token(handle).await?)
    }

    pub async fn update_refresh_token(
        &mut self,
        handle: &str,
        token: RefreshToken,
    ) -> Result<(), OAuthError> {
        Ok(self
            .unit_of_work()?
            .update_refresh_token(handle, token)
            .await?)
    }

    pub async fn upsert_consent(&mut self, consent: Consent) -> Result<(), OAuthError> {
        Ok(self.unit_of_work()?.upsert_consent(consent).await?)
    }

    pub async fn remove_consent(&mut self, subject: &str, client_id: &str) -> Result<(), OAuthError> {
        Ok(self
            .unit_of_work()?
            .remove_consent(subject, client_id)
            .await?)
    }

    /// Commit the unit of work. A cancelled request rolls back instead.
    pub async fn commit(mut self) -> Result<(), OAuthError> {
        let Some(unit_of_work) = self.unit_of_work.take() else {
            return Ok(());
        };
        if let Err(error) = self.checkpoint() {
            unit_of_work.rollback().await?;
            return Err(error);
        }
        unit_of_work.commit().await?;
        tracing::debug!(request_id = %self.request_id, "request context committed");
        Ok(())
    }

    pub async fn rollback(mut self) -> Result<(), OAuthError> {
        if let Some(unit_of_work) = self.unit_of_work.take() {
            unit_of_work.rollback().await?;
            tracing::debug!(request_id = %self.request_id, "request context rolled back");
        }
        Ok(())
    }
}

impl Drop for RequestContext {
    fn drop(&mut self) {
        if self.unit_of_work.take().is_some() {
            // The unit of work reverts itself when dropped
            tracing::warn!(request_id = %self.request_id, "request context dropped while open; rolled back");
        }
    }
}
