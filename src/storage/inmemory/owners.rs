//! In-memory resource-owner directory backing the session and profile collaborators.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::errors::StorageError;
use crate::oauth::types::ResourceOwner;
use crate::storage::traits::*;

/// A known resource owner and their profile claims
#[derive(Debug, Clone)]
pub struct MemoryUser {
    pub subject: String,
    pub active: bool,
    pub last_auth_time: DateTime<Utc>,
    pub idp: Option<String>,
    pub amr: Vec<String>,
    pub claims: Map<String, Value>,
}

impl MemoryUser {
    pub fn new(subject: impl Into<String>, claims: Map<String, Value>) -> Self {
        Self {
            subject: subject.into(),
            active: true,
            last_auth_time: Utc::now(),
            idp: None,
            amr: vec!["pwd".to_string()],
            claims,
        }
    }
}

/// Clones share the same directory
#[derive(Clone, Default)]
pub struct MemoryResourceOwners {
    users: Arc<Mutex<HashMap<String, MemoryUser>>>,
}

impl MemoryResourceOwners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store_user(&self, user: MemoryUser) -> Result<()> {
        self.users
            .lock()
            .map_err(|e| StorageError::LockFailed(format!("Lock error: {}", e)))?
            .insert(user.subject.clone(), user);
        Ok(())
    }

    pub fn set_active(&self, subject: &str, active: bool) -> Result<()> {
        let mut users = self
            .users
            .lock()
            .map_err(|e| StorageError::LockFailed(format!("Lock error: {}", e)))?;
        if let Some(user) = users.get_mut(subject) {
            user.active = active;
        }
        Ok(())
    }

    fn active_user(&self, subject: &str) -> Result<Option<MemoryUser>> {
        let users = self
            .users
            .lock()
            .map_err(|e| StorageError::LockFailed(format!("Lock error: {}", e)))?;
        Ok(users.get(subject).filter(|user| user.active).cloned())
    }
}

#[async_trait]
impl ResourceOwnerProvider for MemoryResourceOwners {
    async fn essential_claims(
        &self,
        subject: &str,
        session_id: Option<&str>,
    ) -> Result<Option<ResourceOwner>> {
        Ok(self.active_user(subject)?.map(|user| ResourceOwner {
            subject: user.subject,
            session_id: session_id.map(str::to_string),
            auth_time: user.last_auth_time,
            idp: user.idp,
            amr: user.amr,
        }))
    }

    async fn is_active(&self, subject: &str) -> Result<bool> {
        Ok(self.active_user(subject)?.is_some())
    }
}

#[async_trait]
impl UserProfileProvider for MemoryResourceOwners {
    async fn profile_claims(
        &self,
        owner: &ResourceOwner,
        claim_types: &[String],
    ) -> Result<ProfileClaims> {
        let Some(user) = self.active_user(&owner.subject)? else {
            return Ok(ProfileClaims::Inactive);
        };
        let claims = user
            .claims
            .into_iter()
            .filter(|(name, _)| claim_types.iter().any(|claim| claim == name))
            .collect();
        Ok(ProfileClaims::Active(claims))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn directory() -> MemoryResourceOwners {
        let owners = MemoryResourceOwners::new();
        let claims = json!({"name": "Alice", "email": "alice@example.com"})
            .as_object()
            .cloned()
            .unwrap();
        owners.store_user(MemoryUser::new("alice", claims)).unwrap();
        owners
    }

    #[tokio::test]
    async fn test_profile_claims_filtered() {
        let owners = directory();
        let owner = ResourceOwner::new("alice", Utc::now());

        let claims = owners
            .profile_claims(&owner, &["name".to_string()])
            .await
            .unwrap();
        let ProfileClaims::Active(claims) = claims else {
            panic!("expected active profile");
        };
        assert_eq!(claims.get("name"), Some(&json!("Alice")));
        assert!(claims.get("email").is_none());
    }

    #[tokio::test]
    async fn test_inactive_subject() {
        let owners = directory();
        owners.set_active("alice", false).unwrap();
        let owner = ResourceOwner::new("alice", Utc::now());

        assert!(!owners.is_active("alice").await.unwrap());
        assert!(owners.essential_claims("alice", None).await.unwrap().is_none());
        assert_eq!(
            owners.profile_claims(&owner, &[]).await.unwrap(),
            ProfileClaims::Inactive
        );
        assert!(!owners.is_active("bob").await.unwrap());
    }
}
