//! Key material provider holding the active signing-key set.
//!
//! Readers load an immutable snapshot through [`ArcSwap`]; rotation swaps the
//! whole snapshot so a request never observes a partially updated key set.

use std::path::Path;
use std::sync::Arc;

use arc_swap::ArcSwap;
use jsonwebtoken::{TokenData, Validation, decode, decode_header};
use serde::de::DeserializeOwned;

use crate::errors::KeyError;
use crate::keys::credentials::{Jwks, SigningAlgorithm, SigningCredentials};

/// Ordered set of signing credentials. The first entry per algorithm signs new tokens;
/// every entry is published for verification.
#[derive(Debug, Default)]
pub struct KeySet {
    entries: Vec<Arc<SigningCredentials>>,
}

impl KeySet {
    pub fn new(credentials: Vec<SigningCredentials>) -> Self {
        Self {
            entries: credentials.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Algorithms with at least one key, in first-seen order.
    pub fn algorithms(&self) -> Vec<SigningAlgorithm> {
        let mut algorithms = Vec::new();
        for entry in &self.entries {
            if !algorithms.contains(&entry.algorithm) {
                algorithms.push(entry.algorithm);
            }
        }
        algorithms
    }
}

pub struct KeyMaterialProvider {
    current: ArcSwap<KeySet>,
}

impl KeyMaterialProvider {
    pub fn new(key_set: KeySet) -> Self {
        Self {
            current: ArcSwap::from_pointee(key_set),
        }
    }

    /// Generate one fresh key per algorithm.
    pub fn generate(algorithms: &[SigningAlgorithm]) -> Result<Self, KeyError> {
        let credentials = algorithms
            .iter()
            .map(|algorithm| SigningCredentials::generate(*algorithm))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(KeySet::new(credentials)))
    }

    /// Current snapshot of the key set.
    pub fn snapshot(&self) -> Arc<KeySet> {
        self.current.load_full()
    }

    /// The first key registered for `algorithm`. Never falls back to another algorithm.
    pub fn select_signing_credentials(
        &self,
        algorithm: SigningAlgorithm,
    ) -> Result<Arc<SigningCredentials>, KeyError> {
        self.current
            .load()
            .entries
            .iter()
            .find(|entry| entry.algorithm == algorithm)
            .cloned()
            .ok_or_else(|| KeyError::NoUsableKey(algorithm.to_string()))
    }

    /// Select the first algorithm from `preferred` that has a key; empty preference
    /// means the default (first registered) algorithm.
    pub fn select_preferred(
        &self,
        preferred: &[SigningAlgorithm],
    ) -> Result<Arc<SigningCredentials>, KeyError> {
        let snapshot = self.current.load();
        if preferred.is_empty() {
            return snapshot
                .entries
                .first()
                .cloned()
                .ok_or_else(|| KeyError::NoUsableKey("default".to_string()));
        }
        preferred
            .iter()
            .find_map(|algorithm| {
                snapshot
                    .entries
                    .iter()
                    .find(|entry| entry.algorithm == *algorithm)
                    .cloned()
            })
            .ok_or_else(|| {
                let names: Vec<&str> = preferred.iter().map(|a| a.as_str()).collect();
                KeyError::NoUsableKey(names.join(","))
            })
    }

    /// Public keys of every registered entry, in key-set order.
    pub fn public_key_set(&self) -> Jwks {
        Jwks {
            keys: self
                .current
                .load()
                .entries
                .iter()
                .map(|entry| entry.to_jwk())
                .collect(),
        }
    }

    /// Algorithms that currently have a signing key.
    pub fn signing_algorithms(&self) -> Vec<SigningAlgorithm> {
        self.current.load().algorithms()
    }

    /// Atomically replace the whole key set.
    pub fn replace(&self, key_set: KeySet) {
        tracing::info!(keys = key_set.len(), "signing key set replaced");
        self.current.store(Arc::new(key_set));
    }

    /// Put a new key at the front so it becomes current for its algorithm.
    /// Older keys of the same algorithm stay published for verification.
    pub fn rotate_in(&self, credentials: SigningCredentials) {
        let kid = credentials.kid.clone();
        let credentials = Arc::new(credentials);
        self.current.rcu(|current| {
            let mut entries = Vec::with_capacity(current.entries.len() + 1);
            entries.push(credentials.clone());
            entries.extend(current.entries.iter().cloned());
            KeySet { entries }
        });
        tracing::info!(kid = %kid, "signing key rotated in");
    }

    /// Remove a key from signing and publication. Returns whether it was present.
    pub fn retire(&self, kid: &str) -> bool {
        let mut found = false;
        self.current.rcu(|current| {
            found = current.entries.iter().any(|entry| entry.kid == kid);
            KeySet {
                entries: current
                    .entries
                    .iter()
                    .filter(|entry| entry.kid != kid)
                    .cloned()
                    .collect(),
            }
        });
        if found {
            tracing::info!(kid = %kid, "signing key retired");
        }
        found
    }

    /// Verify a token signed by one of the published keys, selected by `kid`.
    pub fn verify<T: DeserializeOwned>(
        &self,
        token: &str,
        issuer: &str,
        audience: Option<&str>,
    ) -> Result<TokenData<T>, KeyError> {
        let header = decode_header(token).map_err(|e| KeyError::VerificationFailed(e.to_string()))?;
        let kid = header
            .kid
            .ok_or_else(|| KeyError::VerificationFailed("missing kid".to_string()))?;
        let snapshot = self.current.load();
        let credentials = snapshot
            .entries
            .iter()
            .find(|entry| entry.kid == kid)
            .ok_or_else(|| KeyError::VerificationFailed(format!("unknown kid {}", kid)))?;

        let mut validation = Validation::new(credentials.algorithm.to_jwt_algorithm());
        validation.set_issuer(&[issuer]);
        match audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }
        decode::<T>(token, credentials.decoding_key(), &validation)
            .map_err(|e| KeyError::VerificationFailed(e.to_string()))
    }
}

/// Load `<kid>.<alg>.pem` PKCS#8 private keys from a directory in lexical file order.
pub async fn load_key_directory(path: &Path) -> Result<KeySet, KeyError> {
    let mut entries = tokio::fs::read_dir(path)
        .await
        .map_err(|e| KeyError::InvalidKey(format!("{}: {}", path.display(), e)))?;

    let mut files = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| KeyError::InvalidKey(e.to_string()))?
    {
        let file_name = entry.file_name().to_string_lossy().to_string();
        if file_name.ends_with(".pem") {
            files.push((file_name, entry.path()));
        }
    }
    files.sort_by(|left, right| left.0.cmp(&right.0));

    let mut credentials = Vec::with_capacity(files.len());
    for (file_name, file_path) in files {
        let mut parts = file_name.trim_end_matches(".pem").rsplitn(2, '.');
        let (Some(algorithm), Some(kid)) = (parts.next(), parts.next()) else {
            tracing::warn!(file = %file_name, "skipping key file without <kid>.<alg>.pem name");
            continue;
        };
        let algorithm: SigningAlgorithm = algorithm.parse()?;
        let pem = tokio::fs::read_to_string(&file_path)
            .await
            .map_err(|e| KeyError::InvalidKey(format!("{}: {}", file_name, e)))?;
        credentials.push(SigningCredentials::from_pem(kid, algorithm, &pem)?);
    }

    if credentials.is_empty() {
        return Err(KeyError::NoUsableKey(format!(
            "no keys found in {}",
            path.display()
        )));
    }
    Ok(KeySet::new(credentials))
}
