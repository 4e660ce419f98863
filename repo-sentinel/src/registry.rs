//! In-memory registry of monitored repositories and their polling state.

use crate::discovery::{Discovery, DiscoveryError};
use crate::repository::{MonitoredRepository, RepoKey};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use tracing::debug;

/// Errors returned by registry lookups.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// No repository with this key is registered.
    #[error("Repository {key} is not registered")]
    NotFound { key: RepoKey },
}

/// Outcome of a registry refresh.
#[derive(Debug, Default)]
pub struct RefreshReport {
    /// Number of repositories now registered.
    pub discovered: usize,

    /// Checkouts skipped during discovery.
    pub errors: Vec<DiscoveryError>,
}

#[derive(Debug, Default)]
struct RegistryState {
    order: Vec<RepoKey>,
    repositories: HashMap<RepoKey, MonitoredRepository>,
}

/// Repositories known from the latest discovery pass.
///
/// Safe to share between concurrent pollers.
#[derive(Debug, Default)]
pub struct RepoRegistry {
    state: RwLock<RegistryState>,
}

impl RepoRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the outcome of a discovery pass, replacing the current set.
    ///
    /// See [`Self::replace`] for how `preserve_tokens` is applied.
    pub fn apply(&self, discovery: Discovery, preserve_tokens: bool) -> RefreshReport {
        let discovered = self.replace(discovery.repositories, preserve_tokens);
        RefreshReport {
            discovered,
            errors: discovery.errors,
        }
    }

    /// Replaces every registered repository with `repositories`.
    ///
    /// Entries absent from `repositories` are dropped. When `preserve_tokens`
    /// is set, the cache token and last-seen event of a repository that keeps
    /// its key are carried over; otherwise every entry starts fresh.
    ///
    /// Returns the number of registered repositories.
    pub fn replace(&self, repositories: Vec<MonitoredRepository>, preserve_tokens: bool) -> usize {
        let mut state = self.write();
        let mut previous = std::mem::take(&mut state.repositories);
        state.order.clear();

        for mut repository in repositories {
            if state.repositories.contains_key(&repository.key) {
                continue;
            }

            if preserve_tokens {
                if let Some(old) = previous.remove(&repository.key) {
                    repository.cache_token = old.cache_token;
                    repository.last_seen_event = old.last_seen_event;
                }
            }

            state.order.push(repository.key.clone());
            state
                .repositories
                .insert(repository.key.clone(), repository);
        }

        debug!(count = state.order.len(), preserve_tokens, "Registry replaced");
        state.order.len()
    }

    /// Returns a snapshot of the repository registered under `key`.
    pub fn get(&self, key: &RepoKey) -> Result<MonitoredRepository, RegistryError> {
        self.read()
            .repositories
            .get(key)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound { key: key.clone() })
    }

    /// Overwrites the stored cache token for `key`.
    pub fn update_token(&self, key: &RepoKey, token: impl Into<String>) -> Result<(), RegistryError> {
        let mut state = self.write();
        let repository = state
            .repositories
            .get_mut(key)
            .ok_or_else(|| RegistryError::NotFound { key: key.clone() })?;
        repository.cache_token = token.into();
        Ok(())
    }

    /// Records the id of the event that last triggered an update for `key`.
    pub fn mark_seen(&self, key: &RepoKey, event_id: impl Into<String>) -> Result<(), RegistryError> {
        let mut state = self.write();
        let repository = state
            .repositories
            .get_mut(key)
            .ok_or_else(|| RegistryError::NotFound { key: key.clone() })?;
        repository.last_seen_event = Some(event_id.into());
        Ok(())
    }

    /// Registered keys in discovery order.
    pub fn keys(&self) -> Vec<RepoKey> {
        self.read().order.clone()
    }

    /// Number of registered repositories.
    pub fn len(&self) -> usize {
        self.read().order.len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.read().order.is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}
