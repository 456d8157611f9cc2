pub mod snapshot;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::storage::KvStore;

pub const DEFAULT_KEY: &str = "chatMemory";

// --- Turn ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn model(content: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            content: content.into(),
        }
    }
}

// --- Observability ---

/// A storage failure the store recovered from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageEvent {
    LoadFailed { error: String },
    PersistFailed { error: String },
    ClearFailed { error: String },
}

pub trait StorageObserver: Send + Sync {
    fn on_event(&self, event: &StorageEvent);
}

impl<F> StorageObserver for F
where
    F: Fn(&StorageEvent) + Send + Sync,
{
    fn on_event(&self, event: &StorageEvent) {
        self(event)
    }
}

// --- Store ---

/// Owns the transcript for the process lifetime and mirrors it to a
/// [`KvStore`]. The in-memory copy is authoritative: storage failures are
/// logged and reported to the observer, never returned.
pub struct MemoryStore {
    turns: Vec<Turn>,
    storage: Arc<dyn KvStore>,
    key: String,
    observer: Option<Arc<dyn StorageObserver>>,
}

impl MemoryStore {
    pub fn load(storage: Arc<dyn KvStore>, key: impl Into<String>) -> Self {
        Self::load_with_observer(storage, key, None)
    }

    pub fn load_with_observer(
        storage: Arc<dyn KvStore>,
        key: impl Into<String>,
        observer: Option<Arc<dyn StorageObserver>>,
    ) -> Self {
        let mut store = Self {
            turns: Vec::new(),
            storage,
            key: key.into(),
            observer,
        };

        let raw = match store.storage.get(&store.key) {
            Ok(raw) => raw,
            Err(e) => {
                store.report(StorageEvent::LoadFailed {
                    error: format!("{e:#}"),
                });
                return store;
            }
        };

        match raw.as_deref().map(snapshot::decode) {
            None => {}
            Some(Ok(turns)) => {
                tracing::debug!("Restored {} turns from '{}'", turns.len(), store.key);
                store.turns = turns;
            }
            Some(Err(e)) => store.report(StorageEvent::LoadFailed {
                error: format!("{e:#}"),
            }),
        }
        store
    }

    /// Commit one exchange: the user's turn followed by the model's reply.
    pub fn append(&mut self, user_turn: Turn, model_turn: Turn) {
        self.turns.push(user_turn);
        self.turns.push(model_turn);
        self.persist();
    }

    pub fn clear(&mut self) {
        self.turns.clear();
        if let Err(e) = self.storage.remove(&self.key) {
            self.report(StorageEvent::ClearFailed {
                error: format!("{e:#}"),
            });
        }
    }

    pub fn snapshot(&self) -> Vec<Turn> {
        self.turns.clone()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    fn persist(&self) {
        let result = snapshot::encode(&self.turns)
            .and_then(|json| self.storage.set(&self.key, &json));
        if let Err(e) = result {
            self.report(StorageEvent::PersistFailed {
                error: format!("{e:#}"),
            });
        }
    }

    fn report(&self, event: StorageEvent) {
        match &event {
            StorageEvent::LoadFailed { error } => {
                tracing::warn!("Failed to read chat memory from storage: {error}")
            }
            StorageEvent::PersistFailed { error } => {
                tracing::warn!("Failed to persist chat memory to storage: {error}")
            }
            StorageEvent::ClearFailed { error } => {
                tracing::warn!("Failed to clear chat memory from storage: {error}")
            }
        }
        if let Some(observer) = &self.observer {
            observer.on_event(&event);
        }
    }
}
