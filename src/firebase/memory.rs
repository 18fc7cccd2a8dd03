//! In-process backend with Firebase semantics, for tests and offline runs

use crate::firebase::backend::{AuthBackend, Document, DocumentBackend};
use crate::firebase::error::{AuthError, StoreError};
use crate::firebase::identity::Identity;
use crate::firebase::observer::AuthStateHub;
use crate::firebase::path::{CollectionPath, DocumentPath};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

pub const DEFAULT_MAX_FAILED_ATTEMPTS: u32 = 5;

struct Account {
    uid: String,
    password: String,
}

struct MemoryState {
    accounts: HashMap<String, Account>,
    documents: BTreeMap<String, Map<String, Value>>,
    failure: Option<String>,
    failed_attempts: u32,
    max_failed_attempts: u32,
}

pub struct MemoryBackend {
    hub: AuthStateHub,
    state: Mutex<MemoryState>,
    document_calls: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            hub: AuthStateHub::new(),
            state: Mutex::new(MemoryState {
                accounts: HashMap::new(),
                documents: BTreeMap::new(),
                failure: None,
                failed_attempts: 0,
                max_failed_attempts: DEFAULT_MAX_FAILED_ATTEMPTS,
            }),
            document_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_account(
        self,
        email: impl Into<String>,
        password: impl Into<String>,
        uid: impl Into<String>,
    ) -> Self {
        self.lock().accounts.insert(
            email.into(),
            Account {
                uid: uid.into(),
                password: password.into(),
            },
        );
        self
    }

    pub fn with_max_failed_attempts(self, max: u32) -> Self {
        self.lock().max_failed_attempts = max;
        self
    }

    /// Makes every document call fail with `message` until cleared.
    pub fn set_failure(&self, message: Option<&str>) {
        self.lock().failure = message.map(str::to_string);
    }

    /// Simulates the backend ending the session on its own (e.g. a revoked
    /// refresh token).
    pub fn expire_session(&self) {
        info!("Memory backend session expired");
        self.hub.publish(None);
    }

    /// Simulates app start with a persisted session.
    pub fn restore_session(&self, identity: Identity) {
        self.hub.publish(Some(identity));
    }

    /// Number of document calls that reached the backend.
    pub fn document_calls(&self) -> usize {
        self.document_calls.load(Ordering::SeqCst)
    }

    /// Raw stored fields at `path` (e.g. `users/u1/expenses/100`).
    pub fn document(&self, path: &str) -> Option<Map<String, Value>> {
        self.lock().documents.get(path).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Counts the call, then applies injected failures and the
    /// `users/{uid}` ownership rule.
    fn admit(&self, path: &CollectionPath) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        self.document_calls.fetch_add(1, Ordering::SeqCst);
        let owner = self.hub.current().map(|identity| identity.uid);
        let state = self.lock();
        if let Some(message) = &state.failure {
            return Err(StoreError::Backend {
                status: 503,
                message: message.clone(),
            });
        }
        if owner.as_deref() != Some(path.uid()) {
            return Err(StoreError::Backend {
                status: 403,
                message: "PERMISSION_DENIED".to_string(),
            });
        }
        Ok(state)
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn rejected(code: &str) -> AuthError {
    AuthError::Rejected {
        code: code.to_string(),
    }
}

#[async_trait]
impl AuthBackend for MemoryBackend {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        let identity = {
            let mut state = self.lock();
            if state.failed_attempts >= state.max_failed_attempts {
                return Err(rejected("TOO_MANY_ATTEMPTS_TRY_LATER"));
            }
            if !email.contains('@') {
                return Err(rejected("INVALID_EMAIL"));
            }
            if password.is_empty() {
                return Err(rejected("MISSING_PASSWORD"));
            }
            let uid = match state.accounts.get(email) {
                Some(account) if account.password == password => account.uid.clone(),
                _ => {
                    state.failed_attempts += 1;
                    return Err(rejected("INVALID_LOGIN_CREDENTIALS"));
                }
            };
            state.failed_attempts = 0;
            Identity::new(uid, email)
        };

        self.hub.publish(Some(identity.clone()));
        Ok(identity)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.hub.publish(None);
        Ok(())
    }

    fn auth_state(&self) -> &AuthStateHub {
        &self.hub
    }
}

#[async_trait]
impl DocumentBackend for MemoryBackend {
    async fn set_document(
        &self,
        path: &DocumentPath,
        fields: &Map<String, Value>,
    ) -> Result<(), StoreError> {
        let mut state = self.admit(path.parent())?;
        state.documents.insert(path.to_string(), fields.clone());
        debug!("memory set {}", path);
        Ok(())
    }

    async fn merge_document(
        &self,
        path: &DocumentPath,
        fields: &Map<String, Value>,
    ) -> Result<(), StoreError> {
        let mut state = self.admit(path.parent())?;
        let existing = state
            .documents
            .get_mut(&path.to_string())
            .ok_or_else(|| StoreError::NotFound(path.to_string()))?;
        for (key, value) in fields {
            existing.insert(key.clone(), value.clone());
        }
        debug!("memory merge {}", path);
        Ok(())
    }

    async fn delete_document(&self, path: &DocumentPath) -> Result<(), StoreError> {
        let mut state = self.admit(path.parent())?;
        state.documents.remove(&path.to_string());
        debug!("memory delete {}", path);
        Ok(())
    }

    async fn list_documents(&self, path: &CollectionPath) -> Result<Vec<Document>, StoreError> {
        let state = self.admit(path)?;
        let prefix = format!("{}/", path);
        let documents = state
            .documents
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter_map(|(key, fields)| {
                let id = &key[prefix.len()..];
                (!id.contains('/')).then(|| Document::new(id, fields.clone()))
            })
            .collect();
        Ok(documents)
    }
}
