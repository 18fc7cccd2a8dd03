//! What the services need from the cloud backend

use crate::firebase::error::{AuthError, StoreError};
use crate::firebase::identity::Identity;
use crate::firebase::observer::AuthStateHub;
use crate::firebase::path::{CollectionPath, DocumentPath};
use async_trait::async_trait;
use serde_json::{Map, Value};

/// A stored document: its key within the collection and its fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Map<String, Value>,
}

impl Document {
    pub fn new(id: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }
}

#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// Exchanges email and password for an identity and publishes it.
    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, AuthError>;

    /// Ends the session and publishes "no identity".
    async fn sign_out(&self) -> Result<(), AuthError>;

    fn auth_state(&self) -> &AuthStateHub;

    fn current_identity(&self) -> Option<Identity> {
        self.auth_state().current()
    }
}

#[async_trait]
pub trait DocumentBackend: Send + Sync {
    /// Creates or fully replaces the document.
    async fn set_document(
        &self,
        path: &DocumentPath,
        fields: &Map<String, Value>,
    ) -> Result<(), StoreError>;

    /// Overwrites only the given fields of an existing document.
    /// Fails with `StoreError::NotFound` if the document does not exist.
    async fn merge_document(
        &self,
        path: &DocumentPath,
        fields: &Map<String, Value>,
    ) -> Result<(), StoreError>;

    /// Removing a missing document is not an error.
    async fn delete_document(&self, path: &DocumentPath) -> Result<(), StoreError>;

    async fn list_documents(&self, path: &CollectionPath) -> Result<Vec<Document>, StoreError>;
}
