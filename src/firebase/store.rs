//! Per-user scoped record storage
//! Structure: users/{uid}/{collection}/{record_id}

use crate::firebase::backend::{AuthBackend, DocumentBackend};
use crate::firebase::error::StoreError;
use crate::firebase::path::CollectionPath;
use crate::firebase::record::{to_object, Record, RecordId, LOCAL_SYNC_FIELD};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

pub struct ScopedStore {
    auth: Arc<dyn AuthBackend>,
    docs: Arc<dyn DocumentBackend>,
    last_path: Mutex<Option<String>>,
}

impl ScopedStore {
    pub fn new(auth: Arc<dyn AuthBackend>, docs: Arc<dyn DocumentBackend>) -> Self {
        Self {
            auth,
            docs,
            last_path: Mutex::new(None),
        }
    }

    /// Derives `users/<uid>/<collection>` from the active session.
    /// Fails before any backend call when nobody is signed in.
    fn collection_path(&self, collection: &str) -> Result<CollectionPath, StoreError> {
        let identity = self
            .auth
            .current_identity()
            .ok_or(StoreError::AccessDenied)?;
        let path = CollectionPath::new(&identity.uid, collection)?;

        debug!("Using collection path {}", path);
        *self.last_path.lock().unwrap_or_else(PoisonError::into_inner) = Some(path.to_string());
        Ok(path)
    }

    /// Last collection path derived, kept for diagnostics.
    pub fn last_path(&self) -> Option<String> {
        self.last_path
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Writes the record under its own id, replacing any existing document.
    pub async fn add<T: Serialize + Sync>(
        &self,
        collection: &str,
        record: &Record<T>,
    ) -> Result<(), StoreError> {
        let path = self.collection_path(collection)?.document(record.id);
        let fields = record.persisted_fields()?;

        self.docs.set_document(&path, &fields).await?;
        info!("Added record {}", path);
        Ok(())
    }

    /// Merges the fields of `patch` into an existing record. The local sync
    /// flag is never sent.
    pub async fn update<P: Serialize + Sync>(
        &self,
        collection: &str,
        id: RecordId,
        patch: &P,
    ) -> Result<(), StoreError> {
        let path = self.collection_path(collection)?.document(id);
        let mut fields = to_object(patch).map_err(|kind| {
            StoreError::InvalidRecord(format!(
                "update for record {} must be an object, got {}",
                id, kind
            ))
        })?;
        fields.remove(LOCAL_SYNC_FIELD);

        self.docs.merge_document(&path, &fields).await?;
        info!("Updated record {} ({} fields)", path, fields.len());
        Ok(())
    }

    pub async fn delete(&self, collection: &str, id: RecordId) -> Result<(), StoreError> {
        let path = self.collection_path(collection)?.document(id);

        self.docs.delete_document(&path).await?;
        info!("Deleted record {}", path);
        Ok(())
    }

    /// Every record in the collection, or an empty list if the backend
    /// fails. Only a missing session or an invalid collection name is
    /// reported as an error; use [`ScopedStore::try_get_all`] to see backend
    /// faults.
    pub async fn get_all<T: DeserializeOwned>(
        &self,
        collection: &str,
    ) -> Result<Vec<Record<T>>, StoreError> {
        let path = self.collection_path(collection)?;
        match self.list_records(&path).await {
            Ok(records) => Ok(records),
            Err(e) => {
                warn!("Failed to list {}: {}", path, e);
                Ok(Vec::new())
            }
        }
    }

    pub async fn try_get_all<T: DeserializeOwned>(
        &self,
        collection: &str,
    ) -> Result<Vec<Record<T>>, StoreError> {
        let path = self.collection_path(collection)?;
        self.list_records(&path).await
    }

    async fn list_records<T: DeserializeOwned>(
        &self,
        path: &CollectionPath,
    ) -> Result<Vec<Record<T>>, StoreError> {
        let documents = self.docs.list_documents(path).await?;

        let mut records = Vec::with_capacity(documents.len());
        for doc in documents {
            let doc_id = doc.id.clone();
            match Record::from_document(doc) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!("Skipping document {}/{}: {}", path, doc_id, e);
                }
            }
        }

        debug!("Listed {} records from {}", records.len(), path);
        Ok(records)
    }
}
