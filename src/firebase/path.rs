//! Per-user storage paths
//! Structure: users/{uid}/{collection}/{record_id}

use crate::firebase::error::StoreError;
use crate::firebase::record::RecordId;
use std::fmt;

pub const USERS_ROOT: &str = "users";

fn validate_segment(kind: &str, segment: &str) -> Result<(), StoreError> {
    if segment.is_empty() {
        return Err(StoreError::InvalidPath(format!("{} cannot be empty", kind)));
    }
    if segment.contains('/') {
        return Err(StoreError::InvalidPath(format!(
            "{} `{}` cannot contain '/'",
            kind, segment
        )));
    }
    if segment == "." || segment == ".." {
        return Err(StoreError::InvalidPath(format!(
            "{} `{}` is reserved",
            kind, segment
        )));
    }
    Ok(())
}

/// `users/<uid>/<collection>`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionPath {
    uid: String,
    collection: String,
}

impl CollectionPath {
    pub fn new(uid: &str, collection: &str) -> Result<Self, StoreError> {
        validate_segment("uid", uid)?;
        validate_segment("collection name", collection)?;
        Ok(Self {
            uid: uid.to_string(),
            collection: collection.to_string(),
        })
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn document(&self, id: RecordId) -> DocumentPath {
        DocumentPath {
            parent: self.clone(),
            id: id.to_string(),
        }
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", USERS_ROOT, self.uid, self.collection)
    }
}

/// `users/<uid>/<collection>/<id>`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentPath {
    parent: CollectionPath,
    id: String,
}

impl DocumentPath {
    pub fn parent(&self) -> &CollectionPath {
        &self.parent
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.parent, self.id)
    }
}
