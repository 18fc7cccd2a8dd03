//! Authentication and per-user data access for P&L Manager

pub mod firebase;

pub use firebase::{
    AuthBackend, AuthError, DocumentBackend, FirebaseClient, FirebaseConfig, Identity,
    MemoryBackend, Record, RecordId, ScopedStore, SessionManager, StoreError,
};
