//! Firebase-backed sessions and per-user record storage

pub mod backend;
pub mod client;
pub mod config;
pub mod error;
pub mod identity;
pub mod memory;
pub mod observer;
pub mod path;
pub mod record;
pub mod session;
pub mod store;
pub mod value;

pub use backend::{AuthBackend, Document, DocumentBackend};
pub use client::FirebaseClient;
pub use config::FirebaseConfig;
pub use error::{AuthError, ConfigError, StoreError};
pub use identity::Identity;
pub use memory::MemoryBackend;
pub use observer::{AuthStateHub, Subscription};
pub use path::{CollectionPath, DocumentPath};
pub use record::{LocalMeta, Record, RecordId};
pub use session::{FailureKind, LoginFailure, SessionManager};
pub use store::ScopedStore;
