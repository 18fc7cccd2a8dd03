//! Firebase REST client: Identity Toolkit sign-in, Secure Token refresh and
//! Cloud Firestore documents, over hyper with rustls.

use crate::firebase::backend::{AuthBackend, Document, DocumentBackend};
use crate::firebase::config::FirebaseConfig;
use crate::firebase::error::{AuthError, StoreError};
use crate::firebase::identity::Identity;
use crate::firebase::observer::AuthStateHub;
use crate::firebase::path::{CollectionPath, DocumentPath, USERS_ROOT};
use crate::firebase::value::{decode_fields, encode_fields, field_path};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{header, Method, Request, StatusCode};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::path::Path;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub type HttpClient = Client<HttpsConnector<HttpConnector>, Full<Bytes>>;

/// Refresh the id token when it has less than this left.
const REFRESH_MARGIN_SECS: i64 = 60;
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;
/// Upper bound on a server-reported token lifetime (one week)
const MAX_TOKEN_LIFETIME_SECS: i64 = 7 * 24 * 3600;
const LIST_PAGE_SIZE: usize = 300;

/// Refresh failures that mean the session is over.
const SESSION_ENDING_CODES: &[&str] = &[
    "TOKEN_EXPIRED",
    "USER_DISABLED",
    "USER_NOT_FOUND",
    "INVALID_REFRESH_TOKEN",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Credentials {
    identity: Identity,
    id_token: String,
    refresh_token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInResponse {
    local_id: String,
    #[serde(default)]
    email: String,
    id_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<String>,
}

#[derive(Deserialize)]
struct RefreshResponse {
    id_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<String>,
    user_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    documents: Vec<RawDocument>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct RawDocument {
    name: String,
    #[serde(default)]
    fields: Map<String, Value>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

/// Error code at the front of a message like
/// `TOO_MANY_ATTEMPTS_TRY_LATER : Access to this account has been disabled`.
fn error_code(message: &str) -> &str {
    message.split(" : ").next().unwrap_or(message).trim()
}

fn error_message(body: &[u8]) -> Option<String> {
    serde_json::from_slice::<ErrorEnvelope>(body)
        .ok()
        .map(|envelope| envelope.error.message)
        .filter(|message| !message.is_empty())
}

fn auth_error(status: StatusCode, body: &[u8]) -> AuthError {
    match error_message(body) {
        Some(message) => AuthError::Rejected {
            code: error_code(&message).to_string(),
        },
        None => AuthError::Http {
            status: status.as_u16(),
            message: String::from_utf8_lossy(body).into_owned(),
        },
    }
}

fn store_error(status: StatusCode, body: &[u8], path: &str) -> StoreError {
    if status == StatusCode::NOT_FOUND {
        return StoreError::NotFound(path.to_string());
    }
    StoreError::Backend {
        status: status.as_u16(),
        message: error_message(body).unwrap_or_else(|| String::from_utf8_lossy(body).into_owned()),
    }
}

fn expiry(expires_in: Option<&str>) -> DateTime<Utc> {
    let secs = expires_in
        .and_then(|s| s.parse::<i64>().ok())
        .unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS)
        .clamp(0, MAX_TOKEN_LIFETIME_SECS);
    let now = Utc::now();
    Duration::try_seconds(secs)
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .unwrap_or(now)
}

/// Last segment of a document resource name
/// (`projects/p/databases/(default)/documents/users/u1/expenses/100` -> `100`).
fn document_id(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

fn encoded_collection(path: &CollectionPath) -> String {
    format!(
        "{}/{}/{}",
        USERS_ROOT,
        urlencoding::encode(path.uid()),
        urlencoding::encode(path.collection())
    )
}

fn encoded_document(path: &DocumentPath) -> String {
    format!(
        "{}/{}",
        encoded_collection(path.parent()),
        urlencoding::encode(path.id())
    )
}

fn build_connector() -> HttpsConnector<HttpConnector> {
    let _ = rustls::crypto::ring::default_provider().install_default();

    let builder = match HttpsConnectorBuilder::new().with_native_roots() {
        Ok(builder) => builder,
        Err(e) => {
            warn!(
                "No native TLS roots available ({}); only plain HTTP endpoints will work",
                e
            );
            let tls = rustls::ClientConfig::builder()
                .with_root_certificates(rustls::RootCertStore::empty())
                .with_no_client_auth();
            HttpsConnectorBuilder::new().with_tls_config(tls)
        }
    };

    builder.https_or_http().enable_http1().enable_http2().build()
}

pub struct FirebaseClient {
    config: FirebaseConfig,
    http: HttpClient,
    hub: AuthStateHub,
    /// Also serializes token refresh
    credentials: Mutex<Option<Credentials>>,
}

impl FirebaseClient {
    pub fn new(config: FirebaseConfig) -> Result<Self, AuthError> {
        config
            .validate()
            .map_err(|e| AuthError::Config(e.to_string()))?;

        let http = Client::builder(TokioExecutor::new()).build(build_connector());

        info!(
            "Firebase client initialized for project: {}",
            config.project_id
        );

        Ok(Self {
            config,
            http,
            hub: AuthStateHub::new(),
            credentials: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &FirebaseConfig {
        &self.config
    }

    /// Loads the persisted session, if any, refreshes it and publishes the
    /// restored identity.
    pub async fn restore(&self) -> Result<Option<Identity>, AuthError> {
        let Some(session_file) = self.config.session_file.as_deref() else {
            return Ok(None);
        };

        let text = match tokio::fs::read_to_string(session_file).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(AuthError::SessionFile(e)),
        };
        let stored: Credentials = serde_json::from_str(&text)?;

        let credentials = match self.refresh_credentials(&stored).await {
            Ok(fresh) => fresh,
            Err(AuthError::Rejected { code }) => {
                warn!("Persisted session rejected by backend: {}", code);
                remove_session_file(session_file).await?;
                return Ok(None);
            }
            Err(e) => {
                // Keep the stored token; the next request retries the refresh.
                warn!("Could not refresh persisted session: {}", e);
                stored
            }
        };

        let identity = credentials.identity.clone();
        self.install(credentials).await;
        info!("Restored session for {}", identity);
        Ok(Some(identity))
    }

    async fn install(&self, credentials: Credentials) {
        let identity = credentials.identity.clone();
        self.persist(&credentials).await;
        *self.credentials.lock().await = Some(credentials);
        self.hub.publish(Some(identity));
    }

    async fn persist(&self, credentials: &Credentials) {
        let Some(session_file) = self.config.session_file.as_deref() else {
            return;
        };
        if let Err(e) = write_session_file(session_file, credentials).await {
            warn!(
                "Failed to persist session to {}: {}",
                session_file.display(),
                e
            );
        }
    }

    async fn send(&self, request: Request<Full<Bytes>>) -> Result<(StatusCode, Bytes), String> {
        let response = self.http.request(request).await.map_err(|e| e.to_string())?;
        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| e.to_string())?
            .to_bytes();
        Ok((status, body))
    }

    async fn post_auth(
        &self,
        url: &str,
        content_type: &str,
        body: String,
    ) -> Result<Bytes, AuthError> {
        let request = Request::builder()
            .method(Method::POST)
            .uri(url)
            .header(header::CONTENT_TYPE, content_type)
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| AuthError::Config(format!("Invalid auth URL {}: {}", url, e)))?;

        let (status, bytes) = self.send(request).await.map_err(AuthError::Transport)?;
        if !status.is_success() {
            return Err(auth_error(status, &bytes));
        }
        Ok(bytes)
    }

    async fn refresh_credentials(&self, current: &Credentials) -> Result<Credentials, AuthError> {
        let url = format!(
            "{}/v1/token?key={}",
            self.config.token_url.trim_end_matches('/'),
            urlencoding::encode(&self.config.api_key)
        );
        let form = format!(
            "grant_type=refresh_token&refresh_token={}",
            urlencoding::encode(&current.refresh_token)
        );

        let bytes = self
            .post_auth(&url, "application/x-www-form-urlencoded", form)
            .await?;
        let response: RefreshResponse = serde_json::from_slice(&bytes)?;
        debug!("Refreshed id token for {}", response.user_id);

        Ok(Credentials {
            identity: Identity::new(response.user_id, current.identity.email.clone()),
            id_token: response.id_token,
            refresh_token: response.refresh_token,
            expires_at: expiry(response.expires_in.as_deref()),
        })
    }

    /// A usable id token, refreshing it first if it is about to expire.
    async fn id_token(&self) -> Result<String, StoreError> {
        let mut guard = self.credentials.lock().await;
        let current = (*guard).clone().ok_or(StoreError::AccessDenied)?;

        if current.expires_at - Utc::now() > Duration::seconds(REFRESH_MARGIN_SECS) {
            return Ok(current.id_token);
        }

        match self.refresh_credentials(&current).await {
            Ok(fresh) => {
                self.persist(&fresh).await;
                let token = fresh.id_token.clone();
                *guard = Some(fresh);
                Ok(token)
            }
            Err(AuthError::Rejected { code }) if SESSION_ENDING_CODES.contains(&code.as_str()) => {
                warn!("Session ended by backend: {}", code);
                *guard = None;
                drop(guard);
                if let Some(session_file) = self.config.session_file.as_deref() {
                    if let Err(e) = remove_session_file(session_file).await {
                        warn!("Failed to remove session file: {}", e);
                    }
                }
                self.hub.publish(None);
                Err(StoreError::AccessDenied)
            }
            Err(e) => Err(StoreError::Transport(format!("Token refresh failed: {}", e))),
        }
    }

    async fn firestore(
        &self,
        method: Method,
        url: String,
        body: Option<Value>,
        path: &str,
    ) -> Result<Bytes, StoreError> {
        let token = self.id_token().await?;

        let builder = Request::builder()
            .method(method)
            .uri(&url)
            .header(header::AUTHORIZATION, format!("Bearer {}", token));
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Full::new(Bytes::from(serde_json::to_vec(&body)?))),
            None => builder.body(Full::new(Bytes::new())),
        }
        .map_err(|e| StoreError::Transport(format!("Invalid Firestore URL {}: {}", url, e)))?;

        let (status, bytes) = self.send(request).await.map_err(StoreError::Transport)?;
        if !status.is_success() {
            return Err(store_error(status, &bytes, path));
        }
        Ok(bytes)
    }

    fn document_url(&self, path: &DocumentPath) -> String {
        format!("{}/{}", self.config.documents_root(), encoded_document(path))
    }
}

async fn write_session_file(path: &Path, credentials: &Credentials) -> Result<(), AuthError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_string_pretty(credentials)?;
    tokio::fs::write(path, json).await?;
    Ok(())
}

async fn remove_session_file(path: &Path) -> Result<(), AuthError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(AuthError::SessionFile(e)),
    }
}

#[async_trait]
impl AuthBackend for FirebaseClient {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        let url = format!(
            "{}/v1/accounts:signInWithPassword?key={}",
            self.config.auth_url.trim_end_matches('/'),
            urlencoding::encode(&self.config.api_key)
        );
        let body = json!({
            "email": email,
            "password": password,
            "returnSecureToken": true,
        });

        let bytes = self
            .post_auth(&url, "application/json", body.to_string())
            .await?;
        let response: SignInResponse = serde_json::from_slice(&bytes)?;

        let email = if response.email.is_empty() {
            email.to_string()
        } else {
            response.email
        };
        let credentials = Credentials {
            identity: Identity::new(response.local_id, email),
            id_token: response.id_token,
            refresh_token: response.refresh_token,
            expires_at: expiry(response.expires_in.as_deref()),
        };

        let identity = credentials.identity.clone();
        self.install(credentials).await;
        Ok(identity)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        *self.credentials.lock().await = None;
        let removed = match self.config.session_file.as_deref() {
            Some(session_file) => remove_session_file(session_file).await,
            None => Ok(()),
        };
        self.hub.publish(None);
        removed
    }

    fn auth_state(&self) -> &AuthStateHub {
        &self.hub
    }
}

#[async_trait]
impl DocumentBackend for FirebaseClient {
    async fn set_document(
        &self,
        path: &DocumentPath,
        fields: &Map<String, Value>,
    ) -> Result<(), StoreError> {
        let body = json!({ "fields": encode_fields(fields) });
        self.firestore(
            Method::PATCH,
            self.document_url(path),
            Some(body),
            &path.to_string(),
        )
        .await?;
        Ok(())
    }

    async fn merge_document(
        &self,
        path: &DocumentPath,
        fields: &Map<String, Value>,
    ) -> Result<(), StoreError> {
        if fields.is_empty() {
            // An empty mask would replace the whole document; only check existence.
            self.firestore(Method::GET, self.document_url(path), None, &path.to_string())
                .await?;
            return Ok(());
        }

        let mut url = format!("{}?", self.document_url(path));
        for key in fields.keys() {
            url.push_str("updateMask.fieldPaths=");
            url.push_str(&urlencoding::encode(&field_path(key)));
            url.push('&');
        }
        url.push_str("currentDocument.exists=true");

        let body = json!({ "fields": encode_fields(fields) });
        self.firestore(Method::PATCH, url, Some(body), &path.to_string())
            .await?;
        Ok(())
    }

    async fn delete_document(&self, path: &DocumentPath) -> Result<(), StoreError> {
        match self
            .firestore(Method::DELETE, self.document_url(path), None, &path.to_string())
            .await
        {
            Ok(_) | Err(StoreError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn list_documents(&self, path: &CollectionPath) -> Result<Vec<Document>, StoreError> {
        let base = format!(
            "{}/{}?pageSize={}",
            self.config.documents_root(),
            encoded_collection(path),
            LIST_PAGE_SIZE
        );
        let shown = path.to_string();

        let mut documents = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let url = match &page_token {
                Some(token) => format!("{}&pageToken={}", base, urlencoding::encode(token)),
                None => base.clone(),
            };
            let bytes = self.firestore(Method::GET, url, None, &shown).await?;
            let page: ListResponse = serde_json::from_slice(&bytes)?;

            for raw in page.documents {
                let fields = decode_fields(&raw.fields)?;
                documents.push(Document::new(document_id(&raw.name), fields));
            }

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        debug!("Fetched {} documents from {}", documents.len(), shown);
        Ok(documents)
    }
}
