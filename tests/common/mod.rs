//! In-process stand-in for the Identity Toolkit, Secure Token and Firestore
//! REST endpoints.

#![allow(dead_code)]

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

pub const API_KEY: &str = "test-key";
pub const PROJECT: &str = "demo";
pub const EMAIL: &str = "ana@pnl.test";
pub const PASSWORD: &str = "s3cret";
pub const UID: &str = "u1";
/// Documents per list page, regardless of the requested page size
pub const PAGE_SIZE: usize = 2;

#[derive(Default)]
pub struct MockState {
    /// Typed Firestore fields keyed by document path (`users/u1/expenses/1`)
    pub documents: BTreeMap<String, Map<String, Value>>,
    pub valid_tokens: HashSet<String>,
    /// `expiresIn` returned by sign-in
    pub sign_in_expires_in: String,
    pub rate_limited: bool,
    pub reject_refresh: bool,
    pub sign_ins: usize,
    pub refreshes: usize,
    pub list_pages: usize,
    pub bearer_tokens: Vec<String>,
}

#[derive(Clone)]
pub struct MockFirebase {
    pub state: Arc<Mutex<MockState>>,
    pub addr: SocketAddr,
}

impl MockFirebase {
    pub async fn start() -> Self {
        let state = Arc::new(Mutex::new(MockState {
            sign_in_expires_in: "3600".to_string(),
            ..MockState::default()
        }));

        let app = Router::new().fallback(handle).with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { state, addr }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }
}

type Shared = Arc<Mutex<MockState>>;

fn error(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(json!({"error": {"code": status.as_u16(), "message": message}})),
    )
        .into_response()
}

fn query_pairs(uri: &Uri) -> Vec<(String, String)> {
    uri.query()
        .unwrap_or("")
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (
                key.to_string(),
                urlencoding::decode(value).unwrap().into_owned(),
            )
        })
        .collect()
}

async fn handle(
    State(state): State<Shared>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri.path().to_string();
    let query = query_pairs(&uri);

    if path == "/v1/accounts:signInWithPassword" {
        return sign_in(&state, &query, &body);
    }
    if path == "/v1/token" {
        return refresh(&state, &body);
    }

    let prefix = format!("/v1/projects/{}/databases/(default)/documents/", PROJECT);
    let Some(doc_path) = path.strip_prefix(&prefix) else {
        return error(StatusCode::NOT_FOUND, "unknown endpoint");
    };
    let doc_path = urlencoding::decode(doc_path).unwrap().into_owned();

    let mut state = state.lock().unwrap();
    let bearer = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("")
        .to_string();
    state.bearer_tokens.push(bearer.clone());
    if !state.valid_tokens.contains(&bearer) {
        return error(StatusCode::UNAUTHORIZED, "UNAUTHENTICATED");
    }

    let depth = doc_path.split('/').count();
    match (method, depth % 2 == 0) {
        (Method::GET, false) => list(&mut state, &doc_path, &query),
        (Method::GET, true) => match state.documents.get(&doc_path) {
            Some(fields) => Json(json!({"name": doc_path, "fields": fields})).into_response(),
            None => error(StatusCode::NOT_FOUND, "NOT_FOUND"),
        },
        (Method::PATCH, true) => patch(&mut state, &doc_path, &query, &body),
        (Method::DELETE, true) => {
            state.documents.remove(&doc_path);
            Json(json!({})).into_response()
        }
        _ => error(StatusCode::BAD_REQUEST, "unsupported request"),
    }
}

fn sign_in(state: &Shared, query: &[(String, String)], body: &[u8]) -> Response {
    let mut state = state.lock().unwrap();
    if !query.iter().any(|(k, v)| k == "key" && v == API_KEY) {
        return error(StatusCode::BAD_REQUEST, "API_KEY_INVALID");
    }
    if state.rate_limited {
        return error(
            StatusCode::BAD_REQUEST,
            "TOO_MANY_ATTEMPTS_TRY_LATER : Access to this account has been temporarily disabled",
        );
    }

    let request: Value = serde_json::from_slice(body).unwrap();
    if request["email"] != EMAIL || request["password"] != PASSWORD {
        return error(StatusCode::BAD_REQUEST, "INVALID_LOGIN_CREDENTIALS");
    }
    assert_eq!(request["returnSecureToken"], true);

    state.sign_ins += 1;
    state.valid_tokens.insert("token-1".to_string());
    Json(json!({
        "kind": "identitytoolkit#VerifyPasswordResponse",
        "localId": UID,
        "email": EMAIL,
        "idToken": "token-1",
        "refreshToken": "refresh-1",
        "expiresIn": state.sign_in_expires_in,
        "registered": true
    }))
    .into_response()
}

fn refresh(state: &Shared, body: &[u8]) -> Response {
    let mut state = state.lock().unwrap();
    let form = String::from_utf8_lossy(body);
    assert!(form.starts_with("grant_type=refresh_token&refresh_token="));

    if state.reject_refresh {
        return error(StatusCode::BAD_REQUEST, "TOKEN_EXPIRED");
    }

    state.refreshes += 1;
    let token = format!("token-{}", state.refreshes + 1);
    state.valid_tokens.insert(token.clone());
    Json(json!({
        "expires_in": "3600",
        "token_type": "Bearer",
        "refresh_token": format!("refresh-{}", state.refreshes + 1),
        "id_token": token,
        "user_id": UID,
        "project_id": "12345"
    }))
    .into_response()
}

fn list(state: &mut MockState, collection: &str, query: &[(String, String)]) -> Response {
    state.list_pages += 1;
    let start: usize = query
        .iter()
        .find(|(k, _)| k == "pageToken")
        .map(|(_, v)| v.parse().unwrap())
        .unwrap_or(0);

    let prefix = format!("{}/", collection);
    let children: Vec<(&String, &Map<String, Value>)> = state
        .documents
        .iter()
        .filter(|(key, _)| {
            key.strip_prefix(&prefix)
                .map(|rest| !rest.contains('/'))
                .unwrap_or(false)
        })
        .collect();

    let page: Vec<Value> = children
        .iter()
        .skip(start)
        .take(PAGE_SIZE)
        .map(|(key, fields)| {
            json!({
                "name": format!("projects/{}/databases/(default)/documents/{}", PROJECT, key),
                "fields": fields,
                "createTime": "2024-01-01T00:00:00Z",
                "updateTime": "2024-01-01T00:00:00Z"
            })
        })
        .collect();

    if page.is_empty() {
        return Json(json!({})).into_response();
    }
    let mut response = json!({ "documents": page });
    if start + PAGE_SIZE < children.len() {
        response["nextPageToken"] = json!((start + PAGE_SIZE).to_string());
    }
    Json(response).into_response()
}

fn patch(state: &mut MockState, doc_path: &str, query: &[(String, String)], body: &[u8]) -> Response {
    let request: Value = serde_json::from_slice(body).unwrap();
    let fields = request["fields"].as_object().cloned().unwrap_or_default();
    let mask: Vec<&String> = query
        .iter()
        .filter(|(k, _)| k == "updateMask.fieldPaths")
        .map(|(_, v)| v)
        .collect();
    let must_exist = query
        .iter()
        .any(|(k, v)| k == "currentDocument.exists" && v == "true");

    if must_exist && !state.documents.contains_key(doc_path) {
        return error(StatusCode::NOT_FOUND, "No document to update");
    }

    if mask.is_empty() {
        state.documents.insert(doc_path.to_string(), fields);
    } else {
        let existing = state.documents.entry(doc_path.to_string()).or_default();
        for name in mask {
            match fields.get(name.as_str()) {
                Some(value) => {
                    existing.insert(name.clone(), value.clone());
                }
                None => {
                    existing.remove(name.as_str());
                }
            }
        }
    }

    let stored = state.documents.get(doc_path).cloned().unwrap_or_default();
    Json(json!({"name": doc_path, "fields": stored})).into_response()
}
