//! In-memory WebDAV server for tests.

use std::{
    collections::{BTreeMap, BTreeSet},
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
        Mutex,
    },
};

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, State},
    http::{
        header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_RANGE, RANGE},
        HeaderMap,
        Method,
        StatusCode,
        Uri,
    },
    response::{IntoResponse, Response},
    Router,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::Bytes;
use tokio::{net::TcpListener, task::JoinHandle};

#[derive(Default)]
struct ServerState {
    objects: Mutex<BTreeMap<String, Bytes>>,
    collections: Mutex<BTreeSet<String>>,
    authorization: Option<String>,
    ignore_range: AtomicBool,
    requests: AtomicUsize,
}

pub struct TestWebDavServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
    handle: JoinHandle<()>,
}

impl TestWebDavServer {
    pub async fn start() -> Self {
        Self::serve(ServerState::default()).await
    }

    pub async fn start_with_credentials(username: &str, password: &str) -> Self {
        let token = STANDARD.encode(format!("{username}:{password}"));
        Self::serve(ServerState {
            authorization: Some(format!("Basic {token}")),
            ..Default::default()
        })
        .await
    }

    async fn serve(state: ServerState) -> Self {
        let state = Arc::new(state);
        let app = Router::new()
            .fallback(handle)
            .layer(DefaultBodyLimit::disable())
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            state,
            handle,
        }
    }

    pub fn endpoint(&self) -> String {
        format!("http://{}/dav/", self.addr)
    }

    pub fn insert(&self, path: &str, data: Bytes) {
        self.state
            .objects
            .lock()
            .unwrap()
            .insert(path.to_string(), data);
    }

    pub fn object(&self, path: &str) -> Option<Bytes> {
        self.state.objects.lock().unwrap().get(path).cloned()
    }

    /// Answer range requests with the whole object, like servers that
    /// don't support ranges.
    pub fn set_ignore_range(&self, ignore: bool) {
        self.state.ignore_range.store(ignore, Ordering::SeqCst);
    }

    pub fn request_count(&self) -> usize {
        self.state.requests.load(Ordering::SeqCst)
    }
}

impl Drop for TestWebDavServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn status(code: StatusCode) -> Response {
    code.into_response()
}

/// Parse a `bytes=<start>-<end>` header into an inclusive range.
fn parse_range(value: &str) -> Option<(u64, u64)> {
    let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}

async fn handle(
    State(state): State<Arc<ServerState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    state.requests.fetch_add(1, Ordering::SeqCst);

    if let Some(expected) = &state.authorization {
        let provided = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
        if provided != Some(expected.as_str()) {
            return status(StatusCode::UNAUTHORIZED);
        }
    }

    let path = uri
        .path()
        .trim_start_matches("/dav")
        .trim_matches('/')
        .to_string();

    match method.as_str() {
        "PROPFIND" => (
            StatusCode::MULTI_STATUS,
            r#"<?xml version="1.0"?><D:multistatus xmlns:D="DAV:"/>"#,
        )
            .into_response(),
        "MKCOL" => {
            if state.collections.lock().unwrap().insert(path) {
                status(StatusCode::CREATED)
            } else {
                status(StatusCode::METHOD_NOT_ALLOWED)
            }
        }
        "PUT" => {
            state.objects.lock().unwrap().insert(path, body);
            status(StatusCode::CREATED)
        }
        "HEAD" => match state.objects.lock().unwrap().get(&path) {
            Some(data) => Response::builder()
                .status(StatusCode::OK)
                .header(CONTENT_LENGTH, data.len())
                .body(Body::empty())
                .unwrap(),
            None => status(StatusCode::NOT_FOUND),
        },
        "GET" => {
            let Some(data) = state.objects.lock().unwrap().get(&path).cloned() else {
                return status(StatusCode::NOT_FOUND);
            };
            let range = headers
                .get(RANGE)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_range);
            match range {
                Some((start, end)) if !state.ignore_range.load(Ordering::SeqCst) => {
                    let len = data.len() as u64;
                    if start >= len || end < start {
                        return status(StatusCode::RANGE_NOT_SATISFIABLE);
                    }
                    let end = end.min(len - 1);
                    Response::builder()
                        .status(StatusCode::PARTIAL_CONTENT)
                        .header(CONTENT_RANGE, format!("bytes {start}-{end}/{len}"))
                        .body(Body::from(data.slice(start as usize..=end as usize)))
                        .unwrap()
                }
                _ => (StatusCode::OK, data).into_response(),
            }
        }
        "DELETE" => {
            let nested = format!("{path}/");
            let mut objects = state.objects.lock().unwrap();
            let mut collections = state.collections.lock().unwrap();
            let before = objects.len() + collections.len();
            objects.retain(|key, _| *key != path && !key.starts_with(&nested));
            collections.retain(|key| *key != path && !key.starts_with(&nested));
            if objects.len() + collections.len() == before {
                status(StatusCode::NOT_FOUND)
            } else {
                status(StatusCode::NO_CONTENT)
            }
        }
        _ => status(StatusCode::METHOD_NOT_ALLOWED),
    }
}
