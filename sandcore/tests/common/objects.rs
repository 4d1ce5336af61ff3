//! A minimal HTTP object server for exercising the HTTP blob store.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{Arc, Mutex},
};

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use tokio::{net::TcpListener, task::JoinHandle};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct ObjectState {
    objects: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    token: Option<String>,
}

/// A running object server. Stops when dropped.
#[derive(Debug)]
pub struct ObjectServer {
    pub addr: SocketAddr,
    state: ObjectState,
    task: JoinHandle<()>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ObjectServer {
    /// Starts a server that requires `Authorization: Bearer <token>` when `token` is set.
    pub async fn start(token: Option<&str>) -> anyhow::Result<Self> {
        let state = ObjectState {
            objects: Arc::default(),
            token: token.map(str::to_string),
        };

        let app = Router::new()
            .route("/{*key}", get(get_object).put(put_object))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Ok(Self { addr, state, task })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}/bucket", self.addr)
    }

    /// The object stored under the request path `key` (without a leading slash).
    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.state
            .objects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .cloned()
    }
}

impl ObjectState {
    fn authorized(&self, headers: &HeaderMap) -> bool {
        let Some(token) = &self.token else {
            return true;
        };

        headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value == format!("Bearer {}", token))
    }
}

//--------------------------------------------------------------------------------------------------
// Functions: Handlers
//--------------------------------------------------------------------------------------------------

async fn get_object(
    State(state): State<ObjectState>,
    Path(key): Path<String>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if !state.authorized(&headers) {
        return Err(StatusCode::UNAUTHORIZED);
    }

    let objects = state
        .objects
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    objects.get(&key).cloned().ok_or(StatusCode::NOT_FOUND)
}

async fn put_object(
    State(state): State<ObjectState>,
    Path(key): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if !state.authorized(&headers) {
        return StatusCode::UNAUTHORIZED;
    }

    state
        .objects
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .insert(key, body.to_vec());
    StatusCode::OK
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Drop for ObjectServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}
