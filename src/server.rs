//! HTTP surface: the MJPEG feed plus garment selection and the in-memory
//! cart and wishlist.

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    body::Body,
    extract::{
        Path, State,
        rejection::{JsonRejection, PathRejection},
    },
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use bytes::{BufMut, Bytes, BytesMut};
use futures::stream::{self, Stream};
use serde::{Deserialize, Deserializer};
use serde_json::{Value, json};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use crate::garment::{GarmentError, GarmentStore};

pub const BOUNDARY: &str = "frame";

pub struct AppState {
    pub garments: Arc<GarmentStore>,
    pub frames: watch::Receiver<Option<Bytes>>,
    pub shutdown: CancellationToken,
    cart: Mutex<Vec<Value>>,
    wishlist: Mutex<Vec<Value>>,
}

impl AppState {
    pub fn new(
        garments: Arc<GarmentStore>,
        frames: watch::Receiver<Option<Bytes>>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            garments,
            frames,
            shutdown,
            cart: Mutex::new(Vec::new()),
            wishlist: Mutex::new(Vec::new()),
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum ListKind {
    Cart,
    Wishlist,
}

impl ListKind {
    fn key(self) -> &'static str {
        match self {
            ListKind::Cart => "cart",
            ListKind::Wishlist => "wishlist",
        }
    }

    fn lock(self, state: &AppState) -> MutexGuard<'_, Vec<Value>> {
        let list = match self {
            ListKind::Cart => &state.cart,
            ListKind::Wishlist => &state.wishlist,
        };
        list.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Deserialize)]
struct AddItem {
    /// `None` only when the key is absent; an explicit `null` is an item.
    #[serde(default, deserialize_with = "present")]
    item: Option<Value>,
}

fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/video_feed", get(video_feed))
        .route("/clothes", get(list_clothes))
        .route("/select", get(current_selection))
        .route("/select/{index}", post(select_garment))
        .route("/cart", get(get_cart).post(add_to_cart).delete(clear_cart))
        .route(
            "/wishlist",
            get(get_wishlist)
                .post(add_to_wishlist)
                .delete(clear_wishlist),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serves until `state.shutdown` is cancelled.
pub async fn serve(addr: SocketAddr, state: Arc<AppState>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    log::info!("listening on http://{addr}");

    let shutdown = state.shutdown.clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("http server failed")
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    let body = json!({ "status": "error", "message": message.into() });
    (status, Json(body)).into_response()
}

/// One part of the `multipart/x-mixed-replace` stream.
pub fn multipart_part(jpeg: &[u8]) -> Bytes {
    let mut part = BytesMut::with_capacity(jpeg.len() + 64);
    part.put_slice(b"--");
    part.put_slice(BOUNDARY.as_bytes());
    part.put_slice(b"\r\nContent-Type: image/jpeg\r\n\r\n");
    part.put_slice(jpeg);
    part.put_slice(b"\r\n");
    part.freeze()
}

/// Yields a part per published frame until shutdown or the publisher goes away.
fn frame_parts(
    mut frames: watch::Receiver<Option<Bytes>>,
    shutdown: CancellationToken,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> {
    frames.mark_changed();
    stream::unfold((frames, shutdown), |(mut frames, shutdown)| async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return None,
                changed = frames.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
            }
            let latest = frames.borrow_and_update().clone();
            if let Some(jpeg) = latest {
                return Some((Ok(multipart_part(&jpeg)), (frames, shutdown)));
            }
        }
    })
}

async fn video_feed(State(state): State<Arc<AppState>>) -> Response {
    log::info!("video feed client connected");
    let body = Body::from_stream(frame_parts(state.frames.clone(), state.shutdown.clone()));
    (
        [
            (
                header::CONTENT_TYPE,
                format!("multipart/x-mixed-replace; boundary={BOUNDARY}"),
            ),
            (header::CACHE_CONTROL, "no-cache".to_string()),
        ],
        body,
    )
        .into_response()
}

async fn list_clothes(State(state): State<Arc<AppState>>) -> Json<Vec<String>> {
    Json(state.garments.list().to_vec())
}

async fn current_selection(State(state): State<Arc<AppState>>) -> Json<Value> {
    let index = state.garments.current_index();
    Json(json!({
        "status": "ok",
        "index": index,
        "file": state.garments.list()[index],
    }))
}

async fn select_garment(
    State(state): State<Arc<AppState>>,
    index: Result<Path<i64>, PathRejection>,
) -> Response {
    let index = match index {
        Ok(Path(index)) => usize::try_from(index).ok(),
        Err(rejection) => {
            log::debug!("rejected select path: {rejection}");
            None
        }
    };
    let Some(index) = index else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid index");
    };

    let garments = state.garments.clone();
    let selected = tokio::task::spawn_blocking(move || garments.select(index)).await;
    match selected {
        Ok(Ok(_)) => Json(json!({
            "status": "ok",
            "index": index,
            "file": state.garments.list()[index],
        }))
        .into_response(),
        Ok(Err(GarmentError::OutOfRange { .. })) => {
            error_response(StatusCode::BAD_REQUEST, "Invalid index")
        }
        Ok(Err(err)) => {
            log::warn!("garment selection failed: {err}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
        Err(err) => {
            log::error!("garment selection task failed: {err}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "selection failed")
        }
    }
}

async fn get_cart(State(state): State<Arc<AppState>>) -> Json<Vec<Value>> {
    list_items(&state, ListKind::Cart)
}

async fn get_wishlist(State(state): State<Arc<AppState>>) -> Json<Vec<Value>> {
    list_items(&state, ListKind::Wishlist)
}

async fn add_to_cart(
    State(state): State<Arc<AppState>>,
    body: Result<Json<AddItem>, JsonRejection>,
) -> Response {
    add_item(&state, body, ListKind::Cart)
}

async fn add_to_wishlist(
    State(state): State<Arc<AppState>>,
    body: Result<Json<AddItem>, JsonRejection>,
) -> Response {
    add_item(&state, body, ListKind::Wishlist)
}

async fn clear_cart(State(state): State<Arc<AppState>>) -> Json<Value> {
    clear_items(&state, ListKind::Cart)
}

async fn clear_wishlist(State(state): State<Arc<AppState>>) -> Json<Value> {
    clear_items(&state, ListKind::Wishlist)
}

fn list_items(state: &AppState, kind: ListKind) -> Json<Vec<Value>> {
    Json(kind.lock(state).clone())
}

fn add_item(
    state: &AppState,
    body: Result<Json<AddItem>, JsonRejection>,
    kind: ListKind,
) -> Response {
    let item = match body {
        Ok(Json(AddItem { item: Some(item) })) => item,
        Ok(_) => return error_response(StatusCode::BAD_REQUEST, "No item provided"),
        Err(rejection) => {
            log::debug!("rejected {} body: {rejection}", kind.key());
            return error_response(StatusCode::BAD_REQUEST, "No item provided");
        }
    };

    let items = {
        let mut list = kind.lock(state);
        list.push(item);
        list.clone()
    };
    log::info!("{} now holds {} items", kind.key(), items.len());
    Json(json!({ "status": "ok", kind.key(): items })).into_response()
}

fn clear_items(state: &AppState, kind: ListKind) -> Json<Value> {
    kind.lock(state).clear();
    Json(json!({ "status": "ok", kind.key(): [] }))
}
