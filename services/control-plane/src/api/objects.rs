//! Generic CRUD + watch handlers for every object kind.
//!
//! One set of handlers serves all kinds; the `{kind}` path segment is
//! the lowercase plural (`workloads`, `nodes`, ...). Cluster-scoped
//! kinds are served at `/v1/{kind}`, namespaced kinds at
//! `/v1/namespaces/{namespace}/{kind}`. A list endpoint doubles as the
//! watch endpoint when `?watch=true`, streaming newline-delimited JSON
//! watch events.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use bytes::Bytes;
use keel_api::{Kind, Object, WatchEvent};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use super::error::ApiError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/{kind}", get(list_cluster).post(create_cluster))
        .route(
            "/{kind}/{name}",
            get(get_cluster).put(update_cluster).delete(delete_cluster),
        )
        .route(
            "/namespaces/{namespace}/{kind}",
            get(list_namespaced).post(create_namespaced),
        )
        .route(
            "/namespaces/{namespace}/{kind}/{name}",
            get(get_namespaced)
                .put(update_namespaced)
                .delete(delete_namespaced),
        )
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListQuery {
    #[serde(default)]
    watch: bool,
    resource_version: Option<u64>,
    timeout_seconds: Option<u64>,
    /// Comma-separated `key=value` pairs, all of which must match.
    label_selector: Option<String>,
    /// Restricts workload lists/watches to one node's bound workloads;
    /// this is how node agents scope their view.
    node_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeleteQuery {
    /// Expected resource version for compare-and-swap deletion.
    resource_version: Option<u64>,
}

/// List response: a consistent snapshot plus the version to resume a
/// watch from.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ObjectList {
    items: Vec<Object>,
    resource_version: u64,
}

fn parse_kind(segment: &str) -> Result<Kind, ApiError> {
    Kind::from_path_segment(segment)
        .ok_or_else(|| ApiError::not_found("unknown_kind", format!("unknown kind '{segment}'")))
}

fn parse_selector(raw: &str) -> Result<BTreeMap<String, String>, ApiError> {
    let mut selector = BTreeMap::new();
    for pair in raw.split(',').filter(|p| !p.is_empty()) {
        let Some((k, v)) = pair.split_once('=') else {
            return Err(ApiError::bad_request(
                "invalid_selector",
                format!("label selector entry '{pair}' is not key=value"),
            ));
        };
        selector.insert(k.to_string(), v.to_string());
    }
    Ok(selector)
}

fn bound_to_node(object: &Object, node_name: &str) -> bool {
    object
        .as_workload()
        .is_some_and(|(spec, _)| spec.node_name == node_name)
}

// Cluster-scoped wrappers.

async fn list_cluster(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Response, ApiError> {
    list_or_watch(state, &kind, None, query).await
}

async fn create_cluster(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Json(object): Json<Object>,
) -> Result<Response, ApiError> {
    create(state, &kind, None, object)
}

async fn get_cluster(
    State(state): State<AppState>,
    Path((kind, name)): Path<(String, String)>,
) -> Result<Json<Object>, ApiError> {
    fetch(state, &kind, "", &name)
}

async fn update_cluster(
    State(state): State<AppState>,
    Path((kind, name)): Path<(String, String)>,
    Json(object): Json<Object>,
) -> Result<Json<Object>, ApiError> {
    update(state, &kind, None, &name, object)
}

async fn delete_cluster(
    State(state): State<AppState>,
    Path((kind, name)): Path<(String, String)>,
    Query(query): Query<DeleteQuery>,
) -> Result<StatusCode, ApiError> {
    remove(state, &kind, "", &name, query)
}

// Namespaced wrappers.

async fn list_namespaced(
    State(state): State<AppState>,
    Path((namespace, kind)): Path<(String, String)>,
    Query(query): Query<ListQuery>,
) -> Result<Response, ApiError> {
    list_or_watch(state, &kind, Some(namespace), query).await
}

async fn create_namespaced(
    State(state): State<AppState>,
    Path((namespace, kind)): Path<(String, String)>,
    Json(object): Json<Object>,
) -> Result<Response, ApiError> {
    create(state, &kind, Some(namespace), object)
}

async fn get_namespaced(
    State(state): State<AppState>,
    Path((namespace, kind, name)): Path<(String, String, String)>,
) -> Result<Json<Object>, ApiError> {
    fetch(state, &kind, &namespace, &name)
}

async fn update_namespaced(
    State(state): State<AppState>,
    Path((namespace, kind, name)): Path<(String, String, String)>,
    Json(object): Json<Object>,
) -> Result<Json<Object>, ApiError> {
    update(state, &kind, Some(namespace), &name, object)
}

async fn delete_namespaced(
    State(state): State<AppState>,
    Path((namespace, kind, name)): Path<(String, String, String)>,
    Query(query): Query<DeleteQuery>,
) -> Result<StatusCode, ApiError> {
    remove(state, &kind, &namespace, &name, query)
}

// Shared implementations.

fn create(
    state: AppState,
    kind_segment: &str,
    namespace: Option<String>,
    mut object: Object,
) -> Result<Response, ApiError> {
    let kind = parse_kind(kind_segment)?;
    if object.kind() != kind {
        return Err(ApiError::bad_request(
            "kind_mismatch",
            format!("body is a {}, path says {kind}", object.kind()),
        ));
    }
    if let Some(ns) = namespace {
        if object.metadata.namespace.is_empty() {
            object.metadata.namespace = ns;
        } else if object.metadata.namespace != ns {
            return Err(ApiError::bad_request(
                "namespace_mismatch",
                "object namespace does not match path",
            ));
        }
    }

    let stored = state.store().create(object)?;
    Ok((StatusCode::CREATED, Json(stored)).into_response())
}

fn fetch(
    state: AppState,
    kind_segment: &str,
    namespace: &str,
    name: &str,
) -> Result<Json<Object>, ApiError> {
    let kind = parse_kind(kind_segment)?;
    Ok(Json(state.store().get(kind, namespace, name)?))
}

fn update(
    state: AppState,
    kind_segment: &str,
    namespace: Option<String>,
    name: &str,
    mut object: Object,
) -> Result<Json<Object>, ApiError> {
    let kind = parse_kind(kind_segment)?;
    if object.kind() != kind || object.metadata.name != name {
        return Err(ApiError::bad_request(
            "identity_mismatch",
            "object kind/name does not match path",
        ));
    }
    if let Some(ns) = namespace {
        if object.metadata.namespace.is_empty() {
            object.metadata.namespace = ns;
        } else if object.metadata.namespace != ns {
            return Err(ApiError::bad_request(
                "namespace_mismatch",
                "object namespace does not match path",
            ));
        }
    }

    Ok(Json(state.store().update(object)?))
}

fn remove(
    state: AppState,
    kind_segment: &str,
    namespace: &str,
    name: &str,
    query: DeleteQuery,
) -> Result<StatusCode, ApiError> {
    let kind = parse_kind(kind_segment)?;
    state
        .store()
        .delete(kind, namespace, name, query.resource_version)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_or_watch(
    state: AppState,
    kind_segment: &str,
    namespace: Option<String>,
    query: ListQuery,
) -> Result<Response, ApiError> {
    let kind = parse_kind(kind_segment)?;
    let selector = query
        .label_selector
        .as_deref()
        .map(parse_selector)
        .transpose()?;

    if !query.watch {
        let (mut items, resource_version) =
            state
                .store()
                .list(kind, namespace.as_deref(), selector.as_ref());
        if let Some(node_name) = &query.node_name {
            items.retain(|o| bound_to_node(o, node_name));
        }
        return Ok(Json(ObjectList {
            items,
            resource_version,
        })
        .into_response());
    }

    let start = query
        .resource_version
        .unwrap_or_else(|| state.store().latest_version());
    let mut stream = state.store().watch(kind, namespace.as_deref(), start)?;
    let timeout = query.timeout_seconds.map(Duration::from_secs);
    let node_name = query.node_name.clone();

    debug!(%kind, start, ?timeout, "Watch stream opened");

    // The handler returns immediately; a task pumps events into the
    // response body until the stream closes, the client goes away, or
    // the caller's deadline passes (which ends the stream cleanly - the
    // client reconnects from its last seen version).
    let (tx, rx) = mpsc::channel::<Result<Bytes, Infallible>>(16);
    tokio::spawn(async move {
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
        loop {
            let event = match deadline {
                Some(deadline) => tokio::select! {
                    event = stream.recv() => event,
                    _ = tokio::time::sleep_until(deadline) => break,
                },
                None => stream.recv().await,
            };
            let Some(event) = event else {
                break;
            };
            if !watch_event_matches(&event, node_name.as_deref()) {
                continue;
            }
            let Ok(mut line) = serde_json::to_vec(&event) else {
                break;
            };
            line.push(b'\n');
            if tx.send(Ok(Bytes::from(line))).await.is_err() {
                break;
            }
        }
    });

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .body(Body::from_stream(ReceiverStream::new(rx)))
        .map_err(|e| ApiError::internal("stream", e.to_string()))?;
    Ok(response)
}

fn watch_event_matches(event: &WatchEvent, node_name: Option<&str>) -> bool {
    let Some(node_name) = node_name else {
        return true;
    };
    match &event.object {
        Some(object) => bound_to_node(object, node_name),
        // Bookmarks pass every filter.
        None => true,
    }
}
