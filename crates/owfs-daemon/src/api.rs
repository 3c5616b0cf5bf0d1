//! REST API handlers over the filesystem callbacks

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use owfs_core::{BusError, FsError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::state::AppState;

/// Largest read served when the client gives no size
const DEFAULT_READ_SIZE: usize = 64 * 1024;

/// API error response
#[derive(Serialize)]
struct ApiError {
    error: String,
    errno: i32,
}

impl ApiError {
    fn status(err: &FsError) -> StatusCode {
        match err {
            FsError::Parse(_) | FsError::NotPresent(_) | FsError::NoDevice(_) => StatusCode::NOT_FOUND,
            FsError::IsDirectory(_) | FsError::NotDirectory(_) | FsError::InvalidInput(_) => {
                StatusCode::BAD_REQUEST
            }
            FsError::Unsupported(_) => StatusCode::METHOD_NOT_ALLOWED,
            FsError::Bus(_) => StatusCode::BAD_GATEWAY,
            FsError::Connection { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn response(err: FsError) -> Response {
        (
            Self::status(&err),
            Json(ApiError {
                error: err.to_string(),
                errno: err.errno(),
            }),
        )
            .into_response()
    }
}

/// Byte window of a read or write
#[derive(Debug, Default, Deserialize)]
pub struct Window {
    #[serde(default)]
    offset: usize,
    #[serde(default)]
    size: Option<usize>,
}

#[derive(Serialize)]
struct Written {
    written: usize,
}

/// Bus access blocks, so every callback runs off the async workers
async fn blocking<T, F>(state: Arc<AppState>, op: F) -> Result<T, FsError>
where
    T: Send + 'static,
    F: FnOnce(&AppState) -> Result<T, FsError> + Send + 'static,
{
    match tokio::task::spawn_blocking(move || op(state.as_ref())).await {
        Ok(result) => result,
        Err(e) => {
            warn!(error = %e, "Filesystem task aborted");
            Err(FsError::Bus(BusError::Protocol("request aborted".to_string())))
        }
    }
}

fn fs_path(path: &str) -> String {
    format!("/{}", path)
}

/// Read a file
pub async fn read_file(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    Query(window): Query<Window>,
) -> Response {
    let path = fs_path(&path);
    let size = window.size.unwrap_or(DEFAULT_READ_SIZE);
    debug!(path = %path, offset = window.offset, size, "read");
    match blocking(state, move |s| s.ctx.read(&path, size, window.offset)).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, "application/octet-stream")], bytes).into_response(),
        Err(e) => ApiError::response(e),
    }
}

/// Write a file from the request body
pub async fn write_file(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    Query(window): Query<Window>,
    body: Bytes,
) -> Response {
    let path = fs_path(&path);
    debug!(path = %path, offset = window.offset, bytes = body.len(), "write");
    match blocking(state, move |s| s.ctx.write(&path, &body, window.offset)).await {
        Ok(written) => Json(Written { written }).into_response(),
        Err(e) => ApiError::response(e),
    }
}

/// List the root directory
pub async fn list_root(State(state): State<Arc<AppState>>) -> Response {
    list(state, "/".to_string()).await
}

/// List a directory
pub async fn list_dir(State(state): State<Arc<AppState>>, Path(path): Path<String>) -> Response {
    list(state, fs_path(&path)).await
}

async fn list(state: Arc<AppState>, path: String) -> Response {
    match blocking(state, move |s| s.ctx.readdir(&path)).await {
        Ok(entries) => Json(entries).into_response(),
        Err(e) => ApiError::response(e),
    }
}

/// Attributes of a path
pub async fn get_attr(State(state): State<Arc<AppState>>, Path(path): Path<String>) -> Response {
    let path = fs_path(&path);
    match blocking(state, move |s| s.ctx.getattr(&path)).await {
        Ok(attributes) => Json(attributes).into_response(),
        Err(e) => ApiError::response(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BusConfig, Config, SimulatedDeviceConfig};
    use crate::server::router;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    const THERMOMETER: &str = "28.67C6697351FF";

    fn app() -> axum::Router {
        let mut config = Config::default();
        config.buses.push(BusConfig::Simulated {
            name: None,
            devices: vec![
                SimulatedDeviceConfig {
                    address: THERMOMETER.to_string(),
                    alarm: false,
                },
                SimulatedDeviceConfig {
                    address: "3A.123456789A00".to_string(),
                    alarm: false,
                },
            ],
        });
        router(AppState::new(config).unwrap())
    }

    async fn send(app: axum::Router, method: &str, uri: &str, body: &'static str) -> (StatusCode, Vec<u8>) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::from(body))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    #[tokio::test]
    async fn test_root_listing() {
        let (status, body) = send(app(), "GET", "/api/dir", "").await;
        assert_eq!(status, StatusCode::OK);
        let entries: Vec<String> = serde_json::from_slice(&body).unwrap();
        assert!(entries.contains(&THERMOMETER.to_string()));
        assert!(entries.contains(&"bus.0".to_string()));
    }

    #[tokio::test]
    async fn test_read_family() {
        let (status, body) = send(app(), "GET", &format!("/api/read/{}/family", THERMOMETER), "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"28");

        let (_, window) = send(
            app(),
            "GET",
            &format!("/api/read/{}/family?offset=1&size=1", THERMOMETER),
            "",
        )
        .await;
        assert_eq!(window, b"8");
    }

    #[tokio::test]
    async fn test_attr_of_directory() {
        let (status, body) = send(app(), "GET", &format!("/api/attr/{}", THERMOMETER), "").await;
        assert_eq!(status, StatusCode::OK);
        let attributes: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(attributes["kind"], "directory");
    }

    #[tokio::test]
    async fn test_write_then_read_back() {
        let app = app();
        let (status, body) = send(app.clone(), "PUT", "/api/write/3A.123456789A00/PIO.A", "1").await;
        assert_eq!(status, StatusCode::OK);
        let written: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(written["written"], 1);

        let (_, body) = send(app, "GET", "/api/read/uncached/3A.123456789A00/PIO.A", "").await;
        assert_eq!(body, b"1");
    }

    #[tokio::test]
    async fn test_errors_carry_errno() {
        let (status, body) = send(app(), "GET", "/api/read/28.000000000001/temperature", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let error: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(error["errno"], 2);

        let (status, _) = send(app(), "PUT", &format!("/api/write/{}/family", THERMOMETER), "10").await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);

        let (status, _) = send(app(), "GET", &format!("/api/dir/{}/family", THERMOMETER), "").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
