use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::Path;
use axum::extract::State;
use axum::http::StatusCode;
use axum::http::header;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use serde::Serialize;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::engine::Engine;
use crate::engine::EntityRecord;
use crate::integrations::open_epaper_link::image_update_topic;

/// Response for the /v1/ping endpoint
#[derive(Serialize)]
struct PingResponse {
    status: String,
}

/// Response for the /v1/info endpoint
#[derive(Serialize)]
struct InfoResponse {
    version: String,
    hostname: String,
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    version: &'static str,
    engine: Arc<Engine>,
}

/// Handler for GET /v1/ping
#[tracing::instrument]
async fn ping() -> impl IntoResponse {
    tracing::debug!("Handling /v1/ping request");
    (
        StatusCode::OK,
        Json(PingResponse {
            status: "ok".to_string(),
        }),
    )
}

/// Handler for GET /v1/info
#[tracing::instrument(skip(state))]
async fn info(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    tracing::debug!("Handling /v1/info request");

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    (
        StatusCode::OK,
        Json(InfoResponse {
            version: state.version.to_string(),
            hostname,
        }),
    )
}

/// Handler for GET /v1/entities
#[tracing::instrument(skip(state))]
async fn entities(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.engine.state_snapshot();
    let records: Vec<EntityRecord> = snapshot.entities.values().cloned().collect();
    (StatusCode::OK, Json(records))
}

/// Handler for GET /v1/entities/:entity_id/image
#[tracing::instrument(skip(state))]
async fn entity_image(
    State(state): State<Arc<AppState>>,
    Path(entity_id): Path<String>,
) -> Response {
    match state.engine.image(&entity_id).await {
        Some(bytes) => {
            (StatusCode::OK, [(header::CONTENT_TYPE, "image/jpeg")], bytes).into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Handler for POST /v1/tags/:tag_mac/image_updated
///
/// Called by whatever renders tag images once a new file is in place.
#[tracing::instrument(skip(state))]
async fn image_updated(
    State(state): State<Arc<AppState>>,
    Path(tag_mac): Path<String>,
) -> StatusCode {
    state
        .engine
        .dispatcher()
        .send(&image_update_topic(&tag_mac), vec![]);
    StatusCode::ACCEPTED
}

/// Create the API router with all endpoints
fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/ping", get(ping))
        .route("/v1/info", get(info))
        .route("/v1/entities", get(entities))
        .route("/v1/entities/:entity_id/image", get(entity_image))
        .route("/v1/tags/:tag_mac/image_updated", post(image_updated))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/// Start the HTTP API server
///
/// Binds to `listen:port` and serves until `shutdown_rx` fires.
pub async fn serve(
    listen: String,
    port: u16,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
    engine: Arc<Engine>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let version = env!("CARGO_PKG_VERSION");

    let state = Arc::new(AppState { version, engine });
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", listen, port).parse()?;
    tracing::info!("Starting HTTP API server on {}", addr);

    let listener = TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            tracing::info!("HTTP API server shutting down gracefully");
        })
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::integrations::open_epaper_link::MemoryHub;
    use crate::integrations::open_epaper_link::TagData;
    use crate::integrations::open_epaper_link::setup_entry;

    fn router(engine: Arc<Engine>) -> Router {
        create_router(Arc::new(AppState {
            version: "test",
            engine,
        }))
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    #[tokio::test]
    async fn test_ping() {
        let response = router(Arc::new(Engine::new()))
            .oneshot(Request::get("/v1/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_bytes(response).await, br#"{"status":"ok"}"#);
    }

    #[tokio::test]
    async fn test_entity_image_and_listing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("open_epaper_link.AAAA.jpg"), b"jpeg").unwrap();

        let engine = Arc::new(Engine::new());
        let hub = Arc::new(MemoryHub::new(engine.dispatcher().clone()));
        hub.set_online(true);
        hub.upsert_tag("AAAA", TagData::default());
        let _platform = setup_entry(
            hub,
            PathBuf::from(dir.path()),
            engine.dispatcher(),
            engine.registry().clone(),
        );
        engine.process_pending().await;

        let response = router(engine.clone())
            .oneshot(
                Request::get("/v1/entities/image.aaaa_content/image")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");
        assert_eq!(body_bytes(response).await, b"jpeg");

        let response = router(engine.clone())
            .oneshot(Request::get("/v1/entities").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let records: serde_json::Value =
            serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(records[0]["entity_id"], "image.aaaa_content");
        assert_eq!(records[0]["available"], true);
        assert_eq!(records[0]["name"], "Content");
        assert_eq!(records[0]["icon"], "mdi:image");
    }

    #[tokio::test]
    async fn test_unknown_entity_image_is_not_found() {
        let response = router(Arc::new(Engine::new()))
            .oneshot(
                Request::get("/v1/entities/image.nope_content/image")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_image_updated_emits_signal() {
        let engine = Arc::new(Engine::new());
        let seen = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let s = seen.clone();
        let _sub = engine
            .dispatcher()
            .connect(image_update_topic("AAAA"), move |_| {
                s.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            });

        let response = router(engine)
            .oneshot(
                Request::post("/v1/tags/AAAA/image_updated")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(seen.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
