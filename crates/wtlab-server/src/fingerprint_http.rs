//! Plain-HTTP fingerprint endpoint.
//!
//! `GET /fingerprint` returns the certificate's SHA-256 digest as a JSON
//! byte array. Clients fetch it before opening the WebTransport session so
//! they can pin a self-signed certificate.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, HeaderValue, Method},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use wtlab_core::{CancelSignal, CertificatePin, WtResult};

async fn fingerprint(State(pin): State<Arc<CertificatePin>>) -> impl IntoResponse {
    (
        [(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        )],
        Json(pin.digest.to_vec()),
    )
}

/// The endpoint's routes. Unknown paths get 404, other methods 405.
pub fn router(pin: CertificatePin) -> Router {
    Router::new()
        .route("/fingerprint", get(fingerprint))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET]),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(pin))
}

/// Bind the endpoint on `addr` and serve until `stop` fires.
pub async fn start(
    addr: SocketAddr,
    pin: CertificatePin,
    stop: CancelSignal,
) -> WtResult<(SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;
    info!(addr = %local, "fingerprint endpoint listening");

    let app = router(pin);
    let handle = tokio::spawn(async move {
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move { stop.cancelled().await })
            .await;
        match served {
            Ok(()) => info!("fingerprint endpoint stopped"),
            Err(e) => error!(error = %e, "fingerprint endpoint failed"),
        }
    });
    Ok((local, handle))
}
