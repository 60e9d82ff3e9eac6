use crate::{
    api::{
        admission::Admission,
        handlers::{health, proxy, root},
    },
    cli::telemetry,
};
use anyhow::Result;
use axum::{
    Extension, Router,
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Request},
    middleware,
    response::Json,
    routing::{get, options},
};
use std::{net::SocketAddr, sync::Arc};
use tokio::{net::TcpListener, signal};
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{Span, error, info, info_span};
use ulid::Ulid;
use utoipa_axum::router::OpenApiRouter;

pub mod admission;
pub mod handlers;
// OpenAPI router wiring and route registration live in openapi.rs.
mod openapi;

pub use openapi::openapi;

/// Every credential engine route the gateway fronts.
pub const AUTH_ROUTE: &str = "/api/auth/{*path}";

/// Build the API router with all documented routes registered.
#[must_use]
pub fn router() -> OpenApiRouter {
    openapi::api_router()
}

/// Assemble the application: documented routes, the banner, the `OpenAPI`
/// document and the admission-guarded proxy.
pub fn app(admission: Arc<Admission>, upstream: Arc<proxy::Upstream>) -> Router {
    let (router, openapi) = router().split_for_parts();

    let auth = Router::new()
        .route(AUTH_ROUTE, get(proxy::forward).post(proxy::forward))
        .route_layer(middleware::from_fn_with_state(
            admission,
            admission::admit,
        ));

    router
        .route("/", get(root::root))
        .route("/health", options(health::health))
        .route(
            "/openapi.json",
            get(move || {
                let doc = openapi.clone();
                async move { Json(doc) }
            }),
        )
        .merge(auth)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(Extension(upstream)),
        )
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(port: u16, admission: Arc<Admission>, upstream: Arc<proxy::Upstream>) -> Result<()> {
    let app = app(admission, upstream);

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    telemetry::shutdown_tracer();

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                error!("Failed to install SIGTERM handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Gracefully shutdown");
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
