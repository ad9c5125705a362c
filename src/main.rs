//! AxoStash server binary.
//!
//! A small file ingestion service: clients POST a file plus a destination
//! folder, the bytes land under the storage root with a collision-safe
//! name, and the response carries a direct retrieval URL. Stored files are
//! served statically under `/uploads`, and a delete endpoint removes them
//! idempotently. The entry point builds the Axum router, configures TLS,
//! and starts HTTP/HTTPS listeners.

mod config;
mod error;
mod http;
mod logging;
mod sanitize;
mod storage;
mod tls;
mod upload;
mod version;

use axum::extract::{DefaultBodyLimit, Extension, connect_info::ConnectInfo};
use axum::http::Request;
use axum::routing::{get, post};
use axum::{Router, middleware};
use axum_server::Handle;
use clap::Parser;
use shadow_rs::shadow;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::services::ServeDir;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info, info_span};

use crate::config::Args;
use crate::error::ApiError;
use crate::http::{RequestScheme, build_cors_layer};
use crate::storage::Storage;

shadow!(build);

/// Starts the AxoStash server and blocks until shutdown.
#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    logging::init_logging();

    let args = Args::parse();
    let storage = Arc::new(Storage::new(
        PathBuf::from(args.storage_dir.clone()),
        args.dir_mode,
        args.file_mode,
    ));
    storage.ensure_root().await?;

    let mut app = Router::new()
        .route(
            "/upload",
            post(upload::ingest_file).delete(upload::delete_file),
        )
        .route("/api/version", get(version::get_version_info))
        .nest_service("/uploads", ServeDir::new(storage.root_path()))
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(args.upload_max_size as usize))
        .layer(middleware::from_fn(http::add_security_headers))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    let forwarded_ip = request
                        .headers()
                        .get("x-forwarded-for")
                        .and_then(|v| v.to_str().ok())
                        .map(|s| s.split(',').next().unwrap_or("").trim().to_string());
                    let connect_ip = request
                        .extensions()
                        .get::<ConnectInfo<SocketAddr>>()
                        .map(|ConnectInfo(addr)| addr.to_string());
                    let client_ip = forwarded_ip
                        .or(connect_ip)
                        .unwrap_or_else(|| "unknown".to_string());

                    info_span!(
                        env!("CARGO_CRATE_NAME"),
                        client_ip,
                        method = ?request.method(),
                        path = ?request.uri().path(),
                    )
                })
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .layer(Extension(storage));

    if let Some(cors_layer) = build_cors_layer(args.cors_origins.as_deref()) {
        app = app.layer(cors_layer);
    }

    let host = args
        .host
        .parse::<IpAddr>()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string()))?;
    let http_addr = SocketAddr::new(host, args.http_port);
    let https_addr = SocketAddr::new(host, args.https_port);
    let tls_config = tls::build_rustls_config(&args, host).await?;
    let handle = Handle::new();

    info!("🚀 Starting HTTP server at {}", http_addr);
    info!("🔒 Starting HTTPS server at {}", https_addr);

    let http_app = app.clone().layer(Extension(RequestScheme::Http));
    let https_app = app.layer(Extension(RequestScheme::Https));

    let http_server = axum_server::bind(http_addr)
        .handle(handle.clone())
        .serve(http_app.into_make_service_with_connect_info::<SocketAddr>());
    let https_server = axum_server::bind_rustls(https_addr, tls_config)
        .handle(handle.clone())
        .serve(https_app.into_make_service_with_connect_info::<SocketAddr>());

    tokio::select! {
        result = http_server => result?,
        result = https_server => result?,
        _ = shutdown_signal(handle) => {}
    }

    Ok(())
}

/// 兜底路由：统一的 JSON 404。
async fn not_found() -> ApiError {
    ApiError::NotFound("Not Found".into())
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received termination signal shutting down");
    handle.graceful_shutdown(Some(Duration::from_secs(10)));
}
