//! # Key API
//!
//! This crate provides the http surface for the key lease pool, plus
//! healthcheck, diagnostics, and metrics.
//! It exposes the following endpoints:
//!
//! /keys
//! /keys/{id}
//! /keepalive/{id}
//! /health
//! /ping
//! /metrics
#![warn(
    missing_debug_implementations,
    missing_docs,
    rust_2018_idioms,
    unreachable_pub,
    non_snake_case,
    non_upper_case_globals
)]
#![deny(rustdoc::broken_intra_doc_links)]
#![allow(clippy::cognitive_complexity)]

use std::net::SocketAddr;

use anyhow::Result;
use axum::{Router, extract::Extension, routing};
use tokio::{net::TcpListener, sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, trace};

use key_pool::KeyPool;

pub use crate::models::{Health, State};

/// The task runner for the [`ExternalApi`]
///
/// [`ExternalApi`]: crate::ExternalApi
#[derive(Debug)]
pub struct ExternalApiGuard {
    task_handle: JoinHandle<()>,
}

impl Drop for ExternalApiGuard {
    fn drop(&mut self) {
        trace!("ExternalApiGuard drop called");
        self.task_handle.abort();
    }
}

/// Serves the pool operations over HTTP and reports health & metrics
/// for the running system
#[derive(Debug)]
pub struct ExternalApi {
    tx: mpsc::Sender<Health>,
    rx: mpsc::Receiver<Health>,
    addr: SocketAddr,
    state: State,
    pool: KeyPool,
}

impl ExternalApi {
    /// Create a new ExternalApi instance
    pub fn new(addr: SocketAddr, pool: KeyPool) -> Self {
        trace!("starting external api");
        let (tx, rx) = mpsc::channel(10);
        let state = models::blank_health();
        Self {
            tx,
            rx,
            addr,
            state,
            pool,
        }
    }

    /// clone the health sender channel
    pub fn sender(&self) -> mpsc::Sender<Health> {
        self.tx.clone()
    }

    /// Set the health
    pub async fn set_health(&self, health: Health) {
        *self.state.lock() = health;
    }

    /// Listen to Health changes over the channel
    async fn listen_status(&mut self) -> Result<()> {
        while let Some(health) = self.rx.recv().await {
            let mut guard = self.state.lock();
            if *guard != health {
                *guard = health;
            }
        }
        info!("listen health exited-- nothing listening");
        Ok(())
    }

    /// serve the HTTP external api until `token` is cancelled
    async fn run(
        addr: SocketAddr,
        state: State,
        pool: KeyPool,
        token: CancellationToken,
    ) -> Result<()> {
        let tcp = TcpListener::bind(&addr).await?;
        // Provides:
        // /keys            POST create, GET checkout
        // /keys/{id}       GET info, PUT release, DELETE remove
        // /keepalive/{id}  PUT keep-alive
        // /health /ping /metrics /metrics-text
        let app = Router::new()
            .route(
                "/keys",
                routing::post(handlers::create).get(handlers::checkout),
            )
            .route(
                "/keys/:id",
                routing::get(handlers::info)
                    .put(handlers::release)
                    .delete(handlers::remove),
            )
            .route("/keepalive/:id", routing::put(handlers::keep_alive))
            .route("/health", routing::get(handlers::ok))
            .route("/ping", routing::get(handlers::ping))
            .route("/metrics", routing::get(handlers::metrics))
            .route("/metrics-text", routing::get(handlers::metrics_text))
            .layer(TraceLayer::new_for_http())
            .layer(Extension(state))
            .layer(Extension(pool));

        tracing::debug!("external API listening on {}", addr);

        axum::serve(tcp, app)
            .with_graceful_shutdown(token.cancelled_owned())
            .await?;
        debug!("external API shut down");
        Ok(())
    }

    /// Kick off the HTTP service and start listening on all channels for
    /// changes. The task drains once `token` is cancelled.
    pub fn start(mut self, token: CancellationToken) -> JoinHandle<()> {
        let state = self.state.clone();
        let addr = self.addr;
        let pool = self.pool.clone();
        // if tx is not cloned, health listen will never update since ExternalApi is owner

        tokio::spawn(async move {
            tokio::select! {
                res = ExternalApi::run(addr, state, pool, token.clone()) => {
                    if let Err(err) = res {
                        error!(?err, "external API task returning");
                    }
                    // the http server going away for any reason means shutdown
                    token.cancel();
                }
                res = self.listen_status() => {
                    if let Err(err) = res {
                        error!(?err, "health task returning, this should not happen");
                    }
                }
            }
        })
    }

    /// Start the `ExternalApi` detached, aborting it when the guard drops
    pub fn serve(self) -> ExternalApiGuard {
        ExternalApiGuard {
            task_handle: self.start(CancellationToken::new()),
        }
    }
}

mod handlers {

    use axum::{
        Json,
        body::Body,
        extract::{Extension, Path},
        http::header,
        http::{Response, StatusCode},
        response::IntoResponse,
    };
    use key_pool::{KeyPool, PoolError};
    use keyd_core::metrics::{OP_COUNT, START_TIME, UPTIME};
    use prometheus::{Encoder, ProtobufEncoder, TextEncoder};
    use tracing::error;

    use crate::models::{ErrorBody, Health, KeyIdBody, MessageBody, ServerResult, State};

    pub(crate) async fn ok(Extension(state): Extension<State>) -> ServerResult<impl IntoResponse> {
        Ok(match *state.lock() {
            Health::Good => StatusCode::OK,
            Health::Bad => StatusCode::INTERNAL_SERVER_ERROR,
        })
    }

    pub(crate) async fn create(Extension(pool): Extension<KeyPool>) -> impl IntoResponse {
        OP_COUNT.create.inc();
        let key = pool.create();
        (StatusCode::CREATED, Json(KeyIdBody { key_id: key }))
    }

    pub(crate) async fn checkout(Extension(pool): Extension<KeyPool>) -> axum::response::Response {
        OP_COUNT.checkout.inc();
        match pool.checkout() {
            Ok(key) => (StatusCode::OK, Json(KeyIdBody { key_id: key })).into_response(),
            Err(err) => not_found(err),
        }
    }

    pub(crate) async fn info(
        Extension(pool): Extension<KeyPool>,
        Path(id): Path<String>,
    ) -> axum::response::Response {
        OP_COUNT.info.inc();
        match pool.info(&id) {
            Ok(record) => (StatusCode::OK, Json(record)).into_response(),
            Err(err) => not_found(err),
        }
    }

    pub(crate) async fn remove(
        Extension(pool): Extension<KeyPool>,
        Path(id): Path<String>,
    ) -> impl IntoResponse {
        OP_COUNT.remove.inc();
        pool.remove(&id);
        (StatusCode::OK, Json(MessageBody::new("Key is deleted")))
    }

    pub(crate) async fn release(
        Extension(pool): Extension<KeyPool>,
        Path(id): Path<String>,
    ) -> axum::response::Response {
        OP_COUNT.release.inc();
        match pool.release(&id) {
            Ok(()) => (
                StatusCode::OK,
                Json(MessageBody::new("Key is unblocked again")),
            )
                .into_response(),
            Err(err) => not_found(err),
        }
    }

    pub(crate) async fn keep_alive(
        Extension(pool): Extension<KeyPool>,
        Path(id): Path<String>,
    ) -> axum::response::Response {
        OP_COUNT.keepalive.inc();
        match pool.keep_alive(&id) {
            Ok(()) => (
                StatusCode::OK,
                Json(MessageBody::new("Key is alive again")),
            )
                .into_response(),
            Err(err) => not_found(err),
        }
    }

    /// every pool error surfaces to clients as a 404 with the error text
    fn not_found(err: PoolError) -> axum::response::Response {
        (
            StatusCode::NOT_FOUND,
            Json(ErrorBody {
                error: err.to_string(),
            }),
        )
            .into_response()
    }

    pub(crate) async fn metrics() -> ServerResult<impl IntoResponse> {
        UPTIME.set(START_TIME.elapsed().as_secs() as i64);
        let encoder = ProtobufEncoder::new();
        let mut buf = Vec::new();
        let mf = prometheus::gather();
        let resp = Response::builder().header(header::CONTENT_TYPE, encoder.format_type());

        match encoder.encode(&mf, &mut buf) {
            Err(err) => {
                error!(?err, "error protobuf encoding prometheus metrics");
                Ok(resp
                    .status(StatusCode::INTERNAL_SERVER_ERROR)
                    .body(Body::empty())?)
            }
            Ok(_) => Ok(resp.status(StatusCode::OK).body(Body::from(buf))?),
        }
    }

    pub(crate) async fn metrics_text() -> ServerResult<impl IntoResponse> {
        UPTIME.set(START_TIME.elapsed().as_secs() as i64);
        let encoder = TextEncoder::new();
        let mut buf = String::new();
        let mf = prometheus::gather();
        let resp = Response::builder().header(header::CONTENT_TYPE, encoder.format_type());

        match encoder.encode_utf8(&mf, &mut buf) {
            Err(err) => {
                error!(?err, "error text encoding prometheus metrics");
                Ok(resp
                    .status(StatusCode::INTERNAL_SERVER_ERROR)
                    .body(Body::empty())?)
            }
            Ok(_) => Ok(resp.status(StatusCode::OK).body(Body::from(buf))?),
        }
    }

    pub(crate) async fn ping() -> impl IntoResponse {
        StatusCode::OK
    }
}

/// Various models for API responses
pub mod models {
    use axum::response::IntoResponse;
    use parking_lot::Mutex;
    use serde::{Deserialize, Serialize};
    use std::{fmt, sync::Arc};

    /// The overall health of the system
    pub type State = Arc<Mutex<Health>>;
    /// Health is binary Good/Bad at the moment
    #[derive(Serialize, Deserialize, Debug, PartialEq, Copy, Clone, Eq)]
    #[serde(rename_all = "UPPERCASE")]
    pub enum Health {
        /// Report good health
        Good,
        /// Report bad health
        Bad,
    }

    impl fmt::Display for Health {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(
                f,
                "{}",
                match *self {
                    Health::Good => "GOOD",
                    Health::Bad => "BAD",
                }
            )
        }
    }

    pub(crate) fn blank_health() -> State {
        Arc::new(Mutex::new(Health::Bad))
    }

    /// Body returned by create & checkout
    #[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
    #[serde(rename_all = "camelCase")]
    pub struct KeyIdBody {
        /// id of the key minted or checked out
        pub key_id: String,
    }

    /// Body returned by operations that only acknowledge
    #[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
    pub struct MessageBody {
        /// human-readable acknowledgement
        pub message: String,
    }

    impl MessageBody {
        pub(crate) fn new(message: impl Into<String>) -> Self {
            Self {
                message: message.into(),
            }
        }
    }

    /// Body carried by every 404
    #[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
    pub struct ErrorBody {
        /// why the operation failed
        pub error: String,
    }

    // error type
    /// Make our own error that wraps `anyhow::Error`.
    #[derive(Debug)]
    pub struct ServerError(anyhow::Error);
    /// return error result
    pub type ServerResult<T> = Result<T, ServerError>;

    impl IntoResponse for ServerError {
        fn into_response(self) -> axum::response::Response {
            (
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                format!("{}", self.0),
            )
                .into_response()
        }
    }

    impl<E> From<E> for ServerError
    where
        E: Into<anyhow::Error>,
    {
        fn from(err: E) -> Self {
            Self(err.into())
        }
    }
}
