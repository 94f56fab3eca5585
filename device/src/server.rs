use std::convert::Infallible;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, RawQuery, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, info_span};
use wellcam_common::config::ServerConfig;

use crate::dispatch::{CommandDispatcher, DispatchError};
use crate::streamer::{ChannelSink, MultipartStreamer};

static INDEX_HTML: &str = include_str!("index.html");

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
    #[error("control port {0} has no stream port above it")]
    NoStreamPort(u16),
    #[error("{listener} listener failed: {source}")]
    Serve {
        listener: &'static str,
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Control listener: `/` and `/action`
// ---------------------------------------------------------------------------

pub fn control_router(dispatcher: CommandDispatcher) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/action", get(action))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(dispatcher))
}

/// GET /
async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// GET /action?go=left|right|flash_on|flash_off
async fn action(
    State(dispatcher): State<Arc<CommandDispatcher>>,
    RawQuery(query): RawQuery,
) -> Response {
    // Servo moves sleep while the horn settles, so keep them off the async workers.
    let result = tokio::task::spawn_blocking(move || dispatcher.dispatch(query.as_deref())).await;

    match result {
        Ok(Ok(_)) => (StatusCode::OK, [(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")]).into_response(),
        Ok(Err(DispatchError::MissingParameter)) => StatusCode::NOT_FOUND.into_response(),
        Ok(Err(DispatchError::UnknownCommand(_))) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        Err(e) => {
            error!(error = %e, "command worker failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

// ---------------------------------------------------------------------------
// Stream listener: `/stream`
// ---------------------------------------------------------------------------

struct StreamState {
    streamer: Arc<MultipartStreamer>,
    channel_depth: usize,
}

pub fn stream_router(streamer: Arc<MultipartStreamer>, channel_depth: usize) -> Router {
    Router::new()
        .route("/stream", get(stream))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(StreamState {
            streamer,
            channel_depth: channel_depth.max(1),
        }))
}

/// GET /stream
///
/// One blocking capture worker per connection feeds the response body until
/// the client leaves or the camera fails.
async fn stream(
    State(state): State<Arc<StreamState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Response {
    let session = SESSION_COUNTER.fetch_add(1, Ordering::Relaxed);
    let (tx, rx) = mpsc::channel::<Bytes>(state.channel_depth);

    let streamer = Arc::clone(&state.streamer);
    let span = info_span!("stream", session, %peer);
    let worker = tokio::task::spawn_blocking(move || {
        let _guard = span.entered();
        info!("stream session started");
        let mut sink = ChannelSink::new(tx);
        streamer.run(&mut sink)
    });
    tokio::spawn(async move {
        match worker.await {
            Ok(summary) => debug!(
                session,
                frames_sent = summary.frames_sent,
                bytes_sent = summary.bytes_sent,
                ended_by = %summary.ended_by,
                "stream session ended"
            ),
            Err(e) => error!(session, error = %e, "stream worker failed"),
        }
    });

    let body = futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|bytes| (Ok::<_, Infallible>(bytes), rx))
    });

    (
        [(header::CONTENT_TYPE, state.streamer.content_type())],
        Body::from_stream(body),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// Listener pair
// ---------------------------------------------------------------------------

/// The control listener on port P and the stream listener on P+1.
pub struct ListenerPair {
    pub control: TcpListener,
    pub stream: TcpListener,
}

impl ListenerPair {
    pub async fn bind(config: &ServerConfig) -> Result<Self, ServerError> {
        let stream_port = config
            .stream_port()
            .ok_or(ServerError::NoStreamPort(config.control_port))?;
        let control = bind_one(&config.bind, config.control_port).await?;
        let stream = bind_one(&config.bind, stream_port).await?;
        Ok(Self { control, stream })
    }

    pub fn local_addrs(&self) -> std::io::Result<(SocketAddr, SocketAddr)> {
        Ok((self.control.local_addr()?, self.stream.local_addr()?))
    }

    /// Serves both listeners until either fails.
    pub async fn serve(self, control: Router, stream: Router) -> Result<(), ServerError> {
        if let Ok((control_addr, stream_addr)) = self.local_addrs() {
            info!(%control_addr, %stream_addr, "listeners ready");
        }

        let control_server = axum::serve(
            self.control,
            control.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .into_future();
        let stream_server = axum::serve(
            self.stream,
            stream.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .into_future();

        tokio::select! {
            res = control_server => res.map_err(|source| ServerError::Serve { listener: "control", source }),
            res = stream_server => res.map_err(|source| ServerError::Serve { listener: "stream", source }),
        }
    }
}

async fn bind_one(host: &str, port: u16) -> Result<TcpListener, ServerError> {
    let addr = format!("{host}:{port}");
    TcpListener::bind(&addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })
}
