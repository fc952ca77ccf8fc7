//! Actix Web control server exposing command intake, the MJPEG stream, and
//! crop telemetry.
//!
//! The server runs on a dedicated thread so the capture loop never shares a
//! runtime with request handling. Handlers only touch the shared cells, the
//! actuator, and the frame hub; none of them drive the camera.

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};

use actix_web::{
    App, HttpResponse, HttpServer,
    error::InternalError,
    http::header,
    web::{self, Bytes},
};
use anyhow::{Context, Result, bail};
use async_stream::stream;
use drive::{Actuator, MotionCommand};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use serde_json::{Map, Value, json};
use tokio::sync::{broadcast::error::RecvError, oneshot};
use tracing::{error, info, warn};

use crate::controller::{
    crops::CropReferenceTable,
    data::FrameHub,
    encoding::STREAM_CONTENT_TYPE,
    state::{CommandRecord, SharedTelemetry},
    telemetry,
};

const SHUTDOWN_TIMEOUT_SECS: u64 = 2;

/// Shared state backing HTTP handlers.
#[derive(Clone)]
pub(crate) struct ServerState {
    pub(crate) telemetry: SharedTelemetry,
    pub(crate) actuator: Arc<Actuator>,
    pub(crate) crops: Arc<CropReferenceTable>,
    pub(crate) frames: FrameHub,
    /// Raised when the controller must stop.
    pub(crate) shutdown: Arc<AtomicBool>,
    /// Raised when a drive write failed; the process exits non-zero.
    pub(crate) drive_fault: Arc<AtomicBool>,
    pub(crate) metrics: Option<&'static PrometheusHandle>,
}

/// Handle for the control server thread.
pub(crate) struct ControlServer {
    local_addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ControlServer {
    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Signal the server to stop and block until the thread exits.
    pub(crate) fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Spawn the control server thread; returns once the listener is bound.
pub(crate) fn spawn_control_server(bind: SocketAddr, state: ServerState) -> Result<ControlServer> {
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<SocketAddr, String>>(1);

    let handle = telemetry::spawn_thread("rover-http", move || {
        let result = actix_web::rt::System::new().block_on(async move {
            let server = match HttpServer::new(move || {
                App::new()
                    .app_data(web::Data::new(state.clone()))
                    .app_data(json_config())
                    .configure(configure)
            })
            .disable_signals()
            .shutdown_timeout(SHUTDOWN_TIMEOUT_SECS)
            .bind(bind)
            {
                Ok(server) => server,
                Err(err) => {
                    let _ = ready_tx.send(Err(err.to_string()));
                    return Ok(());
                }
            };
            let local_addr = server.addrs().first().copied().unwrap_or(bind);
            let server = server.run();
            let _ = ready_tx.send(Ok(local_addr));

            let srv_handle = server.handle();
            actix_web::rt::spawn(async move {
                let _ = shutdown_rx.await;
                srv_handle.stop(true).await;
            });

            server.await
        });
        if let Err(err) = result {
            error!("HTTP server error: {err}");
        }
    })
    .context("Failed to spawn control server thread")?;

    match ready_rx.recv() {
        Ok(Ok(local_addr)) => Ok(ControlServer {
            local_addr,
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        }),
        Ok(Err(err)) => {
            let _ = handle.join();
            bail!("Failed to bind {bind}: {err}");
        }
        Err(_) => {
            let _ = handle.join();
            bail!("Control server thread exited before binding {bind}");
        }
    }
}

/// Register every route. Shared by the real server and the handler tests.
pub(crate) fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(index_route))
        .route("/command", web::post().to(command_handler))
        .route("/video_feed", web::get().to(video_feed_handler))
        .route("/crop_data", web::get().to(crop_data_handler))
        .route("/metrics", web::get().to(metrics_handler));
}

/// Malformed bodies answer 400 with a JSON error and never reach a handler.
pub(crate) fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .content_type_required(false)
        .error_handler(|err, _req| {
            let body = json!({ "error": format!("invalid command body: {err}") });
            InternalError::from_response(err, HttpResponse::BadRequest().json(body)).into()
        })
}

/// A command body must be a JSON object; arrays and scalars are malformed.
type CommandRequest = Map<String, Value>;

#[derive(Serialize)]
struct CommandAck<'a> {
    status: &'static str,
    received: &'a str,
}

/// Accept a command: record it, drive the outputs, echo the raw string.
async fn command_handler(
    body: web::Json<CommandRequest>,
    state: web::Data<ServerState>,
) -> HttpResponse {
    let raw = match body.into_inner().remove("command").unwrap_or(Value::Null) {
        Value::String(raw) => raw,
        Value::Null => String::new(),
        other => other.to_string(),
    };
    let command = MotionCommand::parse(&raw);
    state.telemetry.command.set(CommandRecord {
        raw: raw.clone(),
        command,
    });
    metrics::counter!("rover_commands_total", "command" => command.label()).increment(1);

    let actuator = state.actuator.clone();
    let failure = match web::block(move || actuator.apply(command)).await {
        Ok(Ok(levels)) => {
            info!(received = %raw, %command, a = ?levels.a, b = ?levels.b, "Command applied");
            return HttpResponse::Ok().json(CommandAck {
                status: "success",
                received: &raw,
            });
        }
        Ok(Err(err)) => err.to_string(),
        Err(err) => err.to_string(),
    };

    error!(received = %raw, %command, "Drive write failed: {failure}; shutting down");
    state.drive_fault.store(true, Ordering::SeqCst);
    state.shutdown.store(true, Ordering::SeqCst);
    HttpResponse::InternalServerError().json(json!({ "error": format!("drive failure: {failure}") }))
}

/// Stream annotated frames as MJPEG until the viewer disconnects.
async fn video_feed_handler(state: web::Data<ServerState>) -> HttpResponse {
    let mut frames = state.frames.subscribe();
    info!(viewers = state.frames.subscribers(), "Stream viewer connected");

    let stream = stream! {
        loop {
            match frames.recv().await {
                Ok(chunk) => {
                    yield Ok::<Bytes, actix_web::Error>(chunk.payload);
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Stream viewer fell behind; skipping frames");
                    metrics::counter!("rover_stream_lagged_frames_total").increment(skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    HttpResponse::Ok()
        .insert_header((header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"))
        .insert_header((header::ACCESS_CONTROL_ALLOW_HEADERS, "*"))
        .insert_header((header::ACCESS_CONTROL_ALLOW_METHODS, "GET"))
        .insert_header((header::ACCESS_CONTROL_EXPOSE_HEADERS, "Content-Type"))
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .content_type(STREAM_CONTENT_TYPE)
        .streaming(stream)
}

/// Latest crop with its reference ranges, or 404 when there is none.
async fn crop_data_handler(state: web::Data<ServerState>) -> HttpResponse {
    let classification = state.telemetry.classification.get();
    match classification
        .crop()
        .and_then(|crop| state.crops.lookup(crop))
    {
        Some(entry) => HttpResponse::Ok().json(entry),
        None => HttpResponse::NotFound().json(json!({ "error": "No crop detected" })),
    }
}

async fn index_route() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(crate::html::index::INDEX_HTML)
}

async fn metrics_handler(state: web::Data<ServerState>) -> HttpResponse {
    match state.metrics {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(handle.render()),
        None => HttpResponse::ServiceUnavailable().finish(),
    }
}
