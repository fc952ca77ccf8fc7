//! Onboard controller: capture, classify, overlay, stream, and drive.
//!
//! The module is split into focused submodules:
//! - `config`: CLI configuration parsing and validation.
//! - `pipeline`: The capture loop, its supervisor, and process wiring.
//! - `state`: The shared command and classification cells.
//! - `crops`: Static crop reference table.
//! - `annotation`: Text overlays burned into outgoing frames.
//! - `encoding`: JPEG encode and multipart framing.
//! - `data`: Broadcast hub between the capture loop and viewers.
//! - `server`: Actix Web control endpoints.
//! - `watchdog`: Stall detection for the capture loop.
//! - `telemetry`: Tracing subscriber and Prometheus recorder.

/// Re-export settings so callers can configure runs without reaching into
/// submodules.
pub use config::{RoverConfig, ServeArgs};
/// Launch the controller with a ready-made configuration.
pub use pipeline::run;

pub(crate) use config::{TelemetryOptions, parse_labels};
pub(crate) use telemetry::enter_runtime;

mod annotation;
mod config;
mod crops;
mod data;
mod encoding;
mod pipeline;
mod server;
mod state;
mod telemetry;
#[cfg(test)]
mod testing;
mod watchdog;
