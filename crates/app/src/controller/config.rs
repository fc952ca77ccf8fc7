//! Configuration parsing for the rover controller.
//!
//! This module owns translation of CLI arguments into a `RoverConfig` which
//! downstream stages use without re-parsing flags. Everything that must agree
//! across stages (capture size, model input, label set) is validated here,
//! once, before any hardware is touched.

use std::{
    collections::HashSet,
    net::SocketAddr,
    path::PathBuf,
    time::Duration,
};

use anyhow::{Context, Result, anyhow, bail};
use clap::Args;
use drive::{PinAssignment, SpeedSetting};

/// Crop identifiers in the order the classifier was trained with.
pub const DEFAULT_CROP_LABELS: [&str; 5] = ["jute", "maize", "rice", "sugarcane", "wheat"];

#[derive(Clone, Debug)]
/// Canonical configuration shared by every stage of the controller.
pub struct RoverConfig {
    /// Camera URI, device index, or `test-pattern`.
    pub camera_uri: String,
    /// Capture width every frame is delivered at.
    pub width: u32,
    /// Capture height every frame is delivered at.
    pub height: u32,
    /// Classifier model path.
    pub model_path: PathBuf,
    /// Labels matching the model's output order.
    pub labels: Vec<String>,
    /// Square side the classifier consumes.
    pub model_input: u32,
    /// JPEG quality for streamed frames.
    pub jpeg_quality: u8,
    /// Address the HTTP surface listens on.
    pub bind: SocketAddr,
    /// Optional JSON override of the built-in crop table.
    pub crop_table_path: Option<PathBuf>,
    /// Drive pin numbering.
    pub pins: PinAssignment,
    /// Enable-line PWM, fixed for the process lifetime.
    pub speed: SpeedSetting,
    /// Use simulated drive outputs even when GPIO support is compiled in.
    pub dry_run: bool,
    /// Frames buffered per stream viewer before it starts skipping.
    pub stream_buffer: usize,
    /// Camera reopen attempts before the controller gives up.
    pub max_restarts: u32,
    /// Time a pipeline stage may run before the watchdog flags it.
    pub stall_timeout: Duration,
    /// Emit per-frame debug logging.
    pub verbose: bool,
    /// Tracing and instrumentation options.
    pub telemetry: TelemetryOptions,
}

#[derive(Clone, Debug, Default)]
/// Optional telemetry knobs for tracing.
pub struct TelemetryOptions {
    /// Write a Chrome trace JSON file capturing pipeline spans.
    pub chrome_trace_path: Option<PathBuf>,
}

/// CLI arguments accepted by the `serve` subcommand.
#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Camera URI, device index, or `test-pattern`.
    #[arg(long = "source", value_name = "URI", default_value = "0")]
    pub source: String,
    /// Classifier model (`.onnx`, or `.pt` with the `with-tch` feature).
    #[arg(long = "model", value_name = "PATH")]
    pub model: PathBuf,
    /// Comma-separated labels in model output order.
    #[arg(long = "labels", value_name = "LIST", value_delimiter = ',')]
    pub labels: Option<Vec<String>>,
    /// Capture width in pixels.
    #[arg(long = "width", value_name = "PX", default_value_t = 640)]
    pub width: u32,
    /// Capture height in pixels.
    #[arg(long = "height", value_name = "PX", default_value_t = 480)]
    pub height: u32,
    /// Square model input side in pixels.
    #[arg(long = "model-input", value_name = "PX", default_value_t = 150)]
    pub model_input: u32,
    /// JPEG quality used by the encoder (1-100).
    #[arg(long = "jpeg-quality", value_name = "QUALITY", default_value_t = 85)]
    pub jpeg_quality: u8,
    /// Listen address for the HTTP surface.
    #[arg(long = "bind", value_name = "ADDR", default_value = "0.0.0.0:5000")]
    pub bind: String,
    /// JSON file replacing the built-in crop reference table.
    #[arg(long = "crop-table", value_name = "PATH")]
    pub crop_table: Option<PathBuf>,
    /// Drive pins as `a_in1,a_in2,a_enable,b_in1,b_in2,b_enable` (BCM).
    #[arg(long = "pins", value_name = "LIST", value_delimiter = ',')]
    pub pins: Option<Vec<u8>>,
    /// Enable-line duty cycle (0.0-1.0).
    #[arg(long = "duty-cycle", value_name = "RATIO", default_value_t = 0.75)]
    pub duty_cycle: f64,
    /// Enable-line PWM frequency in Hz.
    #[arg(long = "pwm-frequency", value_name = "HZ", default_value_t = 1000.0)]
    pub pwm_frequency: f64,
    /// Simulate drive outputs instead of touching GPIO.
    #[arg(long = "dry-run", action = clap::ArgAction::SetTrue)]
    pub dry_run: bool,
    /// Frames buffered per stream viewer.
    #[arg(long = "stream-buffer", value_name = "N", default_value_t = 16)]
    pub stream_buffer: usize,
    /// Camera reopen attempts after capture failures.
    #[arg(long = "max-restarts", value_name = "N", default_value_t = 5)]
    pub max_restarts: u32,
    /// Milliseconds a pipeline stage may take before it counts as stalled.
    #[arg(long = "stall-timeout-ms", value_name = "MS", default_value_t = 5000)]
    pub stall_timeout_ms: u64,
    /// Enable verbose per-frame logging.
    #[arg(long = "verbose", action = clap::ArgAction::SetTrue)]
    pub verbose: bool,
    /// Emit Chrome trace JSON for post-mortem analysis.
    #[arg(long = "chrome-trace", value_name = "PATH")]
    pub chrome_trace: Option<PathBuf>,
}

impl TryFrom<ServeArgs> for RoverConfig {
    type Error = anyhow::Error;

    fn try_from(args: ServeArgs) -> Result<Self> {
        if args.width == 0 || args.height == 0 {
            bail!("Capture width and height must be positive integers");
        }
        if args.model_input == 0 {
            bail!("--model-input must be a positive integer");
        }
        if !(1..=100).contains(&args.jpeg_quality) {
            bail!("--jpeg-quality must be an integer between 1 and 100");
        }
        if args.stream_buffer == 0 {
            bail!("--stream-buffer must be at least 1");
        }
        if args.stall_timeout_ms < 500 {
            bail!("--stall-timeout-ms must be at least 500");
        }

        let labels = parse_labels(args.labels)?;
        let bind = args
            .bind
            .parse::<SocketAddr>()
            .with_context(|| format!("--bind {:?} is not a socket address", args.bind))?;
        let pins = match args.pins {
            Some(list) => parse_pins(&list)?,
            None => PinAssignment::default(),
        };
        let speed = SpeedSetting::new(args.duty_cycle, args.pwm_frequency)
            .map_err(|err| anyhow!("{err}"))?;

        Ok(Self {
            camera_uri: args.source,
            width: args.width,
            height: args.height,
            model_path: args.model,
            labels,
            model_input: args.model_input,
            jpeg_quality: args.jpeg_quality,
            bind,
            crop_table_path: args.crop_table,
            pins,
            speed,
            dry_run: args.dry_run,
            stream_buffer: args.stream_buffer,
            max_restarts: args.max_restarts,
            stall_timeout: Duration::from_millis(args.stall_timeout_ms),
            verbose: args.verbose,
            telemetry: TelemetryOptions {
                chrome_trace_path: args.chrome_trace,
            },
        })
    }
}

impl RoverConfig {
    pub fn capture_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Trimmed, non-empty, unique labels; the crop list when none are given.
pub(crate) fn parse_labels(labels: Option<Vec<String>>) -> Result<Vec<String>> {
    let labels: Vec<String> = match labels {
        Some(list) => list.into_iter().map(|l| l.trim().to_string()).collect(),
        None => DEFAULT_CROP_LABELS.iter().map(|l| l.to_string()).collect(),
    };
    if labels.is_empty() || labels.iter().any(|l| l.is_empty()) {
        bail!("--labels must list at least one non-empty label");
    }
    let mut seen = HashSet::new();
    if let Some(dup) = labels.iter().find(|l| !seen.insert(l.as_str())) {
        bail!("--labels contains {dup:?} twice");
    }
    Ok(labels)
}

fn parse_pins(list: &[u8]) -> Result<PinAssignment> {
    let [a_in1, a_in2, a_enable, b_in1, b_in2, b_enable] = list else {
        bail!("--pins expects six BCM numbers, got {}", list.len());
    };
    let pins = PinAssignment {
        a_in1: *a_in1,
        a_in2: *a_in2,
        a_enable: *a_enable,
        b_in1: *b_in1,
        b_in2: *b_in2,
        b_enable: *b_enable,
    };
    let mut seen = HashSet::new();
    if !list.iter().all(|pin| seen.insert(*pin)) {
        bail!("--pins assigns the same pin twice");
    }
    Ok(pins)
}
