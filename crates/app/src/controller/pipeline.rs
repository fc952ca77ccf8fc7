//! Capture loop, supervisor, and process wiring for the rover controller.
//!
//! One loop owns the camera. Each cycle captures a frame, classifies it,
//! overlays the label and last command, encodes it, and publishes the
//! multipart chunk to every connected viewer. Capture errors end the current
//! run and the supervisor reopens the camera; anything else is fatal.

use std::{
    sync::{
        Arc, Once,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use drive::{Actuator, SimulatedBank};
use image::RgbImage;
use ml_core::ClassificationEngine;
use tracing::{debug, info, warn};
use video_ingest::{CaptureError, FrameSource};

use crate::controller::{
    RoverConfig, annotation,
    crops::CropReferenceTable,
    data::{FrameChunk, FrameHub},
    encoding,
    server::{ServerState, spawn_control_server},
    state::{Classification, SharedTelemetry},
    telemetry,
    watchdog::{HealthComponent, PipelineHealth, WatchdogState, spawn_watchdog},
};

const RESTART_BACKOFF: Duration = Duration::from_secs(1);

/// Steps one frame at a time from capture to an encoded multipart chunk.
pub(crate) struct FramePipeline {
    source: Option<Box<dyn FrameSource>>,
    engine: ClassificationEngine,
    telemetry: SharedTelemetry,
    jpeg_quality: u8,
    sequence: u64,
    health: Arc<PipelineHealth>,
    warming_up: bool,
}

impl FramePipeline {
    pub(crate) fn new(
        engine: ClassificationEngine,
        telemetry: SharedTelemetry,
        jpeg_quality: u8,
        health: Arc<PipelineHealth>,
    ) -> Self {
        Self {
            source: None,
            engine,
            telemetry,
            jpeg_quality,
            sequence: 0,
            health,
            warming_up: false,
        }
    }

    /// Take ownership of the camera. Its resolution must match what the
    /// classifier was built for.
    pub(crate) fn attach_source(&mut self, source: Box<dyn FrameSource>) -> Result<()> {
        let declared = source.resolution();
        let expected = self.engine.capture();
        if declared != expected {
            bail!(
                "Source {} delivers {}x{} frames but the classifier expects {}x{}",
                source.name(),
                declared.0,
                declared.1,
                expected.0,
                expected.1
            );
        }
        debug!(source = source.name(), "frame source attached");
        self.source = Some(source);
        self.warming_up = true;
        Ok(())
    }

    /// Release the camera so it can be reopened.
    pub(crate) fn detach_source(&mut self) {
        if let Some(source) = self.source.take() {
            debug!(source = source.name(), "frame source released");
        }
    }

    pub(crate) fn has_source(&self) -> bool {
        self.source.is_some()
    }

    /// Sequence number of the last chunk produced.
    pub(crate) fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Run one full cycle and return the encoded chunk.
    pub(crate) fn next_chunk(&mut self) -> Result<FrameChunk> {
        let sequence = self.sequence.wrapping_add(1);
        let frame_span = tracing::info_span!(
            "frame",
            frame = sequence,
            captured_at_ms = tracing::field::Empty
        );
        let _frame_guard = frame_span.enter();

        let source = self.source.as_mut().context("no frame source attached")?;
        if std::mem::take(&mut self.warming_up) {
            self.health.enter_with_grace(HealthComponent::Capture);
        } else {
            self.health.enter(HealthComponent::Capture);
        }
        let stage_start = Instant::now();
        let frame = tracing::info_span!("capture.frame", source = source.name())
            .in_scope(|| source.capture())?;
        record_stage(HealthComponent::Capture, stage_start);
        let captured_at_ms = frame.timestamp_ms;
        frame_span.record("captured_at_ms", captured_at_ms);

        let (width, height) = frame.resolution();
        self.health.enter(HealthComponent::Classifier);
        let stage_start = Instant::now();
        let label = tracing::info_span!("classify").in_scope(|| {
            self.engine
                .classify(&frame.data, width, height)
                .map(str::to_owned)
        })?;
        record_stage(HealthComponent::Classifier, stage_start);
        self.telemetry
            .classification
            .set(Classification::Crop(label.clone()));

        let command = self.telemetry.command.get();

        self.health.enter(HealthComponent::Overlay);
        let stage_start = Instant::now();
        let mut image = RgbImage::from_raw(width, height, frame.data)
            .context("frame buffer does not match its resolution")?;
        annotation::burn_in(&mut image, &label, Some(&command.raw));
        record_stage(HealthComponent::Overlay, stage_start);

        self.health.enter(HealthComponent::Encoder);
        let stage_start = Instant::now();
        let jpeg = tracing::info_span!("encode", quality = self.jpeg_quality)
            .in_scope(|| encoding::encode_jpeg(&image, self.jpeg_quality))?;
        record_stage(HealthComponent::Encoder, stage_start);

        self.sequence = sequence;
        metrics::counter!("rover_frames_total").increment(1);
        metrics::histogram!("rover_frame_age_seconds")
            .record(frame_age(captured_at_ms, Utc::now().timestamp_millis()).as_secs_f64());
        Ok(FrameChunk {
            sequence,
            payload: encoding::multipart_part(&jpeg, sequence),
        })
    }
}

/// Time from capture to publish. Clamped at zero when the wall clock steps
/// backwards mid-frame.
fn frame_age(captured_at_ms: i64, now_ms: i64) -> Duration {
    Duration::from_millis(now_ms.saturating_sub(captured_at_ms).max(0) as u64)
}

fn record_stage(stage: HealthComponent, started: Instant) {
    metrics::histogram!("rover_stage_latency_seconds", "stage" => stage.label())
        .record(started.elapsed().as_secs_f64());
}

/// Produce and publish chunks until `running` clears or shutdown is requested.
pub(crate) fn run_capture_loop(
    pipeline: &mut FramePipeline,
    hub: &FrameHub,
    running: &AtomicBool,
    shutdown: &AtomicBool,
) -> Result<()> {
    let mut smoothed_fps = 0.0f64;
    let mut last_instant = Instant::now();

    while running.load(Ordering::Relaxed) && !shutdown.load(Ordering::Relaxed) {
        let chunk = pipeline.next_chunk()?;
        let sequence = chunk.sequence;
        let viewers = hub.publish(chunk);

        let now = Instant::now();
        let elapsed = now.duration_since(last_instant).as_secs_f64();
        last_instant = now;
        if elapsed > 0.0 {
            let instant = 1.0 / elapsed;
            smoothed_fps = if smoothed_fps == 0.0 {
                instant
            } else {
                0.9 * smoothed_fps + 0.1 * instant
            };
        }
        metrics::gauge!("rover_pipeline_fps").set(smoothed_fps);
        metrics::gauge!("rover_stream_subscribers").set(viewers as f64);

        if sequence % 30 == 0 {
            debug!(
                frame = sequence,
                viewers,
                "Capture heartbeat: {:.1} fps",
                smoothed_fps
            );
        }
    }
    Ok(())
}

pub(crate) struct SupervisorSettings {
    pub(crate) max_restarts: u32,
    pub(crate) stall_timeout: Duration,
    pub(crate) backoff: Duration,
}

/// Keep the capture loop running, reopening the source after capture errors.
///
/// `reopen` is called whenever the pipeline has no source. The attempt counter
/// resets whenever a run produced at least one frame.
pub(crate) fn supervise<F>(
    pipeline: &mut FramePipeline,
    hub: &FrameHub,
    shutdown: &Arc<AtomicBool>,
    settings: &SupervisorSettings,
    mut reopen: F,
) -> Result<()>
where
    F: FnMut() -> Result<Box<dyn FrameSource>, CaptureError>,
{
    let mut attempt: u32 = 0;
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return Ok(());
        }

        if !pipeline.has_source() {
            match reopen() {
                Ok(source) => pipeline.attach_source(source)?,
                Err(err) => {
                    register_failure(
                        &mut attempt,
                        settings.max_restarts,
                        &format!("reopen failed: {err}"),
                    )?;
                    wait_or_shutdown(shutdown, settings.backoff);
                    continue;
                }
            }
        }

        let running = Arc::new(AtomicBool::new(true));
        let watchdog_state = Arc::new(WatchdogState::new());
        let watchdog = spawn_watchdog(
            pipeline.health.clone(),
            running.clone(),
            shutdown.clone(),
            watchdog_state.clone(),
            settings.stall_timeout,
        )
        .context("Failed to spawn watchdog thread")?;

        let first_sequence = pipeline.sequence();
        let result = tracing::info_span!("capture.run", attempt)
            .in_scope(|| run_capture_loop(pipeline, hub, &running, shutdown));
        pipeline.health.park();
        watchdog_state.acknowledge();
        running.store(false, Ordering::SeqCst);
        let _ = watchdog.join();

        if pipeline.sequence() != first_sequence {
            attempt = 0;
        }

        let reason = match result {
            Err(err) => match err.downcast_ref::<CaptureError>() {
                Some(capture) => capture.to_string(),
                None => return Err(err.context("Capture loop failed")),
            },
            Ok(()) => match watchdog_state.reason() {
                Some(stage) if watchdog_state.is_triggered() => {
                    format!("{} stage stalled", stage.label())
                }
                _ => return Ok(()),
            },
        };
        if shutdown.load(Ordering::SeqCst) {
            return Ok(());
        }

        pipeline.detach_source();
        register_failure(&mut attempt, settings.max_restarts, &reason)?;
        wait_or_shutdown(shutdown, settings.backoff);
    }
}

fn register_failure(attempt: &mut u32, max_restarts: u32, reason: &str) -> Result<()> {
    *attempt = attempt.saturating_add(1);
    metrics::counter!("rover_capture_restarts_total").increment(1);
    if *attempt > max_restarts {
        bail!("Capture failed {attempt} times in a row (last: {reason}); giving up");
    }
    warn!("Capture run ended ({reason}); reopening source, attempt {attempt}/{max_restarts}");
    Ok(())
}

fn wait_or_shutdown(shutdown: &AtomicBool, total: Duration) {
    let deadline = Instant::now() + total;
    while !shutdown.load(Ordering::Relaxed) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep((deadline - now).min(Duration::from_millis(50)));
    }
}

/// Run the rover controller until Ctrl+C, a fatal pipeline error, or a drive
/// failure.
pub fn run(config: RoverConfig) -> Result<()> {
    static CTRL_HANDLER: Once = Once::new();

    let _telemetry_guard = telemetry::enter_runtime(&config.telemetry, config.verbose);
    let metrics_handle = telemetry::init_metrics_recorder();
    let pipeline_span = tracing::info_span!(
        "rover.pipeline",
        source = %config.camera_uri,
        width = config.width,
        height = config.height,
        model_input = config.model_input,
        backend = tracing::field::Empty,
        bind = %config.bind
    );
    let _pipeline_span_guard = pipeline_span.enter();

    let shutdown = Arc::new(AtomicBool::new(false));
    let handler_shutdown = shutdown.clone();
    CTRL_HANDLER.call_once(move || {
        if let Err(err) = ctrlc::set_handler(move || {
            handler_shutdown.store(true, Ordering::SeqCst);
        }) {
            warn!("Failed to install Ctrl+C handler: {err}");
        }
    });

    let crops = match config.crop_table_path.as_deref() {
        Some(path) => CropReferenceTable::from_json_file(path)?,
        None => CropReferenceTable::builtin(),
    };
    for label in &config.labels {
        if crops.lookup(label).is_none() {
            warn!(label = %label, "no crop reference entry; /crop_data will answer 404 for it");
        }
    }

    let engine = build_engine(&config)?;
    pipeline_span.record("backend", engine.backend_name());
    info!(
        backend = engine.backend_name(),
        labels = ?engine.labels(),
        input = engine.input_side(),
        "Classifier ready"
    );

    let source = video_ingest::open_source(&config.camera_uri, config.capture_size())
        .with_context(|| format!("Failed to open video source {}", config.camera_uri))?;

    let actuator = Arc::new(build_actuator(&config)?);
    actuator
        .stop()
        .context("Failed to drive outputs to idle at startup")?;

    let shared = SharedTelemetry::new();
    let hub = FrameHub::new(config.stream_buffer);
    let health = Arc::new(PipelineHealth::new());
    let mut pipeline = FramePipeline::new(engine, shared.clone(), config.jpeg_quality, health);
    pipeline.attach_source(source)?;

    let drive_fault = Arc::new(AtomicBool::new(false));
    let server = spawn_control_server(
        config.bind,
        ServerState {
            telemetry: shared,
            actuator: actuator.clone(),
            crops: Arc::new(crops),
            frames: hub.clone(),
            shutdown: shutdown.clone(),
            drive_fault: drive_fault.clone(),
            metrics: metrics_handle,
        },
    )
    .context("Failed to start HTTP server")?;
    info!(
        "Rover controller listening on http://{} (press Ctrl+C to stop)",
        server.local_addr()
    );

    let settings = SupervisorSettings {
        max_restarts: config.max_restarts,
        stall_timeout: config.stall_timeout,
        backoff: RESTART_BACKOFF,
    };
    let outcome = supervise(&mut pipeline, &hub, &shutdown, &settings, || {
        video_ingest::open_source(&config.camera_uri, config.capture_size())
    });

    info!("Stopping rover controller");
    shutdown.store(true, Ordering::SeqCst);
    pipeline.detach_source();
    server.stop();
    let parked = actuator.stop();

    outcome?;
    if drive_fault.load(Ordering::SeqCst) {
        bail!("Drive output failed; controller stopped");
    }
    parked.context("Failed to drive outputs to idle on shutdown")?;
    Ok(())
}

fn build_engine(config: &RoverConfig) -> Result<ClassificationEngine> {
    let backend = ml_core::load_backend(&config.model_path, config.model_input)
        .with_context(|| format!("Failed to load model {}", config.model_path.display()))?;
    ClassificationEngine::new(
        backend,
        config.labels.clone(),
        config.model_input,
        config.capture_size(),
    )
    .context("Model does not fit the configured labels and input size")
}

#[cfg(feature = "rpi")]
fn build_actuator(config: &RoverConfig) -> Result<Actuator> {
    if config.dry_run {
        return Ok(simulated_actuator());
    }
    let bank = drive::GpioBank::open(config.pins, config.speed)
        .context("Failed to open GPIO drive outputs")?;
    Ok(Actuator::new(Box::new(bank)))
}

#[cfg(not(feature = "rpi"))]
fn build_actuator(config: &RoverConfig) -> Result<Actuator> {
    if !config.dry_run {
        warn!("Built without GPIO support; drive outputs are simulated");
    }
    Ok(simulated_actuator())
}

fn simulated_actuator() -> Actuator {
    let (bank, _probe) = SimulatedBank::new();
    Actuator::new(Box::new(bank))
}

#[cfg(test)]
mod tests {
    use tokio::sync::broadcast::error::TryRecvError;

    use super::*;
    use crate::controller::{
        annotation::{COMMAND_ORIGIN, CROP_ORIGIN, text_box},
        encoding::split_part,
        state::CommandRecord,
        testing::{UniformSource, fixed_engine},
    };

    const SIZE: (u32, u32) = (64, 48);

    fn pipeline(winner: &str, size: (u32, u32)) -> (FramePipeline, SharedTelemetry) {
        let telemetry = SharedTelemetry::new();
        let pipeline = FramePipeline::new(
            fixed_engine(winner, size),
            telemetry.clone(),
            85,
            Arc::new(PipelineHealth::new()),
        );
        (pipeline, telemetry)
    }

    fn settings(max_restarts: u32) -> SupervisorSettings {
        SupervisorSettings {
            max_restarts,
            stall_timeout: Duration::from_secs(5),
            backoff: Duration::from_millis(10),
        }
    }

    fn drain(rx: &mut tokio::sync::broadcast::Receiver<FrameChunk>) -> Vec<u64> {
        let mut seen = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(chunk) => seen.push(chunk.sequence),
                Err(TryRecvError::Empty | TryRecvError::Closed) => return seen,
                Err(TryRecvError::Lagged(_)) => continue,
            }
        }
    }

    #[test]
    fn chunk_is_a_multipart_jpeg_part() {
        let (mut pipeline, _) = pipeline("maize", SIZE);
        pipeline
            .attach_source(Box::new(UniformSource::new(SIZE, [90, 90, 90])))
            .unwrap();

        let first = pipeline.next_chunk().unwrap();
        let second = pipeline.next_chunk().unwrap();
        assert_eq!((first.sequence, second.sequence), (1, 2));
        assert!(first.payload.starts_with(b"--frame\r\n"));
        assert!(first.payload.ends_with(b"\r\n"));
        let (sequence, jpeg) = split_part(&first.payload).unwrap();
        assert_eq!(sequence, 1);
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn frame_age_counts_from_capture_and_never_goes_negative() {
        assert_eq!(frame_age(1_000, 1_250), Duration::from_millis(250));
        assert_eq!(frame_age(1_000, 1_000), Duration::ZERO);
        assert_eq!(frame_age(5_000, 4_000), Duration::ZERO);
    }

    #[test]
    fn each_cycle_overwrites_the_classification() {
        let (mut pipeline, telemetry) = pipeline("wheat", SIZE);
        assert_eq!(telemetry.classification.get(), Classification::None);
        pipeline
            .attach_source(Box::new(UniformSource::new(SIZE, [0, 0, 0])))
            .unwrap();
        pipeline.next_chunk().unwrap();
        assert_eq!(
            telemetry.classification.get(),
            Classification::Crop("wheat".into())
        );
    }

    #[test]
    fn decoded_frame_keeps_resolution_and_both_overlays() {
        let size = (640, 480);
        let (mut pipeline, telemetry) = pipeline("rice", size);
        telemetry.command.set(CommandRecord {
            raw: "Turning Left".into(),
            command: drive::MotionCommand::TurnLeft,
        });
        pipeline
            .attach_source(Box::new(UniformSource::new(size, [30, 30, 30])))
            .unwrap();

        let chunk = pipeline.next_chunk().unwrap();
        let (_, jpeg) = split_part(&chunk.payload).unwrap();
        let decoded = image::load_from_memory(jpeg).unwrap().to_rgb8();
        assert_eq!(decoded.dimensions(), size);

        let count = |(left, top, right, bottom): annotation::TextBox,
                     hit: &dyn Fn([u8; 3]) -> bool| {
            (top..=bottom)
                .flat_map(|y| (left..=right).map(move |x| (x as u32, y as u32)))
                .filter(|&(x, y)| hit(decoded.get_pixel(x, y).0))
                .count()
        };
        let greenish = |[r, g, b]: [u8; 3]| g > 120 && g > r.saturating_add(50) && g > b.saturating_add(50);
        let reddish = |[r, g, b]: [u8; 3]| r > 120 && r > g.saturating_add(50) && r > b.saturating_add(50);

        let crop_box = text_box(CROP_ORIGIN, "Crop: rice");
        let command_box = text_box(COMMAND_ORIGIN, "Command: Turning Left");
        assert!(count(crop_box, &greenish) > 30);
        assert!(count(command_box, &reddish) > 30);
        assert_eq!(count(crop_box, &reddish), 0);
    }

    #[test]
    fn mismatched_source_is_rejected() {
        let (mut pipeline, _) = pipeline("rice", SIZE);
        let err = pipeline
            .attach_source(Box::new(UniformSource::new((32, 24), [0, 0, 0])))
            .unwrap_err();
        assert!(err.to_string().contains("32x24"));
        assert!(!pipeline.has_source());
    }

    #[tokio::test]
    async fn subscribers_share_one_capture_per_frame() {
        let (mut pipeline, _) = pipeline("jute", SIZE);
        let source = UniformSource::new(SIZE, [200, 10, 10]).failing_after(5);
        let captures = source.counter();
        pipeline.attach_source(Box::new(source)).unwrap();

        let hub = FrameHub::new(16);
        let mut viewers: Vec<_> = (0..3).map(|_| hub.subscribe()).collect();
        let running = AtomicBool::new(true);
        let shutdown = AtomicBool::new(false);

        let err = run_capture_loop(&mut pipeline, &hub, &running, &shutdown).unwrap_err();
        assert!(err.downcast_ref::<CaptureError>().is_some());
        assert_eq!(captures.load(Ordering::SeqCst), 5);

        for viewer in &mut viewers {
            let mut seen = Vec::new();
            for _ in 0..5 {
                seen.push(viewer.recv().await.unwrap().sequence);
            }
            assert_eq!(seen, vec![1, 2, 3, 4, 5]);
        }
    }

    #[test]
    fn supervisor_gives_up_after_bounded_reopens() {
        let (mut pipeline, _) = pipeline("rice", SIZE);
        pipeline
            .attach_source(Box::new(UniformSource::new(SIZE, [0, 0, 0]).failing_after(2)))
            .unwrap();
        let hub = FrameHub::new(16);
        let mut rx = hub.subscribe();
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut reopens = 0;

        let err = supervise(&mut pipeline, &hub, &shutdown, &settings(2), || {
            reopens += 1;
            Err(CaptureError::Open {
                uri: "gone".into(),
            })
        })
        .unwrap_err();

        assert!(err.to_string().contains("giving up"));
        assert_eq!(reopens, 2);
        assert_eq!(drain(&mut rx), vec![1, 2]);
    }

    #[test]
    fn supervisor_reopens_and_keeps_sequence_running() {
        let (mut pipeline, _) = pipeline("rice", SIZE);
        pipeline
            .attach_source(Box::new(UniformSource::new(SIZE, [0, 0, 0]).failing_after(2)))
            .unwrap();
        let hub = FrameHub::new(16);
        let mut rx = hub.subscribe();
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut reopens = 0;

        let result = supervise(&mut pipeline, &hub, &shutdown, &settings(1), || {
            reopens += 1;
            if reopens == 1 {
                Ok(Box::new(UniformSource::new(SIZE, [0, 0, 0]).failing_after(3))
                    as Box<dyn FrameSource>)
            } else {
                Err(CaptureError::Open {
                    uri: "gone".into(),
                })
            }
        });

        assert!(result.is_err());
        assert_eq!(reopens, 2);
        assert_eq!(drain(&mut rx), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn supervisor_returns_immediately_on_shutdown() {
        let (mut pipeline, _) = pipeline("rice", SIZE);
        let hub = FrameHub::new(4);
        let shutdown = Arc::new(AtomicBool::new(true));
        supervise(&mut pipeline, &hub, &shutdown, &settings(0), || {
            panic!("no reopen after shutdown")
        })
        .unwrap();
    }
}
