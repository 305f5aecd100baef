//! The capture loop.
//!
//! One long-lived thread pulls frames from the camera, runs recognition on a
//! throttled subset of them, applies the single session transition each tick
//! implies, and publishes an annotated JPEG for the video feed. Recognition
//! failures are absorbed as "no match this tick"; only a dead camera (after
//! bounded retry with backoff) stops the loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use rand::Rng;

use crate::errors::DeviceError;
use crate::frame::{select_primary_region, Frame};
use crate::ingest::FrameSource;
use crate::publish::FramePublisher;
use crate::recognize::Recognizer;
use crate::registry::FaceRegistry;
use crate::render::{
    DisplayFrame, COLOR_FROZEN, COLOR_GUIDE, COLOR_MATCHED, COLOR_SEARCHING, COLOR_UNMATCHED,
};
use crate::session::{MatchResult, Mode, SessionStateMachine};

#[derive(Clone, Debug)]
pub struct CaptureConfig {
    /// Run detection/embedding on every Nth frame; the stream itself never
    /// skips a frame.
    pub detect_every: u32,
    /// Match distance at or below which authentication succeeds.
    pub match_threshold: f32,
    /// Pace the loop to this rate; 0 disables pacing.
    pub target_fps: u32,
    /// JPEG quality for the published stream.
    pub jpeg_quality: u8,
    /// Capture attempts before a device failure becomes fatal.
    pub device_retries: u32,
    /// Base backoff between capture retries (doubles per attempt).
    pub retry_backoff: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            detect_every: 3,
            match_threshold: 0.55,
            target_fps: 10,
            jpeg_quality: 80,
            device_retries: 5,
            retry_backoff: Duration::from_millis(100),
        }
    }
}

/// Handle to the running capture thread.
pub struct CaptureHandle {
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<Result<(), DeviceError>>>,
}

impl CaptureHandle {
    /// Ask the loop to stop after the current tick.
    pub fn request_stop(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Stop the loop and wait for the thread. Returns the loop's exit
    /// status; `Err` means the camera died.
    pub fn stop(mut self) -> anyhow::Result<()> {
        self.request_stop();
        match self.join.take() {
            Some(join) => join
                .join()
                .map_err(|_| anyhow!("capture thread panicked"))?
                .map_err(Into::into),
            None => Ok(()),
        }
    }

    /// Whether the capture thread has exited.
    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, |join| join.is_finished())
    }
}

pub struct CaptureLoop {
    source: Box<dyn FrameSource>,
    recognizer: Recognizer,
    session: Arc<SessionStateMachine>,
    registry: Arc<FaceRegistry>,
    publisher: Arc<FramePublisher>,
    config: CaptureConfig,
    tick: u64,
    /// Cached frozen-review JPEG, keyed by capture id.
    frozen_cache: Option<(u64, Vec<u8>)>,
}

impl CaptureLoop {
    pub fn new(
        source: Box<dyn FrameSource>,
        recognizer: Recognizer,
        session: Arc<SessionStateMachine>,
        registry: Arc<FaceRegistry>,
        publisher: Arc<FramePublisher>,
        config: CaptureConfig,
    ) -> Self {
        Self {
            source,
            recognizer,
            session,
            registry,
            publisher,
            config,
            tick: 0,
            frozen_cache: None,
        }
    }

    /// Start the capture thread.
    pub fn spawn(self) -> anyhow::Result<CaptureHandle> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);
        let join = std::thread::Builder::new()
            .name("capture".to_string())
            .spawn(move || self.run(&flag))
            .map_err(|e| anyhow!("failed to spawn capture thread: {}", e))?;
        Ok(CaptureHandle {
            shutdown,
            join: Some(join),
        })
    }

    /// Run until shutdown or fatal device failure. Releases the camera and
    /// closes the publisher on every exit path.
    pub fn run(mut self, shutdown: &AtomicBool) -> Result<(), DeviceError> {
        log::info!(
            "capture loop running: device={} backend={} detect_every={}",
            self.source.describe(),
            self.recognizer.name(),
            self.config.detect_every
        );
        let result = self.run_inner(shutdown);
        self.source.release();
        self.publisher.close();
        if let Err(err) = &result {
            log::error!("capture loop stopped: {}", err);
        } else {
            log::info!("capture loop stopped");
        }
        result
    }

    fn run_inner(&mut self, shutdown: &AtomicBool) -> Result<(), DeviceError> {
        let frame_interval = if self.config.target_fps == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(1000 / self.config.target_fps.max(1) as u64)
        };

        loop {
            if shutdown.load(Ordering::SeqCst) {
                return Ok(());
            }
            let started = Instant::now();

            if self.publish_frozen_review() {
                // Review in progress: the frozen frame stays on the stream.
                pace(frame_interval, started);
                continue;
            }

            let Some(frame) = self.next_frame_with_retry(shutdown)? else {
                return Ok(());
            };
            self.tick += 1;
            let run_recognition = (self.tick - 1) % self.config.detect_every.max(1) as u64 == 0;
            match self.process_frame(frame, run_recognition) {
                Ok(jpeg) => self.publisher.publish(jpeg),
                Err(err) => log::warn!("frame processing failed: {:#}", err),
            }

            pace(frame_interval, started);
        }
    }

    /// Render and publish the cached review frame when a capture is frozen.
    /// Returns whether review is in progress.
    fn publish_frozen_review(&mut self) -> bool {
        let rendered = self.session.with_captured(|captured| {
            let captured = captured?;
            if let Some((id, jpeg)) = &self.frozen_cache {
                if *id == captured.id {
                    return Some((*id, jpeg.clone()));
                }
            }
            let mut display = DisplayFrame::from_frame(&captured.frame);
            let guide = display.guide_box();
            display.draw_box(&guide, COLOR_GUIDE);
            display.draw_box(&captured.region, COLOR_FROZEN);
            match display.encode_jpeg(self.config.jpeg_quality) {
                Ok(jpeg) => Some((captured.id, jpeg)),
                Err(err) => {
                    log::warn!("failed to encode frozen frame: {:#}", err);
                    None
                }
            }
        });

        match rendered {
            Some((id, jpeg)) => {
                self.frozen_cache = Some((id, jpeg.clone()));
                self.publisher.publish(jpeg);
                true
            }
            None => {
                self.frozen_cache = None;
                false
            }
        }
    }

    /// One tick: detect (when scheduled), apply the implied session
    /// transition, annotate, encode.
    fn process_frame(&mut self, frame: Frame, run_recognition: bool) -> anyhow::Result<Vec<u8>> {
        let mut display = DisplayFrame::from_frame(&frame);
        let guide = display.guide_box();
        display.draw_box(&guide, COLOR_GUIDE);

        if run_recognition {
            match self.session.mode() {
                Mode::Authenticating => self.authenticate_tick(&frame, &mut display),
                Mode::RegistrationCapturing => self.capture_tick(frame, &mut display),
            }
        }

        display.encode_jpeg(self.config.jpeg_quality)
    }

    fn authenticate_tick(&mut self, frame: &Frame, display: &mut DisplayFrame) {
        let regions = match self.recognizer.detect_faces(frame) {
            Ok(regions) => regions,
            Err(err) => {
                log::warn!("detection failed: {:#}", err);
                self.session.record_match(None);
                return;
            }
        };
        let Some(region) = select_primary_region(&regions) else {
            self.session.record_match(None);
            return;
        };

        match self.recognizer.embed(frame, &region) {
            Err(err) => {
                // Low-quality frame; retried next processed tick.
                log::debug!("embedding skipped: {}", err);
                display.draw_box(&region, COLOR_SEARCHING);
                self.session.record_match(None);
            }
            Ok(embedding) => {
                let result = match self.registry.lookup_nearest(&embedding) {
                    None => MatchResult {
                        matched: false,
                        name: None,
                        distance: f32::MAX,
                    },
                    Some((entry, distance)) => {
                        let matched = distance <= self.config.match_threshold;
                        MatchResult {
                            matched,
                            name: matched.then_some(entry.name),
                            distance,
                        }
                    }
                };
                let color = if result.matched {
                    COLOR_MATCHED
                } else {
                    COLOR_UNMATCHED
                };
                display.draw_box(&region, color);
                self.session.record_match(Some(result));
            }
        }
    }

    /// Registration search: freeze the frame when exactly one face of
    /// embeddable quality is present.
    fn capture_tick(&mut self, frame: Frame, display: &mut DisplayFrame) {
        let regions = match self.recognizer.detect_faces(&frame) {
            Ok(regions) => regions,
            Err(err) => {
                log::warn!("detection failed: {:#}", err);
                return;
            }
        };
        if regions.len() != 1 {
            if let Some(region) = select_primary_region(&regions) {
                display.draw_box(&region, COLOR_SEARCHING);
            }
            return;
        }

        let region = regions[0];
        match self.recognizer.embed(&frame, &region) {
            Err(err) => {
                log::debug!("capture candidate rejected: {}", err);
                display.draw_box(&region, COLOR_SEARCHING);
            }
            Ok(embedding) => {
                display.draw_box(&region, COLOR_FROZEN);
                if !self.session.record_capture(frame, region, embedding) {
                    // A concurrent transition beat this tick; nothing to do.
                    log::debug!("capture tick ignored: session state moved on");
                }
            }
        }
    }

    /// Pull the next frame, retrying with exponential backoff and a
    /// reconnect attempt per retry. `Ok(None)` means shutdown was requested
    /// while waiting.
    fn next_frame_with_retry(
        &mut self,
        shutdown: &AtomicBool,
    ) -> Result<Option<Frame>, DeviceError> {
        let mut attempt = 0u32;
        loop {
            if shutdown.load(Ordering::SeqCst) {
                return Ok(None);
            }
            match self.source.next_frame() {
                Ok(frame) => return Ok(Some(frame)),
                Err(err) if attempt < self.config.device_retries => {
                    attempt += 1;
                    let exponent = attempt.saturating_sub(1).min(10);
                    let mut backoff = self.config.retry_backoff.saturating_mul(1u32 << exponent);
                    let jitter_ms = backoff.as_millis() as u64 / 4;
                    if jitter_ms > 0 {
                        backoff += Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms));
                    }
                    log::warn!(
                        "frame capture failed (attempt {}/{}): {}; retrying in {:?}",
                        attempt,
                        self.config.device_retries,
                        err,
                        backoff
                    );
                    std::thread::sleep(backoff);
                    if let Err(reconnect_err) = self.source.connect() {
                        log::warn!("reconnect failed: {}", reconnect_err);
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn pace(frame_interval: Duration, started: Instant) {
    let elapsed = started.elapsed();
    if frame_interval > elapsed {
        std::thread::sleep(frame_interval - elapsed);
    }
}
