// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! `PipelineController`: the per-camera state machine that owns a
//! [`MediaGraph`], drives it through `Idle -> Built -> Playing -> Stopped`,
//! and reacts to classified runtime errors (spec.md §4.1, §5).
//!
//! Every recovery action funnels through a single tokio task — the event
//! loop started in [`PipelineController::start`] — so bus messages, frame
//! watchdog timeouts and segmenter directory faults can never race each
//! other into a double-stop or a double-reconnect. Nothing that can be
//! called from a GStreamer callback context mutates this controller's state
//! directly; it only ever posts a [`ControllerEvent`] onto an unbounded
//! channel and lets the event loop act on it.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use gstreamer::prelude::*;
use gstreamer::{self as gst};
use parking_lot::Mutex;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::callbacks::{CallbackRegistry, ConnectionObserver, RecordingObserver};
use crate::classify::{ErrorClassifier, ErrorDomain, ErrorKind, RawError, ResourceCode};
use crate::error::{NvrError, Result};
use crate::graph::MediaGraph;
use crate::path_guard::PathGuard;
use crate::retry::{self, RetryScheduler};
use crate::settings::{CameraSettings, Mode, RecordingSettings, StorageSettings, StreamingSettings};
use crate::watchdog::FrameWatchdog;

/// External collaborator that reclaims disk space on a DISK_FULL
/// classification (spec.md §6). A no-op double is provided for tests and
/// for deployments that don't want automatic cleanup.
pub trait StorageJanitor: Send + Sync {
    /// Attempt to bring free space under `camera_dir` up to `min_free_gb`.
    /// Returns whether enough space is now available.
    fn reclaim(&self, camera_dir: &std::path::Path, min_free_gb: u64) -> Result<bool>;
}

pub struct NoopJanitor;
impl StorageJanitor for NoopJanitor {
    fn reclaim(&self, _camera_dir: &std::path::Path, _min_free_gb: u64) -> Result<bool> {
        Ok(false)
    }
}

/// Events posted from GStreamer-adjacent callbacks (bus poll, frame
/// watchdog, segmenter) into the controller's single-threaded recovery
/// path. This is the thread-hop spec.md §5 requires.
#[derive(Debug)]
enum ControllerEvent {
    BusError(RawError),
    BusEos,
    FrameTimeout,
    SegmenterFault(String),
}

struct ControllerState {
    graph: Option<Arc<MediaGraph>>,
    mode: Mode,
    is_playing: bool,
    is_recording: bool,
    recording_start_time: Option<DateTime<Utc>>,
    current_recording_file: Option<PathBuf>,
    last_corrupted_file: Option<PathBuf>,
    ever_connected: bool,
    recording_should_auto_resume: bool,
    event_loop: Option<JoinHandle<()>>,
    bus_poller: Option<JoinHandle<()>>,
    osd_timer: Option<JoinHandle<()>>,
    event_tx: Option<UnboundedSender<ControllerEvent>>,
}

pub struct PipelineController {
    camera: CameraSettings,
    recording_settings: RecordingSettings,
    streaming_settings: StreamingSettings,
    storage_settings: StorageSettings,
    state: Mutex<ControllerState>,
    reconnect: Mutex<RetryScheduler>,
    recording_retry: Mutex<RetryScheduler>,
    watchdog: Mutex<FrameWatchdog>,
    callbacks: CallbackRegistry,
    janitor: Arc<dyn StorageJanitor>,
}

impl PipelineController {
    pub fn new(
        camera: CameraSettings,
        recording_settings: RecordingSettings,
        streaming_settings: StreamingSettings,
        storage_settings: StorageSettings,
    ) -> Arc<Self> {
        Self::with_janitor(camera, recording_settings, streaming_settings, storage_settings, Arc::new(NoopJanitor))
    }

    pub fn with_janitor(
        camera: CameraSettings,
        recording_settings: RecordingSettings,
        streaming_settings: StreamingSettings,
        storage_settings: StorageSettings,
        janitor: Arc<dyn StorageJanitor>,
    ) -> Arc<Self> {
        let mode = if camera.recording_enabled_start && !camera.streaming_enabled_start {
            Mode::RecordingOnly
        } else if camera.streaming_enabled_start {
            Mode::Both
        } else {
            Mode::StreamingOnly
        };
        Arc::new(Self {
            camera,
            recording_settings,
            streaming_settings,
            storage_settings,
            state: Mutex::new(ControllerState {
                graph: None,
                mode,
                is_playing: false,
                is_recording: false,
                recording_start_time: None,
                current_recording_file: None,
                last_corrupted_file: None,
                ever_connected: false,
                recording_should_auto_resume: false,
                event_loop: None,
                bus_poller: None,
                osd_timer: None,
                event_tx: None,
            }),
            reconnect: Mutex::new(RetryScheduler::reconnect()),
            recording_retry: Mutex::new(RetryScheduler::recording_retry()),
            watchdog: Mutex::new(FrameWatchdog::new()),
            callbacks: CallbackRegistry::new(),
            janitor,
        })
    }

    pub fn camera_id(&self) -> &str {
        &self.camera.camera_id
    }

    pub fn register_connection_observer(&self, observer: &Arc<dyn ConnectionObserver>) {
        self.callbacks.register_connection(observer);
    }

    pub fn register_recording_observer(&self, observer: &Arc<dyn RecordingObserver>) {
        self.callbacks.register_recording(observer);
    }

    pub fn last_corrupted_file(&self) -> Option<PathBuf> {
        self.state.lock().last_corrupted_file.clone()
    }

    fn camera_dir(&self) -> PathBuf {
        self.storage_settings.recording_path.join(&self.camera.camera_id)
    }

    /// Build the graph, move it through READY/PAUSED/PLAYING, and start the
    /// bus poller, frame watchdog, OSD timer and event loop. Idempotent:
    /// calling `start` while already playing is a no-op.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        {
            let state = self.state.lock();
            if state.is_playing {
                debug!(camera_id = %self.camera_id(), "start() called while already playing, ignoring");
                return Ok(());
            }
        }

        let graph = Arc::new(MediaGraph::build(
            &self.camera,
            &self.recording_settings,
            &self.streaming_settings,
            &self.storage_settings.recording_path,
        )?);

        let camera_id = self.camera_id().to_string();
        graph
            .set_state(gst::State::Ready)
            .map_err(|e| NvrError::Start { camera_id: camera_id.clone(), reason: e.to_string() })?;
        graph
            .set_state(gst::State::Paused)
            .map_err(|e| NvrError::Start { camera_id: camera_id.clone(), reason: e.to_string() })?;
        graph
            .set_state(gst::State::Playing)
            .map_err(|e| NvrError::Start { camera_id: camera_id.clone(), reason: e.to_string() })?;

        let mode = self.state.lock().mode;
        graph.apply_mode(mode);

        let (tx, rx) = unbounded_channel();

        let (fault_tx, mut fault_rx) = unbounded_channel();
        graph.segmenter.set_fault_channel(fault_tx);
        {
            let forward_tx = tx.clone();
            tokio::spawn(async move {
                while let Some(fault) = fault_rx.recv().await {
                    if forward_tx.send(ControllerEvent::SegmenterFault(fault.message)).is_err() {
                        break;
                    }
                }
            });
        }

        if let Some(bus) = graph.bus() {
            let bus_tx = tx.clone();
            let poller_camera_id = camera_id.clone();
            let bus_poller = tokio::spawn(async move {
                loop {
                    match bus.pop() {
                        Some(msg) => Self::dispatch_bus_message(&poller_camera_id, &msg, &bus_tx),
                        None => tokio::time::sleep(Duration::from_millis(50)).await,
                    }
                }
            });
            self.state.lock().bus_poller = Some(bus_poller);
        }

        if let Some(pad) = graph.parse_src_pad() {
            let watchdog_tx = tx.clone();
            let is_playing_graph = Arc::clone(&graph);
            self.watchdog.lock().arm(
                &pad,
                crate::watchdog::DEFAULT_CHECK_INTERVAL,
                crate::watchdog::DEFAULT_TIMEOUT,
                move || is_playing_graph.pipeline.current_state() == gst::State::Playing,
                move || {
                    let _ = watchdog_tx.send(ControllerEvent::FrameTimeout);
                },
            );
        }

        if graph.text_overlay.is_some() {
            let osd_camera = self.camera.clone();
            let osd_streaming = self.streaming_settings.clone();
            let osd_graph = Arc::clone(&graph);
            let osd_timer = tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(1));
                loop {
                    interval.tick().await;
                    osd_graph.refresh_osd_text(&osd_camera, &osd_streaming);
                }
            });
            self.state.lock().osd_timer = Some(osd_timer);
        }

        let controller = Arc::clone(self);
        let event_loop = tokio::spawn(async move {
            controller.run_event_loop(rx).await;
        });

        let was_ever_connected = {
            let mut state = self.state.lock();
            state.graph = Some(graph);
            state.is_playing = true;
            let was_ever_connected = state.ever_connected;
            state.ever_connected = true;
            state.event_loop = Some(event_loop);
            state.event_tx = Some(tx);
            was_ever_connected
        };

        self.reconnect.lock().reset();
        self.callbacks.notify_connection(self.camera_id(), true);
        info!(camera_id = %self.camera_id(), ?mode, "pipeline started");

        self.auto_start_recording_after_reconnect(was_ever_connected).await;
        Ok(())
    }

    fn dispatch_bus_message(camera_id: &str, msg: &gst::Message, tx: &UnboundedSender<ControllerEvent>) {
        use gst::MessageView;
        match msg.view() {
            MessageView::Error(e) => {
                let element_name = msg.src().map(|o| o.name().to_string()).unwrap_or_else(|| "unknown".into());
                let (err, debug_info) = (e.error(), e.debug());
                error!(camera_id, element = %element_name, error = %err, "pipeline error");
                let raw = raw_error_from_glib(element_name, &err, debug_info);
                let _ = tx.send(ControllerEvent::BusError(raw));
            }
            MessageView::Warning(w) => {
                let element_name = msg.src().map(|o| o.name().to_string()).unwrap_or_else(|| "unknown".into());
                warn!(camera_id, element = %element_name, warning = %w.error(), "pipeline warning");
            }
            MessageView::Eos(_) => {
                info!(camera_id, "end of stream");
                let _ = tx.send(ControllerEvent::BusEos);
            }
            MessageView::StateChanged(sc) => {
                let is_pipeline = msg.src().is_some_and(|s| s.type_().is_a(gst::Pipeline::static_type()));
                if is_pipeline {
                    debug!(camera_id, old = ?sc.old(), new = ?sc.current(), "pipeline state changed");
                }
            }
            _ => {}
        }
    }

    async fn run_event_loop(self: Arc<Self>, mut rx: tokio::sync::mpsc::UnboundedReceiver<ControllerEvent>) {
        while let Some(event) = rx.recv().await {
            self.handle_event(event).await;
        }
    }

    async fn handle_event(self: &Arc<Self>, event: ControllerEvent) {
        match event {
            ControllerEvent::BusError(raw) => self.handle_classified_error(raw).await,
            ControllerEvent::BusEos => {}
            ControllerEvent::FrameTimeout => {
                warn!(camera_id = %self.camera_id(), "frame watchdog fired, reconnecting");
                self.async_stop_and_reconnect().await;
            }
            ControllerEvent::SegmenterFault(message) => {
                warn!(camera_id = %self.camera_id(), %message, "segmenter reported a storage fault");
                self.handle_storage_error().await;
            }
        }
    }

    async fn handle_classified_error(self: &Arc<Self>, raw: RawError) {
        let kind = ErrorClassifier::classify(&raw);
        match kind {
            ErrorKind::RtspNetwork => {
                error!(camera_id = %self.camera_id(), "RTSP network error, reconnecting");
                self.async_stop_and_reconnect().await;
            }
            ErrorKind::StorageDisconnected => self.handle_storage_error().await,
            ErrorKind::DiskFull => self.handle_disk_full().await,
            ErrorKind::Decoder => self.flush_pipeline(),
            ErrorKind::VideoSink => self.handle_videosink_error(),
            ErrorKind::Unknown => {
                if raw.element_name == "source" {
                    warn!(camera_id = %self.camera_id(), "unclassified source error, reconnecting");
                    self.async_stop_and_reconnect().await;
                } else {
                    debug!(camera_id = %self.camera_id(), element = %raw.element_name, "unclassified non-source error, ignoring");
                }
            }
        }
    }

    async fn handle_storage_error(self: &Arc<Self>) {
        error!(camera_id = %self.camera_id(), "storage disconnected, stopping recording branch only");
        let _ = self.stop_recording_internal(true).await;
        {
            let mut state = self.state.lock();
            state.recording_should_auto_resume = true;
        }
        self.schedule_recording_retry();
    }

    async fn handle_disk_full(self: &Arc<Self>) {
        error!(camera_id = %self.camera_id(), "disk full, attempting auto cleanup");
        let was_recording = self.state.lock().is_recording;
        if was_recording {
            let _ = self.stop_recording_internal(false).await;
        }
        let camera_dir = self.camera_dir();
        let min_free_gb = self.storage_settings.min_free_space_gb + 1;
        match self.janitor.reclaim(&camera_dir, min_free_gb) {
            Ok(true) => {
                info!(camera_id = %self.camera_id(), "disk space reclaimed, scheduling recording retry");
                self.state.lock().recording_should_auto_resume = true;
                self.schedule_recording_retry();
            }
            Ok(false) => {
                error!(camera_id = %self.camera_id(), "cleanup failed to free enough space");
                self.callbacks.notify_recording(self.camera_id(), false);
            }
            Err(e) => {
                error!(camera_id = %self.camera_id(), error = %e, "cleanup attempt failed");
                self.callbacks.notify_recording(self.camera_id(), false);
            }
        }
    }

    fn flush_pipeline(self: &Arc<Self>) {
        warn!(camera_id = %self.camera_id(), "decoder error, flushing pipeline");
        if let Some(graph) = self.state.lock().graph.as_ref() {
            graph.pipeline.send_event(gst::event::FlushStart::new());
            graph.pipeline.send_event(gst::event::FlushStop::new(true));
        }
    }

    fn handle_videosink_error(self: &Arc<Self>) {
        warn!(camera_id = %self.camera_id(), "video sink error, closing streaming branch only");
        if let Some(graph) = self.state.lock().graph.as_ref() {
            graph.streaming_valve.set_property("drop", true);
        }
    }

    async fn async_stop_and_reconnect(self: &Arc<Self>) {
        let was_recording = self.state.lock().is_recording;
        if was_recording {
            if let Err(e) = self.stop_recording_internal(false).await {
                warn!(camera_id = %self.camera_id(), error = %e, "failed to stop recording gracefully before reconnect");
            }
        }
        self.stop_internal().await;
        if was_recording {
            self.state.lock().recording_should_auto_resume = true;
        }
        self.schedule_reconnect();
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        let controller = Arc::clone(self);
        let scheduled = self.reconnect.lock().schedule(move || async move {
            controller.attempt_reconnect().await;
        });
        match scheduled {
            Some(delay) => info!(camera_id = %self.camera_id(), delay_secs = delay.as_secs(), "reconnect scheduled"),
            None => {
                error!(camera_id = %self.camera_id(), "max reconnect attempts reached, giving up");
                self.callbacks.notify_connection(self.camera_id(), false);
            }
        }
    }

    async fn attempt_reconnect(self: Arc<Self>) {
        let Some((host, port)) = retry::parse_rtsp_host_port(&self.camera.rtsp_url) else {
            warn!(camera_id = %self.camera_id(), "could not parse RTSP URL for reachability probe");
            self.schedule_reconnect();
            return;
        };
        if !retry::probe_tcp(&host, port, Duration::from_secs(3)).await {
            warn!(camera_id = %self.camera_id(), "camera not responding, rescheduling reconnect");
            self.schedule_reconnect();
            return;
        }
        if let Err(e) = self.start().await {
            error!(camera_id = %self.camera_id(), error = %e, "reconnect attempt failed to start pipeline");
            self.schedule_reconnect();
        }
    }

    fn should_auto_start_recording(&self, was_ever_connected: bool) -> (bool, &'static str) {
        let state = self.state.lock();
        if state.recording_should_auto_resume {
            return (true, "was recording before disconnect");
        }
        if !was_ever_connected && self.camera.recording_enabled_start {
            return (true, "recording_enabled_start=true");
        }
        (false, "was not recording before disconnect")
    }

    async fn auto_start_recording_after_reconnect(self: &Arc<Self>, was_ever_connected: bool) {
        let (should_start, reason) = self.should_auto_start_recording(was_ever_connected);
        if !should_start {
            debug!(camera_id = %self.camera_id(), reason, "not auto-starting recording");
            return;
        }
        info!(camera_id = %self.camera_id(), reason, "auto-starting recording");
        tokio::time::sleep(Duration::from_millis(200)).await;
        match self.start_recording().await {
            Ok(()) => self.state.lock().recording_should_auto_resume = false,
            Err(e) => {
                warn!(camera_id = %self.camera_id(), error = %e, "auto-start recording failed, falling back to retry timer");
                self.schedule_recording_retry();
            }
        }
    }

    fn schedule_recording_retry(self: &Arc<Self>) {
        let already_scheduled = self.recording_retry.lock().attempt_count() > 0;
        if already_scheduled {
            return;
        }
        self.run_recording_retry();
    }

    fn run_recording_retry(self: &Arc<Self>) {
        let controller = Arc::clone(self);
        let scheduled = self.recording_retry.lock().schedule(move || async move {
            controller.attempt_recording_retry().await;
        });
        if scheduled.is_none() {
            warn!(camera_id = %self.camera_id(), "max recording retry attempts reached");
            self.state.lock().recording_should_auto_resume = false;
        }
    }

    async fn attempt_recording_retry(self: Arc<Self>) {
        if !self.state.lock().recording_should_auto_resume {
            debug!(camera_id = %self.camera_id(), "recording auto-resume cancelled, stopping retry");
            return;
        }
        let camera_dir = self.camera_dir();
        if PathGuard::validate(&camera_dir, self.storage_settings.min_free_space_gb).is_ok() {
            match self.start_recording().await {
                Ok(()) => {
                    info!(camera_id = %self.camera_id(), "recording resumed after retry");
                    self.state.lock().recording_should_auto_resume = false;
                    self.recording_retry.lock().reset();
                    return;
                }
                Err(e) => warn!(camera_id = %self.camera_id(), error = %e, "recording retry failed to start"),
            }
        }
        self.run_recording_retry();
    }

    /// Cancel both retry timers, the frame watchdog and the OSD timer, in
    /// that order, before touching the media graph — stopping the graph
    /// first would let a timer fire mid-teardown and race a rebuilt graph
    /// into existence underneath this call. Safe to call when already
    /// stopped.
    pub async fn stop(self: &Arc<Self>) {
        self.reconnect.lock().cancel();
        self.cancel_recording_retry();
        self.stop_internal().await;
        self.callbacks.clear();
    }

    async fn stop_internal(self: &Arc<Self>) {
        let was_playing = self.state.lock().is_playing;
        if !was_playing {
            debug!(camera_id = %self.camera_id(), "stop() called while already stopped, ignoring");
            return;
        }

        if self.state.lock().is_recording {
            let _ = self.stop_recording_internal(false).await;
        }

        self.watchdog.lock().disarm();

        let (graph, bus_poller, osd_timer, event_loop) = {
            let mut state = self.state.lock();
            state.is_playing = false;
            (state.graph.take(), state.bus_poller.take(), state.osd_timer.take(), state.event_loop.take())
        };

        if let Some(poller) = bus_poller {
            poller.abort();
        }
        if let Some(timer) = osd_timer {
            timer.abort();
        }
        if let Some(graph) = &graph {
            let _ = graph.set_state(gst::State::Null);
        }
        if let Some(event_loop) = event_loop {
            event_loop.abort();
        }
        self.state.lock().event_tx = None;

        info!(camera_id = %self.camera_id(), "pipeline stopped");
        self.callbacks.notify_connection(self.camera_id(), false);
    }

    /// Validate the recording path and open the recording valve. Fails if
    /// the pipeline isn't playing or the path guard rejects the target.
    pub async fn start_recording(self: &Arc<Self>) -> Result<()> {
        let camera_id = self.camera_id().to_string();
        if !self.state.lock().is_playing {
            return Err(NvrError::RecordingStart { camera_id, cause: "pipeline is not running".into() });
        }

        let camera_dir = self.camera_dir();
        PathGuard::validate(&camera_dir, self.storage_settings.min_free_space_gb)?;

        let graph = self.state.lock().graph.clone().ok_or_else(|| NvrError::RecordingStart {
            camera_id: camera_id.clone(),
            cause: "no active graph".into(),
        })?;

        if graph.is_recording_valve_open() {
            return Err(NvrError::RecordingStart { camera_id, cause: "recording valve already open".into() });
        }

        graph.splitmuxsink.set_state(gst::State::Ready).ok();
        tokio::time::sleep(Duration::from_millis(100)).await;
        graph.splitmuxsink.set_property(
            "max-size-time",
            self.recording_settings.rotation_minutes as u64 * 60 * gst::ClockTime::SECOND.nseconds(),
        );
        graph.splitmuxsink.set_state(gst::State::Playing).ok();
        tokio::time::sleep(Duration::from_millis(200)).await;

        graph.set_recording_valve(true);

        let file_name = format!(
            "{}_{}.{}",
            camera_id,
            Utc::now().format("%Y%m%d_%H%M%S"),
            self.recording_settings.file_format.extension()
        );
        {
            let mut state = self.state.lock();
            state.is_recording = true;
            state.recording_start_time = Some(Utc::now());
            state.current_recording_file = Some(self.camera_dir().join(file_name));
        }

        info!(camera_id = %self.camera_id(), "recording started");
        self.callbacks.notify_recording(self.camera_id(), true);
        Ok(())
    }

    /// Stop recording. `storage_error` skips the finalize signal (the file
    /// is presumed unreachable) and records the in-flight path as
    /// potentially corrupted instead.
    pub async fn stop_recording(self: &Arc<Self>) -> Result<bool> {
        self.stop_recording_internal(false).await
    }

    async fn stop_recording_internal(self: &Arc<Self>, storage_error: bool) -> Result<bool> {
        if !self.state.lock().is_recording {
            return Ok(false);
        }

        let graph = self.state.lock().graph.clone();
        if let Some(graph) = &graph {
            if !storage_error {
                graph.splitmuxsink.emit_by_name::<()>("split-after", &[]);
                tokio::time::sleep(Duration::from_millis(300)).await;
            } else {
                debug!(camera_id = %self.camera_id(), "skipping finalize signal due to storage error");
            }
            graph.set_recording_valve(false);
        }

        let saved_file = {
            let mut state = self.state.lock();
            state.is_recording = false;
            state.recording_start_time = None;
            let saved = state.current_recording_file.take();
            if storage_error {
                state.last_corrupted_file = saved.clone();
            }
            saved
        };

        if !storage_error {
            self.cancel_recording_retry();
        }

        info!(camera_id = %self.camera_id(), file = ?saved_file, "recording stopped");
        self.callbacks.notify_recording(self.camera_id(), false);
        Ok(true)
    }

    fn cancel_recording_retry(&self) {
        self.state.lock().recording_should_auto_resume = false;
        self.recording_retry.lock().reset();
    }

    /// Switch operating mode. Applies immediately if the pipeline is
    /// playing; otherwise takes effect on the next `start()`.
    pub fn set_mode(self: &Arc<Self>, mode: Mode) {
        let (old_mode, graph) = {
            let mut state = self.state.lock();
            let old = state.mode;
            state.mode = mode;
            (old, state.graph.clone())
        };
        if let Some(graph) = graph {
            graph.apply_mode(mode);
            info!(camera_id = %self.camera_id(), ?old_mode, ?mode, "mode changed (runtime)");
        } else {
            info!(camera_id = %self.camera_id(), ?old_mode, ?mode, "mode changed (applies on next start)");
        }
    }

    pub fn mode(&self) -> Mode {
        self.state.lock().mode
    }

    pub fn is_playing(&self) -> bool {
        self.state.lock().is_playing
    }

    pub fn is_recording(&self) -> bool {
        self.state.lock().is_recording
    }
}

fn raw_error_from_glib(element_name: String, err: &gst::glib::Error, debug: Option<String>) -> RawError {
    let code = err.code();
    let message = err.message().to_string();
    let debug = debug.unwrap_or_default();

    let (domain, resource_code) = if let Some(resource_err) = err.kind::<gst::ResourceError>() {
        let rc = match resource_err {
            gst::ResourceError::NotFound => ResourceCode::NotFound,
            gst::ResourceError::Read => ResourceCode::Read,
            gst::ResourceError::OpenWrite => ResourceCode::OpenWrite,
            gst::ResourceError::OpenRead => ResourceCode::OpenRead,
            gst::ResourceError::NoSpaceLeft => ResourceCode::NoSpaceLeft,
            _ => ResourceCode::Other(code),
        };
        (ErrorDomain::Resource, Some(rc))
    } else if err.kind::<gst::StreamError>().is_some() {
        (ErrorDomain::Stream, None)
    } else if err.kind::<gst::CoreError>().is_some() {
        (ErrorDomain::Core, None)
    } else {
        (ErrorDomain::Other, None)
    };

    RawError { domain, resource_code, element_code: code, element_name, message, debug }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{Codec, FileFormat, VideoTransform};

    fn camera() -> CameraSettings {
        CameraSettings {
            camera_id: "cam1".into(),
            name: "Front Door".into(),
            rtsp_url: "rtsp://127.0.0.1:554/stream".into(),
            enabled: true,
            username: None,
            password: None,
            streaming_enabled_start: true,
            recording_enabled_start: false,
            video_transform: VideoTransform::default(),
        }
    }

    fn recording() -> RecordingSettings {
        RecordingSettings { file_format: FileFormat::Mp4, codec: Codec::H264, rotation_minutes: 10, fragment_duration_ms: 1000 }
    }

    fn streaming() -> StreamingSettings {
        StreamingSettings {
            latency_ms: 200,
            tcp_timeout_ms: 5000,
            keepalive_timeout_s: 5,
            use_hardware_acceleration: false,
            decoder_preference: vec![],
            show_timestamp: false,
            show_camera_name: false,
            osd: Default::default(),
            default_layout: "grid".into(),
            max_reconnect_attempts: 10,
            reconnect_delay_seconds: 5,
        }
    }

    fn storage(dir: &std::path::Path) -> StorageSettings {
        StorageSettings { recording_path: dir.to_path_buf(), min_free_space_gb: 0 }
    }

    #[tokio::test]
    async fn newly_constructed_controller_is_not_playing() {
        let dir = tempfile::tempdir().unwrap();
        let controller = PipelineController::new(camera(), recording(), streaming(), storage(dir.path()));
        assert!(!controller.is_playing());
        assert!(!controller.is_recording());
        assert_eq!(controller.mode(), Mode::Both);
    }

    #[tokio::test]
    async fn stop_on_unstarted_controller_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let controller = PipelineController::new(camera(), recording(), streaming(), storage(dir.path()));
        controller.stop().await;
        assert!(!controller.is_playing());
    }

    #[tokio::test]
    async fn stop_cancels_retry_timers_before_any_graph_teardown() {
        let dir = tempfile::tempdir().unwrap();
        let controller = PipelineController::new(camera(), recording(), streaming(), storage(dir.path()));
        controller.recording_retry.lock().schedule(|| async {});
        assert!(controller.recording_retry.lock().attempt_count() > 0);
        controller.stop().await;
        assert_eq!(controller.recording_retry.lock().attempt_count(), 0);
    }

    #[tokio::test]
    async fn start_recording_without_playing_pipeline_fails() {
        let dir = tempfile::tempdir().unwrap();
        let controller = PipelineController::new(camera(), recording(), streaming(), storage(dir.path()));
        let result = controller.start_recording().await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn recording_only_camera_without_streaming_start_picks_recording_only_mode() {
        let dir = tempfile::tempdir().unwrap();
        let mut cam = camera();
        cam.streaming_enabled_start = false;
        cam.recording_enabled_start = true;
        let controller = PipelineController::new(cam, recording(), streaming(), storage(dir.path()));
        assert_eq!(controller.mode(), Mode::RecordingOnly);
    }

    #[tokio::test]
    async fn first_connect_with_recording_enabled_start_auto_starts_recording() {
        let dir = tempfile::tempdir().unwrap();
        let mut cam = camera();
        cam.recording_enabled_start = true;
        let controller = PipelineController::new(cam, recording(), streaming(), storage(dir.path()));
        let (should_start, _) = controller.should_auto_start_recording(false);
        assert!(should_start);
    }

    #[tokio::test]
    async fn reconnect_with_recording_enabled_start_does_not_re_trigger_clause_2() {
        let dir = tempfile::tempdir().unwrap();
        let mut cam = camera();
        cam.recording_enabled_start = true;
        let controller = PipelineController::new(cam, recording(), streaming(), storage(dir.path()));
        // Simulates a later start() where this camera has connected before
        // and wasn't mid-recording at the time of disconnect.
        let (should_start, _) = controller.should_auto_start_recording(true);
        assert!(!should_start);
    }

    #[tokio::test]
    async fn was_recording_before_disconnect_always_auto_resumes() {
        let dir = tempfile::tempdir().unwrap();
        let controller = PipelineController::new(camera(), recording(), streaming(), storage(dir.path()));
        controller.state.lock().recording_should_auto_resume = true;
        let (should_start, _) = controller.should_auto_start_recording(true);
        assert!(should_start);
    }
}
