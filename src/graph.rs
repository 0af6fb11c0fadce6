// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Construction of the tee-branched streaming/recording pipeline
//! (spec.md §4.2).
//!
//! One `tee` splits the decoded RTP stream into a streaming branch (decode →
//! transform → OSD → scale → video sink) and a recording branch (parse →
//! `splitmuxsink`). Each branch is gated by its own `valve`; both branches
//! always exist regardless of [`Mode`] so a mode change is just a property
//! write, never a pipeline rebuild.

use std::str::FromStr;
use std::sync::{Arc, Weak};

use gstreamer::prelude::*;
use gstreamer::{self as gst};
use tracing::{debug, info, warn};

use crate::error::{NvrError, Result};
use crate::settings::{CameraSettings, Mode, OsdSettings, RecordingSettings, StreamingSettings};

fn make(factory: &str, name: &str) -> Result<gst::Element> {
    gst::ElementFactory::make(factory).name(name).build().map_err(|e| NvrError::Construction {
        camera_id: String::new(),
        reason: format!("failed to create element '{name}' ({factory}): {e}"),
    })
}

/// `videoflip`'s `method` property is a `GstVideoOrientationMethod` enum,
/// not a bare integer — gstreamer-video carries the typed constant so the
/// property set goes through with the GLib enum type the element expects.
fn transform_method_to_orientation(
    method: crate::settings::TransformMethod,
) -> gstreamer_video::VideoOrientationMethod {
    use crate::settings::TransformMethod::*;
    use gstreamer_video::VideoOrientationMethod as V;
    match method {
        Identity => V::Identity,
        Clockwise90 => V::_90r,
        Rotate180 => V::_180,
        CounterClockwise90 => V::_90l,
        HorizontalFlip => V::Horiz,
        VerticalFlip => V::Vert,
    }
}

/// Which RTP depayload/jitterbuffer ordering this build targets, probed
/// once from the runtime GStreamer version. 1.20 is where `rtph264depay`
/// and `rtph265depay` gained `wait-for-keyframe`; below that the jitter
/// buffer has to run ahead of the depayloader instead of after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BackendDialect {
    /// GStreamer 1.20+: `source -> depay -> jitterbuffer -> parse -> tee`.
    Modern,
    /// GStreamer < 1.20: `source -> jitterbuffer -> depay -> parse -> tee`.
    Legacy,
}

impl BackendDialect {
    fn detect() -> Self {
        let (major, minor, _, _) = gst::version();
        if (major, minor) >= (1, 20) {
            BackendDialect::Modern
        } else {
            BackendDialect::Legacy
        }
    }
}

fn link(camera_id: &str, upstream: &gst::Element, downstream: &gst::Element) -> Result<()> {
    upstream.link(downstream).map_err(|e| NvrError::Construction {
        camera_id: camera_id.to_string(),
        reason: format!(
            "failed to link {} -> {}: {e}",
            upstream.name(),
            downstream.name()
        ),
    })
}

/// The built element graph for one camera. Holds every named handle the
/// controller needs to drive at runtime (valves, splitmuxsink, the OSD
/// overlay, the frame-probe tap point); every other element is reachable
/// only through the pipeline if ever needed.
pub struct MediaGraph {
    pub pipeline: gst::Pipeline,
    pub source: gst::Element,
    pub parse: gst::Element,
    pub tee: gst::Element,
    pub streaming_valve: gst::Element,
    pub recording_valve: gst::Element,
    pub splitmuxsink: gst::Element,
    pub text_overlay: Option<gst::Element>,
    pub video_sink: gst::Element,
    pub segmenter: Arc<crate::segmenter::Segmenter>,
}

impl MediaGraph {
    /// Build the full graph for `camera`. Fails atomically: any missing
    /// element or failed link aborts construction with a `Construction`
    /// error naming the camera and the element/link at fault, folding in
    /// what the original implementation ran as a separate post-hoc
    /// verification pass.
    pub fn build(
        camera: &CameraSettings,
        recording: &RecordingSettings,
        streaming: &StreamingSettings,
        recording_root: &std::path::Path,
    ) -> Result<Self> {
        let camera_id = camera.camera_id.as_str();
        let pipeline = gst::Pipeline::new();

        let source = make("rtspsrc", "source")?;
        source.set_property("location", &camera.rtsp_url);
        source.set_property("latency", streaming.latency_ms);
        source.set_property_from_str("protocols", "tcp");
        source.set_property("tcp-timeout", streaming.tcp_timeout_ms as u64 * 1000);
        source.set_property("do-rtsp-keep-alive", true);
        source.set_property("timeout", streaming.keepalive_timeout_s as u64 * 1_000_000);
        source.set_property("retry", 5u32);

        let dialect = BackendDialect::detect();

        let depay = make(recording.codec.depay_factory(), "depay")?;
        let jitterbuffer = make("rtpjitterbuffer", "rtpjitterbuffer")?;
        jitterbuffer.set_property("latency", 100u32);

        let parse = make(recording.codec.parse_factory(), "parse")?;
        parse.set_property("config-interval", 1i32);

        let tee = make("tee", "tee")?;
        tee.set_property("allow-not-linked", true);

        pipeline
            .add_many([&source, &depay, &jitterbuffer, &parse, &tee])
            .map_err(|e| NvrError::Construction {
                camera_id: camera_id.to_string(),
                reason: format!("failed to add source elements: {e}"),
            })?;

        let first_element = match dialect {
            BackendDialect::Modern => {
                depay.set_property("wait-for-keyframe", true);
                link(camera_id, &depay, &jitterbuffer)?;
                link(camera_id, &jitterbuffer, &parse)?;
                debug!(camera_id, "backend dialect: modern (depay -> jitterbuffer)");
                depay.clone()
            }
            BackendDialect::Legacy => {
                jitterbuffer.set_property("drop-on-latency", true);
                link(camera_id, &jitterbuffer, &depay)?;
                link(camera_id, &depay, &parse)?;
                debug!(camera_id, "backend dialect: legacy (jitterbuffer -> depay)");
                jitterbuffer.clone()
            }
        };
        link(camera_id, &parse, &tee)?;

        {
            let first_element = first_element.clone();
            let camera_id_owned = camera_id.to_string();
            source.connect_pad_added(move |_src, pad| {
                let Some(caps) = pad.current_caps() else { return };
                let Some(structure) = caps.structure(0) else { return };
                if !structure.name().starts_with("application/x-rtp") {
                    return;
                }
                let Some(sink_pad) = first_element.static_pad("sink") else { return };
                if sink_pad.is_linked() {
                    return;
                }
                if let Err(e) = pad.link(&sink_pad) {
                    warn!(camera_id = %camera_id_owned, error = %e, "failed to link rtspsrc pad-added");
                }
            });
        }

        let streaming_valve = Self::build_streaming_branch(&pipeline, camera, streaming, &tee)?;
        let (recording_valve, splitmuxsink, segmenter) =
            Self::build_recording_branch(&pipeline, camera, recording, &tee, recording_root)?;

        let video_sink = pipeline
            .by_name("video_sink")
            .ok_or_else(|| NvrError::Construction {
                camera_id: camera_id.to_string(),
                reason: "video_sink missing after streaming branch construction".into(),
            })?;
        let text_overlay = pipeline.by_name("text_overlay");

        debug!(camera_id, "media graph constructed");

        Ok(Self {
            pipeline,
            source,
            parse,
            tee,
            streaming_valve,
            recording_valve,
            splitmuxsink,
            text_overlay,
            video_sink,
            segmenter,
        })
    }

    fn build_streaming_branch(
        pipeline: &gst::Pipeline,
        camera: &CameraSettings,
        streaming: &StreamingSettings,
        tee: &gst::Element,
    ) -> Result<gst::Element> {
        let camera_id = camera.camera_id.as_str();

        let stream_queue = make("queue", "stream_queue")?;
        stream_queue.set_property("max-size-buffers", 10u32);
        stream_queue.set_property("max-size-time", 2 * gst::ClockTime::SECOND.nseconds());
        stream_queue.set_property("max-size-bytes", 0u32);
        stream_queue.set_property_from_str("leaky", "downstream");

        let streaming_valve = make("valve", "streaming_valve")?;
        streaming_valve.set_property("drop", false);

        let decoder_factory = Self::decoder_factory(streaming);
        let decoder = make(&decoder_factory, "decoder")?;

        let convert = make("videoconvert", "convert")?;

        let videoflip = if camera.video_transform.enabled {
            let method = camera.video_transform.method();
            if matches!(method, crate::settings::TransformMethod::Identity) {
                None
            } else {
                let element = make("videoflip", "videoflip")?;
                element.set_property("method", transform_method_to_orientation(method));
                info!(camera_id, ?method, "video transform enabled");
                Some(element)
            }
        } else {
            None
        };

        let text_overlay = if streaming.show_timestamp || streaming.show_camera_name {
            Some(Self::build_osd(camera, streaming)?)
        } else {
            None
        };

        let scale = make("videoscale", "scale")?;
        let caps_filter = make("capsfilter", "caps_filter")?;
        let caps = gst::Caps::from_str("video/x-raw,width=1280,height=720").map_err(|e| NvrError::Construction {
            camera_id: camera_id.to_string(),
            reason: format!("invalid caps string: {e}"),
        })?;
        caps_filter.set_property("caps", &caps);

        let final_queue = make("queue", "final_queue")?;
        final_queue.set_property("max-size-buffers", 2u32);
        final_queue.set_property("max-size-time", 0u64);
        final_queue.set_property("max-size-bytes", 0u32);
        final_queue.set_property_from_str("leaky", "downstream");

        let video_sink = make("fakesink", "video_sink")?;
        video_sink.set_property("sync", false);
        video_sink.set_property("qos", true);

        pipeline
            .add_many([&stream_queue, &streaming_valve, &decoder, &convert, &scale, &caps_filter, &final_queue, &video_sink])
            .map_err(|e| NvrError::Construction {
                camera_id: camera_id.to_string(),
                reason: format!("failed to add streaming branch elements: {e}"),
            })?;
        if let Some(e) = &videoflip {
            pipeline.add(e).map_err(|e| NvrError::Construction {
                camera_id: camera_id.to_string(),
                reason: format!("failed to add videoflip: {e}"),
            })?;
        }
        if let Some(e) = &text_overlay {
            pipeline.add(e).map_err(|e| NvrError::Construction {
                camera_id: camera_id.to_string(),
                reason: format!("failed to add text_overlay: {e}"),
            })?;
        }

        link(camera_id, &stream_queue, &streaming_valve)?;
        link(camera_id, &streaming_valve, &decoder)?;

        let mut current = &decoder;
        if let Some(flip) = &videoflip {
            link(camera_id, current, flip)?;
            current = flip;
        }
        if let Some(overlay) = &text_overlay {
            link(camera_id, current, overlay)?;
            current = overlay;
        }
        link(camera_id, current, &scale)?;
        link(camera_id, &scale, &caps_filter)?;
        link(camera_id, &caps_filter, &final_queue)?;
        link(camera_id, &final_queue, &video_sink)?;

        let tee_pad = tee.request_pad_simple("src_%u").ok_or_else(|| NvrError::Construction {
            camera_id: camera_id.to_string(),
            reason: "tee refused to provide a src pad for the streaming branch".into(),
        })?;
        let queue_pad = stream_queue.static_pad("sink").ok_or_else(|| NvrError::Construction {
            camera_id: camera_id.to_string(),
            reason: "stream_queue has no static sink pad".into(),
        })?;
        tee_pad.link(&queue_pad).map_err(|e| NvrError::Construction {
            camera_id: camera_id.to_string(),
            reason: format!("failed to link tee -> stream_queue: {e:?}"),
        })?;

        Ok(streaming_valve)
    }

    fn build_osd(camera: &CameraSettings, streaming: &StreamingSettings) -> Result<gst::Element> {
        let overlay = make("textoverlay", "text_overlay")?;
        let osd = &streaming.osd;
        overlay.set_property("font-desc", format!("{} Bold", osd.font));
        overlay.set_property("shaded-background", true);
        Self::apply_osd_alignment(&overlay, osd);
        overlay.set_property("xpad", osd.padding as i32);
        overlay.set_property("ypad", osd.padding as i32);
        overlay.set_property("line-alignment", "left");
        overlay.set_property("draw-shadow", false);
        overlay.set_property("draw-outline", false);
        overlay.set_property("text", Self::osd_text(camera, streaming));
        Ok(overlay)
    }

    fn apply_osd_alignment(overlay: &gst::Element, osd: &OsdSettings) {
        let (valign, halign) = match osd.alignment.as_str() {
            "top-right" => ("top", "right"),
            "bottom-left" => ("bottom", "left"),
            "bottom-right" => ("bottom", "right"),
            _ => ("top", "left"),
        };
        overlay.set_property_from_str("valignment", valign);
        overlay.set_property_from_str("halignment", halign);
    }

    fn osd_text(camera: &CameraSettings, streaming: &StreamingSettings) -> String {
        let mut parts = Vec::new();
        if streaming.show_camera_name {
            parts.push(camera.name.clone());
        }
        if streaming.show_timestamp {
            parts.push(chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string());
        }
        parts.join(" | ")
    }

    /// Refresh the OSD timestamp text. Called from a 1Hz tokio timer owned
    /// by the controller — never from a GStreamer callback thread.
    pub fn refresh_osd_text(&self, camera: &CameraSettings, streaming: &StreamingSettings) {
        if let Some(overlay) = &self.text_overlay {
            overlay.set_property("text", Self::osd_text(camera, streaming));
        }
    }

    fn decoder_factory(streaming: &StreamingSettings) -> String {
        if !streaming.use_hardware_acceleration {
            return "avdec_h264".to_string();
        }
        streaming
            .decoder_preference
            .iter()
            .find(|name| gst::ElementFactory::find(name).is_some())
            .cloned()
            .unwrap_or_else(|| "avdec_h264".to_string())
    }

    fn build_recording_branch(
        pipeline: &gst::Pipeline,
        camera: &CameraSettings,
        recording: &RecordingSettings,
        tee: &gst::Element,
        recording_root: &std::path::Path,
    ) -> Result<(gst::Element, gst::Element, Arc<crate::segmenter::Segmenter>)> {
        let camera_id = camera.camera_id.as_str();

        let record_queue = make("queue", "record_queue")?;
        record_queue.set_property("max-size-buffers", 0u32);
        record_queue.set_property("max-size-time", 5 * gst::ClockTime::SECOND.nseconds());
        record_queue.set_property("max-size-bytes", 50 * 1024 * 1024u32);
        record_queue.set_property_from_str("leaky", "downstream");

        let recording_valve = make("valve", "recording_valve")?;
        recording_valve.set_property("drop", true);

        let record_parse = make(recording.codec.parse_factory(), "record_parse")?;
        record_parse.set_property("config-interval", 1i32);

        let splitmuxsink = make("splitmuxsink", "splitmuxsink")?;
        splitmuxsink.set_property(
            "max-size-time",
            recording.rotation_minutes as u64 * 60 * gst::ClockTime::SECOND.nseconds(),
        );
        splitmuxsink.set_property("max-size-bytes", 100 * 1024 * 1024u64);
        splitmuxsink.set_property("muxer-factory", recording.file_format.muxer_factory());
        splitmuxsink.set_property("async-handling", true);
        splitmuxsink.set_property("send-keyframe-requests", true);

        if recording.file_format == crate::settings::FileFormat::Mp4 {
            // streamable=false + faststart=true trade streaming-friendliness
            // for a complete moov atom up front; fragment-duration is in ms.
            let muxer_props = gst::Structure::builder("properties")
                .field("fragment-duration", 1000u32)
                .field("streamable", false)
                .field("faststart", true)
                .build();
            splitmuxsink.set_property("muxer-properties", muxer_props);
        }

        let segmenter = Arc::new(crate::segmenter::Segmenter::new(
            camera_id.to_string(),
            recording_root.join(camera_id),
            recording.file_format,
        ));
        {
            let segmenter = Arc::clone(&segmenter);
            splitmuxsink.connect("format-location", false, move |args| {
                use gst::glib::value::ToValue;
                let fragment_id = args[1].get::<u32>().unwrap_or_default();
                let path = segmenter.format_location(fragment_id);
                Some(path.to_string_lossy().into_owned().to_value())
            });
        }

        pipeline
            .add_many([&record_queue, &recording_valve, &record_parse, &splitmuxsink])
            .map_err(|e| NvrError::Construction {
                camera_id: camera_id.to_string(),
                reason: format!("failed to add recording branch elements: {e}"),
            })?;

        link(camera_id, &record_queue, &recording_valve)?;
        link(camera_id, &recording_valve, &record_parse)?;
        link(camera_id, &record_parse, &splitmuxsink)?;

        let tee_pad = tee.request_pad_simple("src_%u").ok_or_else(|| NvrError::Construction {
            camera_id: camera_id.to_string(),
            reason: "tee refused to provide a src pad for the recording branch".into(),
        })?;
        let queue_pad = record_queue.static_pad("sink").ok_or_else(|| NvrError::Construction {
            camera_id: camera_id.to_string(),
            reason: "record_queue has no static sink pad".into(),
        })?;
        tee_pad.link(&queue_pad).map_err(|e| NvrError::Construction {
            camera_id: camera_id.to_string(),
            reason: format!("failed to link tee -> record_queue: {e:?}"),
        })?;

        Ok((recording_valve, splitmuxsink, segmenter))
    }

    /// Apply the valve-open/closed contract for `mode` (spec.md §4.2 valve
    /// table). Recording valve always starts/stays closed here — opening it
    /// is `PipelineController::start_recording`'s job, not a mode switch.
    pub fn apply_mode(&self, mode: Mode) {
        let (stream_drop, record_drop) = match mode {
            Mode::StreamingOnly => (false, true),
            Mode::RecordingOnly => (true, true),
            Mode::Both => (false, true),
        };
        self.streaming_valve.set_property("drop", stream_drop);
        self.recording_valve.set_property("drop", record_drop);
        debug!(?mode, stream_drop, record_drop, "valve contract applied");
    }

    pub fn set_recording_valve(&self, open: bool) {
        self.recording_valve.set_property("drop", !open);
    }

    pub fn is_recording_valve_open(&self) -> bool {
        !self.recording_valve.property::<bool>("drop")
    }

    pub fn bus(&self) -> Option<gst::Bus> {
        self.pipeline.bus()
    }

    pub fn parse_src_pad(&self) -> Option<gst::Pad> {
        self.parse.static_pad("src")
    }

    pub fn set_state(&self, state: gst::State) -> Result<(), NvrError> {
        self.pipeline.set_state(state).map_err(|e| NvrError::GStreamer(e.to_string()))?;
        Ok(())
    }
}

/// Weak back-reference a bus-watch closure can hold without keeping the
/// graph (and therefore the pipeline) alive past teardown.
pub type GraphRef = Weak<MediaGraph>;

pub fn strong(graph: &Arc<MediaGraph>) -> GraphRef {
    Arc::downgrade(graph)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_gst() {
        let _ = gst::init();
    }

    fn settings() -> (CameraSettings, RecordingSettings, StreamingSettings) {
        let camera = CameraSettings {
            camera_id: "cam1".into(),
            name: "Front Door".into(),
            rtsp_url: "rtsp://127.0.0.1:554/stream".into(),
            enabled: true,
            username: None,
            password: None,
            streaming_enabled_start: true,
            recording_enabled_start: false,
            video_transform: Default::default(),
        };
        (camera, RecordingSettings {
            file_format: Default::default(),
            codec: Default::default(),
            rotation_minutes: 10,
            fragment_duration_ms: 1000,
        }, StreamingSettings {
            latency_ms: 200,
            tcp_timeout_ms: 5000,
            keepalive_timeout_s: 5,
            use_hardware_acceleration: false,
            decoder_preference: vec![],
            show_timestamp: true,
            show_camera_name: true,
            osd: Default::default(),
            default_layout: "grid".into(),
            max_reconnect_attempts: 10,
            reconnect_delay_seconds: 5,
        })
    }

    #[test]
    fn build_produces_both_branches_with_valves_closed_for_recording() {
        init_gst();
        let (camera, recording, streaming) = settings();
        let dir = tempfile::tempdir().unwrap();
        let graph = match MediaGraph::build(&camera, &recording, &streaming, dir.path()) {
            Ok(g) => g,
            Err(_) => return, // environment has no GStreamer plugins installed
        };
        assert!(graph.recording_valve.property::<bool>("drop"));
        graph.apply_mode(Mode::Both);
        assert!(!graph.streaming_valve.property::<bool>("drop"));
        assert!(graph.recording_valve.property::<bool>("drop"));
    }

    #[test]
    fn build_wires_a_jitterbuffer_into_the_source_branch() {
        init_gst();
        let (camera, recording, streaming) = settings();
        let dir = tempfile::tempdir().unwrap();
        let graph = match MediaGraph::build(&camera, &recording, &streaming, dir.path()) {
            Ok(g) => g,
            Err(_) => return,
        };
        assert!(graph.pipeline.by_name("rtpjitterbuffer").is_some());
    }

    #[test]
    fn dialect_detection_matches_the_runtime_gstreamer_version() {
        init_gst();
        let (major, minor, _, _) = gst::version();
        let expected =
            if (major, minor) >= (1, 20) { BackendDialect::Modern } else { BackendDialect::Legacy };
        assert_eq!(BackendDialect::detect(), expected);
    }

    #[test]
    fn apply_mode_streaming_only_closes_recording_valve() {
        init_gst();
        let (camera, recording, streaming) = settings();
        let dir = tempfile::tempdir().unwrap();
        let Ok(graph) = MediaGraph::build(&camera, &recording, &streaming, dir.path()) else { return };
        graph.apply_mode(Mode::StreamingOnly);
        assert!(!graph.streaming_valve.property::<bool>("drop"));
        assert!(graph.recording_valve.property::<bool>("drop"));
    }
}
