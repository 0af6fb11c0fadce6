// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Error classification (spec.md §4.6): a total, three-layer cascade from
//! raw media-bus error records to the closed [`ErrorKind`] set.

use serde::{Deserialize, Serialize};

/// GStreamer's three error domains, as seen on `gst::message::Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDomain {
    Resource,
    Stream,
    Core,
    Other,
}

/// A resource-domain error code (`Gst.ResourceError`), the only domain
/// whose codes this classifier distinguishes individually.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceCode {
    NotFound,
    Read,
    OpenWrite,
    OpenRead,
    NoSpaceLeft,
    Other(i32),
}

/// A raw error record lifted off the media bus, before classification.
#[derive(Debug, Clone)]
pub struct RawError {
    pub domain: ErrorDomain,
    pub resource_code: Option<ResourceCode>,
    /// GStreamer's numeric error code, used by the element-name layer's
    /// vendor-code table (spec.md §4.6 layer 2).
    pub element_code: i32,
    pub element_name: String,
    pub message: String,
    pub debug: String,
}

/// The closed classification set (spec.md §3, §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    RtspNetwork,
    StorageDisconnected,
    DiskFull,
    Decoder,
    VideoSink,
    Unknown,
}

fn is_sink_or_muxer(name: &str) -> bool {
    name.starts_with("sink") || name.contains("splitmuxsink") || name.contains("mux") || name.contains("filesink")
}

/// Stateless; `classify` is a pure function over a [`RawError`].
pub struct ErrorClassifier;

impl ErrorClassifier {
    /// Classify `err`. Total: every input maps to exactly one [`ErrorKind`].
    pub fn classify(err: &RawError) -> ErrorKind {
        if let Some(kind) = Self::by_domain(err) {
            return kind;
        }
        if let Some(kind) = Self::by_element_name(err) {
            return kind;
        }
        Self::by_message(err)
    }

    /// Layer 1: GStreamer error domain + code.
    fn by_domain(err: &RawError) -> Option<ErrorKind> {
        match err.domain {
            ErrorDomain::Resource => {
                let code = err.resource_code?;
                match code {
                    ResourceCode::NoSpaceLeft => Some(ErrorKind::DiskFull),
                    ResourceCode::NotFound | ResourceCode::Read | ResourceCode::OpenWrite => {
                        Some(if err.element_name == "source" {
                            ErrorKind::RtspNetwork
                        } else {
                            ErrorKind::StorageDisconnected
                        })
                    }
                    ResourceCode::OpenRead => {
                        (err.element_name == "source").then_some(ErrorKind::RtspNetwork)
                    }
                    ResourceCode::Other(_) => {
                        if err.element_name == "source" {
                            Some(ErrorKind::RtspNetwork)
                        } else if is_sink_or_muxer(&err.element_name) {
                            Some(ErrorKind::StorageDisconnected)
                        } else {
                            None
                        }
                    }
                }
            }
            ErrorDomain::Stream => {
                if err.element_name == "source" {
                    Some(ErrorKind::RtspNetwork)
                } else if err.element_name.contains("dec") {
                    Some(ErrorKind::Decoder)
                } else {
                    None
                }
            }
            ErrorDomain::Core => {
                // STATE_CHANGE is the only core code this layer distinguishes;
                // `element_code` carries it since `Gst.CoreError` isn't
                // otherwise represented in `RawError`.
                if err.element_code == CORE_STATE_CHANGE && is_sink_or_muxer(&err.element_name) {
                    Some(ErrorKind::StorageDisconnected)
                } else {
                    None
                }
            }
            ErrorDomain::Other => None,
        }
    }

    /// Layer 2: source element name + vendor error codes.
    fn by_element_name(err: &RawError) -> Option<ErrorKind> {
        if err.element_name == "source" && RTSP_VENDOR_CODES.contains(&err.element_code) {
            return Some(ErrorKind::RtspNetwork);
        }
        if is_sink_or_muxer(&err.element_name) {
            let msg = err.message.to_lowercase();
            let debug = err.debug.to_lowercase();
            if msg.contains("could not write")
                && (debug.contains("permission denied") || debug.contains("file descriptor"))
            {
                return Some(ErrorKind::StorageDisconnected);
            }
        }
        None
    }

    /// Layer 3: message-text fallback. Never returns `None`.
    fn by_message(err: &RawError) -> ErrorKind {
        let msg = err.message.to_lowercase();
        if msg.contains("no space") || msg.contains("space") {
            return ErrorKind::DiskFull;
        }
        if err.element_name.contains("dec") && msg.contains("decode") {
            return ErrorKind::Decoder;
        }
        if err.element_name.contains("videosink") || msg.contains("output window") {
            return ErrorKind::VideoSink;
        }
        ErrorKind::Unknown
    }
}

const CORE_STATE_CHANGE: i32 = 4;
const RTSP_VENDOR_CODES: [i32; 4] = [1, 7, 9, 10];

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(domain: ErrorDomain, resource_code: Option<ResourceCode>, element_name: &str, code: i32, msg: &str, debug: &str) -> RawError {
        RawError {
            domain,
            resource_code,
            element_code: code,
            element_name: element_name.to_string(),
            message: msg.to_string(),
            debug: debug.to_string(),
        }
    }

    #[test]
    fn classification_is_total_over_arbitrary_input() {
        let cases = [
            raw(ErrorDomain::Other, None, "mystery", 99, "whatever happened", ""),
            raw(ErrorDomain::Resource, Some(ResourceCode::NotFound), "source", 3, "", ""),
            raw(ErrorDomain::Resource, Some(ResourceCode::NoSpaceLeft), "splitmuxsink0", 28, "", ""),
        ];
        for c in cases {
            // classify() must never panic and must return one of the 6 kinds —
            // the type system already guarantees the latter; this just
            // exercises that the call doesn't panic on odd inputs.
            let _ = ErrorClassifier::classify(&c);
        }
    }

    #[test]
    fn rtsp_source_read_error_is_network() {
        let err = raw(ErrorDomain::Resource, Some(ResourceCode::Read), "source", 9, "Could not read", "");
        assert_eq!(ErrorClassifier::classify(&err), ErrorKind::RtspNetwork);
    }

    #[test]
    fn muxer_write_error_is_storage_disconnected() {
        let err = raw(ErrorDomain::Resource, Some(ResourceCode::OpenWrite), "splitmuxsink0", 10, "Could not write", "permission denied");
        assert_eq!(ErrorClassifier::classify(&err), ErrorKind::StorageDisconnected);
    }

    #[test]
    fn no_space_left_is_always_disk_full() {
        let err = raw(ErrorDomain::Resource, Some(ResourceCode::NoSpaceLeft), "source", 1, "", "");
        assert_eq!(ErrorClassifier::classify(&err), ErrorKind::DiskFull);
    }

    #[test]
    fn decoder_stream_error_is_decoder() {
        let err = raw(ErrorDomain::Stream, None, "avdec_h264", 1, "decode error", "");
        assert_eq!(ErrorClassifier::classify(&err), ErrorKind::Decoder);
    }

    #[test]
    fn state_change_from_sink_is_storage_disconnected() {
        let err = raw(ErrorDomain::Core, None, "filesink0", CORE_STATE_CHANGE, "state change failed", "");
        assert_eq!(ErrorClassifier::classify(&err), ErrorKind::StorageDisconnected);
    }

    #[test]
    fn element_name_vendor_code_fallback() {
        let err = raw(ErrorDomain::Other, None, "source", 7, "could not open", "");
        assert_eq!(ErrorClassifier::classify(&err), ErrorKind::RtspNetwork);
    }

    #[test]
    fn message_fallback_for_unrecognized_domain() {
        let err = raw(ErrorDomain::Other, None, "unknown0", 0, "disk space low", "");
        assert_eq!(ErrorClassifier::classify(&err), ErrorKind::DiskFull);

        let err = raw(ErrorDomain::Other, None, "videosink0", 0, "output window closed", "");
        assert_eq!(ErrorClassifier::classify(&err), ErrorKind::VideoSink);

        let err = raw(ErrorDomain::Other, None, "unknown0", 0, "totally unrelated", "");
        assert_eq!(ErrorClassifier::classify(&err), ErrorKind::Unknown);
    }
}
