// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! File-name templating for `splitmuxsink`'s `format-location` signal
//! (spec.md §4.4).
//!
//! `format_location` runs on a GStreamer streaming thread, never the
//! controller's owning task. It must never panic and must never call back
//! into controller state directly — a directory-creation failure is
//! reported by posting a [`SegmenterFault`] through an unbounded channel
//! instead, which is the thread-hop spec.md §5 requires. A sentinel path is
//! returned either way so the signal handler itself can't crash the
//! pipeline thread.

use std::path::PathBuf;
use std::sync::Mutex;

use chrono::Local;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, info};

use crate::settings::FileFormat;

/// Posted back to the owning controller task when the segmenter can't
/// prepare the directory for the next fragment.
#[derive(Debug, Clone)]
pub struct SegmenterFault {
    pub camera_id: String,
    pub message: String,
}

/// Builds the per-fragment recording path
/// `<recording_root>/<camera_id>/<YYYYMMDD>/<camera_id>_<YYYYMMDD>_<HHMMSS>.<ext>`
/// and creates the date directory on demand.
pub struct Segmenter {
    camera_id: String,
    camera_dir: PathBuf,
    file_format: FileFormat,
    fault_tx: Mutex<Option<UnboundedSender<SegmenterFault>>>,
}

impl Segmenter {
    pub fn new(camera_id: String, camera_dir: PathBuf, file_format: FileFormat) -> Self {
        Self { camera_id, camera_dir, file_format, fault_tx: Mutex::new(None) }
    }

    /// Install the channel used to hop a directory-creation failure back to
    /// the controller's owning task.
    pub fn set_fault_channel(&self, tx: UnboundedSender<SegmenterFault>) {
        *self.fault_tx.lock().unwrap() = Some(tx);
    }

    /// `format-location`/`format-location-full` handler body. `fragment_id`
    /// is the index `splitmuxsink` is about to open; unused beyond logging,
    /// since the path itself is timestamp-derived rather than index-derived.
    pub fn format_location(&self, fragment_id: u32) -> PathBuf {
        let now = Local::now();
        let date_dir = self.camera_dir.join(now.format("%Y%m%d").to_string());

        if let Err(e) = std::fs::create_dir_all(&date_dir) {
            error!(
                camera_id = %self.camera_id,
                error = %e,
                "failed to prepare recording directory, reporting storage disconnect"
            );
            self.report_fault(format!("failed to create {date_dir:?}: {e}"));
            return self.fallback_path();
        }

        let timestamp = now.format("%Y%m%d_%H%M%S");
        let file_name = format!("{}_{}.{}", self.camera_id, timestamp, self.file_format.extension());
        let path = date_dir.join(file_name);
        info!(camera_id = %self.camera_id, fragment_id, path = ?path, "recording fragment path assigned");
        path
    }

    fn report_fault(&self, message: String) {
        if let Some(tx) = self.fault_tx.lock().unwrap().as_ref() {
            let _ = tx.send(SegmenterFault { camera_id: self.camera_id.clone(), message });
        }
    }

    /// Returned when the real path can't be prepared, so `splitmuxsink`
    /// has somewhere to try (and fail) opening rather than being handed an
    /// empty string.
    fn fallback_path(&self) -> PathBuf {
        PathBuf::from(format!("/tmp/{}_fallback.{}", self.camera_id, self.file_format.extension()))
    }
}
