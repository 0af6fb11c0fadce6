// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! The crate's closed error taxonomy.
//!
//! Construction/start errors are fatal to the current attempt and surface
//! to the caller immediately. Runtime media errors are never thrown — they
//! are classified (see [`crate::classify`]) and dispatched to a recovery
//! handler instead, so they don't appear here.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NvrError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("GStreamer error: {0}")]
    GStreamer(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to build pipeline for '{camera_id}': {reason}")]
    Construction { camera_id: String, reason: String },

    #[error("failed to start pipeline for '{camera_id}': {reason}")]
    Start { camera_id: String, reason: String },

    #[error("failed to start recording for '{camera_id}': {cause}")]
    RecordingStart { camera_id: String, cause: String },

    #[error("recording path rejected: {0}")]
    PathGuard(#[from] crate::path_guard::PathGuardError),
}

pub type Result<T> = std::result::Result<T, NvrError>;
