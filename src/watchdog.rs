// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Frame-arrival watchdog (spec.md §4.5).
//!
//! RTSP TCP keep-alive alone is too slow to catch a silent stall on some
//! cameras, so a buffer probe on the parser's source pad records the last
//! arrival time and a periodic tick checks the gap.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gstreamer::prelude::*;
use gstreamer::{self as gst, PadProbeReturn, PadProbeType};
use tokio::task::JoinHandle;
use tracing::warn;

pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Tap on a pad that declares "connection lost" when no buffer has crossed
/// it for longer than `timeout`.
pub struct FrameWatchdog {
    last_arrival_ms: Arc<AtomicI64>,
    probe_id: Option<(gst::Pad, gst::PadProbeId)>,
    tick: Option<JoinHandle<()>>,
}

impl FrameWatchdog {
    pub fn new() -> Self {
        Self {
            last_arrival_ms: Arc::new(AtomicI64::new(now_ms())),
            probe_id: None,
            tick: None,
        }
    }

    /// Install the probe on `pad` (the parser's source pad) and start the
    /// periodic check. `on_timeout` runs on the tokio runtime when the gap
    /// exceeds `timeout` while `is_playing` still returns true — callers
    /// pass a closure that hops into the controller's recovery path rather
    /// than mutating pipeline state directly from this timer.
    pub fn arm<F, P>(
        &mut self,
        pad: &gst::Pad,
        check_interval: Duration,
        timeout: Duration,
        is_playing: P,
        on_timeout: F,
    ) where
        F: Fn() + Send + 'static,
        P: Fn() -> bool + Send + 'static,
    {
        self.last_arrival_ms.store(now_ms(), Ordering::SeqCst);

        let arrival = self.last_arrival_ms.clone();
        let probe_id = pad.add_probe(PadProbeType::BUFFER, move |_pad, _info| {
            arrival.store(now_ms(), Ordering::SeqCst);
            PadProbeReturn::Ok
        });
        if let Some(id) = probe_id {
            self.probe_id = Some((pad.clone(), id));
        }

        let arrival = self.last_arrival_ms.clone();
        let timeout_ms = timeout.as_millis() as i64;
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(check_interval);
            loop {
                interval.tick().await;
                if !is_playing() {
                    continue;
                }
                let gap = now_ms() - arrival.load(Ordering::SeqCst);
                if gap > timeout_ms {
                    warn!(gap_ms = gap, "frame watchdog: no buffers arrived, declaring connection lost");
                    on_timeout();
                }
            }
        });
        self.tick = Some(handle);
    }

    /// Cancel the timer and remove the pad probe. Safe to call when unarmed.
    pub fn disarm(&mut self) {
        if let Some(handle) = self.tick.take() {
            handle.abort();
        }
        if let Some((pad, id)) = self.probe_id.take() {
            pad.remove_probe(id);
        }
    }

    /// Milliseconds since the last buffer arrival, for tests/diagnostics.
    pub fn gap_ms(&self) -> i64 {
        now_ms() - self.last_arrival_ms.load(Ordering::SeqCst)
    }
}

impl Drop for FrameWatchdog {
    fn drop(&mut self) {
        self.disarm();
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gap_under_threshold_does_not_trip() {
        let watchdog = FrameWatchdog::new();
        // Freshly created: gap is ~0ms, well under the 5s/4.9s boundary.
        assert!(watchdog.gap_ms() < DEFAULT_TIMEOUT.as_millis() as i64);
    }

    #[tokio::test]
    async fn boundary_4_9s_does_not_trip_5_1s_does() {
        let arrival = Arc::new(AtomicI64::new(now_ms() - 4_900));
        let gap = now_ms() - arrival.load(Ordering::SeqCst);
        assert!(gap <= DEFAULT_TIMEOUT.as_millis() as i64);

        let arrival = Arc::new(AtomicI64::new(now_ms() - 5_100));
        let gap = now_ms() - arrival.load(Ordering::SeqCst);
        assert!(gap > DEFAULT_TIMEOUT.as_millis() as i64);
    }
}
