//! Frame sink that copies frames onto a bounded channel

use std::sync::atomic::{AtomicU64, Ordering};

use flume::{Receiver, Sender, TrySendError};
use tracing::{debug, warn};

use crate::capture::{CaptureError, Frame, FrameSink, OwnedFrame};

/// Copies every frame out of the device buffer and hands it to a consumer.
///
/// A full channel drops the new frame rather than stalling the capture
/// thread.
pub struct ChannelSink {
    tx: Sender<OwnedFrame>,
    faults: Sender<String>,
    stats: Stats,
}

#[derive(Default)]
struct Stats {
    frames_sent: AtomicU64,
    frames_dropped: AtomicU64,
}

impl ChannelSink {
    /// Create a sink plus the receiving ends for frames and stream faults
    pub fn bounded(capacity: usize) -> (Self, Receiver<OwnedFrame>, Receiver<String>) {
        let (tx, rx) = flume::bounded(capacity);
        let (faults, fault_rx) = flume::unbounded();
        let sink = Self {
            tx,
            faults,
            stats: Stats::default(),
        };
        (sink, rx, fault_rx)
    }

    /// (sent, dropped)
    pub fn stats(&self) -> (u64, u64) {
        (
            self.stats.frames_sent.load(Ordering::Relaxed),
            self.stats.frames_dropped.load(Ordering::Relaxed),
        )
    }
}

impl FrameSink for ChannelSink {
    fn accept_frame(&self, frame: &Frame<'_>) {
        match self.tx.try_send(frame.to_owned_frame()) {
            Ok(()) => {
                self.stats.frames_sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Full(_)) => {
                self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("sink_frames_dropped_total").increment(1);
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!("Frame consumer gone, discarding frame {}", frame.sequence);
            }
        }
    }

    fn stream_fault(&self, error: &CaptureError) {
        warn!("Stream fault: {}", error);
        let _ = self.faults.send(error.to_string());
    }
}
