//! Body of the capture thread

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::device::VideoDevice;
use super::frame::FrameTemplate;
use super::pool::BufferPool;
use super::sink::FrameSink;

/// Manually reset flag used to ask the capture thread to exit
#[derive(Debug, Clone, Default)]
pub struct CancelEvent(Arc<AtomicBool>);

impl CancelEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Observe the flag without blocking
    pub fn is_signaled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Why the capture loop returned
#[derive(Debug)]
pub enum LoopExit {
    Cancelled { frames: u64 },
    Fault { frames: u64, error: io::Error },
}

impl LoopExit {
    pub fn frames(&self) -> u64 {
        match self {
            LoopExit::Cancelled { frames } | LoopExit::Fault { frames, .. } => *frames,
        }
    }
}

/// Read-only state the capture thread works from
pub struct CaptureLoop<'a, D: VideoDevice> {
    pub device: &'a D,
    pub pool: &'a BufferPool<D::Mapping>,
    pub template: &'a FrameTemplate,
    pub sink: &'a dyn FrameSink,
    pub cancel: &'a CancelEvent,
    pub wait_timeout: Duration,
}

impl<D: VideoDevice> CaptureLoop<'_, D> {
    /// Wait, dequeue, deliver and requeue until cancelled or a fatal I/O
    /// error. Interrupted waits and spurious wakeups are retried in place.
    pub fn run(&self) -> LoopExit {
        let mut frames = 0u64;

        while !self.cancel.is_signaled() {
            match self.device.wait_readable(self.wait_timeout) {
                Ok(true) => {}
                Ok(false) => {
                    debug!("select timeout");
                    continue;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(error) => {
                    debug!("select failed: {}", error);
                    return LoopExit::Fault { frames, error };
                }
            }

            let buf = match self.device.dequeue_buffer() {
                Ok(buf) => buf,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(error) => {
                    debug!("failed to dequeue buffer: {}", error);
                    return LoopExit::Fault { frames, error };
                }
            };

            let Some(mapped) = self.pool.get(buf.index) else {
                warn!(index = buf.index, "device returned an unknown buffer index");
                return LoopExit::Fault {
                    frames,
                    error: io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("unknown buffer index {}", buf.index),
                    ),
                };
            };

            // Zero means the driver did not report a fill level
            let data = mapped.as_slice();
            let data = match buf.bytes_used as usize {
                0 => data,
                used => &data[..used.min(data.len())],
            };

            let delivered = Instant::now();
            let frame = self
                .template
                .frame(data, buf.timestamp, u64::from(buf.sequence));
            self.sink.accept_frame(&frame);
            metrics::histogram!("capture_sink_time_us")
                .record(delivered.elapsed().as_micros() as f64);
            metrics::counter!("capture_frames_total").increment(1);
            frames += 1;

            if let Err(error) = self.device.queue_buffer(buf.index) {
                debug!("failed to enqueue buffer: {}", error);
                return LoopExit::Fault { frames, error };
            }
        }

        LoopExit::Cancelled { frames }
    }
}

/// Issue stream-off. Failures are logged only, shutdown must always finish.
pub(crate) fn stop_stream<D: VideoDevice>(device: &D) {
    if let Err(e) = device.stream_off() {
        warn!("unable to stop stream: {}", e);
    }
}

/// Stops the stream when dropped, including while unwinding from a panicking
/// sink
pub(crate) struct StreamGuard<'a, D: VideoDevice>(pub(crate) &'a D);

impl<D: VideoDevice> Drop for StreamGuard<'_, D> {
    fn drop(&mut self) {
        stop_stream(self.0);
    }
}

/// Log how a capture run ended
pub(crate) fn report_exit(exit: &LoopExit) {
    match exit {
        LoopExit::Cancelled { frames } => {
            info!("Stopped capture after {} frames", frames);
        }
        LoopExit::Fault { frames, error } => {
            metrics::counter!("capture_faults_total").increment(1);
            warn!("Capture stream fault after {} frames: {}", frames, error);
        }
    }
}
