use super::error::CaptureError;
use super::frame::Frame;

/// Receiver of captured frames.
///
/// Called synchronously from the capture thread. `accept_frame` must return
/// promptly; the frame borrows a device buffer that is handed back to the
/// driver as soon as the call returns.
pub trait FrameSink: Send + Sync {
    fn accept_frame(&self, frame: &Frame<'_>);

    /// The capture loop stopped on a fatal I/O error
    fn stream_fault(&self, _error: &CaptureError) {}
}
