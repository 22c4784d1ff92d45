//! Device session: configure, start, stop and tear down one capture device

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{error, info, instrument, warn};
use v4l::FourCC;

use super::capture_loop::{
    report_exit, stop_stream, CancelEvent, CaptureLoop, LoopExit, StreamGuard,
};
use super::device::{DeviceOpener, FormatRequest, Framerate, VideoDevice};
use super::error::{CaptureError, Result};
use super::format::{self, VideoFormat};
use super::frame::FrameTemplate;
use super::layout::PlaneLayout;
use super::pool::BufferPool;
use super::sink::FrameSink;
use crate::{CaptureSettings, StreamConfig};

type MappingOf<O> = <<O as DeviceOpener>::Device as VideoDevice>::Mapping;

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Configured,
    Streaming,
}

/// Configuration as reported back by the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveConfig {
    pub device_path: PathBuf,
    pub fourcc: FourCC,
    pub format: VideoFormat,
    pub width: u32,
    pub height: u32,
    /// Bytes per line of the first plane
    pub stride: u32,
    /// Bytes the driver fills per frame
    pub frame_size: u32,
    pub framerate: Framerate,
    pub buffer_count: usize,
}

struct Worker<M> {
    cancel: CancelEvent,
    handle: JoinHandle<(BufferPool<M>, LoopExit)>,
}

/// Exclusive owner of one open capture device and its buffers
pub struct Session<O: DeviceOpener> {
    opener: O,
    options: StreamConfig,
    device: Option<Arc<O::Device>>,
    pool: Option<BufferPool<MappingOf<O>>>,
    active: Option<ActiveConfig>,
    template: Option<FrameTemplate>,
    worker: Option<Worker<MappingOf<O>>>,
    frames_captured: u64,
}

impl<O: DeviceOpener> Session<O> {
    pub fn new(opener: O, options: StreamConfig) -> Self {
        Self {
            opener,
            options,
            device: None,
            pool: None,
            active: None,
            template: None,
            worker: None,
            frames_captured: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        if self.worker.is_some() {
            SessionState::Streaming
        } else if self.pool.is_some() {
            SessionState::Configured
        } else {
            SessionState::Closed
        }
    }

    pub fn active(&self) -> Option<&ActiveConfig> {
        self.active.as_ref()
    }

    pub fn layout(&self) -> Option<&PlaneLayout> {
        self.template.as_ref().map(|t| &t.layout)
    }

    /// Frames delivered by the most recently finished capture run
    pub fn frames_captured(&self) -> u64 {
        self.frames_captured
    }

    /// Open and negotiate the device. Any previous configuration is torn
    /// down first; on failure the session is left closed.
    #[instrument(skip(self, settings), fields(device = %settings.device_path))]
    pub fn configure(&mut self, settings: &CaptureSettings) -> Result<&ActiveConfig> {
        self.teardown();

        match self.try_configure(settings) {
            Ok(()) => self.active.as_ref().ok_or(CaptureError::NotConfigured),
            Err(e) => {
                error!("Initialization failed: {}", e);
                self.teardown();
                Err(e)
            }
        }
    }

    fn try_configure(&mut self, settings: &CaptureSettings) -> Result<()> {
        let fourcc = settings.fourcc()?;
        let path = PathBuf::from(&settings.device_path);

        info!("Start capture from {}", path.display());
        let device = self
            .opener
            .open(&path)
            .map_err(|source| CaptureError::DeviceOpenFailed {
                path: path.clone(),
                source,
            })?;
        let device = Arc::new(device);
        self.device = Some(Arc::clone(&device));

        let negotiated = device
            .set_format(&FormatRequest {
                fourcc,
                width: settings.width,
                height: settings.height,
            })
            .map_err(CaptureError::FormatNegotiationFailed)?;
        let format = format::translate(negotiated.fourcc)
            .ok_or(CaptureError::UnsupportedFormat(negotiated.fourcc))?;
        if negotiated.fourcc != fourcc {
            warn!("Device substituted pixel format {} for {}", negotiated.fourcc, fourcc);
        }
        info!("Resolution: {}x{}", negotiated.width, negotiated.height);
        info!("Linesize: {} Bytes", negotiated.bytes_per_line);
        info!("Frame size: {} Bytes", negotiated.size_image);

        let framerate = device
            .set_frame_interval(settings.framerate())
            .map_err(CaptureError::FramerateNegotiationFailed)?;
        info!("Framerate: {:.2} fps", framerate.fps());

        let pool = BufferPool::negotiate_and_map(device.as_ref(), self.options.buffer_count)?;
        let layout = PlaneLayout::plan(
            negotiated.fourcc,
            negotiated.width,
            negotiated.height,
            negotiated.bytes_per_line,
        );

        self.template = Some(FrameTemplate::new(
            negotiated.width,
            negotiated.height,
            format,
            layout,
        ));
        self.active = Some(ActiveConfig {
            device_path: path,
            fourcc: negotiated.fourcc,
            format,
            width: negotiated.width,
            height: negotiated.height,
            stride: negotiated.bytes_per_line,
            frame_size: negotiated.size_image,
            framerate,
            buffer_count: pool.len(),
        });
        self.pool = Some(pool);
        Ok(())
    }

    /// Queue every buffer, turn the stream on and launch the capture thread.
    /// A failure to start closes the session.
    ///
    /// Starting a streaming session stops the running capture thread and
    /// restarts with the new sink. If that thread had already died on a
    /// stream fault, the fault is returned and the session is closed.
    #[instrument(skip_all)]
    pub fn start(&mut self, sink: Arc<dyn FrameSink>) -> Result<()> {
        if self.worker.is_some() {
            if let Some(fault) = self.reap(true) {
                return Err(fault);
            }
        }
        let (Some(device), Some(template)) = (self.device.clone(), self.template) else {
            return Err(CaptureError::NotConfigured);
        };
        let Some(pool) = self.pool.take() else {
            return Err(CaptureError::NotConfigured);
        };

        if let Err(e) = Self::start_stream(device.as_ref(), &pool) {
            error!("{}", e);
            self.pool = Some(pool);
            self.teardown();
            return Err(e);
        }

        let cancel = CancelEvent::new();
        let thread_cancel = cancel.clone();
        let wait_timeout = Duration::from_millis(self.options.wait_timeout_ms);
        let capture_core = self.options.capture_core;
        let spawned = thread::Builder::new()
            .name("v4l2-capture".into())
            .spawn(move || {
                if let Some(id) = capture_core {
                    if !core_affinity::set_for_current(core_affinity::CoreId { id }) {
                        warn!(core = id, "Unable to pin capture thread");
                    }
                }

                let exit = {
                    let _streaming = StreamGuard(device.as_ref());
                    CaptureLoop {
                        device: device.as_ref(),
                        pool: &pool,
                        template: &template,
                        sink: sink.as_ref(),
                        cancel: &thread_cancel,
                        wait_timeout,
                    }
                    .run()
                };

                report_exit(&exit);
                if let LoopExit::Fault { error, .. } = &exit {
                    let fault = CaptureError::AcquisitionFault(clone_io_error(error));
                    sink.stream_fault(&fault);
                }
                (pool, exit)
            });

        match spawned {
            Ok(handle) => {
                self.worker = Some(Worker { cancel, handle });
                Ok(())
            }
            Err(e) => {
                // The closure, and the pool with it, is gone; the stream is
                // still on.
                if let Some(device) = &self.device {
                    stop_stream(device.as_ref());
                }
                self.teardown();
                Err(CaptureError::ThreadSpawnFailed(e))
            }
        }
    }

    fn start_stream(device: &O::Device, pool: &BufferPool<MappingOf<O>>) -> Result<()> {
        for buffer in pool.iter() {
            device
                .queue_buffer(buffer.index())
                .map_err(CaptureError::StreamStartFailed)?;
        }
        device.stream_on().map_err(CaptureError::StreamStartFailed)
    }

    /// Cancel and join the capture thread. Buffers stay mapped so the
    /// session can be started again.
    #[instrument(skip_all)]
    pub fn stop(&mut self) {
        if let Some(exit) = self.join_worker(true) {
            self.frames_captured = exit.frames();
        }
    }

    /// Reap a capture thread that stopped on its own. Returns the fault that
    /// ended it; the session is torn down in that case.
    pub fn poll_fault(&mut self) -> Option<CaptureError> {
        let finished = self
            .worker
            .as_ref()
            .is_some_and(|worker| worker.handle.is_finished());
        if !finished {
            return None;
        }

        self.reap(false)
    }

    /// Join the capture thread; a run that ended on a fault closes the
    /// session and returns the fault.
    fn reap(&mut self, cancel: bool) -> Option<CaptureError> {
        let exit = self.join_worker(cancel)?;
        self.frames_captured = exit.frames();
        match exit {
            LoopExit::Cancelled { .. } => None,
            LoopExit::Fault { error, .. } => {
                self.teardown();
                Some(CaptureError::AcquisitionFault(error))
            }
        }
    }

    fn join_worker(&mut self, cancel: bool) -> Option<LoopExit> {
        let worker = self.worker.take()?;
        if cancel {
            worker.cancel.signal();
        }

        match worker.handle.join() {
            Ok((pool, exit)) => {
                self.pool = Some(pool);
                Some(exit)
            }
            Err(_) => {
                // Unwinding dropped the pool, so the device cannot be restarted.
                error!("Capture thread panicked");
                self.template = None;
                self.active = None;
                self.device = None;
                None
            }
        }
    }

    /// Release everything: join the capture thread, unmap buffers, close
    /// the device. Idempotent.
    #[instrument(skip_all)]
    pub fn teardown(&mut self) {
        self.stop();

        if let Some(mut pool) = self.pool.take() {
            pool.unmap_all();
        }
        self.template = None;
        self.active = None;
        self.device = None;
    }
}

impl<O: DeviceOpener> Drop for Session<O> {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn clone_io_error(error: &std::io::Error) -> std::io::Error {
    std::io::Error::new(error.kind(), error.to_string())
}
