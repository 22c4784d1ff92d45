//! Simulated capture device for driving the engine without hardware
//!
//! `SimOpener` hands out `SimDevice`s that behave like a single-planar MMAP
//! capture node: buffers are queued, dequeued in order and filled with a
//! byte pattern where every byte equals its offset modulo 251, so plane
//! offsets can be checked from the first byte of each plane.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use v4l::FourCC;
use v4l2_input::capture::device::{
    BufferInfo, DequeuedBuffer, DeviceOpener, FormatRequest, Framerate, NegotiatedFormat,
    VideoDevice,
};
use v4l2_input::capture::{CaptureError, Frame, FrameSink, VideoFormat};
use v4l2_input::{CaptureSettings, StreamConfig};

const PAGE_SIZE: u64 = 4096;

/// Behaviour of devices opened from a [`SimOpener`]
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Buffers granted per request, capped by the request
    pub granted: u32,
    /// Mapping this buffer index fails
    pub fail_map_at: Option<u32>,
    pub fail_open: bool,
    pub fail_format: bool,
    pub fail_interval: bool,
    pub fail_stream_on: bool,
    /// Pixel format the device picks regardless of the request
    pub substitute: Option<FourCC>,
    /// Whether queued buffers get filled once streaming
    pub produce_frames: bool,
    /// Time to fill one buffer
    pub frame_period: Duration,
    /// Dequeue fails once this many frames were delivered
    pub fault_after_frames: Option<u64>,
    /// Error returned by the first `failing_waits` waits
    pub fail_wait_with: Option<io::ErrorKind>,
    pub failing_waits: u32,
    /// Readiness reports whose dequeue finds nothing (EAGAIN)
    pub spurious_wakes: u32,
    /// Re-queueing fails once this many frames were delivered
    pub fail_requeue_after: Option<u64>,
    /// Driver sequence number of the first frame
    pub first_sequence: u32,
    /// Fill level reported per frame instead of the full image size
    pub bytes_used: Option<u32>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            granted: 4,
            fail_map_at: None,
            fail_open: false,
            fail_format: false,
            fail_interval: false,
            fail_stream_on: false,
            substitute: None,
            produce_frames: true,
            frame_period: Duration::from_millis(2),
            fault_after_frames: None,
            fail_wait_with: None,
            failing_waits: 0,
            spurious_wakes: 0,
            fail_requeue_after: None,
            first_sequence: 0,
            bytes_used: None,
        }
    }
}

/// Counters shared by an opener and every device it opened
#[derive(Debug, Default)]
pub struct SimStats {
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
    pub stream_ons: AtomicUsize,
    pub stream_offs: AtomicUsize,
    pub waits: AtomicUsize,
    pub false_wakes: AtomicUsize,
    live: Mutex<HashMap<usize, usize>>,
}

impl SimStats {
    /// Mappings still alive for the device opened `generation`-th (1-based)
    pub fn live_mappings(&self, generation: usize) -> usize {
        self.live
            .lock()
            .unwrap()
            .get(&generation)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_live_mappings(&self) -> usize {
        self.live.lock().unwrap().values().sum()
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn stream_ons(&self) -> usize {
        self.stream_ons.load(Ordering::SeqCst)
    }

    pub fn stream_offs(&self) -> usize {
        self.stream_offs.load(Ordering::SeqCst)
    }

    pub fn waits(&self) -> usize {
        self.waits.load(Ordering::SeqCst)
    }

    pub fn false_wakes(&self) -> usize {
        self.false_wakes.load(Ordering::SeqCst)
    }

    fn mapped(&self, generation: usize) {
        *self.live.lock().unwrap().entry(generation).or_default() += 1;
    }

    fn unmapped(&self, generation: usize) {
        if let Some(count) = self.live.lock().unwrap().get_mut(&generation) {
            *count -= 1;
        }
    }
}

pub struct SimOpener {
    config: Arc<Mutex<SimConfig>>,
    stats: Arc<SimStats>,
}

impl SimOpener {
    pub fn new(config: SimConfig) -> Self {
        Self {
            config: Arc::new(Mutex::new(config)),
            stats: Arc::default(),
        }
    }

    pub fn stats(&self) -> Arc<SimStats> {
        Arc::clone(&self.stats)
    }

    /// Handle for changing the behaviour of devices opened later
    pub fn config(&self) -> Arc<Mutex<SimConfig>> {
        Arc::clone(&self.config)
    }
}

impl DeviceOpener for SimOpener {
    type Device = SimDevice;

    fn open(&self, _path: &Path) -> io::Result<SimDevice> {
        let config = self.config.lock().unwrap().clone();
        if config.fail_open {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no such device"));
        }

        let generation = self.stats.opens.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(SimDevice {
            stats: Arc::clone(&self.stats),
            generation,
            format: Mutex::new(None),
            queue: Mutex::new(VecDeque::new()),
            streaming: AtomicBool::new(false),
            delivered: AtomicU64::new(0),
            failing_waits: AtomicU32::new(config.failing_waits),
            spurious_wakes: AtomicU32::new(config.spurious_wakes),
            config,
        })
    }
}

pub struct SimDevice {
    config: SimConfig,
    stats: Arc<SimStats>,
    generation: usize,
    format: Mutex<Option<NegotiatedFormat>>,
    queue: Mutex<VecDeque<u32>>,
    streaming: AtomicBool,
    delivered: AtomicU64,
    failing_waits: AtomicU32,
    spurious_wakes: AtomicU32,
}

/// Decrement `counter` if it is above zero, reporting whether it was
fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl Drop for SimDevice {
    fn drop(&mut self) {
        self.stats.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// A buffer mapping that reports its own unmapping
pub struct SimMapping {
    data: Vec<u8>,
    stats: Arc<SimStats>,
    generation: usize,
}

impl AsRef<[u8]> for SimMapping {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl Drop for SimMapping {
    fn drop(&mut self) {
        self.stats.unmapped(self.generation);
    }
}

fn sim_error(message: &str) -> io::Error {
    io::Error::new(io::ErrorKind::Other, message.to_string())
}

fn is_packed(fourcc: FourCC) -> bool {
    matches!(&fourcc.repr, b"YUYV" | b"YVYU" | b"UYVY")
}

impl VideoDevice for SimDevice {
    type Mapping = SimMapping;

    fn set_format(&self, request: &FormatRequest) -> io::Result<NegotiatedFormat> {
        if self.config.fail_format {
            return Err(sim_error("S_FMT rejected"));
        }

        let fourcc = self.config.substitute.unwrap_or(request.fourcc);
        let (bytes_per_line, size_image) = if is_packed(fourcc) {
            (request.width * 2, request.width * request.height * 2)
        } else {
            (request.width, request.width * request.height * 3 / 2)
        };
        let negotiated = NegotiatedFormat {
            fourcc,
            width: request.width,
            height: request.height,
            bytes_per_line,
            size_image,
        };
        *self.format.lock().unwrap() = Some(negotiated);
        Ok(negotiated)
    }

    fn set_frame_interval(&self, interval: Framerate) -> io::Result<Framerate> {
        if self.config.fail_interval {
            return Err(sim_error("S_PARM rejected"));
        }
        Ok(interval)
    }

    fn request_buffers(&self, count: u32) -> io::Result<u32> {
        Ok(count.min(self.config.granted))
    }

    fn query_buffer(&self, index: u32) -> io::Result<BufferInfo> {
        let format = (*self.format.lock().unwrap()).ok_or_else(|| sim_error("no format"))?;
        Ok(BufferInfo {
            index,
            length: format.size_image as usize,
            offset: index as u64 * PAGE_SIZE,
        })
    }

    fn map_buffer(&self, info: &BufferInfo) -> io::Result<SimMapping> {
        if self.config.fail_map_at == Some(info.index) {
            return Err(sim_error("mmap refused"));
        }

        let data = (0..info.length).map(|i| (i % 251) as u8).collect();
        self.stats.mapped(self.generation);
        Ok(SimMapping {
            data,
            stats: Arc::clone(&self.stats),
            generation: self.generation,
        })
    }

    fn queue_buffer(&self, index: u32) -> io::Result<()> {
        if let Some(limit) = self.config.fail_requeue_after {
            if self.streaming.load(Ordering::SeqCst)
                && self.delivered.load(Ordering::SeqCst) >= limit
            {
                return Err(sim_error("QBUF rejected"));
            }
        }
        self.queue.lock().unwrap().push_back(index);
        Ok(())
    }

    fn dequeue_buffer(&self) -> io::Result<DequeuedBuffer> {
        if let Some(limit) = self.config.fault_after_frames {
            if self.delivered.load(Ordering::SeqCst) >= limit {
                return Err(sim_error("device unplugged"));
            }
        }
        if !self.streaming.load(Ordering::SeqCst) {
            return Err(io::Error::from(io::ErrorKind::WouldBlock));
        }
        if take_one(&self.spurious_wakes) {
            self.stats.false_wakes.fetch_add(1, Ordering::SeqCst);
            return Err(io::Error::from(io::ErrorKind::WouldBlock));
        }

        let index = self
            .queue
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| io::Error::from(io::ErrorKind::WouldBlock))?;
        let sequence = self.delivered.fetch_add(1, Ordering::SeqCst);
        let size_image = (*self.format.lock().unwrap()).map_or(0, |f| f.size_image);

        Ok(DequeuedBuffer {
            index,
            bytes_used: self.config.bytes_used.unwrap_or(size_image),
            sequence: self.config.first_sequence + sequence as u32,
            timestamp: self.config.frame_period * sequence as u32,
        })
    }

    fn stream_on(&self) -> io::Result<()> {
        if self.config.fail_stream_on {
            return Err(sim_error("STREAMON rejected"));
        }
        self.stats.stream_ons.fetch_add(1, Ordering::SeqCst);
        self.streaming.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stream_off(&self) -> io::Result<()> {
        self.stats.stream_offs.fetch_add(1, Ordering::SeqCst);
        self.streaming.store(false, Ordering::SeqCst);
        self.queue.lock().unwrap().clear();
        Ok(())
    }

    fn wait_readable(&self, timeout: Duration) -> io::Result<bool> {
        self.stats.waits.fetch_add(1, Ordering::SeqCst);
        if let Some(kind) = self.config.fail_wait_with {
            if take_one(&self.failing_waits) {
                thread::sleep(self.config.frame_period.min(timeout));
                return Err(io::Error::new(kind, "poll failed"));
            }
        }

        let faulting = self
            .config
            .fault_after_frames
            .is_some_and(|limit| self.delivered.load(Ordering::SeqCst) >= limit);
        let ready = self.streaming.load(Ordering::SeqCst)
            && self.config.produce_frames
            && !self.queue.lock().unwrap().is_empty();

        if faulting || ready {
            thread::sleep(self.config.frame_period.min(timeout));
            return Ok(true);
        }

        thread::sleep(timeout);
        Ok(false)
    }
}

/// What the sink saw of one plane
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneSample {
    pub first_byte: u8,
    pub len: usize,
    pub stride: u32,
}

/// Sink that counts frames and remembers the last one
#[derive(Default)]
pub struct CountingSink {
    frames: AtomicU64,
    sequences: Mutex<Vec<u64>>,
    last: Mutex<Option<(VideoFormat, u32, u32, Vec<PlaneSample>)>>,
    faults: Mutex<Vec<String>>,
}

impl CountingSink {
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::SeqCst)
    }

    pub fn last(&self) -> Option<(VideoFormat, u32, u32, Vec<PlaneSample>)> {
        self.last.lock().unwrap().clone()
    }

    /// Frame sequence numbers in delivery order
    pub fn sequences(&self) -> Vec<u64> {
        self.sequences.lock().unwrap().clone()
    }

    pub fn faults(&self) -> Vec<String> {
        self.faults.lock().unwrap().clone()
    }
}

impl FrameSink for CountingSink {
    fn accept_frame(&self, frame: &Frame<'_>) {
        let planes = frame
            .planes()
            .iter()
            .map(|plane| PlaneSample {
                first_byte: plane.data.first().copied().unwrap_or_default(),
                len: plane.data.len(),
                stride: plane.stride,
            })
            .collect();
        *self.last.lock().unwrap() = Some((frame.format, frame.width, frame.height, planes));
        self.sequences.lock().unwrap().push(frame.sequence);
        self.frames.fetch_add(1, Ordering::SeqCst);
    }

    fn stream_fault(&self, error: &CaptureError) {
        self.faults.lock().unwrap().push(error.to_string());
    }
}

/// Sink that panics on its first frame
pub struct PanickingSink;

impl FrameSink for PanickingSink {
    fn accept_frame(&self, frame: &Frame<'_>) {
        panic!("sink rejected frame {}", frame.sequence);
    }
}

/// Settings for a simulated device node
pub fn settings(pixel_format: &str, width: u32, height: u32) -> CaptureSettings {
    CaptureSettings {
        device_path: "/dev/video-sim".into(),
        pixel_format: pixel_format.into(),
        width,
        height,
        ..CaptureSettings::default()
    }
}

/// Stream options with a short wait so tests stay fast
pub fn options(buffer_count: u32) -> StreamConfig {
    StreamConfig {
        buffer_count,
        wait_timeout_ms: 50,
        capture_core: None,
    }
}

/// Poll `condition` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}
