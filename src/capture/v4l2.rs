//! Kernel V4L2 device: single-planar capture with memory-mapped buffers

use std::io;
use std::os::fd::{BorrowedFd, RawFd};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use memmap2::{MmapMut, MmapOptions};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use tracing::info;
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::device::Handle;
use v4l::format::FieldOrder;
use v4l::v4l_sys::{v4l2_buffer, v4l2_requestbuffers};
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, Format, Fraction, Memory};

use super::device::{
    BufferInfo, DequeuedBuffer, DeviceOpener, FormatRequest, Framerate, NegotiatedFormat,
    VideoDevice,
};

// Buffer queue ioctls, which `v4l` only drives from inside its own streams
mod ioctl {
    use v4l::v4l_sys::{v4l2_buffer, v4l2_requestbuffers};

    nix::ioctl_readwrite!(vidioc_reqbufs, b'V', 8, v4l2_requestbuffers);
    nix::ioctl_readwrite!(vidioc_querybuf, b'V', 9, v4l2_buffer);
    nix::ioctl_readwrite!(vidioc_qbuf, b'V', 15, v4l2_buffer);
    nix::ioctl_readwrite!(vidioc_dqbuf, b'V', 17, v4l2_buffer);
    nix::ioctl_write_ptr!(vidioc_streamon, b'V', 18, libc::c_int);
    nix::ioctl_write_ptr!(vidioc_streamoff, b'V', 19, libc::c_int);
}

const CAPTURE: u32 = Type::VideoCapture as u32;

fn mmap_buffer(index: u32) -> v4l2_buffer {
    // SAFETY: v4l2_buffer is plain old data; all-zero is valid.
    let mut buf: v4l2_buffer = unsafe { std::mem::zeroed() };
    buf.index = index;
    buf.type_ = CAPTURE;
    buf.memory = Memory::Mmap as u32;
    buf
}

/// Opens `/dev/video*` nodes
#[derive(Debug, Clone, Copy, Default)]
pub struct KernelOpener;

impl DeviceOpener for KernelOpener {
    type Device = KernelDevice;

    fn open(&self, path: &Path) -> io::Result<KernelDevice> {
        KernelDevice::open(path)
    }
}

/// An open V4L2 capture node
pub struct KernelDevice {
    device: Device,
    handle: Arc<Handle>,
}

impl KernelDevice {
    /// Open the node (non-blocking) and check it can stream single-planar
    /// video
    pub fn open(path: &Path) -> io::Result<Self> {
        let device = Device::with_path(path)?;

        let caps = device.query_caps()?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE | CapFlags::STREAMING) {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "device does not support streaming video capture",
            ));
        }

        let handle = device.handle();
        Ok(Self { device, handle })
    }

    fn fd(&self) -> RawFd {
        self.handle.fd()
    }

    fn stream_ioctl(&self, on: bool) -> io::Result<()> {
        let type_ = CAPTURE as libc::c_int;
        // SAFETY: VIDIOC_STREAMON/OFF read one int.
        unsafe {
            if on {
                ioctl::vidioc_streamon(self.fd(), &type_)
            } else {
                ioctl::vidioc_streamoff(self.fd(), &type_)
            }
        }?;
        Ok(())
    }
}

impl VideoDevice for KernelDevice {
    type Mapping = MmapMut;

    fn set_format(&self, request: &FormatRequest) -> io::Result<NegotiatedFormat> {
        let mut fmt = Format::new(request.width, request.height, request.fourcc);
        fmt.field_order = FieldOrder::Interlaced;

        let fmt = self.device.set_format(&fmt)?;
        Ok(NegotiatedFormat {
            fourcc: fmt.fourcc,
            width: fmt.width,
            height: fmt.height,
            bytes_per_line: fmt.stride,
            size_image: fmt.size,
        })
    }

    fn set_frame_interval(&self, interval: Framerate) -> io::Result<Framerate> {
        let params = Parameters::new(Fraction::new(interval.numerator, interval.denominator));
        let params = self.device.set_params(&params)?;
        Ok(Framerate::new(
            params.interval.numerator,
            params.interval.denominator,
        ))
    }

    fn request_buffers(&self, count: u32) -> io::Result<u32> {
        // SAFETY: v4l2_requestbuffers is plain old data; all-zero is valid.
        let mut req: v4l2_requestbuffers = unsafe { std::mem::zeroed() };
        req.count = count;
        req.type_ = CAPTURE;
        req.memory = Memory::Mmap as u32;

        // SAFETY: `req` is the struct VIDIOC_REQBUFS reads and writes.
        unsafe { ioctl::vidioc_reqbufs(self.fd(), &mut req) }?;
        Ok(req.count)
    }

    fn query_buffer(&self, index: u32) -> io::Result<BufferInfo> {
        let mut buf = mmap_buffer(index);
        // SAFETY: `buf` is the struct VIDIOC_QUERYBUF reads and writes; MMAP
        // buffers report their map offset in `m.offset`.
        let offset = unsafe {
            ioctl::vidioc_querybuf(self.fd(), &mut buf)?;
            buf.m.offset
        };

        Ok(BufferInfo {
            index,
            length: buf.length as usize,
            offset: offset as u64,
        })
    }

    fn map_buffer(&self, info: &BufferInfo) -> io::Result<MmapMut> {
        // SAFETY: the driver owns this region while the descriptor is open;
        // the session drops every mapping before closing it.
        unsafe {
            MmapOptions::new()
                .offset(info.offset)
                .len(info.length)
                .map_mut(self.fd())
        }
    }

    fn queue_buffer(&self, index: u32) -> io::Result<()> {
        let mut buf = mmap_buffer(index);
        // SAFETY: `buf` is the struct VIDIOC_QBUF reads and writes.
        unsafe { ioctl::vidioc_qbuf(self.fd(), &mut buf) }?;
        Ok(())
    }

    fn dequeue_buffer(&self) -> io::Result<DequeuedBuffer> {
        let mut buf = mmap_buffer(0);
        // SAFETY: `buf` is the struct VIDIOC_DQBUF reads and writes.
        unsafe { ioctl::vidioc_dqbuf(self.fd(), &mut buf) }?;

        Ok(DequeuedBuffer {
            index: buf.index,
            bytes_used: buf.bytesused,
            sequence: buf.sequence,
            timestamp: Duration::from_secs(buf.timestamp.tv_sec.max(0) as u64)
                + Duration::from_micros(buf.timestamp.tv_usec.max(0) as u64),
        })
    }

    fn stream_on(&self) -> io::Result<()> {
        self.stream_ioctl(true)
    }

    fn stream_off(&self) -> io::Result<()> {
        self.stream_ioctl(false)
    }

    fn wait_readable(&self, timeout: Duration) -> io::Result<bool> {
        let millis = u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX);
        // SAFETY: `handle` keeps the descriptor open for the life of `self`.
        let fd = unsafe { BorrowedFd::borrow_raw(self.fd()) };
        let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
        let ready = poll(&mut fds, PollTimeout::from(millis))?;
        Ok(ready > 0)
    }
}
