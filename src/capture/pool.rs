//! Memory-mapped capture buffers

use tracing::{debug, error, info};

use super::device::VideoDevice;
use super::error::{CaptureError, Result};

/// Smallest pool that still allows double-buffered streaming
pub const MIN_BUFFERS: u32 = 2;

/// One device buffer mapped into process memory
pub struct MappedBuffer<M> {
    index: u32,
    length: usize,
    mapping: M,
}

impl<M: AsRef<[u8]>> MappedBuffer<M> {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        let data = self.mapping.as_ref();
        &data[..self.length.min(data.len())]
    }
}

/// The fixed set of buffers for one streaming session
pub struct BufferPool<M> {
    buffers: Vec<MappedBuffer<M>>,
}

impl<M: AsRef<[u8]>> BufferPool<M> {
    /// Request `preferred` buffers from the device and map every buffer it
    /// grants. On failure no mapping survives the call.
    pub fn negotiate_and_map<D>(device: &D, preferred: u32) -> Result<Self>
    where
        D: VideoDevice<Mapping = M>,
    {
        let granted = device.request_buffers(preferred).map_err(|e| {
            error!("Request for buffers failed: {}", e);
            CaptureError::BufferRequestFailed(e)
        })?;

        if granted < MIN_BUFFERS {
            error!("Device returned {} buffers, need at least {}", granted, MIN_BUFFERS);
            return Err(CaptureError::InsufficientBuffers { granted });
        }

        let mut pool = Self {
            buffers: Vec::with_capacity(granted as usize),
        };

        for index in 0..granted {
            if let Err(e) = pool.map_one(device, index) {
                pool.unmap_all();
                return Err(e);
            }
        }

        info!("Mapped {} capture buffers", pool.len());
        Ok(pool)
    }

    fn map_one<D>(&mut self, device: &D, index: u32) -> Result<()>
    where
        D: VideoDevice<Mapping = M>,
    {
        let info = device.query_buffer(index).map_err(|source| {
            error!("Failed to query buffer {} details: {}", index, source);
            CaptureError::MappingFailed { index, source }
        })?;

        let mapping = device.map_buffer(&info).map_err(|source| {
            error!("mmap for buffer {} failed: {}", index, source);
            CaptureError::MappingFailed { index, source }
        })?;

        debug!(index, length = info.length, offset = info.offset, "Mapped buffer");
        self.buffers.push(MappedBuffer {
            index,
            length: info.length,
            mapping,
        });
        Ok(())
    }

    /// Release every mapping. Safe to call on an empty pool.
    pub fn unmap_all(&mut self) {
        if !self.buffers.is_empty() {
            debug!("Unmapping {} capture buffers", self.buffers.len());
        }
        self.buffers.clear();
    }

    pub fn get(&self, index: u32) -> Option<&MappedBuffer<M>> {
        self.buffers.get(index as usize)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MappedBuffer<M>> {
        self.buffers.iter()
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}
