pub mod capture_loop;
pub mod device;
pub mod error;
pub mod format;
pub mod frame;
pub mod layout;
pub mod pool;
pub mod session;
pub mod sink;
pub mod source;
pub mod v4l2;

pub use capture_loop::{CancelEvent, LoopExit};
pub use device::{DeviceOpener, Framerate, VideoDevice};
pub use error::CaptureError;
pub use format::VideoFormat;
pub use frame::{Frame, FramePlane, OwnedFrame};
pub use layout::{Plane, PlaneLayout};
pub use pool::BufferPool;
pub use session::{ActiveConfig, Session, SessionState};
pub use sink::FrameSink;
pub use source::CaptureSource;
pub use v4l2::{KernelDevice, KernelOpener};
