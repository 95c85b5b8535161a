//! snd-dma
//!
//! Ring-buffer DMA sound backend: loads the system audio library at runtime,
//! negotiates a playback format and feeds a fixed-size circular buffer to the
//! device callback. The mixer paints into the buffer under the device lock.

pub mod audio;
pub mod backend;
pub mod config;
pub mod session;
pub mod tone;

pub use audio::{BufferInfo, DeliveryStats, PlaybackFormat, SampleFormat};
pub use backend::{AudioBackend, BackendError, DeviceSpec};
pub use config::{BackendKind, SoundConfig};
pub use session::{InitError, PaintGuard, SoundDma};
