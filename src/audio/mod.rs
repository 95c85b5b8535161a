//! 音频核心模块
//!
//! 包含：
//! - Format: 播放格式、周期长度和样本编码
//! - Ring Buffer: DMA 环形缓冲区与消费者读取算法
//! - Stats: 回调统计

pub mod format;
pub mod ring_buffer;
pub mod stats;

pub use format::{default_period_frames, PlaybackFormat, SampleFormat, DEFAULT_SAMPLE_RATE};
pub use ring_buffer::{capacity_frames, BufferInfo, RingBuffer, MAX_CAPACITY_BYTES, SUBMISSION_CHUNK};
pub use stats::{Delivery, DeliveryStats};
