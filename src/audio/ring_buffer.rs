//! DMA 环形缓冲区
//!
//! 设计要点：
//! - 容量固定：帧数为 2 的幂，字节数为帧数 × 帧步长
//! - 单一读游标：只由音频回调（消费者）推进，单位为字节
//! - 生产者按绝对偏移直接覆写缓冲区内容，从不触碰读游标
//! - 零分配：deliver 只做定长内存拷贝
//!
//! 同步不在这里处理：调用方必须持有设备锁

use super::stats::Delivery;

/// 生产者提交粒度（帧）
pub const SUBMISSION_CHUNK: usize = 1;

/// 缓冲区字节数上限（256 MiB）
pub const MAX_CAPACITY_BYTES: usize = 1 << 28;

/// 计算 ring buffer 容量（帧），结果向上取整到 2 的幂
///
/// `samples_mult` 由调用方保证不小于 1；溢出时返回 None
pub fn capacity_frames(period_frames: u32, channels: u16, samples_mult: u32) -> Option<usize> {
    (period_frames as usize)
        .checked_mul(channels as usize)?
        .checked_mul(samples_mult as usize)?
        .max(1)
        .checked_next_power_of_two()
}

/// 缓冲区尺寸信息（给生产者做偏移计算）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferInfo {
    pub capacity_frames: usize,
    pub capacity_bytes: usize,
    pub frame_stride: usize,
    pub submission_chunk: usize,
}

/// DMA 环形缓冲区
pub struct RingBuffer {
    data: Box<[u8]>,
    frame_stride: usize,
    /// 读游标（字节），始终在 [0, capacity_bytes) 内
    read_pos: usize,
    /// 是否已锁定内存
    memory_locked: bool,
}

impl RingBuffer {
    /// 创建零填充的缓冲区
    ///
    /// capacity_frames 必须是 2 的幂
    pub fn new(capacity_frames: usize, frame_stride: usize) -> Self {
        assert!(
            capacity_frames.is_power_of_two(),
            "capacity must be power of two"
        );
        assert!(frame_stride > 0, "frame stride must be non-zero");

        Self {
            data: vec![0u8; capacity_frames * frame_stride].into_boxed_slice(),
            frame_stride,
            read_pos: 0,
            memory_locked: false,
        }
    }

    /// 锁定缓冲区内存，防止被换页
    ///
    /// 回调线程上的 page fault 会造成爆音，锁定失败只记录警告
    #[cfg(unix)]
    pub fn lock_memory(&mut self) -> bool {
        if self.memory_locked {
            return true;
        }

        let ptr = self.data.as_ptr() as *const libc::c_void;
        let len = self.data.len();

        let result = unsafe { libc::mlock(ptr, len) };

        if result == 0 {
            self.memory_locked = true;
            log::debug!("Ring buffer memory locked: {} bytes", len);
            true
        } else {
            log::warn!(
                "Failed to lock ring buffer memory: {}",
                std::io::Error::last_os_error()
            );
            false
        }
    }

    #[cfg(not(unix))]
    pub fn lock_memory(&mut self) -> bool {
        log::warn!("Ring buffer memory locking is not supported on this platform");
        false
    }

    /// 解锁缓冲区内存
    pub fn unlock_memory(&mut self) {
        if !self.memory_locked {
            return;
        }

        #[cfg(unix)]
        unsafe {
            libc::munlock(self.data.as_ptr() as *const libc::c_void, self.data.len());
        }

        self.memory_locked = false;
        log::debug!("Ring buffer memory unlocked");
    }

    /// 消费者读取（音频回调调用）
    ///
    /// 从读游标开始把 `out.len()` 字节拷入 `out`，到达末尾时从头继续。
    /// 不检查数据是否已被生产者刷新：生产者跟不上时会重复播放旧数据。
    ///
    /// **禁止：** 分配、锁、I/O、日志
    #[inline]
    pub fn deliver(&mut self, out: &mut [u8]) -> Delivery {
        let capacity = self.data.len();
        let mut delivery = Delivery::default();

        let mut pos = self.read_pos;
        if pos >= capacity {
            // 游标被外部破坏，自愈
            pos = 0;
            delivery.cursor_reset = true;
        }

        let mut written = 0;
        while written < out.len() {
            let tobufend = capacity - pos;
            let len = (out.len() - written).min(tobufend);

            out[written..written + len].copy_from_slice(&self.data[pos..pos + len]);
            written += len;
            pos += len;

            if pos >= capacity {
                pos = 0;
                delivery.wraps += 1;
            }
        }

        self.read_pos = pos;
        delivery
    }

    /// 读游标（字节）
    #[inline]
    pub fn read_pos(&self) -> usize {
        self.read_pos
    }

    /// 读游标（帧）
    #[inline]
    pub fn read_frame(&self) -> usize {
        self.read_pos / self.frame_stride
    }

    #[inline]
    pub fn capacity_bytes(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn capacity_frames(&self) -> usize {
        self.data.len() / self.frame_stride
    }

    #[inline]
    pub fn frame_stride(&self) -> usize {
        self.frame_stride
    }

    pub fn info(&self) -> BufferInfo {
        BufferInfo {
            capacity_frames: self.capacity_frames(),
            capacity_bytes: self.capacity_bytes(),
            frame_stride: self.frame_stride,
            submission_chunk: SUBMISSION_CHUNK,
        }
    }

    /// 缓冲区内容（只读）
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// 缓冲区内容（生产者覆写）
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Drop for RingBuffer {
    fn drop(&mut self) {
        self.unlock_memory();
    }
}
