//! DMA 声音会话
//!
//! 把后端设备和 ring buffer 绑定在一起：
//! - 初始化：解析后端 → 协商格式 → 分配缓冲区 → 注册回调 → 取消暂停
//! - 消费者：设备回调按读游标拷出数据
//! - 生产者：持设备锁期间直接覆写缓冲区（`begin_painting` / `submit`）
//!
//! 读游标和缓冲区内容只受设备锁这一个互斥域保护，不另加锁

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::audio::{
    capacity_frames, default_period_frames, BufferInfo, DeliveryStats, PlaybackFormat, RingBuffer,
    MAX_CAPACITY_BYTES,
};
use crate::backend::{self, AudioBackend, BackendError, DeviceSpec, StreamCallback};
use crate::config::SoundConfig;

/// 初始化错误
///
/// 两种错误都是致命的，不重试，也不回退到其他后端
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    /// 库或必需入口点缺失
    #[error("audio backend unavailable: {0}")]
    BackendUnavailable(String),
    /// 设备拒绝打开或协商失败
    #[error("audio device open failed: {0}")]
    DeviceOpenFailed(String),
}

impl From<BackendError> for InitError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::LibraryLoad { .. }
            | BackendError::MissingSymbol { .. }
            | BackendError::Unavailable(_) => Self::BackendUnavailable(e.to_string()),
            _ => Self::DeviceOpenFailed(e.to_string()),
        }
    }
}

/// 回调与生产者共享的状态
#[derive(Default)]
struct StreamState {
    /// None 表示未绑定，回调输出静音
    buffer: Option<RingBuffer>,
    stats: DeliveryStats,
}

impl StreamState {
    /// 消费者入口
    ///
    /// **禁止：** 分配、锁、I/O、日志
    #[inline]
    fn deliver(&mut self, out: &mut [u8]) {
        match self.buffer.as_mut() {
            Some(buffer) => {
                let delivery = buffer.deliver(out);
                self.stats.record(out.len(), delivery);
            }
            None => {
                out.fill(0);
                self.stats.record_silence();
            }
        }
    }
}

struct SharedStream {
    state: UnsafeCell<StreamState>,
}

// SAFETY: 所有访问都发生在后端设备锁内（回调由后端持锁调用），
// 或发生在设备关闭、不再有回调之后
unsafe impl Sync for SharedStream {}

impl SharedStream {
    fn new() -> Self {
        Self {
            state: UnsafeCell::new(StreamState::default()),
        }
    }

    /// # Safety
    ///
    /// 调用方必须持有设备锁，或设备已关闭
    #[allow(clippy::mut_from_ref)]
    unsafe fn state_mut(&self) -> &mut StreamState {
        &mut *self.state.get()
    }

    /// # Safety
    ///
    /// 同 `state_mut`
    unsafe fn state(&self) -> &StreamState {
        &*self.state.get()
    }
}

/// 设备锁 RAII 守卫
struct DeviceLock<'a> {
    backend: &'a dyn AudioBackend,
}

impl<'a> DeviceLock<'a> {
    fn acquire(backend: &'a dyn AudioBackend) -> Self {
        backend.lock();
        Self { backend }
    }
}

impl Drop for DeviceLock<'_> {
    fn drop(&mut self) {
        // SAFETY: 与 acquire 中的 lock() 配对
        unsafe { self.backend.unlock() };
    }
}

/// 生产者写入窗口
///
/// 持有期间设备锁被占用，回调暂停；deref 为整个缓冲区。
/// 必须尽快 `submit`，不能跨调度持有。
pub struct PaintGuard<'a> {
    buffer: &'a mut RingBuffer,
    format: PlaybackFormat,
    _lock: DeviceLock<'a>,
}

impl PaintGuard<'_> {
    /// 当前读游标（帧）
    pub fn read_cursor(&self) -> usize {
        self.buffer.read_frame()
    }

    pub fn format(&self) -> PlaybackFormat {
        self.format
    }

    pub fn info(&self) -> BufferInfo {
        self.buffer.info()
    }

    /// 结束写入并释放设备锁
    pub fn submit(self) {}
}

impl Deref for PaintGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buffer.as_slice()
    }
}

impl DerefMut for PaintGuard<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buffer.as_mut_slice()
    }
}

/// DMA 声音会话
pub struct SoundDma {
    config: SoundConfig,
    backend: Box<dyn AudioBackend>,
    stream: Arc<SharedStream>,
    format: Option<PlaybackFormat>,
    info: Option<BufferInfo>,
    driver: Option<String>,
}

impl SoundDma {
    /// 按配置选择后端，不做任何 I/O
    pub fn new(config: SoundConfig) -> Self {
        let backend = backend::create(config.backend, config.library.clone());
        Self::with_backend(config, backend)
    }

    /// 使用指定后端
    pub fn with_backend(config: SoundConfig, backend: Box<dyn AudioBackend>) -> Self {
        Self {
            config,
            backend,
            stream: Arc::new(SharedStream::new()),
            format: None,
            info: None,
            driver: None,
        }
    }

    /// 打开设备并开始回调
    ///
    /// 已绑定时直接返回现有格式，没有任何副作用
    pub fn initialize(&mut self) -> Result<PlaybackFormat, InitError> {
        if let Some(format) = self.format {
            return Ok(format);
        }

        if let Err(e) = self.backend.init() {
            return Err(self.abort(e));
        }

        let driver = match self.backend.driver_name() {
            Ok(driver) => driver,
            Err(e) => return Err(self.abort(e)),
        };

        let rate = self.config.requested_rate();
        let desired = DeviceSpec {
            sample_rate: rate,
            format: self.config.sample_format(),
            channels: self.config.channels,
            period_frames: default_period_frames(rate),
        };

        let callback = self.stream_callback();
        let obtained = match self
            .backend
            .open(&desired, callback)
            .and_then(|spec| spec.validate().map(|_| spec))
        {
            Ok(spec) => spec,
            Err(e) => return Err(self.abort(e)),
        };

        if obtained != desired {
            log::info!("Requested {:?}, device granted {:?}", desired, obtained);
        }

        let format = obtained.playback_format();
        let mult = self.config.effective_samples_mult();
        let frames = capacity_frames(obtained.period_frames, obtained.channels, mult).filter(
            |&frames| {
                frames
                    .checked_mul(format.frame_stride())
                    .is_some_and(|bytes| bytes <= MAX_CAPACITY_BYTES)
            },
        );
        let Some(frames) = frames else {
            return Err(self.abort(InitError::DeviceOpenFailed(format!(
                "ring buffer for {} frames x {} channels x {} exceeds {} bytes",
                obtained.period_frames, obtained.channels, mult, MAX_CAPACITY_BYTES
            ))));
        };
        let mut buffer = RingBuffer::new(frames, format.frame_stride());
        if self.config.lock_memory {
            buffer.lock_memory();
        }
        let info = buffer.info();
        log::debug!(
            "Ring buffer: {} frames x {} bytes = {} bytes (period {} frames)",
            info.capacity_frames,
            info.frame_stride,
            info.capacity_bytes,
            obtained.period_frames
        );

        {
            let _lock = DeviceLock::acquire(&*self.backend);
            // SAFETY: 持有设备锁
            let state = unsafe { self.stream.state_mut() };
            state.buffer = Some(buffer);
            state.stats.reset();
        }

        // 存储就绪后才允许回调
        self.backend.pause(false);

        log::info!("Sound initialized: driver {} | {}", driver, format);

        self.format = Some(format);
        self.info = Some(info);
        self.driver = Some(driver);
        Ok(format)
    }

    /// 初始化失败：释放已获取的资源并转换错误
    fn abort(&mut self, e: impl Into<InitError>) -> InitError {
        let e = e.into();
        log::warn!("Sound init failed: {}", e);
        self.backend.close();
        e
    }

    fn stream_callback(&self) -> StreamCallback {
        let stream = Arc::clone(&self.stream);
        Box::new(move |out: &mut [u8]| {
            // SAFETY: 后端总是在持有设备锁时调用回调
            let state = unsafe { stream.state_mut() };
            state.deliver(out);
        })
    }

    /// 停止回调并释放设备和缓冲区，未绑定时无操作
    pub fn shutdown(&mut self) {
        if self.format.is_none() {
            return;
        }

        // 先暂停再关闭，之后才释放存储
        self.backend.pause(true);
        self.backend.close();

        // SAFETY: 设备已关闭，不会再有回调
        let state = unsafe { self.stream.state_mut() };
        state.buffer = None;

        self.format = None;
        self.info = None;
        self.driver = None;
        log::info!("Sound shut down");
    }

    /// 消费者当前读位置（帧），未绑定时为 0
    pub fn query_read_cursor(&self) -> usize {
        if self.format.is_none() {
            return 0;
        }

        let _lock = DeviceLock::acquire(&*self.backend);
        // SAFETY: 持有设备锁
        let state = unsafe { self.stream.state() };
        state.buffer.as_ref().map_or(0, RingBuffer::read_frame)
    }

    /// 获取写入窗口，未绑定时返回 None
    pub fn begin_painting(&mut self) -> Option<PaintGuard<'_>> {
        let format = self.format?;

        let lock = DeviceLock::acquire(&*self.backend);
        // SAFETY: 持有设备锁，且守卫独占借用会话
        let state = unsafe { self.stream.state_mut() };
        let buffer = state.buffer.as_mut()?;

        Some(PaintGuard {
            buffer,
            format,
            _lock: lock,
        })
    }

    /// 回调统计快照
    pub fn stats(&self) -> DeliveryStats {
        let _lock = DeviceLock::acquire(&*self.backend);
        // SAFETY: 持有设备锁
        unsafe { self.stream.state() }.stats
    }

    pub fn is_bound(&self) -> bool {
        self.format.is_some()
    }

    pub fn format(&self) -> Option<PlaybackFormat> {
        self.format
    }

    pub fn buffer_info(&self) -> Option<BufferInfo> {
        self.info
    }

    pub fn driver_name(&self) -> Option<&str> {
        self.driver.as_deref()
    }

    pub fn config(&self) -> &SoundConfig {
        &self.config
    }
}

impl Drop for SoundDma {
    fn drop(&mut self) {
        self.shutdown();
    }
}
