//! 空设备后端
//!
//! 不输出任何声音，但遵守与真实设备相同的回调协议：
//! - Clocked: 后台线程按协商的采样率周期性拉取数据
//! - Manual: 不启动线程，由测试通过 `NullHandle::pump` 驱动
//!
//! 回调总是在持有设备锁时调用

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::lock_api::RawMutex as _;
use parking_lot::{Mutex, RawMutex};

use super::{AudioBackend, BackendError, DeviceSpec, StreamCallback};

/// 模拟的失败点
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullFailure {
    /// init 失败（相当于库不可用）
    Init,
    /// 打开设备失败
    Open,
}

/// 设备共享状态
struct NullDevice {
    /// 设备锁，跨越 lock()/unlock() 两次调用，所以用裸锁
    lock: RawMutex,
    paused: AtomicBool,
    open: AtomicBool,
    callback: Mutex<Option<StreamCallback>>,
    opens: AtomicUsize,
    callbacks: AtomicU64,
}

impl NullDevice {
    fn new() -> Self {
        Self {
            lock: RawMutex::INIT,
            paused: AtomicBool::new(true),
            open: AtomicBool::new(false),
            callback: Mutex::new(None),
            opens: AtomicUsize::new(0),
            callbacks: AtomicU64::new(0),
        }
    }

    /// 在设备锁内调用一次回调；暂停或未打开时输出静音
    fn pump_into(&self, out: &mut [u8]) {
        self.lock.lock();

        let running = self.open.load(Ordering::Acquire) && !self.paused.load(Ordering::Acquire);
        match self.callback.lock().as_mut() {
            Some(callback) if running => {
                self.callbacks.fetch_add(1, Ordering::Relaxed);
                callback(out);
            }
            _ => out.fill(0),
        }

        // SAFETY: 与本函数开头的 lock() 配对
        unsafe { self.lock.unlock() };
    }
}

/// 时钟线程
struct Clock {
    running: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl Clock {
    fn start(device: Arc<NullDevice>, spec: &DeviceSpec) -> Result<Self, BackendError> {
        let period_bytes = spec.period_frames as usize * spec.playback_format().frame_stride();
        let interval = Duration::from_secs_f64(spec.period_frames as f64 / spec.sample_rate as f64);

        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();

        let thread = thread::Builder::new()
            .name("snd-dma-null-clock".into())
            .spawn(move || {
                // 周期缓冲区只分配一次
                let mut period = vec![0u8; period_bytes];
                while flag.load(Ordering::Acquire) {
                    thread::sleep(interval);
                    device.pump_into(&mut period);
                }
            })
            .map_err(|e| BackendError::OpenFailed(format!("clock thread: {}", e)))?;

        Ok(Self { running, thread })
    }

    fn stop(self) {
        self.running.store(false, Ordering::Release);
        if self.thread.join().is_err() {
            log::warn!("Null device clock thread panicked");
        }
    }
}

/// 测试用句柄：从设备侧驱动回调并观察状态
#[derive(Clone)]
pub struct NullHandle {
    device: Arc<NullDevice>,
}

impl NullHandle {
    /// 模拟设备请求 `len` 字节
    pub fn pump(&self, len: usize) -> Vec<u8> {
        let mut out = vec![0xAA; len];
        self.device.pump_into(&mut out);
        out
    }

    pub fn is_open(&self) -> bool {
        self.device.open.load(Ordering::Acquire)
    }

    pub fn is_paused(&self) -> bool {
        self.device.paused.load(Ordering::Acquire)
    }

    /// 设备被打开的总次数
    pub fn open_count(&self) -> usize {
        self.device.opens.load(Ordering::Acquire)
    }

    /// 实际调用回调的次数
    pub fn callback_count(&self) -> u64 {
        self.device.callbacks.load(Ordering::Relaxed)
    }
}

/// 空设备后端
pub struct NullBackend {
    device: Arc<NullDevice>,
    clocked: bool,
    granted: Option<DeviceSpec>,
    failure: Option<NullFailure>,
    clock: Option<Clock>,
}

impl NullBackend {
    /// 由后台线程按采样率拉取数据
    pub fn clocked() -> Self {
        Self::with_clock(true)
    }

    /// 不启动线程，由 `NullHandle::pump` 驱动
    pub fn manual() -> Self {
        Self::with_clock(false)
    }

    fn with_clock(clocked: bool) -> Self {
        Self {
            device: Arc::new(NullDevice::new()),
            clocked,
            granted: None,
            failure: None,
            clock: None,
        }
    }

    /// 忽略请求，总是授予指定规格
    pub fn with_granted(mut self, spec: DeviceSpec) -> Self {
        self.granted = Some(spec);
        self
    }

    /// 在指定阶段失败
    pub fn failing(mut self, failure: NullFailure) -> Self {
        self.failure = Some(failure);
        self
    }

    pub fn handle(&self) -> NullHandle {
        NullHandle {
            device: self.device.clone(),
        }
    }
}

impl AudioBackend for NullBackend {
    fn init(&mut self) -> Result<(), BackendError> {
        if self.failure == Some(NullFailure::Init) {
            return Err(BackendError::Unavailable("null device disabled".into()));
        }
        Ok(())
    }

    fn driver_name(&self) -> Result<String, BackendError> {
        Ok(String::from("null"))
    }

    fn open(
        &mut self,
        desired: &DeviceSpec,
        callback: StreamCallback,
    ) -> Result<DeviceSpec, BackendError> {
        if self.failure == Some(NullFailure::Open) {
            return Err(BackendError::OpenFailed("null device rejected the format".into()));
        }
        if self.device.open.load(Ordering::Acquire) {
            return Err(BackendError::DeviceBusy);
        }

        let obtained = self.granted.unwrap_or(*desired);

        *self.device.callback.lock() = Some(callback);
        self.device.paused.store(true, Ordering::Release);
        self.device.open.store(true, Ordering::Release);
        self.device.opens.fetch_add(1, Ordering::AcqRel);

        if self.clocked && obtained.validate().is_ok() {
            match Clock::start(self.device.clone(), &obtained) {
                Ok(clock) => self.clock = Some(clock),
                Err(e) => {
                    self.close();
                    return Err(e);
                }
            }
        }

        Ok(obtained)
    }

    fn pause(&mut self, paused: bool) {
        self.device.paused.store(paused, Ordering::Release);
    }

    fn lock(&self) {
        self.device.lock.lock();
    }

    unsafe fn unlock(&self) {
        self.device.lock.unlock();
    }

    fn close(&mut self) {
        self.device.paused.store(true, Ordering::Release);

        if let Some(clock) = self.clock.take() {
            clock.stop();
        }

        self.device.open.store(false, Ordering::Release);
        *self.device.callback.lock() = None;
    }
}

impl Drop for NullBackend {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SampleFormat;

    fn spec() -> DeviceSpec {
        DeviceSpec {
            sample_rate: 44100,
            format: SampleFormat::S16,
            channels: 2,
            period_frames: 256,
        }
    }

    #[test]
    fn test_paused_device_outputs_silence() {
        let mut backend = NullBackend::manual();
        let handle = backend.handle();
        backend.open(&spec(), Box::new(|out: &mut [u8]| out.fill(7))).unwrap();

        assert!(handle.is_open());
        assert!(handle.is_paused());
        assert_eq!(handle.pump(4), vec![0; 4]);

        backend.pause(false);
        assert_eq!(handle.pump(4), vec![7; 4]);
        assert_eq!(handle.callback_count(), 1);

        backend.close();
        assert!(!handle.is_open());
        assert_eq!(handle.pump(4), vec![0; 4]);
    }

    #[test]
    fn test_granted_overrides_request() {
        let granted = DeviceSpec {
            sample_rate: 22050,
            channels: 1,
            ..spec()
        };
        let mut backend = NullBackend::manual().with_granted(granted);
        let obtained = backend.open(&spec(), Box::new(|_: &mut [u8]| {})).unwrap();
        assert_eq!(obtained, granted);
    }

    #[test]
    fn test_double_open_is_busy() {
        let mut backend = NullBackend::manual();
        backend.open(&spec(), Box::new(|_: &mut [u8]| {})).unwrap();
        assert!(matches!(
            backend.open(&spec(), Box::new(|_: &mut [u8]| {})),
            Err(BackendError::DeviceBusy)
        ));
        assert_eq!(backend.handle().open_count(), 1);
    }

    #[test]
    fn test_failures() {
        let mut backend = NullBackend::manual().failing(NullFailure::Init);
        assert!(matches!(backend.init(), Err(BackendError::Unavailable(_))));

        let mut backend = NullBackend::manual().failing(NullFailure::Open);
        assert!(backend.init().is_ok());
        assert!(matches!(
            backend.open(&spec(), Box::new(|_: &mut [u8]| {})),
            Err(BackendError::OpenFailed(_))
        ));
    }

    #[test]
    fn test_lock_blocks_pump() {
        let mut backend = NullBackend::manual();
        let handle = backend.handle();
        backend.open(&spec(), Box::new(|out: &mut [u8]| out.fill(1))).unwrap();
        backend.pause(false);

        backend.lock();
        let pumper = thread::spawn(move || handle.pump(2));
        thread::sleep(Duration::from_millis(20));
        assert!(!pumper.is_finished());

        unsafe { backend.unlock() };
        assert_eq!(pumper.join().unwrap(), vec![1, 1]);
    }

    #[test]
    fn test_clocked_device_pulls_data() {
        let mut backend = NullBackend::clocked();
        let handle = backend.handle();
        backend.open(&spec(), Box::new(|out: &mut [u8]| out.fill(0))).unwrap();
        backend.pause(false);

        // 256 帧 @ 44100Hz 约 5.8ms 一个周期
        thread::sleep(Duration::from_millis(100));
        backend.close();

        assert!(handle.callback_count() > 0);
        let after_close = handle.callback_count();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(handle.callback_count(), after_close);
    }
}
