//! 音频设备后端
//!
//! 会话只依赖一个很小的能力接口：初始化、查询驱动名、打开/关闭、
//! 暂停，以及设备锁。具体实现在启动时由工厂选出。

pub mod null;
pub mod sdl;

use std::path::PathBuf;

use crate::audio::{PlaybackFormat, SampleFormat};
use crate::config::BackendKind;

pub use null::{NullBackend, NullFailure, NullHandle};
pub use sdl::SdlBackend;

/// 流回调：设备需要更多数据时调用，参数为待填满的输出缓冲区
///
/// 调用时后端的设备锁已被持有
pub type StreamCallback = Box<dyn FnMut(&mut [u8]) + Send + 'static>;

/// 设备规格（请求或协商结果）
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceSpec {
    pub sample_rate: u32,
    pub format: SampleFormat,
    pub channels: u16,
    /// 硬件周期（帧）
    pub period_frames: u32,
}

impl DeviceSpec {
    pub fn playback_format(&self) -> PlaybackFormat {
        PlaybackFormat::new(self.format, self.channels, self.sample_rate)
    }

    /// 检查协商结果是否可用
    pub fn validate(&self) -> Result<(), BackendError> {
        if self.channels == 0 || self.period_frames == 0 || self.sample_rate == 0 {
            return Err(BackendError::UnsupportedFormat(format!(
                "{}Hz {}ch period {}",
                self.sample_rate, self.channels, self.period_frames
            )));
        }
        Ok(())
    }
}

/// 后端错误
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("can't load {path}: {source}")]
    LibraryLoad {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },
    #[error("could not load {name}: {source}")]
    MissingSymbol {
        name: &'static str,
        #[source]
        source: libloading::Error,
    },
    #[error("audio backend unavailable: {0}")]
    Unavailable(String),
    #[error("audio subsystem init failed: {0}")]
    InitFailed(String),
    #[error("audio driver name is unavailable")]
    NoDriver,
    #[error("opening audio device failed: {0}")]
    OpenFailed(String),
    #[error("unsupported device format: {0}")]
    UnsupportedFormat(String),
    #[error("audio device is already open in this process")]
    DeviceBusy,
}

/// 音频后端能力接口
pub trait AudioBackend: Send {
    /// 解析后端实现并初始化音频子系统，可重复调用
    fn init(&mut self) -> Result<(), BackendError>;

    /// 当前驱动名
    fn driver_name(&self) -> Result<String, BackendError>;

    /// 以暂停状态打开设备并注册回调，返回设备实际授予的规格
    fn open(
        &mut self,
        desired: &DeviceSpec,
        callback: StreamCallback,
    ) -> Result<DeviceSpec, BackendError>;

    /// 暂停或恢复回调
    fn pause(&mut self, paused: bool);

    /// 获取设备锁，持锁期间不会有回调
    fn lock(&self);

    /// 释放设备锁
    ///
    /// # Safety
    ///
    /// 必须与之前的一次 `lock()` 配对
    unsafe fn unlock(&self);

    /// 关闭设备并释放子系统资源，可重复调用
    fn close(&mut self);
}

/// 按配置创建后端
pub fn create(kind: BackendKind, library: Option<PathBuf>) -> Box<dyn AudioBackend> {
    match kind {
        BackendKind::Sdl => Box::new(SdlBackend::new(library)),
        BackendKind::Null => Box::new(NullBackend::clocked()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_spec() {
        let spec = DeviceSpec {
            sample_rate: 44100,
            format: SampleFormat::S16,
            channels: 2,
            period_frames: 1024,
        };
        assert!(spec.validate().is_ok());
        assert_eq!(spec.playback_format().frame_stride(), 4);

        let mono_zero = DeviceSpec {
            channels: 0,
            ..spec
        };
        assert!(matches!(
            mono_zero.validate(),
            Err(BackendError::UnsupportedFormat(_))
        ));
    }
}
