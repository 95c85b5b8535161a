//! 声音配置
//!
//! 首次初始化时读取一次，之后由会话缓存

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::audio::{SampleFormat, DEFAULT_SAMPLE_RATE};

/// 后端选择
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BackendKind {
    /// 运行时加载的 SDL 1.2
    #[default]
    Sdl,
    /// 软件时钟驱动的空设备
    Null,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sdl" => Ok(Self::Sdl),
            "null" => Ok(Self::Null),
            other => Err(format!("unknown backend '{}' (expected sdl or null)", other)),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sdl => write!(f, "sdl"),
            Self::Null => write!(f, "null"),
        }
    }
}

/// 声音配置
#[derive(Clone, Debug)]
pub struct SoundConfig {
    /// 位深：8 选择 8-bit 无符号，其余为 16-bit 有符号
    pub bits: u16,
    /// 采样率，0 表示使用设备默认值
    pub speed: u32,
    /// 请求的声道数，原样交给设备协商
    pub channels: u16,
    /// ring buffer 相对设备周期的倍数，小于 1 按 1 处理
    pub samples_mult: i32,
    /// 后端
    pub backend: BackendKind,
    /// 显式指定的库路径，优先于环境变量
    pub library: Option<PathBuf>,
    /// 是否 mlock 缓冲区内存
    pub lock_memory: bool,
}

impl Default for SoundConfig {
    fn default() -> Self {
        Self {
            bits: 16,
            speed: 0,
            channels: 2,
            samples_mult: 8,
            backend: BackendKind::Sdl,
            library: None,
            lock_memory: false,
        }
    }
}

impl SoundConfig {
    pub fn sample_format(&self) -> SampleFormat {
        SampleFormat::from_requested_bits(self.bits)
    }

    /// 实际请求的采样率
    pub fn requested_rate(&self) -> u32 {
        if self.speed == 0 {
            DEFAULT_SAMPLE_RATE
        } else {
            self.speed
        }
    }

    /// 生效的缓冲倍数，小于 1 时按 1 处理
    pub fn effective_samples_mult(&self) -> u32 {
        self.samples_mult.max(1) as u32
    }
}
