//! 播放格式和样本编码
//!
//! 设备协商后的格式只有两种样本编码：
//! - 8-bit: 无符号，静音点 0x80
//! - 16-bit: 有符号，本机字节序
//!
//! 生产者统一使用 i16 样本，写入时再按实际格式打包

/// 未指定采样率时请求的默认值
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// 样本编码
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleFormat {
    /// 8-bit 无符号
    U8,
    /// 16-bit 有符号，本机字节序
    S16,
}

impl SampleFormat {
    /// 按配置位深选择编码：8 → U8，其余一律 S16
    pub fn from_requested_bits(bits: u16) -> Self {
        if bits == 8 {
            Self::U8
        } else {
            Self::S16
        }
    }

    #[inline]
    pub fn bits(self) -> u16 {
        match self {
            Self::U8 => 8,
            Self::S16 => 16,
        }
    }

    #[inline]
    pub fn bytes_per_sample(self) -> usize {
        self.bits() as usize / 8
    }
}

/// 协商后的播放格式
///
/// 每次打开设备只设置一次，之后不可变
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlaybackFormat {
    pub sample_format: SampleFormat,
    pub channels: u16,
    pub sample_rate: u32,
}

impl PlaybackFormat {
    pub fn new(sample_format: SampleFormat, channels: u16, sample_rate: u32) -> Self {
        Self {
            sample_format,
            channels,
            sample_rate,
        }
    }

    #[inline]
    pub fn sample_bits(&self) -> u16 {
        self.sample_format.bits()
    }

    #[inline]
    pub fn bytes_per_sample(&self) -> usize {
        self.sample_format.bytes_per_sample()
    }

    /// 每帧字节数 = 声道数 × 每样本字节数
    #[inline]
    pub fn frame_stride(&self) -> usize {
        self.channels as usize * self.bytes_per_sample()
    }

    /// 将一个 i16 样本按本格式写入 `out` 开头，返回写入字节数
    ///
    /// `out` 不足一个样本时不写入，返回 0
    #[inline]
    pub fn write_sample(&self, sample: i16, out: &mut [u8]) -> usize {
        match self.sample_format {
            SampleFormat::U8 => {
                let Some(slot) = out.first_mut() else {
                    return 0;
                };
                // 取高 8 位，再平移到无符号区间
                *slot = ((sample >> 8) as i8 as u8) ^ 0x80;
                1
            }
            SampleFormat::S16 => {
                if out.len() < 2 {
                    return 0;
                }
                out[..2].copy_from_slice(&sample.to_ne_bytes());
                2
            }
        }
    }

    /// 把同一个样本写入一整帧的所有声道，返回写入字节数
    pub fn write_frame(&self, sample: i16, out: &mut [u8]) -> usize {
        let stride = self.frame_stride();
        if out.len() < stride {
            return 0;
        }

        let bytes = self.bytes_per_sample();
        for ch in 0..self.channels as usize {
            self.write_sample(sample, &mut out[ch * bytes..]);
        }
        stride
    }
}

impl std::fmt::Display for PlaybackFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let encoding = match self.sample_format {
            SampleFormat::U8 => "u8",
            SampleFormat::S16 => "s16",
        };
        write!(f, "{}Hz {}ch {}", self.sample_rate, self.channels, encoding)
    }
}

/// 按采样率选择默认周期长度（帧）
///
/// 低采样率下总带宽小，用更短的周期换取更低延迟
pub fn default_period_frames(sample_rate: u32) -> u32 {
    if sample_rate <= 11025 {
        256
    } else if sample_rate <= 22050 {
        512
    } else if sample_rate <= 44100 {
        1024
    } else {
        2048
    }
}
