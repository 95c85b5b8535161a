//! 回调统计
//!
//! 计数器存放在受设备锁保护的流状态内，由音频回调直接累加，
//! 不使用原子操作；生产者在持锁时拷贝一份快照

use std::fmt;

/// 单次 deliver 的结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    /// 本次读取跨过缓冲区末尾的次数
    pub wraps: u32,
    /// 读游标越界后被重置
    pub cursor_reset: bool,
}

/// 回调统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    /// 回调总次数（含静音回调）
    pub callbacks: u64,
    /// 未绑定时输出静音的回调次数
    pub silent_callbacks: u64,
    /// 从 ring buffer 送出的字节数
    pub bytes_delivered: u64,
    /// 环绕次数
    pub wraps: u64,
    /// 游标越界自愈次数
    pub cursor_resets: u64,
}

impl DeliveryStats {
    #[inline]
    pub fn record(&mut self, len: usize, delivery: Delivery) {
        self.callbacks += 1;
        self.bytes_delivered += len as u64;
        self.wraps += delivery.wraps as u64;
        if delivery.cursor_reset {
            self.cursor_resets += 1;
        }
    }

    #[inline]
    pub fn record_silence(&mut self) {
        self.callbacks += 1;
        self.silent_callbacks += 1;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

impl fmt::Display for DeliveryStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "callbacks: {} (silent {}) | delivered: {} bytes | wraps: {} | cursor resets: {}",
            self.callbacks,
            self.silent_callbacks,
            self.bytes_delivered,
            self.wraps,
            self.cursor_resets
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record() {
        let mut stats = DeliveryStats::default();
        stats.record(512, Delivery::default());
        stats.record(
            256,
            Delivery {
                wraps: 1,
                cursor_reset: true,
            },
        );
        stats.record_silence();

        assert_eq!(stats.callbacks, 3);
        assert_eq!(stats.silent_callbacks, 1);
        assert_eq!(stats.bytes_delivered, 768);
        assert_eq!(stats.wraps, 1);
        assert_eq!(stats.cursor_resets, 1);

        stats.reset();
        assert_eq!(stats, DeliveryStats::default());
    }
}
