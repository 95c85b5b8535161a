//! 测试音生产者
//!
//! 混音器的最小替身：在读游标前方保持固定提前量，
//! 以整帧为单位写入正弦波

use std::f64::consts::TAU;

use crate::audio::PlaybackFormat;

/// 正弦测试音
pub struct ToneGenerator {
    frequency: f64,
    amplitude: f64,
    phase: f64,
    /// 下一次写入的帧位置
    write_frame: Option<usize>,
}

impl ToneGenerator {
    /// `amplitude` 会被限制在 [0, 1]
    pub fn new(frequency: f64, amplitude: f64) -> Self {
        Self {
            frequency,
            amplitude: amplitude.clamp(0.0, 1.0),
            phase: 0.0,
            write_frame: None,
        }
    }

    /// 把 `[写位置, 读游标 + lead_frames)` 之间的帧补齐，返回写入帧数
    ///
    /// 读游标越过写位置（生产者落后）时，从读游标处重新开始
    pub fn paint(
        &mut self,
        buffer: &mut [u8],
        cursor: usize,
        lead_frames: usize,
        format: &PlaybackFormat,
    ) -> usize {
        let stride = format.frame_stride();
        if stride == 0 || format.sample_rate == 0 {
            return 0;
        }
        let capacity = buffer.len() / stride;
        if capacity < 2 {
            return 0;
        }

        let lead = lead_frames.min(capacity - 1);
        let cursor = cursor % capacity;

        let mut write = self.write_frame.unwrap_or(cursor) % capacity;
        let mut ahead = (write + capacity - cursor) % capacity;
        if ahead > lead {
            write = cursor;
            ahead = 0;
        }

        let count = lead - ahead;
        let step = TAU * self.frequency / format.sample_rate as f64;
        let scale = self.amplitude * i16::MAX as f64;

        for _ in 0..count {
            let sample = (self.phase.sin() * scale) as i16;
            let offset = write * stride;
            format.write_frame(sample, &mut buffer[offset..offset + stride]);

            self.phase = (self.phase + step) % TAU;
            write = (write + 1) % capacity;
        }

        self.write_frame = Some(write);
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SampleFormat;

    fn stereo() -> PlaybackFormat {
        PlaybackFormat::new(SampleFormat::S16, 2, 44100)
    }

    #[test]
    fn test_keeps_lead_ahead_of_cursor() {
        let format = stereo();
        let mut buffer = vec![0u8; 256 * format.frame_stride()];
        let mut tone = ToneGenerator::new(440.0, 0.5);

        assert_eq!(tone.paint(&mut buffer, 0, 100, &format), 100);
        // 游标未动，无需补写
        assert_eq!(tone.paint(&mut buffer, 0, 100, &format), 0);
        // 游标前进 30 帧，补写 30 帧
        assert_eq!(tone.paint(&mut buffer, 30, 100, &format), 30);
    }

    #[test]
    fn test_restarts_when_cursor_overtakes() {
        let format = stereo();
        let mut buffer = vec![0u8; 256 * format.frame_stride()];
        let mut tone = ToneGenerator::new(440.0, 0.5);

        tone.paint(&mut buffer, 0, 50, &format);
        // 游标跳到写位置之后
        assert_eq!(tone.paint(&mut buffer, 120, 50, &format), 50);
        assert_eq!(tone.write_frame, Some(170));
    }

    #[test]
    fn test_wraps_around_buffer() {
        let format = stereo();
        let mut buffer = vec![0u8; 64 * format.frame_stride()];
        let mut tone = ToneGenerator::new(1000.0, 1.0);

        tone.paint(&mut buffer, 60, 10, &format);
        assert_eq!(tone.write_frame, Some(6));
    }

    #[test]
    fn test_channels_carry_same_sample() {
        let format = stereo();
        let mut buffer = vec![0u8; 128 * format.frame_stride()];
        let mut tone = ToneGenerator::new(440.0, 0.8);
        tone.paint(&mut buffer, 0, 100, &format);

        let mut nonzero = false;
        for frame in buffer[..100 * 4].chunks_exact(4) {
            let left = i16::from_ne_bytes([frame[0], frame[1]]);
            let right = i16::from_ne_bytes([frame[2], frame[3]]);
            assert_eq!(left, right);
            nonzero |= left != 0;
        }
        assert!(nonzero);
        // 提前量之外保持原样
        assert!(buffer[100 * 4..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_u8_centered_on_silence() {
        let format = PlaybackFormat::new(SampleFormat::U8, 1, 11025);
        let mut buffer = vec![0u8; 64];
        let mut tone = ToneGenerator::new(100.0, 0.0);
        tone.paint(&mut buffer, 0, 32, &format);

        assert!(buffer[..32].iter().all(|&b| b == 0x80));
    }
}
