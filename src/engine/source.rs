//! 实时回调的数据源
//!
//! `render` 运行在音频后端的实时线程上：
//! - 零分配：只读取已加载的样本
//! - 零锁：游标、完成标记、underrun 计数全部是原子量
//! - 无 I/O、无日志
//!
//! 数据读完后输出静音并置位 `finished`，由控制线程在轮询时调用 `stop()`。

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use cpal::{FromSample, Sample};

use crate::audio::PlaybackCursor;
use crate::decode::AudioData;

pub struct PlaybackSource {
    data: AudioData,
    cursor: PlaybackCursor,
    finished: AtomicBool,
    underruns: AtomicU64,
}

impl PlaybackSource {
    pub fn new(data: AudioData) -> Self {
        Self {
            data,
            cursor: PlaybackCursor::new(),
            finished: AtomicBool::new(false),
            underruns: AtomicU64::new(0),
        }
    }

    pub fn data(&self) -> &AudioData {
        &self.data
    }

    pub fn cursor(&self) -> &PlaybackCursor {
        &self.cursor
    }

    /// 填充一个输出块
    ///
    /// 总是写满 `output`：先拷贝剩余的真实样本，不足部分补静音，
    /// 绝不读取 `total_frames` 之后的数据
    pub fn render<T>(&self, output: &mut [T])
    where
        T: Sample + FromSample<i16>,
    {
        let channels = self.data.channels() as usize;
        let total = self.data.total_frames();
        if channels == 0 {
            output.fill(T::EQUILIBRIUM);
            return;
        }

        let requested = output.len() / channels;
        let start = self.cursor.load().min(total);
        let remaining = total - start;

        if remaining == 0 {
            output.fill(T::EQUILIBRIUM);
            self.finished.store(true, Ordering::Release);
            return;
        }

        let frames = requested.min(remaining);
        let samples = &self.data.samples()[start * channels..(start + frames) * channels];

        let (head, tail) = output.split_at_mut(frames * channels);
        for (out, &sample) in head.iter_mut().zip(samples) {
            *out = T::from_sample(sample);
        }
        tail.fill(T::EQUILIBRIUM);

        if frames < requested {
            self.underruns.fetch_add(1, Ordering::Relaxed);
        }

        // 期间发生 seek 时保留 seek 的位置
        self.cursor.advance(start, start + frames);
    }

    /// 回调已输出完全部样本，且之后没有 seek 回去
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire) && self.cursor.load() >= self.data.total_frames()
    }

    /// 回到开头并清除完成标记
    pub fn rewind(&self) {
        self.cursor.reset();
        self.finished.store(false, Ordering::Release);
    }

    /// 把 `[0, 1]` 的位置映射到帧并写入游标
    pub fn seek(&self, position: f64) -> usize {
        let position = if position.is_nan() {
            0.0
        } else {
            position.clamp(0.0, 1.0)
        };
        let total = self.data.total_frames();
        let frame = ((position * total as f64).round() as usize).min(total);
        self.cursor.store(frame);
        frame
    }

    pub fn progress(&self) -> f64 {
        let total = self.data.total_frames();
        if total == 0 {
            return 0.0;
        }
        self.cursor.load().min(total) as f64 / total as f64
    }

    /// 以补静音方式结束的回调次数
    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }
}
