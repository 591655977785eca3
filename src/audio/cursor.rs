//! 播放游标
//!
//! 实时回调线程推进，控制线程读取（进度）并写入（seek）。
//! 独占一个 cache line，避免与相邻的原子量 false sharing。

use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;

/// 当前帧位置
pub struct PlaybackCursor {
    frame: CachePadded<AtomicUsize>,
}

impl PlaybackCursor {
    pub fn new() -> Self {
        Self {
            frame: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    #[inline]
    pub fn load(&self) -> usize {
        self.frame.load(Ordering::Acquire)
    }

    /// 控制线程写入（seek / stop）
    #[inline]
    pub fn store(&self, frame: usize) {
        self.frame.store(frame, Ordering::Release);
    }

    /// 回调线程推进
    ///
    /// 仅当游标仍为 `from` 时写入 `to`；期间发生过 seek 则保留 seek 的值，返回 false
    #[inline]
    pub fn advance(&self, from: usize, to: usize) -> bool {
        self.frame
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn reset(&self) {
        self.store(0);
    }
}

impl Default for PlaybackCursor {
    fn default() -> Self {
        Self::new()
    }
}
