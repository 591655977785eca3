//! 样本内存锁定
//!
//! 流打开期间把整段 PCM 锁在物理内存里，回调读取时不会触发 page fault。
//! 锁定失败只记录日志，不影响播放。

use std::sync::Arc;

/// RAII 内存锁，drop 时解锁
pub struct MemoryLock {
    /// 持有所有权，保证锁定期间内存不被释放
    samples: Arc<[i16]>,
}

impl MemoryLock {
    /// 尝试锁定；空缓冲或系统拒绝时返回 `None`
    #[cfg(unix)]
    pub fn new(samples: Arc<[i16]>) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }

        let ptr = samples.as_ptr() as *const libc::c_void;
        let len = std::mem::size_of_val(&*samples);

        let result = unsafe { libc::mlock(ptr, len) };

        if result == 0 {
            log::debug!("Sample memory locked: {} bytes", len);
            Some(Self { samples })
        } else {
            log::warn!(
                "Failed to lock sample memory ({} bytes): {}",
                len,
                std::io::Error::last_os_error()
            );
            None
        }
    }

    #[cfg(not(unix))]
    pub fn new(_samples: Arc<[i16]>) -> Option<Self> {
        log::debug!("Memory locking not supported on this platform");
        None
    }

    /// 锁定的字节数
    pub fn len_bytes(&self) -> usize {
        std::mem::size_of_val(&*self.samples)
    }
}

#[cfg(unix)]
impl Drop for MemoryLock {
    fn drop(&mut self) {
        let ptr = self.samples.as_ptr() as *const libc::c_void;
        let len = self.len_bytes();

        let result = unsafe { libc::munlock(ptr, len) };
        if result == 0 {
            log::debug!("Sample memory unlocked");
        } else {
            log::warn!(
                "Failed to unlock sample memory: {}",
                std::io::Error::last_os_error()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_buffer_not_locked() {
        assert!(MemoryLock::new(Arc::from(Vec::<i16>::new())).is_none());
    }

    #[test]
    fn test_lock_keeps_samples_alive() {
        let samples: Arc<[i16]> = Arc::from(vec![7i16; 512]);
        // RLIMIT_MEMLOCK 可能为 0，锁定失败也是合法结果
        if let Some(lock) = MemoryLock::new(Arc::clone(&samples)) {
            assert_eq!(lock.len_bytes(), 1024);
            assert_eq!(Arc::strong_count(&samples), 2);
            drop(lock);
        }
        assert_eq!(Arc::strong_count(&samples), 1);
    }
}
