//! 音频核心模块
//!
//! 包含：
//! - Cursor: 实时回调与控制线程共享的原子播放位置
//! - Device: 输出设备枚举与选择
//! - MemLock: 样本内存锁定
//! - Output: 输出后端抽象与 cpal 实现

pub mod cursor;
pub mod device;
pub mod memlock;
pub mod output;

pub use cursor::PlaybackCursor;
pub use device::{DeviceInfo, DeviceSelector};
pub use memlock::MemoryLock;
pub use output::{CpalBackend, OutputBackend, OutputConfig, OutputStream};
