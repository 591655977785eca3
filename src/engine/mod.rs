//! 播放引擎
//!
//! 控制线程持有 `Engine`，实时回调线程只接触 `PlaybackSource`：
//! - 整段 PCM 预先加载进内存，回调顺序读取
//! - 播放位置是原子游标，seek 直接写入，回调下一次调用生效
//! - 进度和完成事件由宿主定时 `poll()`，回调从不主动通知

pub mod source;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::audio::{CpalBackend, DeviceInfo, OutputBackend, OutputConfig, OutputStream};
use crate::decode::AudioData;
use source::PlaybackSource;

/// 播放状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Stopped,
    Playing,
    Paused,
}

/// 播放错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaybackError {
    #[error("no audio output device available")]
    NoDevice,
    #[error("failed to open audio stream: {0}")]
    StreamOpenFailed(String),
    #[error("failed to start audio stream: {0}")]
    StreamStartFailed(String),
    #[error("failed to pause audio stream: {0}")]
    StreamPauseFailed(String),
    #[error("no valid audio loaded")]
    InvalidBuffer,
}

/// `poll()` 上报的事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// 播放到结尾，引擎已回到 Stopped
    Finished,
    /// 后端报告流错误，引擎已回到 Stopped
    StreamError(String),
}

/// 引擎配置
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// 输出配置
    pub output: OutputConfig,
    /// 宿主调用 `poll()` 的建议间隔
    pub poll_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            output: OutputConfig::default(),
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// 播放引擎
pub struct Engine<B: OutputBackend = CpalBackend> {
    config: EngineConfig,
    backend: B,
    state: PlaybackState,
    source: Option<Arc<PlaybackSource>>,
    stream: Option<Box<dyn OutputStream>>,
}

impl Engine<CpalBackend> {
    /// 创建使用 cpal 输出的引擎
    pub fn new(config: EngineConfig) -> Self {
        Self::with_backend(config, CpalBackend::new())
    }
}

impl<B: OutputBackend> Engine<B> {
    pub fn with_backend(config: EngineConfig, backend: B) -> Self {
        Self {
            config,
            backend,
            state: PlaybackState::Stopped,
            source: None,
            stream: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// 初始化音频后端
    pub fn initialize(&mut self) -> Result<(), PlaybackError> {
        self.backend.initialize()
    }

    /// 停止播放并释放音频后端
    pub fn shutdown(&mut self) {
        self.stop();
        self.backend.shutdown();
    }

    /// 列出输出设备（后端未初始化时为空）
    pub fn devices(&self) -> Vec<DeviceInfo> {
        self.backend.devices()
    }

    /// 装载新的音频
    ///
    /// 先关闭当前流（保证回调不再读取旧数据），再整体替换
    pub fn load(&mut self, data: AudioData) -> Result<(), PlaybackError> {
        if !data.is_valid() {
            return Err(PlaybackError::InvalidBuffer);
        }

        self.stop();

        log::info!(
            "Loaded: {}Hz {}ch, {} frames ({:.2}s)",
            data.sample_rate(),
            data.channels(),
            data.total_frames(),
            data.duration()
        );
        self.source = Some(Arc::new(PlaybackSource::new(data)));
        Ok(())
    }

    /// 开始或恢复播放
    ///
    /// 首次播放时按音频的声道数和采样率打开流；已在播放时什么也不做
    pub fn play(&mut self) -> Result<(), PlaybackError> {
        if self.state == PlaybackState::Playing {
            return Ok(());
        }

        let source = self.source.clone().ok_or(PlaybackError::InvalidBuffer)?;

        if !self.backend.is_initialized() {
            self.backend.initialize()?;
        }

        let resuming = self.stream.is_some();
        let mut stream = match self.stream.take() {
            Some(stream) => stream,
            None => self.backend.open_stream(&self.config.output, source)?,
        };

        if let Err(e) = stream.start() {
            // stream 在这里 drop，流随之关闭
            log::error!("{}", e);
            if resuming {
                self.stop();
            }
            return Err(e);
        }

        self.stream = Some(stream);
        self.state = PlaybackState::Playing;
        log::info!("{}", if resuming { "Resumed" } else { "Playback started" });
        Ok(())
    }

    /// 暂停（保留流）
    pub fn pause(&mut self) -> Result<(), PlaybackError> {
        if self.state != PlaybackState::Playing {
            return Ok(());
        }

        if let Some(ref mut stream) = self.stream {
            stream.pause()?;
        }
        self.state = PlaybackState::Paused;
        log::info!("Paused");
        Ok(())
    }

    /// 暂停/恢复
    pub fn toggle_pause(&mut self) -> Result<(), PlaybackError> {
        match self.state {
            PlaybackState::Playing => self.pause(),
            PlaybackState::Paused | PlaybackState::Stopped => self.play(),
        }
    }

    /// 停止：关闭流，游标回到 0
    ///
    /// 流 drop 返回后回调不会再运行，之后才重置游标
    pub fn stop(&mut self) {
        self.stream = None;

        if let Some(ref source) = self.source {
            source.rewind();
        }

        if self.state != PlaybackState::Stopped {
            self.state = PlaybackState::Stopped;
            log::info!("Playback stopped");
        }
    }

    /// 跳转到 `[0, 1]` 的相对位置，超出范围会被限制
    pub fn seek(&mut self, position: f64) {
        if let Some(ref source) = self.source {
            let frame = source.seek(position);
            log::debug!("Seek to frame {}", frame);
        }
    }

    /// 处理后端异步事件
    ///
    /// 流错误或自然播完时调用 `stop()` 并返回对应事件
    pub fn poll(&mut self) -> Option<EngineEvent> {
        if let Some(message) = self.stream.as_ref().and_then(|s| s.take_error()) {
            log::error!("Audio stream error: {}", message);
            self.stop();
            return Some(EngineEvent::StreamError(message));
        }

        let finished = self
            .source
            .as_ref()
            .map(|s| s.is_finished())
            .unwrap_or(false);

        if self.state == PlaybackState::Playing && finished {
            log::info!("Playback finished");
            self.stop();
            return Some(EngineEvent::Finished);
        }

        None
    }

    /// 播放进度 `[0, 1]`，未加载时为 0
    pub fn progress(&self) -> f64 {
        self.source.as_ref().map(|s| s.progress()).unwrap_or(0.0)
    }

    /// 已加载音频的时长（秒）
    pub fn duration(&self) -> f64 {
        self.source
            .as_ref()
            .map(|s| s.data().duration())
            .unwrap_or(0.0)
    }

    /// 当前位置（秒）
    pub fn position(&self) -> f64 {
        self.progress() * self.duration()
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == PlaybackState::Playing
    }

    pub fn is_loaded(&self) -> bool {
        self.source.is_some()
    }

    pub fn current_frame(&self) -> usize {
        self.source
            .as_ref()
            .map(|s| s.cursor().load())
            .unwrap_or(0)
    }

    pub fn total_frames(&self) -> usize {
        self.source
            .as_ref()
            .map(|s| s.data().total_frames())
            .unwrap_or(0)
    }

    /// 当前音频的 underrun 次数
    pub fn underruns(&self) -> u64 {
        self.source.as_ref().map(|s| s.underruns()).unwrap_or(0)
    }
}

impl<B: OutputBackend> Drop for Engine<B> {
    fn drop(&mut self) {
        self.stop();
    }
}
