//! 音频输出
//!
//! `OutputBackend` / `OutputStream` 把引擎和具体音频后端隔开：
//! - `CpalBackend`：基于 cpal 的跨平台实现（CoreAudio / WASAPI / ALSA）
//! - 测试中使用手动驱动回调的 mock 后端
//!
//! 流在 drop 时关闭；cpal 保证 drop 返回后回调不会再被调用。

use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SizedSample, StreamConfig, SupportedBufferSize};

use super::device::{self, DeviceInfo};
use super::memlock::MemoryLock;
use crate::engine::source::PlaybackSource;
use crate::engine::PlaybackError;

/// 输出配置
#[derive(Clone, Debug)]
pub struct OutputConfig {
    /// 回调缓冲区帧数，会被限制在设备支持的范围内
    pub buffer_frames: u32,
    /// 指定输出设备（索引或名称，None 表示使用系统默认设备）
    pub device: Option<String>,
    /// 流打开期间是否 mlock 样本内存
    pub lock_memory: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            buffer_frames: 256,
            device: None,
            lock_memory: true,
        }
    }
}

/// 已打开的输出流
pub trait OutputStream {
    fn start(&mut self) -> Result<(), PlaybackError>;

    /// 暂停回调但保留流
    fn pause(&mut self) -> Result<(), PlaybackError>;

    /// 取出后端上报的异步错误（只返回一次）
    fn take_error(&self) -> Option<String>;
}

/// 音频后端
pub trait OutputBackend {
    fn initialize(&mut self) -> Result<(), PlaybackError>;

    fn shutdown(&mut self);

    fn is_initialized(&self) -> bool;

    /// 未初始化时返回空列表
    fn devices(&self) -> Vec<DeviceInfo>;

    /// 按 source 的声道数和采样率打开流（不启动）
    fn open_stream(
        &mut self,
        config: &OutputConfig,
        source: Arc<PlaybackSource>,
    ) -> Result<Box<dyn OutputStream>, PlaybackError>;
}

/// cpal 后端
pub struct CpalBackend {
    host: Option<cpal::Host>,
}

impl CpalBackend {
    pub fn new() -> Self {
        Self { host: None }
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputBackend for CpalBackend {
    fn initialize(&mut self) -> Result<(), PlaybackError> {
        if self.host.is_none() {
            let host = cpal::default_host();
            log::info!("Audio backend initialized: {}", host.id().name());
            self.host = Some(host);
        }
        Ok(())
    }

    fn shutdown(&mut self) {
        if self.host.take().is_some() {
            log::info!("Audio backend shut down");
        }
    }

    fn is_initialized(&self) -> bool {
        self.host.is_some()
    }

    fn devices(&self) -> Vec<DeviceInfo> {
        self.host
            .as_ref()
            .map(device::list_output_devices)
            .unwrap_or_default()
    }

    fn open_stream(
        &mut self,
        config: &OutputConfig,
        source: Arc<PlaybackSource>,
    ) -> Result<Box<dyn OutputStream>, PlaybackError> {
        let host = self.host.as_ref().ok_or(PlaybackError::NoDevice)?;
        let device = device::select_output_device(host, config.device.as_deref())
            .ok_or(PlaybackError::NoDevice)?;

        let data = source.data();
        let (stream_config, sample_format) = negotiate_config(
            &device,
            data.channels(),
            data.sample_rate(),
            config.buffer_frames,
        )?;

        log::debug!(
            "Stream config: sample_rate={}, channels={}, format={:?}, buffer_size={:?}",
            stream_config.sample_rate.0,
            stream_config.channels,
            sample_format,
            stream_config.buffer_size
        );

        let memory_lock = if config.lock_memory {
            MemoryLock::new(data.shared_samples())
        } else {
            None
        };

        let errors = Arc::new(Mutex::new(None));
        let stream = match sample_format {
            SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, source, &errors)?,
            SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, source, &errors)?,
            SampleFormat::U16 => build_stream::<u16>(&device, &stream_config, source, &errors)?,
            other => {
                return Err(PlaybackError::StreamOpenFailed(format!(
                    "unsupported sample format: {:?}",
                    other
                )));
            }
        };

        log::info!("Audio stream opened");

        Ok(Box::new(CpalStream {
            stream,
            errors,
            _memory_lock: memory_lock,
        }))
    }
}

/// 样本格式优先级：i16 无需转换
fn format_rank(format: SampleFormat) -> Option<u8> {
    match format {
        SampleFormat::I16 => Some(0),
        SampleFormat::F32 => Some(1),
        SampleFormat::U16 => Some(2),
        _ => None,
    }
}

/// 固定缓冲帧数限制在设备范围内；范围未知时交给后端决定
fn buffer_size_for(supported: &SupportedBufferSize, frames: u32) -> cpal::BufferSize {
    match supported {
        SupportedBufferSize::Range { min, max } => {
            cpal::BufferSize::Fixed(frames.clamp(*min, (*max).max(*min)))
        }
        SupportedBufferSize::Unknown => cpal::BufferSize::Default,
    }
}

/// 选择与源声道数 / 采样率完全匹配的配置，不做重采样
fn negotiate_config(
    device: &cpal::Device,
    channels: u16,
    sample_rate: u32,
    buffer_frames: u32,
) -> Result<(StreamConfig, SampleFormat), PlaybackError> {
    let configs = device
        .supported_output_configs()
        .map_err(|e| PlaybackError::StreamOpenFailed(format!("failed to get device configs: {}", e)))?;

    let best = configs
        .filter(|c| {
            c.channels() == channels
                && c.min_sample_rate().0 <= sample_rate
                && c.max_sample_rate().0 >= sample_rate
        })
        .filter_map(|c| format_rank(c.sample_format()).map(|rank| (rank, c)))
        .min_by_key(|(rank, _)| *rank)
        .map(|(_, c)| c)
        .ok_or_else(|| {
            PlaybackError::StreamOpenFailed(format!(
                "no output config for {}ch {}Hz",
                channels, sample_rate
            ))
        })?;

    let config = StreamConfig {
        channels,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: buffer_size_for(best.buffer_size(), buffer_frames),
    };

    Ok((config, best.sample_format()))
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    source: Arc<PlaybackSource>,
    errors: &Arc<Mutex<Option<String>>>,
) -> Result<cpal::Stream, PlaybackError>
where
    T: SizedSample + FromSample<i16>,
{
    let errors = Arc::clone(errors);

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                source.render(data);
            },
            move |err| {
                log::error!("Audio stream error: {}", err);
                if let Ok(mut slot) = errors.lock() {
                    slot.get_or_insert_with(|| err.to_string());
                }
            },
            None,
        )
        .map_err(|e| PlaybackError::StreamOpenFailed(e.to_string()))
}

/// cpal 流
///
/// 字段按声明顺序 drop：先关流，再解锁内存
struct CpalStream {
    stream: cpal::Stream,
    errors: Arc<Mutex<Option<String>>>,
    _memory_lock: Option<MemoryLock>,
}

impl OutputStream for CpalStream {
    fn start(&mut self) -> Result<(), PlaybackError> {
        self.stream
            .play()
            .map_err(|e| PlaybackError::StreamStartFailed(e.to_string()))
    }

    fn pause(&mut self) -> Result<(), PlaybackError> {
        self.stream
            .pause()
            .map_err(|e| PlaybackError::StreamPauseFailed(e.to_string()))
    }

    fn take_error(&self) -> Option<String> {
        self.errors.lock().ok().and_then(|mut slot| slot.take())
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        log::info!("Closing audio stream");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_config_default() {
        let config = OutputConfig::default();
        assert_eq!(config.buffer_frames, 256);
        assert!(config.device.is_none());
        assert!(config.lock_memory);
    }

    #[test]
    fn test_format_preference() {
        assert!(format_rank(SampleFormat::I16) < format_rank(SampleFormat::F32));
        assert!(format_rank(SampleFormat::F32) < format_rank(SampleFormat::U16));
        assert_eq!(format_rank(SampleFormat::I8), None);
    }

    #[test]
    fn test_buffer_size_clamped_to_device_range() {
        let range = SupportedBufferSize::Range { min: 512, max: 4096 };
        assert_eq!(buffer_size_for(&range, 256), cpal::BufferSize::Fixed(512));

        let range = SupportedBufferSize::Range { min: 64, max: 4096 };
        assert_eq!(buffer_size_for(&range, 256), cpal::BufferSize::Fixed(256));

        assert_eq!(
            buffer_size_for(&SupportedBufferSize::Unknown, 256),
            cpal::BufferSize::Default
        );
    }

    #[test]
    fn test_backend_lifecycle() {
        let mut backend = CpalBackend::new();
        assert!(!backend.is_initialized());
        assert!(backend.devices().is_empty());
        backend.initialize().unwrap();
        assert!(backend.is_initialized());
        backend.shutdown();
        assert!(!backend.is_initialized());
        assert!(backend.devices().is_empty());
    }
}
