//! 音频文件解码
//!
//! 所有格式最终统一为同一种内存表示：交错 16-bit 有符号 PCM（`AudioData`）
//! - WAV：直接由 `wav` 模块解析
//! - 其他受支持格式：交给外部转码器（ffmpeg）转成 WAV 后再解析
//!
//! 解码要么完整成功，要么失败，不会暴露部分填充的缓冲区

pub mod formats;
pub mod metadata;
pub mod transcode;
pub mod wav;

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

pub use formats::{FormatCatalog, FormatDescriptor};
pub use transcode::{TranscodeError, Transcoder, TranscoderConfig};
pub use wav::{ParseError, WavHeader};

/// 解码后的 PCM 数据
///
/// 样本按帧交错存放（L, R, L, R, ...），加载后只读，
/// 通过 `Arc` 与实时回调共享而无需拷贝
#[derive(Debug, Clone)]
pub struct AudioData {
    samples: Arc<[i16]>,
    channels: u16,
    sample_rate: u32,
    total_frames: usize,
}

impl AudioData {
    /// 从交错样本构造
    ///
    /// 末尾不足一帧的样本会被丢弃，保证 `samples.len() == total_frames * channels`
    pub fn new(mut samples: Vec<i16>, channels: u16, sample_rate: u32) -> Self {
        let total_frames = if channels == 0 {
            0
        } else {
            samples.len() / channels as usize
        };
        samples.truncate(total_frames * channels as usize);

        Self {
            samples: Arc::from(samples),
            channels,
            sample_rate,
            total_frames,
        }
    }

    /// 交错样本
    #[inline]
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// 共享样本所有权（用于内存锁定等需要延长生命周期的场景）
    pub fn shared_samples(&self) -> Arc<[i16]> {
        Arc::clone(&self.samples)
    }

    #[inline]
    pub fn channels(&self) -> u16 {
        self.channels
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// 完整的多声道帧数
    #[inline]
    pub fn total_frames(&self) -> usize {
        self.total_frames
    }

    pub fn is_valid(&self) -> bool {
        self.total_frames > 0 && self.sample_rate > 0 && !self.samples.is_empty()
    }

    /// 时长（秒），无效数据返回 0
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.total_frames as f64 / self.sample_rate as f64
    }
}

impl Default for AudioData {
    fn default() -> Self {
        Self::new(Vec::new(), 0, 0)
    }
}

/// 解码错误
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Transcode(#[from] TranscodeError),
}

/// 解码入口
///
/// 根据扩展名选择路径：WAV 直接解析，其余受支持格式走转码器。
/// 供上层（UI / CLI）调用的查询接口也集中在这里。
pub struct AudioDecoder {
    transcoder: Transcoder,
}

impl AudioDecoder {
    pub fn new(config: TranscoderConfig) -> Self {
        Self {
            transcoder: Transcoder::new(config),
        }
    }

    pub fn transcoder(&self) -> &Transcoder {
        &self.transcoder
    }

    /// 扩展名是否在受支持列表中（不关心转码器是否可用）
    pub fn is_format_supported(extension: &str) -> bool {
        FormatCatalog::is_supported(extension)
    }

    /// 当前可对外宣传的格式
    ///
    /// 转码器不可用时只有 WAV
    pub fn supported_formats(&self) -> &'static [FormatDescriptor] {
        FormatCatalog::descriptors(self.transcoder.is_available())
    }

    /// 文件对话框过滤器字符串，如 `"WAV Files (*.wav)"`
    pub fn format_filters(&self) -> Vec<String> {
        self.supported_formats()
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    /// 加载整个文件到内存
    pub fn load_audio_file<P: AsRef<Path>>(&self, path: P) -> Result<AudioData, DecodeError> {
        let path = path.as_ref();
        let extension = formats::extension_of(path).unwrap_or_default();

        if FormatCatalog::is_native(&extension) {
            let data = wav::parse_file(path)?;
            log::info!(
                "Decoded WAV: {}Hz {}ch, {} frames ({:.2}s)",
                data.sample_rate(),
                data.channels(),
                data.total_frames(),
                data.duration()
            );
            return Ok(data);
        }

        if FormatCatalog::is_supported(&extension) {
            // 转码器不可用时直接失败，绝不把压缩文件交给 WAV 解析器
            let data = self.transcoder.transcode(path)?;
            return Ok(data);
        }

        Err(DecodeError::UnsupportedFormat(extension))
    }

    /// 布尔形式的加载接口
    ///
    /// 失败时记录日志并返回 false，`audio` 保持为空
    pub fn load_audio_file_ok<P: AsRef<Path>>(&self, path: P, audio: &mut AudioData) -> bool {
        let path = path.as_ref();
        *audio = AudioData::default();

        match self.load_audio_file(path) {
            Ok(data) => {
                *audio = data;
                true
            }
            Err(e) => {
                log::warn!("Failed to load {}: {}", path.display(), e);
                false
            }
        }
    }

    /// 查询时长（秒），失败返回 0
    ///
    /// WAV 只读取头部；压缩格式先尝试读取容器元数据，
    /// 拿不到帧数时才完整转码一次
    pub fn audio_duration<P: AsRef<Path>>(&self, path: P) -> f64 {
        let path = path.as_ref();
        if !path.exists() {
            log::warn!("File does not exist: {}", path.display());
            return 0.0;
        }

        let extension = formats::extension_of(path).unwrap_or_default();

        if FormatCatalog::is_native(&extension) {
            return match wav::read_header(path) {
                Ok(header) => header.duration(),
                Err(e) => {
                    log::warn!("Failed to get duration for {}: {}", path.display(), e);
                    0.0
                }
            };
        }

        if !FormatCatalog::is_supported(&extension) || !self.transcoder.is_available() {
            log::warn!("Failed to get duration for: {}", path.display());
            return 0.0;
        }

        if let Some(duration) = metadata::probe_duration(path) {
            return duration;
        }

        match self.transcoder.transcode(path) {
            Ok(data) => data.duration(),
            Err(e) => {
                log::warn!("Failed to get duration for {}: {}", path.display(), e);
                0.0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn offline_decoder() -> AudioDecoder {
        AudioDecoder::new(TranscoderConfig {
            executable: "/nonexistent/ffmpeg".into(),
            probe_timeout: Duration::from_millis(500),
            ..Default::default()
        })
    }

    #[test]
    fn test_audio_data_invariants() {
        let data = AudioData::new(vec![1, 2, 3, 4, 5], 2, 8000);
        assert_eq!(data.total_frames(), 2);
        assert_eq!(data.samples(), &[1, 2, 3, 4]);
        assert!(data.is_valid());
        assert_eq!(data.duration(), 2.0 / 8000.0);
    }

    #[test]
    fn test_audio_data_default_is_invalid() {
        let data = AudioData::default();
        assert!(!data.is_valid());
        assert_eq!(data.duration(), 0.0);
        assert_eq!(data.total_frames(), 0);
    }

    #[test]
    fn test_zero_rate_is_invalid() {
        let data = AudioData::new(vec![0; 8], 2, 0);
        assert!(!data.is_valid());
        assert_eq!(data.duration(), 0.0);
    }

    #[test]
    fn test_load_wav_through_decoder() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.WAV");
        let samples: Vec<i16> = (0..200).map(|i| i as i16).collect();
        std::fs::write(&path, wav::testutil::build_wav(2, 44100, &samples)).unwrap();

        let decoder = offline_decoder();
        let data = decoder.load_audio_file(&path).unwrap();
        assert_eq!(data.total_frames(), 100);
        assert_eq!(data.channels(), 2);
        assert!((decoder.audio_duration(&path) - 100.0 / 44100.0).abs() < 1e-12);
    }

    #[test]
    fn test_compressed_without_transcoder_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        // 实际内容是合法 WAV，若误走 WAV 解析器会成功
        let path = dir.path().join("song.mp3");
        std::fs::write(&path, wav::testutil::build_wav(2, 44100, &[0; 64])).unwrap();

        let decoder = offline_decoder();
        let err = decoder.load_audio_file(&path).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Transcode(TranscodeError::Unavailable(_))
        ));
        assert_eq!(decoder.audio_duration(&path), 0.0);
    }

    #[test]
    fn test_unsupported_extension() {
        let decoder = offline_decoder();
        let err = decoder.load_audio_file("clip.xyz").unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedFormat(ext) if ext == "xyz"));
    }

    #[test]
    fn test_load_ok_resets_output_on_failure() {
        let decoder = offline_decoder();
        let mut audio = AudioData::new(vec![1, 2], 1, 8000);
        assert!(!decoder.load_audio_file_ok("missing.wav", &mut audio));
        assert!(!audio.is_valid());
    }

    #[test]
    fn test_filters_without_transcoder() {
        let decoder = offline_decoder();
        assert_eq!(decoder.format_filters(), vec!["WAV Files (*.wav)".to_string()]);
        assert!(AudioDecoder::is_format_supported("FLAC"));
        assert!(!AudioDecoder::is_format_supported("txt"));
    }

    #[test]
    fn test_duration_of_missing_file() {
        assert_eq!(offline_decoder().audio_duration("/nonexistent/a.wav"), 0.0);
    }
}
