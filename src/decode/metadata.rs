//! 容器元数据探测
//!
//! 只读取容器头部，不解码音频。压缩格式查询时长时优先走这里，
//! 拿不到帧数才退回完整转码。

use std::fs::File;
use std::path::Path;

use symphonia::core::codecs::CODEC_TYPE_NULL;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// 容器中第一条音轨的信息
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerInfo {
    pub codec: String,
    pub sample_rate: u32,
    pub channels: Option<u16>,
    pub bits_per_sample: Option<u32>,
    /// 部分容器（如无 Xing 头的 MP3）不提供
    pub total_frames: Option<u64>,
}

impl ContainerInfo {
    pub fn duration(&self) -> Option<f64> {
        if self.sample_rate == 0 {
            return None;
        }
        self.total_frames
            .map(|frames| frames as f64 / self.sample_rate as f64)
    }
}

/// 探测容器，失败返回 `None`
pub fn probe(path: &Path) -> Option<ContainerInfo> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) => {
            log::debug!("Metadata probe cannot open {}: {}", path.display(), e);
            return None;
        }
    };
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| log::debug!("Metadata probe failed for {}: {}", path.display(), e))
        .ok()?;

    let track = probed
        .format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)?;
    let params = &track.codec_params;

    let codec = symphonia::default::get_codecs()
        .get_codec(params.codec)
        .map(|c| c.short_name.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    Some(ContainerInfo {
        codec,
        sample_rate: params.sample_rate?,
        channels: params.channels.map(|c| c.count() as u16),
        bits_per_sample: params.bits_per_sample,
        total_frames: params.n_frames,
    })
}

/// 从容器元数据得到时长（秒）
pub fn probe_duration(path: &Path) -> Option<f64> {
    probe(path).and_then(|info| info.duration())
}
