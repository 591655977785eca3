//! RIFF/WAVE 容器解析
//!
//! 只接受 16-bit 线性 PCM；其他编码由外部转码器先转换成这种格式。
//!
//! 布局：
//! - 12 字节头：`RIFF` + 容器大小 + `WAVE`
//! - 若干 chunk：4 字节标签 + 4 字节小端长度 + 负载
//!
//! 只关心 `fmt ` 和 `data` 两个 chunk，其余按声明长度跳过。
//! 遇到 `data` 即停止扫描，之后的 chunk 一律忽略。

use std::fs::File;
use std::io::{self, BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::Path;

use thiserror::Error;

use super::AudioData;

const RIFF_TAG: [u8; 4] = *b"RIFF";
const WAVE_TAG: [u8; 4] = *b"WAVE";
const FMT_TAG: [u8; 4] = *b"fmt ";
const DATA_TAG: [u8; 4] = *b"data";

const HEADER_LEN: usize = 12;
const CHUNK_HEADER_LEN: u64 = 8;
const FMT_MIN_LEN: u32 = 16;

/// WAVE_FORMAT_PCM
const ENCODING_PCM: u16 = 1;
const SUPPORTED_BITS: u16 = 16;
const BYTES_PER_SAMPLE: usize = 2;

/// 解析错误
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed to read file: {0}")]
    Io(#[from] io::Error),
    #[error("not a RIFF/WAVE container")]
    BadContainer,
    #[error("malformed fmt chunk: {0}")]
    BadFormatChunk(&'static str),
    #[error("unsupported encoding tag {0}, only linear PCM is supported")]
    UnsupportedEncoding(u16),
    #[error("unsupported bit depth {0}, only 16-bit is supported")]
    UnsupportedBitDepth(u16),
    #[error("missing fmt or data chunk, or empty data")]
    MissingChunks,
    #[error("chunk '{tag}' declares {size} bytes but only {available} remain")]
    Truncated {
        tag: String,
        size: u32,
        available: u64,
    },
}

/// `fmt ` 与 `data` 头部信息（不含样本）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavHeader {
    pub channels: u16,
    pub sample_rate: u32,
    /// `data` 负载字节数
    pub data_size: u32,
}

impl WavHeader {
    pub fn total_frames(&self) -> usize {
        self.data_size as usize / (self.channels as usize * BYTES_PER_SAMPLE)
    }

    pub fn duration(&self) -> f64 {
        self.total_frames() as f64 / self.sample_rate as f64
    }
}

/// 扫描结果：头部信息 + 样本数据的起始偏移
struct Layout {
    header: WavHeader,
    data_offset: u64,
}

/// 解析 WAV 文件
pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<AudioData, ParseError> {
    let file = File::open(path)?;
    parse_reader(&mut BufReader::new(file))
}

/// 解析内存中的 WAV 数据
pub fn parse_bytes(bytes: &[u8]) -> Result<AudioData, ParseError> {
    parse_reader(&mut Cursor::new(bytes))
}

/// 只读取头部，不加载样本（用于查询时长）
pub fn read_header<P: AsRef<Path>>(path: P) -> Result<WavHeader, ParseError> {
    let file = File::open(path)?;
    scan(&mut BufReader::new(file)).map(|layout| layout.header)
}

fn parse_reader<R: Read + Seek>(reader: &mut R) -> Result<AudioData, ParseError> {
    let Layout {
        header,
        data_offset,
    } = scan(reader)?;

    reader.seek(SeekFrom::Start(data_offset))?;
    let mut bytes = vec![0u8; header.data_size as usize];
    reader.read_exact(&mut bytes)?;

    // 只保留完整帧
    let sample_count = header.total_frames() * header.channels as usize;
    let samples: Vec<i16> = bytes
        .chunks_exact(BYTES_PER_SAMPLE)
        .take(sample_count)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect();

    Ok(AudioData::new(samples, header.channels, header.sample_rate))
}

/// 定位 `fmt ` 和 `data`
fn scan<R: Read + Seek>(reader: &mut R) -> Result<Layout, ParseError> {
    let file_len = reader.seek(SeekFrom::End(0))?;
    reader.seek(SeekFrom::Start(0))?;

    let mut header = [0u8; HEADER_LEN];
    if file_len < HEADER_LEN as u64 {
        return Err(ParseError::BadContainer);
    }
    reader.read_exact(&mut header)?;
    if header[0..4] != RIFF_TAG || header[8..12] != WAVE_TAG {
        return Err(ParseError::BadContainer);
    }

    let mut pos = HEADER_LEN as u64;
    let mut format: Option<(u16, u32)> = None;

    while file_len - pos >= CHUNK_HEADER_LEN {
        let mut chunk_header = [0u8; CHUNK_HEADER_LEN as usize];
        reader.read_exact(&mut chunk_header)?;
        pos += CHUNK_HEADER_LEN;

        let tag = [
            chunk_header[0],
            chunk_header[1],
            chunk_header[2],
            chunk_header[3],
        ];
        let size = u32::from_le_bytes([
            chunk_header[4],
            chunk_header[5],
            chunk_header[6],
            chunk_header[7],
        ]);

        let available = file_len - pos;
        if size as u64 > available {
            return Err(ParseError::Truncated {
                tag: String::from_utf8_lossy(&tag).into_owned(),
                size,
                available,
            });
        }

        match tag {
            FMT_TAG => {
                format = Some(read_format(reader, size)?);
                // fmt 负载前 16 字节已读取
                let consumed = FMT_MIN_LEN as u64;
                pos += consumed;
                pos = skip(reader, pos, file_len, size as u64 - consumed, size)?;
            }
            DATA_TAG => {
                // data 出现在 fmt 之前视为缺块
                let (channels, sample_rate) = format.ok_or(ParseError::MissingChunks)?;
                if size == 0 {
                    return Err(ParseError::MissingChunks);
                }
                return Ok(Layout {
                    header: WavHeader {
                        channels,
                        sample_rate,
                        data_size: size,
                    },
                    data_offset: pos,
                });
            }
            _ => {
                pos = skip(reader, pos, file_len, size as u64, size)?;
            }
        }
    }

    Err(ParseError::MissingChunks)
}

/// 读取 fmt 负载的前 16 字节，返回 (声道数, 采样率)
fn read_format<R: Read>(reader: &mut R, size: u32) -> Result<(u16, u32), ParseError> {
    if size < FMT_MIN_LEN {
        return Err(ParseError::BadFormatChunk("payload shorter than 16 bytes"));
    }

    let mut fmt = [0u8; FMT_MIN_LEN as usize];
    reader.read_exact(&mut fmt)?;

    let encoding = u16::from_le_bytes([fmt[0], fmt[1]]);
    let channels = u16::from_le_bytes([fmt[2], fmt[3]]);
    let sample_rate = u32::from_le_bytes([fmt[4], fmt[5], fmt[6], fmt[7]]);
    let bits_per_sample = u16::from_le_bytes([fmt[14], fmt[15]]);

    if encoding != ENCODING_PCM {
        return Err(ParseError::UnsupportedEncoding(encoding));
    }
    if bits_per_sample != SUPPORTED_BITS {
        return Err(ParseError::UnsupportedBitDepth(bits_per_sample));
    }
    if channels == 0 {
        return Err(ParseError::BadFormatChunk("zero channels"));
    }
    if sample_rate == 0 {
        return Err(ParseError::BadFormatChunk("zero sample rate"));
    }

    Ok((channels, sample_rate))
}

/// 跳过 `len` 字节，奇数长度 chunk 后的填充字节一并跳过（文件末尾缺失时容忍）
fn skip<R: Seek>(
    reader: &mut R,
    pos: u64,
    file_len: u64,
    len: u64,
    declared: u32,
) -> Result<u64, ParseError> {
    let mut next = pos + len;
    if declared % 2 == 1 && next < file_len {
        next += 1;
    }
    reader.seek(SeekFrom::Start(next))?;
    Ok(next)
}

/// 测试用 WAV 构造工具
#[cfg(test)]
pub(crate) mod testutil {
    /// 构造 fmt 负载
    pub fn fmt_payload(encoding: u16, channels: u16, sample_rate: u32, bits: u16) -> Vec<u8> {
        let block_align = channels * bits / 8;
        let byte_rate = sample_rate * block_align as u32;
        let mut fmt = Vec::with_capacity(16);
        fmt.extend_from_slice(&encoding.to_le_bytes());
        fmt.extend_from_slice(&channels.to_le_bytes());
        fmt.extend_from_slice(&sample_rate.to_le_bytes());
        fmt.extend_from_slice(&byte_rate.to_le_bytes());
        fmt.extend_from_slice(&block_align.to_le_bytes());
        fmt.extend_from_slice(&bits.to_le_bytes());
        fmt
    }

    /// 用给定 chunk 列表拼出完整 RIFF 文件
    pub fn riff(chunks: &[(&[u8; 4], Vec<u8>)]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(b"WAVE");
        for (tag, payload) in chunks {
            body.extend_from_slice(*tag);
            body.extend_from_slice(&(payload.len() as u32).to_le_bytes());
            body.extend_from_slice(payload);
            if payload.len() % 2 == 1 {
                body.push(0);
            }
        }
        let mut out = Vec::with_capacity(body.len() + 8);
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&(body.len() as u32).to_le_bytes());
        out.extend_from_slice(&body);
        out
    }

    /// 标准 16-bit PCM WAV
    pub fn build_wav(channels: u16, sample_rate: u32, samples: &[i16]) -> Vec<u8> {
        let data: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        riff(&[
            (b"fmt ", fmt_payload(1, channels, sample_rate, 16)),
            (b"data", data),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::*;
    use super::*;

    #[test]
    fn test_parse_stereo() {
        let samples: Vec<i16> = vec![0, -1, 32767, -32768, 100, -100];
        let data = parse_bytes(&build_wav(2, 48000, &samples)).unwrap();

        assert_eq!(data.channels(), 2);
        assert_eq!(data.sample_rate(), 48000);
        assert_eq!(data.total_frames(), 3);
        assert_eq!(data.samples(), samples.as_slice());
    }

    #[test]
    fn test_frame_count_formula() {
        for channels in 1..=6u16 {
            let samples = vec![7i16; channels as usize * 37];
            let bytes = build_wav(channels, 22050, &samples);
            let data = parse_bytes(&bytes).unwrap();
            let data_size = samples.len() * 2;
            assert_eq!(data.total_frames(), data_size / (channels as usize * 2));
        }
    }

    #[test]
    fn test_skips_unknown_chunks_and_extended_fmt() {
        let mut fmt = fmt_payload(1, 1, 8000, 16);
        // cbSize + 扩展字节
        fmt.extend_from_slice(&[2, 0, 0xAA, 0xBB]);
        let bytes = riff(&[
            (b"LIST", vec![1, 2, 3]), // 奇数长度，带填充字节
            (b"fmt ", fmt),
            (b"fact", vec![0; 4]),
            (b"data", vec![1, 0, 2, 0]),
            (b"junk", vec![9; 10]),
        ]);

        let data = parse_bytes(&bytes).unwrap();
        assert_eq!(data.samples(), &[1, 2]);
        assert_eq!(data.total_frames(), 2);
    }

    #[test]
    fn test_trailing_partial_frame_dropped() {
        // 5 个样本，立体声只有 2 个完整帧
        let bytes = build_wav(2, 8000, &[1, 2, 3, 4, 5]);
        let data = parse_bytes(&bytes).unwrap();
        assert_eq!(data.total_frames(), 2);
        assert_eq!(data.samples().len(), 4);
    }

    #[test]
    fn test_bad_container() {
        assert!(matches!(parse_bytes(b"RIFF"), Err(ParseError::BadContainer)));

        let mut bytes = build_wav(1, 8000, &[0; 4]);
        bytes[8..12].copy_from_slice(b"AVI ");
        assert!(matches!(parse_bytes(&bytes), Err(ParseError::BadContainer)));

        let mut bytes = build_wav(1, 8000, &[0; 4]);
        bytes[0..4].copy_from_slice(b"RIFX");
        assert!(matches!(parse_bytes(&bytes), Err(ParseError::BadContainer)));
    }

    #[test]
    fn test_unsupported_encoding() {
        // IEEE float
        let bytes = riff(&[
            (b"fmt ", fmt_payload(3, 2, 44100, 16)),
            (b"data", vec![0; 8]),
        ]);
        assert!(matches!(
            parse_bytes(&bytes),
            Err(ParseError::UnsupportedEncoding(3))
        ));
    }

    #[test]
    fn test_unsupported_bit_depth() {
        for bits in [8u16, 24, 32] {
            let bytes = riff(&[
                (b"fmt ", fmt_payload(1, 2, 44100, bits)),
                (b"data", vec![0; 12]),
            ]);
            match parse_bytes(&bytes) {
                Err(ParseError::UnsupportedBitDepth(b)) => assert_eq!(b, bits),
                other => panic!("expected UnsupportedBitDepth, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_short_fmt_chunk() {
        let bytes = riff(&[(b"fmt ", vec![1, 0, 2, 0]), (b"data", vec![0; 4])]);
        assert!(matches!(
            parse_bytes(&bytes),
            Err(ParseError::BadFormatChunk(_))
        ));
    }

    #[test]
    fn test_zero_channels_rejected() {
        let bytes = riff(&[
            (b"fmt ", fmt_payload(1, 0, 44100, 16)),
            (b"data", vec![0; 4]),
        ]);
        assert!(matches!(
            parse_bytes(&bytes),
            Err(ParseError::BadFormatChunk(_))
        ));
    }

    #[test]
    fn test_missing_chunks() {
        // 没有 data
        let bytes = riff(&[(b"fmt ", fmt_payload(1, 2, 44100, 16))]);
        assert!(matches!(parse_bytes(&bytes), Err(ParseError::MissingChunks)));

        // data 在 fmt 之前
        let bytes = riff(&[
            (b"data", vec![0; 4]),
            (b"fmt ", fmt_payload(1, 2, 44100, 16)),
        ]);
        assert!(matches!(parse_bytes(&bytes), Err(ParseError::MissingChunks)));

        // data 为空
        let bytes = riff(&[
            (b"fmt ", fmt_payload(1, 2, 44100, 16)),
            (b"data", Vec::new()),
        ]);
        assert!(matches!(parse_bytes(&bytes), Err(ParseError::MissingChunks)));
    }

    #[test]
    fn test_truncated_data_chunk() {
        let mut bytes = build_wav(2, 44100, &[1, 2, 3, 4]);
        // 砍掉最后 2 字节，data 声明长度超出文件
        bytes.truncate(bytes.len() - 2);
        assert!(matches!(
            parse_bytes(&bytes),
            Err(ParseError::Truncated { size: 8, available: 6, .. })
        ));
    }

    #[test]
    fn test_truncated_unknown_chunk() {
        let mut bytes = riff(&[(b"fmt ", fmt_payload(1, 2, 44100, 16))]);
        bytes.extend_from_slice(b"LIST");
        bytes.extend_from_slice(&1000u32.to_le_bytes());
        bytes.extend_from_slice(&[0; 10]);
        assert!(matches!(
            parse_bytes(&bytes),
            Err(ParseError::Truncated { ref tag, .. }) if tag == "LIST"
        ));
    }

    #[test]
    fn test_read_header_and_parse_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.wav");
        std::fs::write(&path, build_wav(2, 44100, &vec![0; 44100 * 2])).unwrap();

        let header = read_header(&path).unwrap();
        assert_eq!(header.channels, 2);
        assert_eq!(header.data_size, 44100 * 4);
        assert_eq!(header.total_frames(), 44100);
        assert_eq!(header.duration(), 1.0);

        let data = parse_file(&path).unwrap();
        assert_eq!(data.duration(), 1.0);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        assert!(matches!(
            parse_file("/nonexistent/file.wav"),
            Err(ParseError::Io(_))
        ));
    }
}
