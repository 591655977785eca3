//! 外部转码器（ffmpeg）
//!
//! 把任意受支持格式转成 44.1kHz / 立体声 / 16-bit PCM WAV，再交给 WAV 解析器。
//!
//! 每次调用使用独立的临时目录，`TempDir` 离开作用域即删除，
//! 并发转码互不干扰，任何返回路径都会清理中间文件。

use std::env;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

use super::wav::{self, ParseError};
use super::AudioData;

/// 子进程状态轮询间隔
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// 失败时附带的 stderr 末尾字节数
const LOG_TAIL_BYTES: usize = 512;

const AVAILABILITY_UNKNOWN: u8 = 0;
const AVAILABILITY_YES: u8 = 1;
const AVAILABILITY_NO: u8 = 2;

/// 转码错误
#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("transcoder not available: {}", .0.display())]
    Unavailable(PathBuf),
    #[error("failed to launch transcoder: {0}")]
    Spawn(#[source] io::Error),
    #[error("transcoder I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("transcoder failed: {0}")]
    ProcessFailed(String),
    #[error("transcoder produced no output file")]
    OutputMissing,
    #[error("transcoded output unreadable: {0}")]
    Parse(#[from] ParseError),
}

/// 转码器配置
#[derive(Clone, Debug)]
pub struct TranscoderConfig {
    /// 可执行文件路径
    pub executable: PathBuf,
    /// `-version` 探测超时
    pub probe_timeout: Duration,
    /// 转码超时
    pub timeout: Duration,
    /// 输出采样率
    pub sample_rate: u32,
    /// 输出声道数
    pub channels: u16,
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            executable: default_executable(),
            probe_timeout: Duration::from_secs(3),
            timeout: Duration::from_secs(30),
            sample_rate: 44100,
            channels: 2,
        }
    }
}

/// 与程序同目录的 ffmpeg
pub fn default_executable() -> PathBuf {
    let name = format!("ffmpeg{}", env::consts::EXE_SUFFIX);
    env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(&name)))
        .unwrap_or_else(|| PathBuf::from(name))
}

/// 外部转码器
pub struct Transcoder {
    config: TranscoderConfig,
    /// 可用性缓存，`invalidate_availability` 清除
    availability: AtomicU8,
}

impl Transcoder {
    pub fn new(config: TranscoderConfig) -> Self {
        Self {
            config,
            availability: AtomicU8::new(AVAILABILITY_UNKNOWN),
        }
    }

    pub fn config(&self) -> &TranscoderConfig {
        &self.config
    }

    /// 转码器是否可用
    ///
    /// 首次调用时执行 `<exe> -version`，限时内退出码为 0 即视为可用；
    /// 结果缓存到 `invalidate_availability` 为止
    pub fn is_available(&self) -> bool {
        match self.availability.load(Ordering::Acquire) {
            AVAILABILITY_YES => true,
            AVAILABILITY_NO => false,
            _ => {
                let available = self.probe();
                let state = if available {
                    AVAILABILITY_YES
                } else {
                    AVAILABILITY_NO
                };
                self.availability.store(state, Ordering::Release);
                available
            }
        }
    }

    /// 清除可用性缓存（例如用户安装了 ffmpeg 之后）
    pub fn invalidate_availability(&self) {
        self.availability
            .store(AVAILABILITY_UNKNOWN, Ordering::Release);
    }

    fn probe(&self) -> bool {
        let exe = &self.config.executable;
        let child = Command::new(exe)
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();

        let mut child = match child {
            Ok(child) => child,
            Err(e) => {
                log::debug!("Transcoder not launchable at {}: {}", exe.display(), e);
                return false;
            }
        };

        match wait_with_timeout(&mut child, self.config.probe_timeout) {
            Ok(Some(status)) if status.success() => {
                log::debug!("Transcoder available at {}", exe.display());
                true
            }
            Ok(Some(status)) => {
                log::debug!("Transcoder probe exited with {}", status);
                false
            }
            Ok(None) => {
                log::warn!(
                    "Transcoder probe timed out after {:?}",
                    self.config.probe_timeout
                );
                false
            }
            Err(e) => {
                log::warn!("Transcoder probe failed: {}", e);
                false
            }
        }
    }

    /// 命令行参数
    pub fn arguments(&self, input: &Path, output: &Path) -> Vec<OsString> {
        vec![
            "-i".into(),
            input.into(),
            "-acodec".into(),
            "pcm_s16le".into(),
            "-ar".into(),
            self.config.sample_rate.to_string().into(),
            "-ac".into(),
            self.config.channels.to_string().into(),
            "-f".into(),
            "wav".into(),
            "-y".into(),
            output.into(),
        ]
    }

    /// 转码并解析
    pub fn transcode(&self, input: &Path) -> Result<AudioData, TranscodeError> {
        if !self.is_available() {
            return Err(TranscodeError::Unavailable(self.config.executable.clone()));
        }

        let scratch = tempfile::Builder::new().prefix("pcm-deck-").tempdir()?;
        let output = scratch.path().join("transcoded.wav");
        let log_path = scratch.path().join("transcoder.log");
        // stderr 写文件而非管道，避免输出过多时子进程阻塞
        let stderr = File::create(&log_path)?;

        log::info!("Transcoding: {}", input.display());
        let started = Instant::now();

        let mut child = Command::new(&self.config.executable)
            .args(self.arguments(input, &output))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(stderr)
            .spawn()
            .map_err(TranscodeError::Spawn)?;

        match wait_with_timeout(&mut child, self.config.timeout)? {
            None => {
                return Err(TranscodeError::ProcessFailed(format!(
                    "timed out after {:?}",
                    self.config.timeout
                )));
            }
            Some(status) if !status.success() => {
                return Err(TranscodeError::ProcessFailed(format!(
                    "{}: {}",
                    status,
                    log_tail(&log_path)
                )));
            }
            Some(_) => {}
        }

        if !output.exists() {
            return Err(TranscodeError::OutputMissing);
        }

        let data = wav::parse_file(&output)?;
        log::info!(
            "Transcoded in {:.2}s: {} frames ({:.2}s)",
            started.elapsed().as_secs_f64(),
            data.total_frames(),
            data.duration()
        );

        if let Err(e) = scratch.close() {
            log::warn!("Failed to remove transcoder scratch dir: {}", e);
        }

        Ok(data)
    }
}

/// 限时等待子进程；超时则杀掉并回收，返回 `None`
fn wait_with_timeout(child: &mut Child, timeout: Duration) -> io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn log_tail(path: &Path) -> String {
    let text = fs::read_to_string(path).unwrap_or_default();
    let trimmed = text.trim_end();
    let start = trimmed.len().saturating_sub(LOG_TAIL_BYTES);
    // 退到字符边界
    let start = (start..trimmed.len())
        .find(|&i| trimmed.is_char_boundary(i))
        .unwrap_or(trimmed.len());
    trimmed[start..].to_string()
}
