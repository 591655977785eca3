//! pcm-deck - 命令行播放器
//!
//! 单文件播放：
//! - WAV 直接解析，其他格式经 ffmpeg 转码
//! - 整段加载进内存后交给实时输出
//! - 终端原始模式下的按键控制

use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};

use pcm_deck::audio::OutputConfig;
use pcm_deck::decode::transcode::default_executable;
use pcm_deck::decode::{formats, metadata, wav, AudioDecoder, FormatCatalog, TranscoderConfig};
use pcm_deck::engine::{Engine, EngineConfig, EngineEvent, PlaybackState};

/// 左右方向键的跳转步长（相对位置）
const SEEK_STEP: f64 = 0.05;

/// 终端原始模式 RAII 守卫
struct RawModeGuard;

impl RawModeGuard {
    /// 进入原始模式，返回守卫（离开作用域自动恢复）
    fn enter() -> Option<Self> {
        match enable_raw_mode() {
            Ok(()) => Some(Self),
            Err(e) => {
                log::warn!("Failed to enable raw mode: {}", e);
                None
            }
        }
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
    }
}

/// pcm-deck - 16-bit PCM audio player
#[derive(Parser)]
#[command(name = "pcm-deck")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Audio file to play
    #[arg(value_name = "FILE")]
    file: Option<PathBuf>,

    /// Path to the ffmpeg executable [default: next to this program]
    #[arg(long, value_name = "PATH", global = true)]
    ffmpeg: Option<PathBuf>,

    /// Select output device by index or name (use 'devices' to list)
    #[arg(short, long, global = true)]
    device: Option<String>,

    /// Output buffer size in frames
    #[arg(short, long, default_value = "256", global = true)]
    buffer_frames: u32,

    /// Do not lock sample memory while playing
    #[arg(long, global = true)]
    no_mlock: bool,

    /// Show verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List audio output devices
    Devices,

    /// List supported formats and transcoder status
    Formats,

    /// Show duration and format of a file
    Info {
        /// Audio file to inspect
        file: PathBuf,
    },

    /// Play file and exit
    Play {
        /// Audio file to play
        file: PathBuf,

        /// Start position (0.0 - 1.0)
        #[arg(long, default_value = "0", value_parser = parse_position)]
        start: f64,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 初始化日志
    if cli.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    }

    match cli.command {
        Some(Commands::Devices) => show_devices(&cli)?,
        Some(Commands::Formats) => show_formats(&cli),
        Some(Commands::Info { ref file }) => show_info(file, &cli)?,
        Some(Commands::Play { ref file, start }) => play_file(file, start, &cli)?,
        None => {
            if let Some(ref file) = cli.file {
                play_file(file, 0.0, &cli)?;
            } else {
                println!("pcm-deck - 16-bit PCM audio player\n");
                println!("Usage: pcm-deck [OPTIONS] <FILE>");
                println!("       pcm-deck devices");
                println!("       pcm-deck formats");
                println!("       pcm-deck info <FILE>");
                println!("       pcm-deck play [--start <POS>] <FILE>");
                println!("\nRun 'pcm-deck --help' for all options.");
            }
        }
    }

    Ok(())
}

fn parse_position(s: &str) -> Result<f64, String> {
    let value: f64 = s.parse().map_err(|e| format!("{}", e))?;
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(format!("{} is not within 0.0 - 1.0", value))
    }
}

fn create_decoder(cli: &Cli) -> AudioDecoder {
    AudioDecoder::new(TranscoderConfig {
        executable: cli.ffmpeg.clone().unwrap_or_else(default_executable),
        ..Default::default()
    })
}

fn create_engine_config(cli: &Cli) -> EngineConfig {
    EngineConfig {
        output: OutputConfig {
            buffer_frames: cli.buffer_frames,
            device: cli.device.clone(),
            lock_memory: !cli.no_mlock,
        },
        ..Default::default()
    }
}

/// `mm:ss.ss`
fn format_time(secs: f64) -> String {
    let secs = secs.max(0.0);
    format!("{:02}:{:05.2}", (secs / 60.0) as u32, secs % 60.0)
}

/// 显示设备信息
fn show_devices(cli: &Cli) -> anyhow::Result<()> {
    let mut engine = Engine::new(create_engine_config(cli));
    engine.initialize()?;

    println!("=== Audio Output Devices ===\n");

    let devices = engine.devices();
    if devices.is_empty() {
        println!("No output devices found.");
        return Ok(());
    }

    for device in &devices {
        let default_mark = if device.is_default { " *" } else { "" };
        println!("{}{}", device, default_mark);
    }

    println!();
    println!("* = system default");
    println!("Select device: pcm-deck -d <INDEX|NAME> <file>");

    Ok(())
}

/// 显示支持的格式
fn show_formats(cli: &Cli) {
    let decoder = create_decoder(cli);
    let transcoder = decoder.transcoder();
    let status = if transcoder.is_available() {
        "available"
    } else {
        "not found, WAV only"
    };

    println!(
        "Transcoder: {} ({})\n",
        transcoder.config().executable.display(),
        status
    );
    for filter in decoder.format_filters() {
        println!("  {}", filter);
    }
}

/// 显示文件信息
fn show_info(file: &Path, cli: &Cli) -> anyhow::Result<()> {
    if !file.exists() {
        bail!("File does not exist: {}", file.display());
    }

    let extension = formats::extension_of(file).unwrap_or_default();
    if !FormatCatalog::is_supported(&extension) {
        bail!("Unsupported format: {}", extension);
    }

    let decoder = create_decoder(cli);

    println!("File:     {}", file.display());
    if FormatCatalog::is_native(&extension) {
        let header = wav::read_header(file)
            .with_context(|| format!("Failed to read {}", file.display()))?;
        println!(
            "Format:   WAV, 16-bit PCM, {}Hz, {}ch",
            header.sample_rate, header.channels
        );
        println!("Frames:   {}", header.total_frames());
    } else if let Some(info) = metadata::probe(file) {
        let channels = info
            .channels
            .map(|c| c.to_string())
            .unwrap_or_else(|| "?".to_string());
        println!(
            "Format:   {} ({}), {}Hz, {}ch",
            extension.to_uppercase(),
            info.codec,
            info.sample_rate,
            channels
        );
        println!("Playback: transcoded to 16-bit PCM, 44100Hz, 2ch");
    } else {
        println!("Format:   {}", extension.to_uppercase());
    }
    println!("Duration: {}", format_time(decoder.audio_duration(file)));

    Ok(())
}

/// 按键处理，返回 true 表示退出
fn handle_key(engine: &mut Engine, key: KeyEvent) -> bool {
    if key.kind != KeyEventKind::Press {
        return false;
    }

    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => return true,
        // 原始模式下 Ctrl+C 不产生 SIGINT
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => return true,
        KeyCode::Char(' ') => {
            if let Err(e) = engine.toggle_pause() {
                log::error!("Error: {}", e);
            }
        }
        KeyCode::Char('s') => engine.stop(),
        KeyCode::Left => engine.seek(engine.progress() - SEEK_STEP),
        KeyCode::Right => engine.seek(engine.progress() + SEEK_STEP),
        _ => {}
    }
    false
}

/// 播放单个文件
fn play_file(file: &Path, start: f64, cli: &Cli) -> anyhow::Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    println!("pcm-deck - Loading: {}", file.display());

    let decoder = create_decoder(cli);
    let data = decoder
        .load_audio_file(file)
        .with_context(|| format!("Failed to load {}", file.display()))?;

    let config = create_engine_config(cli);
    let poll_interval = config.poll_interval;
    let mut engine = Engine::new(config);
    engine.initialize()?;
    engine.load(data)?;
    if start > 0.0 {
        engine.seek(start);
    }
    engine.play()?;

    // 非终端（管道 / 重定向）下不启用按键控制
    let raw_guard = if io::stdin().is_terminal() {
        RawModeGuard::enter()
    } else {
        None
    };

    if raw_guard.is_some() {
        print!("Controls: [Space] pause/resume | [Left/Right] seek | [s] stop | [q] quit\r\n\r\n");
    } else {
        println!("Playing. Press Ctrl+C to stop.\n");
    }

    let mut stream_error = None;

    'playback: loop {
        if !running.load(Ordering::SeqCst) {
            break;
        }

        if raw_guard.is_some() {
            while event::poll(Duration::ZERO)? {
                if let Event::Key(key) = event::read()? {
                    if handle_key(&mut engine, key) {
                        break 'playback;
                    }
                }
            }
        }

        match engine.poll() {
            Some(EngineEvent::Finished) => break,
            Some(EngineEvent::StreamError(message)) => {
                stream_error = Some(message);
                break;
            }
            None => {}
        }

        let state = match engine.state() {
            PlaybackState::Playing => "Playing",
            PlaybackState::Paused => "Paused",
            PlaybackState::Stopped => "Stopped",
        };

        print!(
            "\r  {} / {}  |  {:<7}  |  Underruns: {}  ",
            format_time(engine.position()),
            format_time(engine.duration()),
            state,
            engine.underruns()
        );
        io::stdout().flush()?;

        std::thread::sleep(poll_interval);
    }

    engine.stop();
    drop(raw_guard);
    println!();

    if let Some(message) = stream_error {
        bail!("Audio stream error: {}", message);
    }

    Ok(())
}
