//! snd-dma - DMA 声音后端演示
//!
//! - info: 打开设备，显示驱动和协商结果
//! - tone: 以生产者身份在读游标前方写入测试音

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};

use snd_dma::tone::ToneGenerator;
use snd_dma::{BackendKind, SoundConfig, SoundDma};

/// 生产者循环间隔
const PAINT_INTERVAL: Duration = Duration::from_millis(10);

/// snd-dma - Ring-buffer sound backend
#[derive(Parser)]
#[command(name = "snd-dma")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Sample bits (8 = unsigned 8-bit, anything else = signed 16-bit)
    #[arg(long, global = true, default_value = "16")]
    bits: u16,

    /// Sample rate in Hz (0 = device default)
    #[arg(long, global = true, default_value = "0")]
    speed: u32,

    /// Requested channel count
    #[arg(long, global = true, default_value = "2")]
    channels: u16,

    /// Ring buffer size as a multiple of the device period (minimum 1)
    #[arg(long, global = true, default_value = "8", allow_hyphen_values = true)]
    samples_mult: i32,

    /// Audio backend: sdl or null
    #[arg(long, global = true, default_value = "sdl")]
    backend: BackendKind,

    /// Path of the SDL library (overrides SND_DMA_SDL_LIB)
    #[arg(long, global = true, value_name = "PATH")]
    lib: Option<PathBuf>,

    /// Lock ring buffer memory (mlock)
    #[arg(long, global = true)]
    mlock: bool,

    /// Show verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the device and show the negotiated format
    Info,

    /// Play a test tone through the ring buffer
    Tone {
        /// Tone frequency in Hz
        #[arg(short, long, default_value = "440")]
        freq: f64,

        /// Volume (0.0 - 1.0)
        #[arg(long, default_value = "0.25")]
        volume: f64,

        /// Stop after N seconds (default: until Ctrl+C)
        #[arg(short, long)]
        seconds: Option<u64>,
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

    let config = create_sound_config(&cli);

    match cli.command {
        Commands::Info => show_device_info(config)?,
        Commands::Tone {
            freq,
            volume,
            seconds,
        } => play_tone(config, freq, volume, seconds)?,
    }

    Ok(())
}

/// 创建声音配置
fn create_sound_config(cli: &Cli) -> SoundConfig {
    SoundConfig {
        bits: cli.bits,
        speed: cli.speed,
        channels: cli.channels,
        samples_mult: cli.samples_mult,
        backend: cli.backend,
        library: cli.lib.clone(),
        lock_memory: cli.mlock,
    }
}

/// 显示设备信息
fn show_device_info(config: SoundConfig) -> anyhow::Result<()> {
    let mut dma = SoundDma::new(config);
    let format = dma.initialize()?;

    println!("=== Sound Device ===\n");
    println!("Driver:      {}", dma.driver_name().unwrap_or("unknown"));
    println!("Format:      {}", format);
    println!("Sample bits: {}", format.sample_bits());
    println!("Frame size:  {} bytes", format.frame_stride());

    if let Some(info) = dma.buffer_info() {
        println!(
            "Buffer:      {} frames / {} bytes ({:.1} ms)",
            info.capacity_frames,
            info.capacity_bytes,
            info.capacity_frames as f64 * 1000.0 / format.sample_rate as f64
        );
        println!("Submission:  {} frame(s)", info.submission_chunk);
    }

    dma.shutdown();
    Ok(())
}

/// 播放测试音
fn play_tone(
    config: SoundConfig,
    freq: f64,
    volume: f64,
    seconds: Option<u64>,
) -> anyhow::Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    let mut dma = SoundDma::new(config);
    let format = dma.initialize()?;
    let info = dma
        .buffer_info()
        .ok_or_else(|| anyhow::anyhow!("sound device is not bound"))?;

    // 提前 100ms，但不超过半个缓冲区
    let lead_frames = (format.sample_rate as usize / 10).min(info.capacity_frames / 2);
    let mut tone = ToneGenerator::new(freq, volume);

    println!(
        "Playing {:.0} Hz on {} ({}). Press Ctrl+C to stop.\n",
        freq,
        dma.driver_name().unwrap_or("unknown"),
        format
    );

    let limit = seconds.map(Duration::from_secs);
    let start = Instant::now();

    while running.load(Ordering::SeqCst) {
        if limit.is_some_and(|limit| start.elapsed() >= limit) {
            break;
        }

        if let Some(mut guard) = dma.begin_painting() {
            let cursor = guard.read_cursor();
            tone.paint(&mut guard, cursor, lead_frames, &format);
            guard.submit();
        }

        let stats = dma.stats();
        print!(
            "\r  {:6.1}s  |  Cursor: {:6} / {}  |  Callbacks: {}  |  Wraps: {}  ",
            start.elapsed().as_secs_f64(),
            dma.query_read_cursor(),
            info.capacity_frames,
            stats.callbacks,
            stats.wraps
        );
        io::stdout().flush()?;

        std::thread::sleep(PAINT_INTERVAL);
    }

    println!("\n\n{}", dma.stats());
    dma.shutdown();

    Ok(())
}
