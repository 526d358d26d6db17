/// 产卵行为监控 (Fish spawning monitor)
///
/// 摄像头连续录像, 抽帧检测鱼群聚集, 持续命中后生成事件剪辑并上报.
///
/// 主程序入口: cargo run --bin fishwatch --release --features onnx,ffmpeg
use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use fishwatch_rs::input::{self, GifSource, SourceFactory};
use fishwatch_rs::models::{self, ModelFactory};
use fishwatch_rs::pipeline::{EventSink, FanoutSink, LogSink, Manager, TcpJsonSink};
use fishwatch_rs::{Config, Paths};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// 产卵行为监控参数
#[derive(Parser, Debug)]
#[command(author, version, about = "产卵行为监控 - 边缘端视频检测", long_about = None)]
struct Args {
    /// 配置文件 (JSON), 不存在时使用默认值
    #[arg(short, long, default_value = "fishwatch.json")]
    config: PathBuf,

    /// 视频文件回放 (.gif 或 FFmpeg 可解码的文件), 指定后全天运行
    #[arg(short, long)]
    source: Option<PathBuf>,

    /// 摄像头设备
    #[arg(long, default_value = "/dev/video0")]
    camera: String,

    /// 检测模型 (ONNX)
    #[arg(short, long, default_value = "models/fish-pipe.onnx")]
    model: PathBuf,

    /// 类别名文件
    #[arg(long, default_value = "models/labels.txt")]
    labels: PathBuf,

    /// 数据根目录 (Videos/Clips/Images/Labels)
    #[arg(short, long, default_value = "data")]
    data_dir: PathBuf,

    /// 控制消息上报地址 host:port
    #[arg(long)]
    report_addr: Option<String>,

    /// 停止文件: 出现后退出
    #[arg(long)]
    stop_file: Option<PathBuf>,

    /// 暂停文件: 存在期间停止采集与检测
    #[arg(long)]
    pause_file: Option<PathBuf>,

    /// 日志级别 (RUST_LOG 优先)
    #[arg(long, default_value = "info")]
    log: String,

    /// 列出摄像头设备后退出
    #[cfg(feature = "ffmpeg")]
    #[arg(long)]
    list_cameras: bool,
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    fmt().with_env_filter(filter).with_target(false).init();
}

fn model_factory(args: &Args, config: &Config) -> ModelFactory {
    #[cfg(feature = "onnx")]
    {
        models::yolov8_factory(&args.model, &args.labels, config.conf_thresh, config.nms_iou)
    }
    #[cfg(not(feature = "onnx"))]
    {
        let _ = config;
        warn!("⚠️ 未启用 onnx 特性, 只录像不检测 ({})", args.model.display());
        models::unavailable_factory("built without the onnx feature")
    }
}

fn file_source(path: &Path, config: &Config) -> Result<SourceFactory> {
    let fps = config.framerate as f64;
    let is_gif = path
        .extension()
        .is_some_and(|e| e.eq_ignore_ascii_case("gif"));
    let path = path.to_path_buf();
    if is_gif {
        return Ok(input::factory(move || GifSource::open(&path, fps)));
    }
    #[cfg(feature = "ffmpeg")]
    {
        Ok(input::factory(move || input::FfmpegSource::file(&path, fps)))
    }
    #[cfg(not(feature = "ffmpeg"))]
    {
        anyhow::bail!("{} 需要 ffmpeg 特性才能解码", path.display())
    }
}

fn camera_source(device: &str, config: &Config) -> Result<SourceFactory> {
    #[cfg(feature = "ffmpeg")]
    {
        let device = device.to_string();
        let fps = config.framerate;
        Ok(input::factory(move || input::FfmpegSource::camera(&device, fps, None)))
    }
    #[cfg(not(feature = "ffmpeg"))]
    {
        let _ = config;
        anyhow::bail!("摄像头 {} 需要 ffmpeg 特性", device)
    }
}

fn event_sink(report_addr: Option<&str>) -> Box<dyn EventSink> {
    let mut sink = FanoutSink::new().with(LogSink);
    if let Some(addr) = report_addr {
        match TcpJsonSink::new(addr) {
            Ok(tcp) => {
                info!("📡 控制消息上报至 {}", addr);
                sink = sink.with(tcp);
            }
            Err(e) => warn!("⚠️ 上报地址无效, 仅写日志: {:#}", e),
        }
    }
    Box::new(sink)
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log);

    #[cfg(feature = "ffmpeg")]
    if args.list_cameras {
        for device in input::ffmpeg::camera_devices() {
            println!("{}", device);
        }
        return Ok(());
    }

    let config = Config::load(&args.config);
    config.validate()?;
    let paths = Paths::under(&args.data_dir);

    info!("🚀 产卵行为监控启动: {}", config.tank_id);
    info!(
        "⚙️ 抽帧间隔 {}s | 命中阈值 {} 帧 | 观察窗口 {} 帧",
        config.interval_secs,
        config.hit_thresh_frames(),
        config.window_frames()
    );

    let source = match &args.source {
        Some(path) => {
            info!("📼 视频文件: {}", path.display());
            file_source(path, &config)?
        }
        None => {
            info!("📹 摄像头: {}", args.camera);
            camera_source(&args.camera, &config)?
        }
    };
    let model = model_factory(&args, &config);
    let sink = event_sink(args.report_addr.as_deref());

    let mut manager = Manager::new(config, paths, source, model, sink);
    if args.source.is_some() {
        manager = manager.ignore_daily_window();
    }
    if let Some(stop_file) = &args.stop_file {
        manager = manager.with_stop_file(stop_file);
    }
    if let Some(pause_file) = &args.pause_file {
        manager = manager.with_pause_file(pause_file);
    }

    let reason = manager.supervise()?;
    info!("👋 监控结束: {:?}", reason);
    Ok(())
}
