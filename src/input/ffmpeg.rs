//! FFmpeg 帧源: 本地摄像头 (DirectShow/AVFoundation/V4L2) 与视频文件
//!
//! 解码在 ez-ffmpeg 调度线程中进行, 经 [`DecodeFilter`] 转为 RGB 后送入有界通道.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use ez_ffmpeg::core::context::null_output::create_null_output;
use ez_ffmpeg::core::scheduler::ffmpeg_scheduler::{FfmpegScheduler, Running};
use ez_ffmpeg::filter::frame_pipeline_builder::FramePipelineBuilder;
use ez_ffmpeg::{AVMediaType, FfmpegContext, Input};
use image::RgbImage;
use tracing::info;

use super::decode_filter::{DecodeFilter, Delivery};
use super::FrameSource;
use crate::error::WorkerError;

const CHANNEL_CAPACITY: usize = 8;
/// 摄像头超过该时长无帧视为读取失败
const CAMERA_READ_TIMEOUT: Duration = Duration::from_secs(2);
const POLL: Duration = Duration::from_millis(100);

#[cfg(target_os = "windows")]
const CAMERA_FORMAT: &str = "dshow"; // DirectShow
#[cfg(target_os = "macos")]
const CAMERA_FORMAT: &str = "avfoundation"; // AVFoundation
#[cfg(not(any(target_os = "windows", target_os = "macos")))]
const CAMERA_FORMAT: &str = "v4l2"; // Video4Linux2

pub struct FfmpegSource {
    description: String,
    rx: Option<Receiver<RgbImage>>,
    scheduler: Option<FfmpegScheduler<Running>>,
    framerate: f64,
    finite: bool,
}

impl FfmpegSource {
    /// 打开本地摄像头
    ///
    /// device: Linux 为 `/dev/video0`, Windows 为 `video=<设备名>`, macOS 为设备序号
    /// resolution 缺省为 1280x720
    pub fn camera(device: &str, framerate: u32, resolution: Option<(u32, u32)>) -> Result<Self, WorkerError> {
        let fps = framerate.to_string();
        let (w, h) = resolution.unwrap_or((1280, 720));
        let size = format!("{}x{}", w, h);
        let input = Input::new(device.to_string())
            .set_format(CAMERA_FORMAT)
            .set_input_opts([("framerate", fps.as_str()), ("video_size", size.as_str())].into());
        Self::start(
            format!("camera {} ({})", device, CAMERA_FORMAT),
            input,
            Delivery::DropWhenFull,
            framerate as f64,
            false,
        )
    }

    /// 打开视频文件 (有限源)
    pub fn file(path: impl AsRef<Path>, framerate: f64) -> Result<Self, WorkerError> {
        let path: PathBuf = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(WorkerError::resource(format!("视频文件不存在: {}", path.display())));
        }
        let input = Input::new(path.to_string_lossy().into_owned());
        Self::start(format!("file {}", path.display()), input, Delivery::Block, framerate, true)
    }

    fn start(
        description: String,
        input: Input,
        delivery: Delivery,
        framerate: f64,
        finite: bool,
    ) -> Result<Self, WorkerError> {
        let (tx, rx) = crossbeam_channel::bounded(CHANNEL_CAPACITY);

        // 构建帧处理管线
        let pipe: FramePipelineBuilder = AVMediaType::AVMEDIA_TYPE_VIDEO.into();
        let pipe = pipe.filter("decode", Box::new(DecodeFilter::new(tx, delivery)));
        let out = create_null_output().add_frame_pipeline(pipe);

        // 构建FFmpeg上下文, 固定输出 yuv420p
        let ctx = FfmpegContext::builder()
            .input(input)
            .filter_descs(["format=yuv420p"].into())
            .output(out)
            .build()
            .map_err(|e| WorkerError::resource(format!("FFmpeg 构建失败: {}", e)))?;
        let scheduler = ctx
            .start()
            .map_err(|e| WorkerError::resource(format!("FFmpeg 启动失败: {}", e)))?;

        info!("✅ 视频源已打开: {}", description);
        Ok(Self {
            description,
            rx: Some(rx),
            scheduler: Some(scheduler),
            framerate,
            finite,
        })
    }

    fn decoding_ended(&self) -> bool {
        self.scheduler.as_ref().map_or(true, |s| s.is_ended())
    }
}

impl FrameSource for FfmpegSource {
    fn read(&mut self) -> Result<Option<RgbImage>, WorkerError> {
        let Some(rx) = &self.rx else {
            return Ok(None);
        };
        let start = Instant::now();
        loop {
            match rx.recv_timeout(POLL) {
                Ok(image) => return Ok(Some(image)),
                Err(RecvTimeoutError::Timeout) => {
                    if self.decoding_ended() {
                        // 调度结束后通道中可能仍有残留帧
                        if let Ok(image) = rx.try_recv() {
                            return Ok(Some(image));
                        }
                        return if self.finite {
                            Ok(None)
                        } else {
                            Err(WorkerError::resource("camera stream ended"))
                        };
                    }
                    if !self.finite && start.elapsed() >= CAMERA_READ_TIMEOUT {
                        return Err(WorkerError::transient("camera read timed out"));
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return if self.finite {
                        Ok(None)
                    } else {
                        Err(WorkerError::resource("camera decoder gone"))
                    };
                }
            }
        }
    }

    fn framerate(&self) -> f64 {
        self.framerate
    }

    fn is_finite(&self) -> bool {
        self.finite
    }

    fn describe(&self) -> String {
        self.description.clone()
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        // 先关闭接收端, 阻塞中的解码线程随即返回
        self.rx.take();
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.abort();
        }
    }
}

/// 获取可用的摄像头设备列表
pub fn camera_devices() -> Vec<String> {
    match ez_ffmpeg::device::get_input_video_devices() {
        Ok(devices) => devices,
        Err(e) => {
            tracing::warn!("⚠️ 获取摄像头列表失败: {}", e);
            vec![]
        }
    }
}
