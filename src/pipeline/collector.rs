/// 采集器 (Collector)
/// 职责: 读取帧源 → 连续录像归档 → 节流抽帧 → 缩放 → 推送帧队列
use std::time::{Duration, Instant};

use anyhow::Result;
use fast_image_resize as fr;
use image::RgbImage;
use tracing::{info, warn};

use crate::config::{Config, Paths};
use crate::error::WorkerError;
use crate::frame::{CapturedFrame, FrameItem};
use crate::input::{FrameSource, SourceFactory};
use crate::video::Archive;
use crate::worker::queue::{PutError, PutPolicy, QueueSender};
use crate::worker::{Step, TickWorker, Worker, WorkerContext};

pub const COLLECTOR: &str = "COLLECTOR";

pub struct Collector {
    config: Config,
    paths: Paths,
    open_source: SourceFactory,
    frames: Option<QueueSender<FrameItem>>,

    source: Option<Box<dyn FrameSource>>,
    archive: Option<Archive>,
    resizer: fr::Resizer,
    policy: PutPolicy,
    finite: bool,
    framerate: f64,

    // 节流时钟 (采集时间, 毫秒)
    base_time: u64,
    started: Option<Instant>,
    frame_index: u64,
    last_push: Option<u64>,

    // 统计
    captured: u64,
    pushed: u64,
    dropped: u64,
    end_sent: bool,
}

impl Collector {
    pub fn new(config: Config, paths: Paths, open_source: SourceFactory, frames: QueueSender<FrameItem>) -> Self {
        Self {
            config,
            paths,
            open_source,
            frames: Some(frames),
            source: None,
            archive: None,
            resizer: fr::Resizer::new(),
            policy: PutPolicy::Drop,
            finite: false,
            framerate: 0.0,
            base_time: 0,
            started: None,
            frame_index: 0,
            last_push: None,
            captured: 0,
            pushed: 0,
            dropped: 0,
            end_sent: false,
        }
    }

    /// 有限源按流时间计时 (帧序号 / 帧率), 实时源按启动后的单调时钟.
    /// 两者都以启动时的墙钟为起点, 墙钟回拨不影响节流.
    fn capture_time(&self) -> u64 {
        if self.finite {
            self.base_time + (self.frame_index as f64 * 1000.0 / self.framerate).round() as u64
        } else {
            let elapsed = self.started.map_or(0, |t| t.elapsed().as_millis() as u64);
            self.base_time + elapsed
        }
    }

    /// 抽帧节流: 时钟从第一帧开始计时, 第一次推送在一个间隔之后
    fn push_due(&mut self, capture_time: u64) -> bool {
        match self.last_push {
            None => {
                self.last_push = Some(capture_time);
                false
            }
            Some(last) => capture_time.saturating_sub(last) >= self.config.interval_ms(),
        }
    }

    /// 返回是否推送成功
    fn push(&mut self, item: FrameItem) -> Result<bool, WorkerError> {
        let Some(frames) = &self.frames else {
            return Ok(false);
        };
        match frames.safe_put(item, self.policy) {
            Ok(()) => Ok(true),
            Err(PutError::Full(item)) => {
                self.dropped += 1;
                warn!("⚠️ 帧队列已满, 丢弃 {} (累计丢弃 {})", item.name(), self.dropped);
                Ok(false)
            }
            Err(PutError::Disconnected(_)) => {
                // 检测端已退出: 有限源到此结束, 实时源继续录像
                self.frames = None;
                if self.finite {
                    Err(WorkerError::Disconnected(String::from("frame queue")))
                } else {
                    warn!("⚠️ 检测端已退出, 仅继续录像");
                    Ok(false)
                }
            }
        }
    }

    fn exhausted(&mut self) -> Result<Step, WorkerError> {
        info!(
            "📭 帧源已耗尽: 采集 {} 帧, 推送 {} 帧, 进入休眠",
            self.captured, self.pushed
        );
        self.push(FrameItem::EndWarning)?;
        self.push(FrameItem::End)?;
        self.end_sent = true;
        Ok(Step::Stop)
    }
}

/// 按比例缩放 (scale >= 1 时原样复制)
pub fn downscale(resizer: &mut fr::Resizer, image: &RgbImage, scale: f32) -> Result<RgbImage> {
    if scale >= 1.0 {
        return Ok(image.clone());
    }
    let (w, h) = image.dimensions();
    let dw = ((w as f32 * scale).round() as u32).max(1);
    let dh = ((h as f32 * scale).round() as u32).max(1);

    let src = fr::images::ImageRef::new(w, h, image.as_raw(), fr::PixelType::U8x3)?;
    let mut dst = fr::images::Image::new(dw, dh, fr::PixelType::U8x3);
    resizer.resize(
        &src,
        &mut dst,
        &fr::ResizeOptions::new().resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear)),
    )?;
    RgbImage::from_raw(dw, dh, dst.into_vec()).ok_or_else(|| anyhow::anyhow!("缩放结果尺寸不匹配"))
}

impl Worker for Collector {
    fn startup(&mut self, _ctx: &WorkerContext) -> Result<(), WorkerError> {
        let source = (self.open_source)()?;
        self.finite = source.is_finite();
        self.framerate = if source.framerate() > 0.0 {
            source.framerate()
        } else {
            self.config.framerate as f64
        };
        info!("📹 帧源: {} ({:.1}fps)", source.describe(), self.framerate);

        if self.finite {
            // 文件源本身即为录像, 不再归档; 背压必须保留, 一直重试
            self.policy = PutPolicy::retry_forever(self.config.put_backoff());
        } else {
            std::fs::create_dir_all(&self.paths.video_dir)
                .map_err(|e| WorkerError::resource(format!("创建录像目录失败: {}", e)))?;
            self.archive = Some(Archive::new(
                &self.paths.video_dir,
                self.config.tank_id.clone(),
                self.framerate,
                self.config.max_archive_len(),
            ));
            self.policy = PutPolicy::retry(self.config.put_backoff(), self.config.live_put_attempts.max(1));
        }

        self.base_time = crate::current_time_ms();
        self.started = Some(Instant::now());
        self.source = Some(source);
        Ok(())
    }

    fn shutdown(&mut self, _ctx: &WorkerContext) {
        if let Some(mut archive) = self.archive.take() {
            match archive.finish() {
                Ok(files) => info!("💾 录像归档完成: {} 个文件", files.len()),
                Err(e) => warn!("⚠️ 录像归档关闭失败: {:#}", e),
            }
        }
        self.source = None;
        if !self.end_sent {
            if let Some(frames) = &self.frames {
                let _ = frames.safe_put(FrameItem::End, PutPolicy::Drop);
            }
        }
        self.frames = None;
        info!(
            "📊 采集统计: 采集 {} 帧 | 推送 {} 帧 | 丢弃 {} 帧",
            self.captured, self.pushed, self.dropped
        );
    }
}

impl TickWorker for Collector {
    fn interval(&self) -> Duration {
        if self.finite || self.framerate <= 0.0 {
            // 文件源由队列背压节流
            Duration::ZERO
        } else {
            Duration::from_secs_f64(1.0 / self.framerate)
        }
    }

    fn tick(&mut self, _ctx: &WorkerContext) -> Result<Step, WorkerError> {
        let Some(source) = self.source.as_mut() else {
            return Err(WorkerError::resource("frame source not open"));
        };
        let image = match source.read()? {
            Some(image) => image,
            None => return self.exhausted(),
        };
        let capture_time = self.capture_time();
        self.frame_index += 1;
        self.captured += 1;

        if let Some(archive) = self.archive.as_mut() {
            if let Err(e) = archive.write(&image) {
                warn!("⚠️ 录像写入失败: {:#}", e);
            }
        }

        if self.frames.is_some() && self.push_due(capture_time) {
            // 无论推送成功与否, 本次抽帧都已消耗
            self.last_push = Some(capture_time);
            let small = downscale(&mut self.resizer, &image, self.config.inference_scale)?;
            if self.push(FrameItem::Frame(CapturedFrame::new(capture_time, small)))? {
                self.pushed += 1;
            }
        }
        Ok(Step::Continue)
    }
}
