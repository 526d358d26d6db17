/// 检测器 (Detector)
/// 职责: 弹出帧 → 参考区域定位 → 区域内目标检测 → 命中累积 → 事件剪辑 + NOTIFY
///
/// 状态: AWAITING_REGION_LOCK → TRACKING ⇄ EVENT_TRIGGERED → TRACKING
use std::path::PathBuf;
use std::time::{Duration, Instant};

use image::RgbImage;
use tracing::{debug, error, info, warn};

use crate::config::{Config, Paths};
use crate::detection::{
    non_max_suppression, overlay, BBox, BufferedFrame, Detection, DetectionBuffer, HitCounter,
    LabelRecorder, LocateOutcome, RegionLock, Subject,
};
use crate::error::WorkerError;
use crate::frame::{CapturedFrame, FrameItem};
use crate::models::{Model, ModelFactory};
use crate::video::{FrameWriter, GifClipWriter};
use crate::worker::message::{ControlMessage, MessageKind, Payload};
use crate::worker::queue::QueueReceiver;
use crate::worker::{QueueWorker, Step, Worker, WorkerContext};

pub const DETECTOR: &str = "DETECTOR";
pub const SPAWNING_EVENT: &str = "SPAWNING_EVENT";

/// 命中帧所需的最少合格目标数
const MIN_HIT_SUBJECTS: usize = 2;
/// 统计日志间隔 (检测循环次数)
const STATS_EVERY: u64 = 100;

/// 状态机当前所处阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorPhase {
    AwaitingRegionLock,
    Tracking,
}

/// 检测平均耗时
#[derive(Debug, Default)]
struct Averager {
    total: Duration,
    count: u32,
}

impl Averager {
    fn update(&mut self, d: Duration) {
        self.total += d;
        self.count += 1;
    }

    fn avg_ms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total.as_secs_f64() * 1000.0 / self.count as f64
        }
    }
}

pub struct Detector {
    config: Config,
    paths: Paths,
    model_factory: ModelFactory,
    queue: QueueReceiver<FrameItem>,

    model: Option<Box<dyn Model>>,
    recorder: Option<LabelRecorder>,
    region: RegionLock,
    counter: HitCounter,
    buffer: DetectionBuffer,
    hit_thresh: u32,

    mock_hit: bool,
    source_finished: bool,
    loops: u64,
    events: u64,
    timer: Averager,
}

impl Detector {
    pub fn new(config: Config, paths: Paths, model_factory: ModelFactory, queue: QueueReceiver<FrameItem>) -> Self {
        let region = RegionLock::new(
            config.region_refresh_frames,
            config.region_iou_thresh,
            config.region_radius_scale,
        );
        let counter = HitCounter::new(config.hit_growth, config.hit_decay);
        let buffer = DetectionBuffer::new(config.window_frames());
        let hit_thresh = config.hit_thresh_frames();
        Self {
            config,
            paths,
            model_factory,
            queue,
            model: None,
            recorder: None,
            region,
            counter,
            buffer,
            hit_thresh,
            mock_hit: false,
            source_finished: false,
            loops: 0,
            events: 0,
            timer: Averager::default(),
        }
    }

    pub fn phase(&self) -> DetectorPhase {
        if self.region.is_locked() {
            DetectorPhase::Tracking
        } else {
            DetectorPhase::AwaitingRegionLock
        }
    }

    /// 定位参考区域: 取置信度最高的区域类别检测
    fn locate(&mut self, image: &RgbImage) -> LocateOutcome {
        let Some(model) = self.model.as_mut() else {
            return self.region.update(None);
        };
        let found = match model.detect(image) {
            Ok(dets) => dets
                .into_iter()
                .filter(|d| d.label == self.config.region_label && d.confidence >= self.config.conf_thresh)
                .max_by(|a, b| a.confidence.total_cmp(&b.confidence)),
            Err(e) => {
                warn!("⚠️ 区域定位推理失败: {:#}", e);
                None
            }
        };
        let outcome = self.region.update(found.as_ref());
        match outcome {
            LocateOutcome::Locked => debug!("🔒 参考区域已锁定"),
            LocateOutcome::Unstable => info!("🔓 参考区域变化较大, 下一帧重新定位"),
            LocateOutcome::Failed => debug!("参考区域定位失败"),
        }
        outcome
    }

    /// 在参考区域附近裁剪后检测目标, 返回原图坐标的目标列表
    fn detect_subjects(&mut self, image: &RgbImage) -> Vec<Subject> {
        let (Some(model), Some(region)) = (self.model.as_mut(), self.region.region()) else {
            return Vec::new();
        };

        // 有效半径外接正方形
        let (cx, cy) = region.center;
        let r = region.radius;
        let (w, h) = image.dimensions();
        let crop = BBox::new(cx - r, cy - r, 2.0 * r, 2.0 * r).clamp(w as f32, h as f32);
        let (x0, y0) = (crop.xmin() as u32, crop.ymin() as u32);
        let (cw, ch) = (crop.width() as u32, crop.height() as u32);
        if cw == 0 || ch == 0 {
            return Vec::new();
        }
        let view = image::imageops::crop_imm(image, x0, y0, cw.min(w - x0), ch.min(h - y0)).to_image();

        let mut dets: Vec<Detection> = match model.detect(&view) {
            Ok(dets) => dets
                .into_iter()
                .filter(|d| d.label == self.config.subject_label && d.confidence >= self.config.conf_thresh)
                .map(|d| Detection {
                    bbox: d.bbox.translate(x0 as f32, y0 as f32),
                    ..d
                })
                .collect(),
            Err(e) => {
                warn!("⚠️ 目标检测推理失败: {:#}", e);
                return Vec::new();
            }
        };
        non_max_suppression(&mut dets, self.config.nms_iou);
        dets.truncate(self.config.max_subjects);

        dets.into_iter()
            .map(|detection| Subject {
                qualifying: region.contains_center(&detection.bbox),
                detection,
            })
            .collect()
    }

    fn process(&mut self, frame: CapturedFrame, ctx: &WorkerContext) -> Result<Step, WorkerError> {
        if self.model.is_none() {
            return Err(WorkerError::resource("model not loaded"));
        }
        let start = Instant::now();
        let CapturedFrame { capture_time, image } = frame;

        // 1. 区域锁定; 失败时本帧不做目标检测
        let mut region_usable = self.region.is_locked();
        if self.region.needs_refresh() {
            region_usable = self.locate(&image) != LocateOutcome::Failed;
        }
        self.region.advance();

        // 2. 目标检测
        let subjects = if region_usable {
            self.detect_subjects(&image)
        } else {
            Vec::new()
        };
        self.timer.update(start.elapsed());

        // 3. 命中累积: 非命中帧 (含区域缺失帧) 一律衰减
        let qualifying = subjects.iter().filter(|s| s.qualifying).count();
        let hit = qualifying >= MIN_HIT_SUBJECTS;
        self.counter.update(hit);

        // 4. 标注样本 (非阻塞)
        if let Some(recorder) = self.recorder.as_mut() {
            let mut dets: Vec<Detection> = subjects.iter().map(|s| s.detection.clone()).collect();
            if let Some(region) = self.region.region() {
                dets.push(Detection::new(self.config.region_label.clone(), region.confidence, region.bbox));
            }
            recorder.offer(capture_time, &image, &dets, !subjects.is_empty());
        }

        // 5. 入观察窗口
        self.buffer.push(BufferedFrame {
            capture_time,
            image,
            region: if region_usable {
                self.region.region().map(|r| r.bbox)
            } else {
                None
            },
            subjects,
        });

        // 6. 触发判断
        let triggered = self.mock_hit || (self.counter.reached(self.hit_thresh) && self.buffer.is_full());
        if triggered {
            if self.mock_hit {
                info!("🧪 MOCK_HIT 强制触发");
            } else {
                info!("🐟 命中累计 {:.1} 达到阈值 {}, 疑似产卵事件", self.counter.hits(), self.hit_thresh);
            }
            self.mock_hit = false;
            self.trigger(ctx)?;
        }

        self.loops += 1;
        if self.loops % STATS_EVERY == 0 {
            info!(
                "📊 已完成 {} 次检测循环, 平均检测耗时 {:.1}ms, 事件 {} 次",
                self.loops,
                self.timer.avg_ms(),
                self.events
            );
        }
        Ok(Step::Continue)
    }

    /// 生成事件剪辑并发送 NOTIFY; 计数器与缓冲在处理下一帧前已清零
    fn trigger(&mut self, ctx: &WorkerContext) -> Result<(), WorkerError> {
        let frames = self.buffer.drain();
        self.counter.reset();
        let Some(first) = frames.first() else {
            return Ok(());
        };

        let clip_path = self.paths.clip_dir.join(format!("{}_event.gif", first.capture_time));
        let clip = self.write_clip(&clip_path, &frames).map_err(|e| {
            error!("❌ 事件剪辑生成失败: {:#}", e);
            WorkerError::transient(format!("clip failed: {}", e))
        })?;

        self.events += 1;
        let message = format!(
            "possible spawning event in {} at {}",
            self.config.tank_id,
            crate::current_time_iso()
        );
        info!("📣 {} → {}", message, clip.display());
        ctx.send(ControlMessage::notify(
            ctx.name(),
            SPAWNING_EVENT,
            message,
            clip.to_string_lossy(),
        ));
        Ok(())
    }

    fn write_clip(&self, path: &std::path::Path, frames: &[BufferedFrame]) -> anyhow::Result<PathBuf> {
        let mut writer = GifClipWriter::create(path, self.config.clip_fps())?;
        let middle = frames.len() / 2;
        for (i, frame) in frames.iter().enumerate() {
            let annotated = overlay::render(frame);
            writer.write(&annotated)?;
            if i == middle {
                // 剪辑缩略图
                let thumb = self.paths.image_dir.join(format!("{}_event.jpg", frames[0].capture_time));
                if let Err(e) = annotated.save_with_format(&thumb, image::ImageFormat::Jpeg) {
                    warn!("⚠️ 缩略图保存失败: {}", e);
                }
            }
        }
        writer.finish()
    }
}

impl Worker for Detector {
    fn startup(&mut self, _ctx: &WorkerContext) -> Result<(), WorkerError> {
        for dir in [&self.paths.clip_dir, &self.paths.image_dir] {
            std::fs::create_dir_all(dir)
                .map_err(|e| WorkerError::resource(format!("创建目录失败 {}: {}", dir.display(), e)))?;
        }

        let model = (self.model_factory)().map_err(|e| WorkerError::resource(format!("{:#}", e)))?;
        info!(
            "✅ 模型已加载: {} | 命中阈值 {} 帧 | 观察窗口 {} 帧",
            model.describe(),
            self.hit_thresh,
            self.buffer.capacity()
        );
        self.model = Some(model);

        match LabelRecorder::spawn(
            &self.paths.label_dir,
            Duration::from_secs(self.config.record_interval_secs),
            Duration::from_secs(self.config.record_interval_active_secs),
        ) {
            Ok(recorder) => self.recorder = Some(recorder),
            Err(e) => warn!("⚠️ 标注采集未启动: {:#}", e),
        }
        Ok(())
    }

    fn shutdown(&mut self, ctx: &WorkerContext) {
        if self.timer.count > 0 {
            info!("📊 平均检测耗时 {:.1}ms ({} 次循环)", self.timer.avg_ms(), self.loops);
        }
        if let Some(mut recorder) = self.recorder.take() {
            recorder.finish();
        }
        self.model = None;
        if self.source_finished {
            ctx.emit(
                MessageKind::EnterPassiveMode,
                Payload::Text(String::from("detection complete, entering passive mode")),
            );
        }
    }
}

impl QueueWorker for Detector {
    type Item = FrameItem;

    fn queue(&self) -> &QueueReceiver<FrameItem> {
        &self.queue
    }

    fn handle(&mut self, item: FrameItem, ctx: &WorkerContext) -> Result<Step, WorkerError> {
        match item {
            FrameItem::Frame(frame) => self.process(frame, ctx),
            FrameItem::MockHit => {
                self.mock_hit = true;
                Ok(Step::Continue)
            }
            FrameItem::EndWarning => {
                info!("📭 帧源即将结束");
                self.source_finished = true;
                Ok(Step::Continue)
            }
            FrameItem::End => Ok(Step::Stop),
        }
    }
}
