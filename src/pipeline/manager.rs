/// 管理器 (Manager)
/// 职责: 启停 Collector/Detector、连接队列、按日间时段监督、转发控制消息
///
/// 只管理线程生命周期, 不接触帧数据 (测试注入的 MOCK_HIT 除外).
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Timelike;
use tracing::{error, info, warn};

use super::collector::{Collector, COLLECTOR};
use super::detector::{Detector, DETECTOR};
use super::sink::EventSink;
use crate::config::{Config, Paths};
use crate::frame::FrameItem;
use crate::input::SourceFactory;
use crate::models::ModelFactory;
use crate::worker::message::{ControlMessage, MessageKind};
use crate::worker::queue::{self, PutPolicy, QueueSender};
use crate::worker::{
    spawn_queue_worker, spawn_tick_worker, EventReceiver, EventSender, WorkerContext, WorkerHandle, POP_TIMEOUT,
};

pub const MANAGER: &str = "MANAGER";

const EVENT_CAPACITY: usize = 64;
/// Detector 处理完队列中剩余帧的宽限时间
const DETECTOR_GRACE: Duration = Duration::from_secs(10);
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);
const END_PUT_POLICY: PutPolicy = PutPolicy::Retry {
    backoff: Duration::from_millis(100),
    max_attempts: Some(50),
};

/// supervise 返回原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// 收到 END 控制消息
    End,
    /// 有限源处理完毕, 或两个工作线程均已自行退出
    Finished,
    /// 操作员停止文件
    Stopped,
    /// 采集端致命错误且不按日间时段重启
    HardShutdown,
}

/// 一轮采集/检测
struct Cycle {
    frames: QueueSender<FrameItem>,
    collector: WorkerHandle,
    detector: WorkerHandle,
}

pub struct Manager {
    config: Config,
    paths: Paths,
    source: SourceFactory,
    model: ModelFactory,
    sink: Box<dyn EventSink>,

    stop_file: Option<PathBuf>,
    pause_file: Option<PathBuf>,
    ignore_daily_window: bool,
    hour_of_day: Box<dyn Fn() -> u32 + Send>,

    events_tx: EventSender,
    events_rx: EventReceiver,
    cycle: Option<Cycle>,
}

impl Manager {
    pub fn new(config: Config, paths: Paths, source: SourceFactory, model: ModelFactory, sink: Box<dyn EventSink>) -> Self {
        let (events_tx, events_rx) = queue::bounded(EVENT_CAPACITY);
        Self {
            config,
            paths,
            source,
            model,
            sink,
            stop_file: None,
            pause_file: None,
            ignore_daily_window: false,
            hour_of_day: Box::new(|| chrono::Local::now().hour()),
            events_tx,
            events_rx,
            cycle: None,
        }
    }

    /// 文件出现后 supervise 停止并返回
    pub fn with_stop_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.stop_file = Some(path.into());
        self
    }

    /// 文件存在期间暂停采集与检测
    pub fn with_pause_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.pause_file = Some(path.into());
        self
    }

    /// 全天运行 (视频文件回放时使用)
    pub fn ignore_daily_window(mut self) -> Self {
        self.ignore_daily_window = true;
        self
    }

    pub fn with_clock(mut self, hour_of_day: impl Fn() -> u32 + Send + 'static) -> Self {
        self.hour_of_day = Box::new(hour_of_day);
        self
    }

    pub fn is_running(&self) -> bool {
        self.cycle.is_some()
    }

    /// 构造帧队列并启动两个工作线程; 已在运行时无操作
    pub fn start(&mut self) -> Result<()> {
        if self.cycle.is_some() {
            return Ok(());
        }
        self.paths.create_all()?;
        let (frames, frames_rx) = queue::bounded(self.config.queue_capacity);

        let detector = Detector::new(self.config.clone(), self.paths.clone(), self.model.clone(), frames_rx);
        let detector = spawn_queue_worker(detector, WorkerContext::new(DETECTOR, self.events_tx.clone()))
            .context("启动检测线程失败")?;

        let collector = Collector::new(
            self.config.clone(),
            self.paths.clone(),
            self.source.clone(),
            frames.clone(),
        );
        let collector = match spawn_tick_worker(collector, WorkerContext::new(COLLECTOR, self.events_tx.clone())) {
            Ok(handle) => handle,
            Err(e) => {
                let mut detector = detector;
                let _ = frames.safe_put(FrameItem::End, END_PUT_POLICY);
                detector.join_timeout(JOIN_TIMEOUT);
                return Err(e).context("启动采集线程失败");
            }
        };

        info!("✅ 采集与检测已启动 ({})", self.config.tank_id);
        self.cycle = Some(Cycle {
            frames,
            collector,
            detector,
        });
        Ok(())
    }

    /// 有序停止: 先向 Detector 推送 END 并等待, 再独立停止 Collector (幂等)
    pub fn stop(&mut self) {
        let Some(mut cycle) = self.cycle.take() else {
            return;
        };
        info!("⏹️ 正在停止采集与检测");

        if let Err(e) = cycle.frames.safe_put(FrameItem::End, END_PUT_POLICY) {
            if !e.is_disconnected() {
                warn!("⚠️ 结束哨兵推送失败: {}", e);
            }
        }
        if !cycle.detector.join_timeout(DETECTOR_GRACE) {
            warn!("⚠️ 检测线程未在 {:?} 内结束, 请求停止", DETECTOR_GRACE);
            cycle.detector.request_stop();
            if !cycle.detector.join_timeout(JOIN_TIMEOUT) {
                error!("❌ 检测线程无法结束");
            }
        }

        cycle.collector.request_stop();
        if !cycle.collector.join_timeout(JOIN_TIMEOUT) {
            error!("❌ 采集线程无法结束");
        }
        drop(cycle);

        // 关闭阶段产生的消息
        while let Ok(Some(msg)) = self.events_rx.try_pop() {
            self.sink.deliver(&msg);
        }
        info!("🛑 采集与检测已停止");
    }

    /// 测试用: 下一帧强制触发事件
    pub fn inject_mock_hit(&self) -> bool {
        match &self.cycle {
            Some(cycle) => cycle
                .frames
                .safe_put(FrameItem::MockHit, PutPolicy::retry(self.config.put_backoff(), 10))
                .is_ok(),
            None => false,
        }
    }

    fn announce(&mut self, kind: MessageKind, text: &str) {
        self.sink.deliver(&ControlMessage::text(MANAGER, kind, text));
    }

    fn file_exists(path: &Option<PathBuf>) -> bool {
        path.as_ref().is_some_and(|p| p.exists())
    }

    /// 监督循环, 直到结束条件出现
    ///
    /// 日间时段内运行采集/检测, 时段外停止. 采集端致命错误后停止,
    /// 等经过一段非活动时段后在下一个活动时段重新启动.
    pub fn supervise(&mut self) -> Result<ExitReason> {
        let mut hard_stopped = false;
        let mut seen_inactive = false;

        loop {
            if Self::file_exists(&self.stop_file) {
                info!("🛑 检测到停止文件, 退出");
                self.stop();
                return Ok(ExitReason::Stopped);
            }
            let paused = Self::file_exists(&self.pause_file);
            let active = self.ignore_daily_window || self.config.is_active_hour((self.hour_of_day)());
            if !active {
                seen_inactive = true;
            }

            if self.is_running() {
                if paused {
                    info!("⏸️ 检测到暂停文件");
                    self.stop();
                } else if !active {
                    info!("🌙 离开日间时段");
                    self.stop();
                    self.announce(MessageKind::EnterPassiveMode, "outside daily window");
                }
            } else if active && !paused && (!hard_stopped || seen_inactive) {
                self.start()?;
                hard_stopped = false;
                self.announce(MessageKind::EnterActiveMode, "monitoring started");
            }

            match self.events_rx.pop_timeout(POP_TIMEOUT) {
                Ok(Some(msg)) => {
                    self.sink.deliver(&msg);
                    match (msg.kind(), msg.source()) {
                        (MessageKind::End, _) => {
                            self.stop();
                            return Ok(ExitReason::End);
                        }
                        (MessageKind::EnterPassiveMode, DETECTOR) => {
                            info!("📭 有限源检测完成");
                            self.stop();
                            return Ok(ExitReason::Finished);
                        }
                        (MessageKind::HardShutdown, COLLECTOR) => {
                            error!("❌ 采集端致命错误: {}", msg);
                            self.stop();
                            if self.ignore_daily_window {
                                return Ok(ExitReason::HardShutdown);
                            }
                            hard_stopped = true;
                            seen_inactive = false;
                        }
                        (MessageKind::HardShutdown, _) => {
                            // 检测端退出不影响录像
                            warn!("⚠️ {} 已停止, 采集继续录像", msg.source());
                        }
                        _ => {}
                    }
                }
                Ok(None) => {}
                Err(_) => anyhow::bail!("控制消息队列已关闭"),
            }

            let idle = self
                .cycle
                .as_ref()
                .is_some_and(|c| c.collector.is_finished() && c.detector.is_finished());
            if idle {
                info!("工作线程均已退出");
                self.stop();
                if self.ignore_daily_window {
                    return Ok(ExitReason::Finished);
                }
                hard_stopped = true;
                seen_inactive = false;
            }
        }
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::Detection;
    use crate::input::{self, MemorySource};
    use crate::models::{unavailable_factory, Model};
    use crate::pipeline::sink::CollectSink;
    use crate::WorkerError;
    use image::RgbImage;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct Empty;

    impl Model for Empty {
        fn detect(&mut self, _image: &RgbImage) -> Result<Vec<Detection>> {
            Ok(Vec::new())
        }
    }

    fn empty_model() -> ModelFactory {
        Arc::new(|| Ok(Box::new(Empty) as Box<dyn Model>))
    }

    fn config() -> Config {
        Config {
            interval_secs: 0.1,
            hit_thresh_secs: 0.3,
            window_secs: 0.5,
            ..Default::default()
        }
    }

    fn kinds(sink: &CollectSink) -> Vec<(String, MessageKind)> {
        sink.messages()
            .iter()
            .map(|m| (m.source().to_string(), m.kind()))
            .collect()
    }

    #[test]
    fn test_stop_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let source = input::factory(|| Ok(MemorySource::live(vec![RgbImage::new(8, 8); 4], 30.0)));
        let sink = CollectSink::new();
        let mut manager = Manager::new(config(), Paths::under(dir.path()), source, empty_model(), Box::new(sink));
        manager.stop();
        manager.start().unwrap();
        assert!(manager.is_running());
        manager.start().unwrap();
        manager.stop();
        assert!(!manager.is_running());
        manager.stop();
    }

    #[test]
    fn test_finite_source_finishes() {
        let dir = tempfile::tempdir().unwrap();
        let source = input::factory(|| Ok(MemorySource::new(vec![RgbImage::new(8, 8); 20], 10.0)));
        let sink = CollectSink::new();
        let mut manager = Manager::new(config(), Paths::under(dir.path()), source, empty_model(), Box::new(sink.clone()))
            .ignore_daily_window();
        assert_eq!(manager.supervise().unwrap(), ExitReason::Finished);
        let kinds = kinds(&sink);
        assert_eq!(kinds[0], (MANAGER.to_string(), MessageKind::EnterActiveMode));
        assert!(kinds.contains(&(DETECTOR.to_string(), MessageKind::EnterPassiveMode)));
    }

    #[test]
    fn test_collector_failure_returns_hard_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let source: SourceFactory = Arc::new(|| Err(WorkerError::resource("no camera")));
        let sink = CollectSink::new();
        let mut manager = Manager::new(config(), Paths::under(dir.path()), source, empty_model(), Box::new(sink.clone()))
            .ignore_daily_window();
        assert_eq!(manager.supervise().unwrap(), ExitReason::HardShutdown);
        assert!(kinds(&sink).contains(&(COLLECTOR.to_string(), MessageKind::HardShutdown)));
    }

    #[test]
    fn test_missing_model_keeps_recording() {
        let dir = tempfile::tempdir().unwrap();
        let stop_file = dir.path().join("STOP");
        let source = input::factory(|| Ok(MemorySource::live(vec![RgbImage::new(8, 8); 1000], 30.0)));
        let sink = CollectSink::new();
        let mut manager = Manager::new(
            config(),
            Paths::under(dir.path()),
            source,
            unavailable_factory("no model"),
            Box::new(sink.clone()),
        )
        .ignore_daily_window()
        .with_stop_file(&stop_file);

        let touch = stop_file.clone();
        let toucher = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(800));
            std::fs::write(touch, b"").unwrap();
        });
        assert_eq!(manager.supervise().unwrap(), ExitReason::Stopped);
        toucher.join().unwrap();

        assert!(kinds(&sink).contains(&(DETECTOR.to_string(), MessageKind::HardShutdown)));
        // 检测端失败后仍在录像
        let videos = std::fs::read_dir(dir.path().join("Videos")).unwrap().count();
        assert_eq!(videos, 1);
    }

    #[test]
    fn test_restarts_only_after_inactive_window() {
        let dir = tempfile::tempdir().unwrap();
        let stop_file = dir.path().join("STOP");
        let opened = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&opened);
        let source: SourceFactory = Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(WorkerError::resource("no camera"))
        });
        // 小时序列: 活动 → (失败) → 活动 → 非活动 → 活动
        let hour = Arc::new(AtomicU32::new(10));
        let clock = Arc::clone(&hour);
        let sink = CollectSink::new();
        let mut manager = Manager::new(config(), Paths::under(dir.path()), source, empty_model(), Box::new(sink.clone()))
            .with_stop_file(&stop_file)
            .with_clock(move || clock.load(Ordering::SeqCst));

        let control = {
            let hour = Arc::clone(&hour);
            let opened = Arc::clone(&opened);
            let stop_file = stop_file.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(1500));
                // 仍在活动时段: 不得重启
                let after_failure = opened.load(Ordering::SeqCst);
                hour.store(22, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(600));
                hour.store(10, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(1500));
                std::fs::write(&stop_file, b"").unwrap();
                after_failure
            })
        };
        assert_eq!(manager.supervise().unwrap(), ExitReason::Stopped);
        let after_failure = control.join().unwrap();
        assert_eq!(after_failure, 1);
        assert_eq!(opened.load(Ordering::SeqCst), 2);
    }
}
