//! 监控系统配置 - 通过JSON文件调整参数
//!
//! 配置在工作线程启动前解析一次, 之后以不可变快照传递, 运行期间从不修改.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 监控参数配置
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // === 项目 ===
    pub tank_id: String,

    // === 采集参数 ===
    pub framerate: u32,          // 摄像头帧率
    pub interval_secs: f64,      // 推理抽帧间隔(秒)
    pub max_archive_hours: f64,  // 单个录像文件最大时长(小时), 0 表示不切分
    pub inference_scale: f32,    // 推理帧缩放比例
    pub queue_capacity: usize,   // 帧队列容量
    pub put_backoff_ms: u64,     // 队列满时重试间隔
    pub live_put_attempts: u32,  // 实时源的最大重试次数

    // === 检测参数 ===
    pub conf_thresh: f32,         // 模型置信度阈值
    pub nms_iou: f32,             // 目标去重 IOU 阈值
    pub max_subjects: usize,      // 最多追踪目标数
    pub subject_label: String,    // 目标类别名
    pub region_label: String,     // 参考区域类别名
    pub hit_thresh_secs: f64,     // 命中阈值(秒)
    pub window_secs: f64,         // 观察窗口长度(秒)
    pub hit_growth: f32,          // 命中帧增量
    pub hit_decay: f32,           // 非命中帧衰减
    pub region_refresh_frames: u32, // 参考区域定期刷新间隔(帧)
    pub region_iou_thresh: f32,   // 参考区域稳定性 IOU 阈值
    pub region_radius_scale: f32, // 参考区域有效半径缩放

    // === 标注样本采集 ===
    pub record_interval_secs: u64,        // 无目标时的样本间隔
    pub record_interval_active_secs: u64, // 有目标时的样本间隔

    // === 日间时段 ===
    pub start_hour: u32,
    pub end_hour: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tank_id: String::from("tank"),

            framerate: 30,
            interval_secs: 1.0,
            max_archive_hours: 1.0,
            inference_scale: 0.5,
            queue_capacity: 32,
            put_backoff_ms: 100,
            live_put_attempts: 5,

            conf_thresh: 0.4,
            nms_iou: 0.5,
            max_subjects: 5,
            subject_label: String::from("fish"),
            region_label: String::from("pipe"),
            hit_thresh_secs: 10.0,
            window_secs: 60.0,
            hit_growth: 1.0,
            hit_decay: 0.5,
            region_refresh_frames: 100,
            region_iou_thresh: 0.95,
            region_radius_scale: 1.0,

            record_interval_secs: 600,
            record_interval_active_secs: 60,

            start_hour: 8,
            end_hour: 18,
        }
    }
}

impl Config {
    /// 从JSON文件加载配置, 失败时使用默认值
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::try_load(path) {
            Ok(config) => {
                tracing::info!("✅ 配置已从 {} 加载", path.display());
                config
            }
            Err(e) => {
                tracing::warn!("⚠️  配置文件加载失败: {:#}, 使用默认值", e);
                Self::default()
            }
        }
    }

    /// 从JSON文件加载并校验配置
    pub fn try_load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .with_context(|| format!("读取配置失败: {}", path.display()))?;
        let config: Self = serde_json::from_str(&json).context("配置文件解析失败")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.interval_secs > 0.0, "interval_secs 必须为正数");
        anyhow::ensure!(self.framerate > 0, "framerate 必须为正数");
        anyhow::ensure!(self.queue_capacity > 0, "queue_capacity 必须为正数");
        anyhow::ensure!(
            self.inference_scale > 0.0 && self.inference_scale <= 1.0,
            "inference_scale 必须在 (0, 1] 之间"
        );
        anyhow::ensure!(
            self.hit_growth > 0.0 && self.hit_decay >= 0.0,
            "hit_growth 必须为正数, hit_decay 不能为负"
        );
        anyhow::ensure!(self.start_hour <= 24 && self.end_hour <= 24, "小时必须在 0-24 之间");
        Ok(())
    }

    /// 命中阈值(帧) = floor(hit_thresh_secs / interval_secs), 至少为1
    pub fn hit_thresh_frames(&self) -> u32 {
        secs_to_frames(self.hit_thresh_secs, self.interval_secs)
    }

    /// 观察窗口(帧) = floor(window_secs / interval_secs), 至少为1
    pub fn window_frames(&self) -> usize {
        secs_to_frames(self.window_secs, self.interval_secs) as usize
    }

    pub fn interval_ms(&self) -> u64 {
        (self.interval_secs * 1000.0).round() as u64
    }

    pub fn put_backoff(&self) -> Duration {
        Duration::from_millis(self.put_backoff_ms)
    }

    /// 录像切分时长, None 表示不切分
    pub fn max_archive_len(&self) -> Option<Duration> {
        if self.max_archive_hours > 0.0 {
            Some(Duration::from_secs_f64(self.max_archive_hours * 3600.0))
        } else {
            None
        }
    }

    /// 事件剪辑帧率 (每个推理间隔一帧)
    pub fn clip_fps(&self) -> f64 {
        1.0 / self.interval_secs
    }

    /// 给定小时是否处于日间监控时段
    pub fn is_active_hour(&self, hour: u32) -> bool {
        self.start_hour <= hour && hour < self.end_hour
    }
}

/// 以毫秒整数相除, 避免 0.3 / 0.1 这类浮点商落在整数之下
fn secs_to_frames(secs: f64, interval_secs: f64) -> u32 {
    let secs_ms = (secs * 1000.0).round() as u64;
    let interval_ms = ((interval_secs * 1000.0).round() as u64).max(1);
    ((secs_ms / interval_ms) as u32).max(1)
}

/// 输出目录 (由外部提供, 核心只负责写入)
#[derive(Clone, Debug)]
pub struct Paths {
    pub video_dir: PathBuf, // 连续录像
    pub clip_dir: PathBuf,  // 事件剪辑
    pub image_dir: PathBuf, // 剪辑中间帧
    pub label_dir: PathBuf, // 标注样本
}

impl Paths {
    /// 以同一根目录创建全部子目录
    pub fn under(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            video_dir: root.join("Videos"),
            clip_dir: root.join("Clips"),
            image_dir: root.join("Images"),
            label_dir: root.join("Labels"),
        }
    }

    pub fn create_all(&self) -> Result<()> {
        for dir in [&self.video_dir, &self.clip_dir, &self.image_dir, &self.label_dir] {
            fs::create_dir_all(dir)
                .with_context(|| format!("创建目录失败: {}", dir.display()))?;
        }
        Ok(())
    }
}
