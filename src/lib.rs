// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 鱼类产卵行为监控 (Fish spawning monitor)
//!
//! 两个独立工作线程 + 一个监督线程:
//! - Collector: 视频采集 → 连续录像归档 + 节流抽帧
//! - Detector:  两阶段检测 (参考区域定位 → 目标检测) + 命中累积状态机
//! - Manager:   启停工作线程, 按日间时段自动重启
//!
//! 数据流: Collector → FrameQueue → Detector → ControlMessage(NOTIFY) → EventSink
pub mod config; // 配置参数
pub mod detection; // 检测状态机组件
pub mod error; // 错误分类
pub mod frame; // 帧队列元素
pub mod input; // 帧源
pub mod models; // 推理模型接口
pub mod pipeline; // 采集/检测/管理
pub mod video; // 录像与事件剪辑写入
pub mod worker; // 工作线程框架

pub use crate::config::{Config, Paths};
pub use crate::detection::{BBox, Detection};
pub use crate::error::WorkerError;
pub use crate::frame::{CapturedFrame, FrameItem};
pub use crate::models::{Model, ModelFactory};
pub use crate::worker::message::{ControlMessage, MessageKind, Payload};

/// 当前本地时间 (ISO格式, 精确到秒)
pub fn current_time_iso() -> String {
    chrono::Local::now()
        .format("%Y-%m-%dT%H:%M:%S")
        .to_string()
}

/// 自 UNIX 纪元以来的毫秒数
pub fn current_time_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
