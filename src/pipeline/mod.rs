/// 监控流水线 (Monitoring pipeline)
///
/// 两个工作线程, 通过有界帧队列通信:
/// - Collector: 帧源读取 + 连续录像 + 节流抽帧 (定时线程)
/// - Detector:  区域锁定 + 目标检测 + 命中累积 + 事件剪辑 (队列线程)
///
/// Manager 负责启停与监督, 控制消息经 EventSink 上报.
pub mod collector;
pub mod detector;
pub mod manager;
pub mod sink;

pub use collector::{Collector, COLLECTOR};
pub use detector::{Detector, DetectorPhase, DETECTOR, SPAWNING_EVENT};
pub use manager::{ExitReason, Manager, MANAGER};
pub use sink::{CollectSink, EventSink, FanoutSink, LogSink, TcpJsonSink};
