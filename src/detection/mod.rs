/// 事件检测状态机组件 (Event detection building blocks)
///
/// - types:       检测框 / 检测结果 / NMS
/// - hit_counter: 泄漏命中累加器
/// - region:      参考区域锁定与刷新
/// - buffer:      观察窗口环形缓冲
/// - overlay:     检测框叠加
/// - recorder:    标注样本后台写盘
pub mod buffer;
pub mod hit_counter;
pub mod overlay;
pub mod recorder;
pub mod region;
pub mod types;

pub use buffer::{BufferedFrame, DetectionBuffer, Subject};
pub use hit_counter::HitCounter;
pub use recorder::LabelRecorder;
pub use region::{LocateOutcome, ReferenceRegion, RegionLock};
pub use types::{non_max_suppression, BBox, Detection};
