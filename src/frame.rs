//! 帧队列元素 (Collector → Detector)

use image::RgbImage;

/// 采集帧: 采集时间戳(毫秒, 单调递增) + 固定分辨率图像
#[derive(Clone, Debug)]
pub struct CapturedFrame {
    pub capture_time: u64,
    pub image: RgbImage,
}

impl CapturedFrame {
    pub fn new(capture_time: u64, image: RgbImage) -> Self {
        Self {
            capture_time,
            image,
        }
    }
}

/// 帧队列元素
///
/// 哨兵值与数据帧共用同一枚举, 队列中不存在非法状态
#[derive(Clone, Debug)]
pub enum FrameItem {
    /// 真实帧, 推送成功后所有权转移给 Detector
    Frame(CapturedFrame),
    /// 测试用: 下一次检测强制触发事件
    MockHit,
    /// 有限源即将耗尽
    EndWarning,
    /// 生产者结束, 消费者应停止
    End,
}

impl FrameItem {
    pub fn name(&self) -> &'static str {
        match self {
            FrameItem::Frame(_) => "FRAME",
            FrameItem::MockHit => "MOCK_HIT",
            FrameItem::EndWarning => "END_WARNING",
            FrameItem::End => "END",
        }
    }
}
