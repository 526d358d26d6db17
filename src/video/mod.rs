/// 视频写入 (Video writers)
///
/// - MjpegWriter:   连续录像, JPEG 帧首尾相接 (`.mjpeg`)
/// - GifClipWriter: 事件剪辑, 动画 GIF
/// - Archive:       录像归档, 超过最大时长自动切分
pub mod archive;
pub mod gif;
pub mod mjpeg;

use std::path::PathBuf;

use anyhow::Result;
use image::RgbImage;

pub use archive::Archive;
pub use gif::GifClipWriter;
pub use mjpeg::MjpegWriter;

/// 逐帧写入接口
pub trait FrameWriter: Send {
    fn write(&mut self, frame: &RgbImage) -> Result<()>;

    /// 已写入帧数
    fn frames(&self) -> usize;

    /// 刷新并关闭文件; 之后的写入返回错误
    fn finish(&mut self) -> Result<PathBuf>;
}
