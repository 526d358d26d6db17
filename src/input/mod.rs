/// 帧源 (Frame sources)
///
/// Collector 只依赖 [`FrameSource`] trait, 摄像头与视频文件可互换.
/// - GifSource:    动画 GIF 文件 (合成测试片段、演示)
/// - MemorySource: 内存帧序列
/// - FfmpegSource: 摄像头 / 任意视频文件 (feature `ffmpeg`)
pub mod gif;
pub mod memory;

#[cfg(feature = "ffmpeg")]
pub mod decode_filter;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;

use std::sync::Arc;

use image::RgbImage;

use crate::error::WorkerError;

pub use gif::GifSource;
pub use memory::MemorySource;

#[cfg(feature = "ffmpeg")]
pub use ffmpeg::FfmpegSource;

/// 统一帧源接口
pub trait FrameSource: Send {
    /// 读取下一帧
    ///
    /// - `Ok(Some)`: 一帧图像
    /// - `Ok(None)`: 有限源已耗尽
    /// - `Err(Transient)`: 本次读取失败, 跳过
    /// - `Err(Resource)`: 源不可用, 触发关闭
    fn read(&mut self) -> Result<Option<RgbImage>, WorkerError>;

    /// 源帧率
    fn framerate(&self) -> f64;

    /// 文件源为有限源, 摄像头为无限源
    fn is_finite(&self) -> bool;

    fn describe(&self) -> String;
}

/// 帧源构造器, 在 Collector startup 阶段调用
pub type SourceFactory = Arc<dyn Fn() -> Result<Box<dyn FrameSource>, WorkerError> + Send + Sync>;

/// 包装一个具体构造器
pub fn factory<F, S>(open: F) -> SourceFactory
where
    F: Fn() -> Result<S, WorkerError> + Send + Sync + 'static,
    S: FrameSource + 'static,
{
    Arc::new(move || open().map(|s| Box::new(s) as Box<dyn FrameSource>))
}
