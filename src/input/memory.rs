//! 内存帧源

use std::collections::VecDeque;

use image::RgbImage;

use super::FrameSource;
use crate::error::WorkerError;

/// 按顺序吐出预先准备好的帧
pub struct MemorySource {
    frames: VecDeque<RgbImage>,
    framerate: f64,
    finite: bool,
}

impl MemorySource {
    pub fn new(frames: impl IntoIterator<Item = RgbImage>, framerate: f64) -> Self {
        Self {
            frames: frames.into_iter().collect(),
            framerate,
            finite: true,
        }
    }

    /// 模拟实时源: 帧耗尽后返回瞬时错误而不是结束
    pub fn live(frames: impl IntoIterator<Item = RgbImage>, framerate: f64) -> Self {
        Self {
            finite: false,
            ..Self::new(frames, framerate)
        }
    }
}

impl FrameSource for MemorySource {
    fn read(&mut self) -> Result<Option<RgbImage>, WorkerError> {
        match self.frames.pop_front() {
            Some(frame) => Ok(Some(frame)),
            None if self.finite => Ok(None),
            None => Err(WorkerError::transient("no frame available")),
        }
    }

    fn framerate(&self) -> f64 {
        self.framerate
    }

    fn is_finite(&self) -> bool {
        self.finite
    }

    fn describe(&self) -> String {
        format!("memory ({} frames @ {:.1}fps)", self.frames.len(), self.framerate)
    }
}
