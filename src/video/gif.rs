//! 事件剪辑 GIF 写入

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use image::codecs::gif::{GifEncoder, Repeat};
use image::{Delay, DynamicImage, Frame, RgbImage};

use super::FrameWriter;

/// NeuQuant 量化速度 (1 最慢最好, 30 最快)
const QUANT_SPEED: i32 = 10;

pub struct GifClipWriter {
    path: PathBuf,
    encoder: Option<GifEncoder<BufWriter<File>>>,
    delay: Delay,
    frames: usize,
}

impl GifClipWriter {
    /// fps: 播放帧率, 事件剪辑为每个推理间隔一帧
    pub fn create(path: impl AsRef<Path>, fps: f64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).with_context(|| format!("创建剪辑文件失败: {}", path.display()))?;
        let mut encoder = GifEncoder::new_with_speed(BufWriter::new(file), QUANT_SPEED);
        encoder.set_repeat(Repeat::Infinite)?;

        let frame_secs = if fps > 0.0 { 1.0 / fps } else { 1.0 };
        Ok(Self {
            path,
            encoder: Some(encoder),
            delay: Delay::from_saturating_duration(Duration::from_secs_f64(frame_secs)),
            frames: 0,
        })
    }
}

impl FrameWriter for GifClipWriter {
    fn write(&mut self, frame: &RgbImage) -> Result<()> {
        let Some(encoder) = self.encoder.as_mut() else {
            bail!("剪辑文件已关闭: {}", self.path.display());
        };
        let rgba = DynamicImage::ImageRgb8(frame.clone()).to_rgba8();
        encoder.encode_frame(Frame::from_parts(rgba, 0, 0, self.delay))?;
        self.frames += 1;
        Ok(())
    }

    fn frames(&self) -> usize {
        self.frames
    }

    fn finish(&mut self) -> Result<PathBuf> {
        // 编码器在 drop 时写入 GIF 结尾
        self.encoder.take();
        Ok(self.path.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::gif::GifDecoder;
    use image::AnimationDecoder;

    #[test]
    fn test_clip_frame_count_and_delay() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1_event.gif");
        let mut writer = GifClipWriter::create(&path, 1.0).unwrap();
        for _ in 0..5 {
            writer.write(&RgbImage::new(12, 8)).unwrap();
        }
        assert_eq!(writer.finish().unwrap(), path);

        let file = std::io::BufReader::new(File::open(&path).unwrap());
        let frames = GifDecoder::new(file).unwrap().into_frames().collect_frames().unwrap();
        assert_eq!(frames.len(), 5);
        assert_eq!(frames[0].delay().numer_denom_ms(), (1000, 1));
    }
}
