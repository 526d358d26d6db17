//! Motion-JPEG 录像写入

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;

use super::FrameWriter;

const DEFAULT_QUALITY: u8 = 80;

pub struct MjpegWriter {
    path: PathBuf,
    out: Option<BufWriter<File>>,
    quality: u8,
    frames: usize,
}

impl MjpegWriter {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_quality(path, DEFAULT_QUALITY)
    }

    pub fn with_quality(path: impl AsRef<Path>, quality: u8) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).with_context(|| format!("创建录像文件失败: {}", path.display()))?;
        Ok(Self {
            path,
            out: Some(BufWriter::new(file)),
            quality: quality.clamp(1, 100),
            frames: 0,
        })
    }
}

impl FrameWriter for MjpegWriter {
    fn write(&mut self, frame: &RgbImage) -> Result<()> {
        let Some(out) = self.out.as_mut() else {
            bail!("录像文件已关闭: {}", self.path.display());
        };
        JpegEncoder::new_with_quality(out, self.quality).encode_image(frame)?;
        self.frames += 1;
        Ok(())
    }

    fn frames(&self) -> usize {
        self.frames
    }

    fn finish(&mut self) -> Result<PathBuf> {
        if let Some(mut out) = self.out.take() {
            out.flush()?;
        }
        Ok(self.path.clone())
    }
}

impl Drop for MjpegWriter {
    fn drop(&mut self) {
        let _ = self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_are_concatenated_jpegs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.mjpeg");
        let mut writer = MjpegWriter::create(&path).unwrap();
        for _ in 0..3 {
            writer.write(&RgbImage::new(16, 16)).unwrap();
        }
        assert_eq!(writer.frames(), 3);
        writer.finish().unwrap();
        assert!(writer.write(&RgbImage::new(16, 16)).is_err());

        let bytes = std::fs::read(&path).unwrap();
        let soi = bytes.windows(2).filter(|w| *w == [0xFF, 0xD8]).count();
        assert!(soi >= 3);
        // 首帧可独立解码
        let first = image::load_from_memory_with_format(&bytes, image::ImageFormat::Jpeg).unwrap();
        assert_eq!(first.width(), 16);
    }
}
