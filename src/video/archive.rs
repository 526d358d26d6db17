//! 连续录像归档
//!
//! 累计时长 (帧数 / 帧率) 超过上限后关闭当前文件, 下一帧写入新文件.
//! 切分对下游透明, 文件始终只由 Collector 独占.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use image::RgbImage;
use tracing::info;

use super::{FrameWriter, MjpegWriter};

pub struct Archive {
    dir: PathBuf,
    prefix: String,
    framerate: f64,
    max_len: Option<Duration>,
    writer: Option<MjpegWriter>,
    segment: usize,
    finished: Vec<PathBuf>,
}

impl Archive {
    pub fn new(dir: impl AsRef<Path>, prefix: impl Into<String>, framerate: f64, max_len: Option<Duration>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            prefix: prefix.into(),
            framerate: if framerate > 0.0 { framerate } else { 30.0 },
            max_len,
            writer: None,
            segment: 0,
            finished: Vec::new(),
        }
    }

    fn open_segment(&mut self) -> Result<()> {
        let name = format!(
            "{}_{}_{:03}.mjpeg",
            self.prefix,
            chrono::Local::now().format("%Y%m%dT%H%M%S"),
            self.segment
        );
        let path = self.dir.join(name);
        info!("🎬 新录像文件: {}", path.display());
        self.segment += 1;
        self.writer = Some(MjpegWriter::create(path)?);
        Ok(())
    }

    pub fn write(&mut self, frame: &RgbImage) -> Result<()> {
        if self.writer.is_none() {
            self.open_segment()?;
        }
        let Some(writer) = self.writer.as_mut() else {
            anyhow::bail!("录像文件未打开");
        };
        writer.write(frame)?;
        let duration = writer.frames() as f64 / self.framerate;
        if self.max_len.is_some_and(|max| duration >= max.as_secs_f64()) {
            self.split()?;
        }
        Ok(())
    }

    /// 关闭当前文件, 下一帧写入新文件
    pub fn split(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            let path = writer.finish()?;
            info!("💾 录像文件已关闭: {} ({} 帧)", path.display(), writer.frames());
            self.finished.push(path);
        }
        Ok(())
    }

    /// 关闭并返回全部已完成的录像文件
    pub fn finish(&mut self) -> Result<Vec<PathBuf>> {
        self.split()?;
        Ok(std::mem::take(&mut self.finished))
    }

    pub fn segments(&self) -> usize {
        self.segment
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_splits_when_segment_full() {
        let dir = tempfile::tempdir().unwrap();
        // 10fps, 每段 0.5 秒 = 5 帧
        let mut archive = Archive::new(dir.path(), "tank", 10.0, Some(Duration::from_millis(500)));
        for _ in 0..12 {
            archive.write(&RgbImage::new(4, 4)).unwrap();
        }
        let files = archive.finish().unwrap();
        assert_eq!(files.len(), 3);
        assert_eq!(archive.segments(), 3);
        for f in &files {
            assert!(f.exists());
        }
    }

    #[test]
    fn test_unbounded_archive_keeps_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut archive = Archive::new(dir.path(), "tank", 30.0, None);
        for _ in 0..100 {
            archive.write(&RgbImage::new(2, 2)).unwrap();
        }
        assert_eq!(archive.finish().unwrap().len(), 1);
    }
}
