//! 动画 GIF 文件源

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, RecvError};
use image::codecs::gif::GifDecoder;
use image::{AnimationDecoder, DynamicImage, Frame, ImageResult, RgbImage};
use tracing::{debug, info, warn};

use super::FrameSource;
use crate::error::WorkerError;

/// 解码线程与读取端之间的缓冲帧数
const DECODE_BUFFER: usize = 4;
/// 连续解码失败次数上限, 超过后视为文件已损坏
const MAX_DECODE_ERRORS: u32 = 10;

/// GIF 文件源
///
/// 解码在独立线程进行, 通过有界通道交付 (阻塞发送, 天然背压)
pub struct GifSource {
    path: PathBuf,
    rx: Option<Receiver<ImageResult<Frame>>>,
    pending: Option<Frame>,
    framerate: f64,
    decode_errors: u32,
    thread: Option<JoinHandle<()>>,
}

impl GifSource {
    /// 打开 GIF; 帧率取自首帧延时, 无延时信息时使用 fallback_fps
    pub fn open(path: impl AsRef<Path>, fallback_fps: f64) -> Result<Self, WorkerError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)
            .map_err(|e| WorkerError::resource(format!("打开文件失败 {}: {}", path.display(), e)))?;
        let decoder = GifDecoder::new(BufReader::new(file))
            .map_err(|e| WorkerError::resource(format!("GIF 解码器创建失败 {}: {}", path.display(), e)))?;

        let (tx, rx) = crossbeam_channel::bounded(DECODE_BUFFER);
        let thread = std::thread::Builder::new()
            .name(String::from("gif-decode"))
            .spawn(move || {
                for frame in decoder.into_frames() {
                    if tx.send(frame).is_err() {
                        break;
                    }
                }
                debug!("GIF 解码线程退出");
            })
            .map_err(|e| WorkerError::resource(format!("启动解码线程失败: {}", e)))?;

        let pending = match rx.recv() {
            Ok(Ok(frame)) => Some(frame),
            Ok(Err(e)) => return Err(WorkerError::resource(format!("GIF 首帧解码失败: {}", e))),
            Err(RecvError) => None,
        };
        let framerate = pending
            .as_ref()
            .and_then(|f| {
                let (numer, denom) = f.delay().numer_denom_ms();
                (numer > 0).then(|| 1000.0 * denom as f64 / numer as f64)
            })
            .unwrap_or(fallback_fps);

        info!("📂 打开 GIF: {} ({:.1}fps)", path.display(), framerate);
        Ok(Self {
            path,
            rx: Some(rx),
            pending,
            framerate,
            decode_errors: 0,
            thread: Some(thread),
        })
    }
}

fn to_rgb(frame: Frame) -> RgbImage {
    DynamicImage::ImageRgba8(frame.into_buffer()).to_rgb8()
}

impl FrameSource for GifSource {
    fn read(&mut self) -> Result<Option<RgbImage>, WorkerError> {
        if let Some(frame) = self.pending.take() {
            return Ok(Some(to_rgb(frame)));
        }
        let Some(rx) = &self.rx else {
            return Ok(None);
        };
        match rx.recv() {
            Ok(Ok(frame)) => {
                self.decode_errors = 0;
                Ok(Some(to_rgb(frame)))
            }
            Ok(Err(e)) => {
                self.decode_errors += 1;
                if self.decode_errors >= MAX_DECODE_ERRORS {
                    warn!("⚠️ GIF 连续解码失败 {} 次, 视为结束: {}", self.decode_errors, self.path.display());
                    self.rx = None;
                    return Ok(None);
                }
                Err(WorkerError::transient(format!("GIF 帧解码失败: {}", e)))
            }
            Err(RecvError) => Ok(None),
        }
    }

    fn framerate(&self) -> f64 {
        self.framerate
    }

    fn is_finite(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        format!("gif {}", self.path.display())
    }
}

impl Drop for GifSource {
    fn drop(&mut self) {
        // 先关闭接收端, 解码线程的发送随即失败并退出
        self.rx.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::{FrameWriter, GifClipWriter};
    use image::Rgb;

    #[test]
    fn test_reads_frames_written_by_clip_writer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.gif");
        let mut writer = GifClipWriter::create(&path, 10.0).unwrap();
        for shade in [0u8, 100, 200] {
            writer.write(&RgbImage::from_pixel(8, 6, Rgb([shade, shade, shade]))).unwrap();
        }
        writer.finish().unwrap();

        let mut source = GifSource::open(&path, 30.0).unwrap();
        assert!((source.framerate() - 10.0).abs() < 1e-6);
        let mut count = 0;
        while let Some(frame) = source.read().unwrap() {
            assert_eq!(frame.dimensions(), (8, 6));
            count += 1;
        }
        assert_eq!(count, 3);
        assert!(source.is_finite());
    }

    #[test]
    fn test_missing_file_is_resource_error() {
        let err = GifSource::open("/nonexistent/clip.gif", 30.0).err().unwrap();
        assert!(err.is_fatal());
    }
}
