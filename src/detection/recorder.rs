//! 标注样本采集 (Label sample recorder)
//!
//! 后台线程写盘, 检测热路径只做一次非阻塞推送; 队列满时直接丢弃样本.
//! 每个样本写出 `<capture_time>.jpg` 与 `<capture_time>.json`.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result};
use image::{ImageFormat, RgbImage};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::types::Detection;
use crate::worker::queue::{self, PutPolicy, QueueReceiver, QueueSender};

const QUEUE_CAPACITY: usize = 4;

struct Sample {
    capture_time: u64,
    image: RgbImage,
    detections: Vec<Detection>,
}

#[derive(Serialize)]
struct LabelFile<'a> {
    capture_time: u64,
    width: u32,
    height: u32,
    detections: &'a [Detection],
}

pub struct LabelRecorder {
    tx: Option<QueueSender<Sample>>,
    thread: Option<JoinHandle<usize>>,
    interval_ms: u64,
    active_interval_ms: u64,
    last_record: Option<u64>,
}

impl LabelRecorder {
    /// 启动写盘线程
    ///
    /// interval: 无目标时的采样间隔; active_interval: 画面中有目标时的采样间隔
    pub fn spawn(dir: impl Into<PathBuf>, interval: Duration, active_interval: Duration) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).with_context(|| format!("创建标注目录失败: {}", dir.display()))?;

        let (tx, rx) = queue::bounded(QUEUE_CAPACITY);
        let thread = std::thread::Builder::new()
            .name(String::from("label-recorder"))
            .spawn(move || write_loop(&dir, rx))
            .context("启动标注线程失败")?;

        Ok(Self {
            tx: Some(tx),
            thread: Some(thread),
            interval_ms: interval.as_millis() as u64,
            active_interval_ms: active_interval.as_millis() as u64,
            last_record: None,
        })
    }

    /// 采样到期时提交一帧, 返回是否已提交
    ///
    /// 从不阻塞: 写盘线程忙时样本被丢弃
    pub fn offer(&mut self, capture_time: u64, image: &RgbImage, detections: &[Detection], subjects_present: bool) -> bool {
        let interval = if subjects_present {
            self.active_interval_ms
        } else {
            self.interval_ms
        };
        let due = self
            .last_record
            .map_or(true, |last| capture_time.saturating_sub(last) >= interval);
        if !due {
            return false;
        }
        let Some(tx) = &self.tx else {
            return false;
        };

        let sample = Sample {
            capture_time,
            image: image.clone(),
            detections: detections.to_vec(),
        };
        match tx.safe_put(sample, PutPolicy::Drop) {
            Ok(()) => {
                self.last_record = Some(capture_time);
                true
            }
            Err(e) => {
                debug!("标注样本已丢弃: {}", e);
                false
            }
        }
    }

    /// 关闭队列并等待写盘完成, 返回已写出的样本数
    pub fn finish(&mut self) -> usize {
        self.tx.take();
        match self.thread.take().map(|t| t.join()) {
            Some(Ok(written)) => {
                info!("📝 标注样本写出 {} 个", written);
                written
            }
            Some(Err(_)) => {
                warn!("⚠️ 标注线程异常退出");
                0
            }
            None => 0,
        }
    }
}

impl Drop for LabelRecorder {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.finish();
        }
    }
}

fn write_loop(dir: &Path, rx: QueueReceiver<Sample>) -> usize {
    let mut written = 0;
    loop {
        match rx.pop_timeout(Duration::from_millis(500)) {
            Ok(Some(sample)) => match write_sample(dir, &sample) {
                Ok(()) => written += 1,
                Err(e) => warn!("⚠️ 标注样本写入失败: {:#}", e),
            },
            Ok(None) => continue,
            Err(_) => break,
        }
    }
    written
}

fn write_sample(dir: &Path, sample: &Sample) -> Result<()> {
    let img_path = dir.join(format!("{}.jpg", sample.capture_time));
    sample
        .image
        .save_with_format(&img_path, ImageFormat::Jpeg)
        .with_context(|| format!("保存图像失败: {}", img_path.display()))?;

    let json_path = dir.join(format!("{}.json", sample.capture_time));
    let label = LabelFile {
        capture_time: sample.capture_time,
        width: sample.image.width(),
        height: sample.image.height(),
        detections: &sample.detections,
    };
    let file = File::create(&json_path).with_context(|| format!("创建标注文件失败: {}", json_path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), &label)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::types::BBox;

    #[test]
    fn test_rate_limits_and_writes_pairs() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder =
            LabelRecorder::spawn(dir.path(), Duration::from_secs(10), Duration::from_secs(2)).unwrap();
        let img = RgbImage::new(8, 8);
        let dets = vec![Detection::new("fish", 0.8, BBox::new(1.0, 1.0, 3.0, 3.0))];

        assert!(recorder.offer(0, &img, &[], false));
        assert!(!recorder.offer(5_000, &img, &[], false));
        // 有目标时采样更频繁
        assert!(recorder.offer(5_000, &img, &dets, true));
        assert!(!recorder.offer(6_000, &img, &dets, true));
        assert_eq!(recorder.finish(), 2);

        assert!(dir.path().join("0.jpg").exists());
        let json = std::fs::read_to_string(dir.path().join("5000.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["detections"][0]["label"], "fish");
        assert_eq!(value["width"], 8);
    }

    #[test]
    fn test_offer_after_finish_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = LabelRecorder::spawn(dir.path(), Duration::ZERO, Duration::ZERO).unwrap();
        recorder.finish();
        assert!(!recorder.offer(0, &RgbImage::new(2, 2), &[], false));
        assert_eq!(recorder.finish(), 0);
    }
}
