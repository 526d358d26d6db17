//! 观察窗口缓冲 (最近 N 帧及其检测结果)

use std::collections::VecDeque;

use image::RgbImage;

use super::types::{BBox, Detection};

/// 检测到的目标及其是否落在参考区域内
#[derive(Debug, Clone, PartialEq)]
pub struct Subject {
    pub detection: Detection,
    pub qualifying: bool,
}

/// 缓冲中的一帧
#[derive(Debug, Clone)]
pub struct BufferedFrame {
    pub capture_time: u64,
    pub image: RgbImage,
    pub region: Option<BBox>,
    pub subjects: Vec<Subject>,
}

impl BufferedFrame {
    pub fn qualifying_count(&self) -> usize {
        self.subjects.iter().filter(|s| s.qualifying).count()
    }
}

/// 固定容量环形缓冲, 溢出时淘汰最旧的帧
#[derive(Debug)]
pub struct DetectionBuffer {
    frames: VecDeque<BufferedFrame>,
    capacity: usize,
}

impl DetectionBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// 追加一帧, 返回被淘汰的帧
    pub fn push(&mut self, frame: BufferedFrame) -> Option<BufferedFrame> {
        let evicted = if self.frames.len() >= self.capacity {
            self.frames.pop_front()
        } else {
            None
        };
        self.frames.push_back(frame);
        evicted
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.frames.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &BufferedFrame> {
        self.frames.iter()
    }

    /// 取出全部帧 (按采集时间排序) 并清空缓冲
    pub fn drain(&mut self) -> Vec<BufferedFrame> {
        let mut frames: Vec<BufferedFrame> = self.frames.drain(..).collect();
        frames.sort_by_key(|f| f.capture_time);
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(t: u64) -> BufferedFrame {
        BufferedFrame {
            capture_time: t,
            image: RgbImage::new(2, 2),
            region: None,
            subjects: Vec::new(),
        }
    }

    #[test]
    fn test_evicts_oldest() {
        let mut buffer = DetectionBuffer::new(3);
        for t in 0..3 {
            assert!(buffer.push(frame(t)).is_none());
        }
        assert!(buffer.is_full());
        let evicted = buffer.push(frame(3)).unwrap();
        assert_eq!(evicted.capture_time, 0);
        assert_eq!(buffer.len(), 3);

        let times: Vec<u64> = buffer.iter().map(|f| f.capture_time).collect();
        assert_eq!(times, vec![1, 2, 3]);
    }

    #[test]
    fn test_drain_orders_and_empties() {
        let mut buffer = DetectionBuffer::new(4);
        for t in [5, 3, 9] {
            buffer.push(frame(t));
        }
        let times: Vec<u64> = buffer.drain().iter().map(|f| f.capture_time).collect();
        assert_eq!(times, vec![3, 5, 9]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_never_exceeds_capacity() {
        let mut buffer = DetectionBuffer::new(5);
        for t in 0..50 {
            buffer.push(frame(t));
            assert!(buffer.len() <= 5);
        }
    }
}
