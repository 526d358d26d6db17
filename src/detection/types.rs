//! 检测数据结构 (Detection data structures)

use serde::{Deserialize, Serialize};

/// 检测框, 左上角 + 宽高 (像素坐标)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BBox {
    xmin: f32,
    ymin: f32,
    width: f32,
    height: f32,
}

impl BBox {
    pub fn new(xmin: f32, ymin: f32, width: f32, height: f32) -> Self {
        Self {
            xmin,
            ymin,
            width: width.max(0.0),
            height: height.max(0.0),
        }
    }

    /// 由中心点与宽高构造 (YOLO 输出格式)
    pub fn from_cxcywh(cx: f32, cy: f32, width: f32, height: f32) -> Self {
        Self::new(cx - width / 2.0, cy - height / 2.0, width, height)
    }

    pub fn from_xyxy(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self::new(x1, y1, x2 - x1, y2 - y1)
    }

    pub fn xmin(&self) -> f32 {
        self.xmin
    }

    pub fn ymin(&self) -> f32 {
        self.ymin
    }

    pub fn xmax(&self) -> f32 {
        self.xmin + self.width
    }

    pub fn ymax(&self) -> f32 {
        self.ymin + self.height
    }

    pub fn width(&self) -> f32 {
        self.width
    }

    pub fn height(&self) -> f32 {
        self.height
    }

    pub fn center(&self) -> (f32, f32) {
        (self.xmin + self.width / 2.0, self.ymin + self.height / 2.0)
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    pub fn intersection_area(&self, another: &BBox) -> f32 {
        let l = self.xmin.max(another.xmin);
        let r = self.xmax().min(another.xmax());
        let t = self.ymin.max(another.ymin);
        let b = self.ymax().min(another.ymax());
        (r - l).max(0.0) * (b - t).max(0.0)
    }

    pub fn union_area(&self, another: &BBox) -> f32 {
        self.area() + another.area() - self.intersection_area(another)
    }

    pub fn iou(&self, another: &BBox) -> f32 {
        let union = self.union_area(another);
        if union <= 0.0 {
            return 0.0;
        }
        self.intersection_area(another) / union
    }

    /// 平移 (裁剪坐标 → 原图坐标)
    pub fn translate(&self, dx: f32, dy: f32) -> Self {
        Self::new(self.xmin + dx, self.ymin + dy, self.width, self.height)
    }

    /// 裁剪到图像范围内
    pub fn clamp(&self, img_w: f32, img_h: f32) -> Self {
        let x1 = self.xmin.clamp(0.0, img_w);
        let y1 = self.ymin.clamp(0.0, img_h);
        let x2 = self.xmax().clamp(0.0, img_w);
        let y2 = self.ymax().clamp(0.0, img_h);
        Self::from_xyxy(x1, y1, x2, y2)
    }
}

/// 模型输出的单个检测结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    pub bbox: BBox,
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f32, bbox: BBox) -> Self {
        Self {
            label: label.into(),
            confidence,
            bbox,
        }
    }
}

/// 非极大值抑制: 按置信度降序, 丢弃与已保留框 IOU 超过阈值的框
pub fn non_max_suppression(xs: &mut Vec<Detection>, iou_threshold: f32) {
    xs.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut current_index = 0;
    for index in 0..xs.len() {
        let mut drop = false;
        for prev_index in 0..current_index {
            if xs[prev_index].bbox.iou(&xs[index].bbox) > iou_threshold {
                drop = true;
                break;
            }
        }
        if !drop {
            xs.swap(current_index, index);
            current_index += 1;
        }
    }
    xs.truncate(current_index);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iou() {
        let a = BBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BBox::new(5.0, 0.0, 10.0, 10.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
        assert_eq!(a.iou(&BBox::new(20.0, 20.0, 5.0, 5.0)), 0.0);
        assert_eq!(BBox::default().iou(&BBox::default()), 0.0);
    }

    #[test]
    fn test_clamp_and_translate() {
        let b = BBox::new(-5.0, 90.0, 20.0, 20.0).clamp(100.0, 100.0);
        assert_eq!(b, BBox::new(0.0, 90.0, 15.0, 10.0));
        assert_eq!(b.translate(10.0, -10.0).center(), (17.5, 85.0));
    }

    #[test]
    fn test_nms_keeps_highest_confidence() {
        let mut dets = vec![
            Detection::new("fish", 0.6, BBox::new(0.0, 0.0, 10.0, 10.0)),
            Detection::new("fish", 0.9, BBox::new(1.0, 1.0, 10.0, 10.0)),
            Detection::new("fish", 0.7, BBox::new(50.0, 50.0, 10.0, 10.0)),
        ];
        non_max_suppression(&mut dets, 0.5);
        let confs: Vec<f32> = dets.iter().map(|d| d.confidence).collect();
        assert_eq!(confs, vec![0.9, 0.7]);
    }
}
