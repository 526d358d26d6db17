//! 参考区域锁定 (Region lock / pipe lock)
//!
//! 目标必须聚集在参考结构附近才算命中. 区域由 locator 推理得到并缓存,
//! 下列情况重新定位:
//! - 从未锁定
//! - 距上次定位已满 refresh_every 帧
//! - 上次定位与前一区域 IOU 低于阈值 (区域不稳定), 或定位失败

use super::types::{BBox, Detection};

/// 已锁定的参考区域
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceRegion {
    pub bbox: BBox,
    pub confidence: f32,
    pub center: (f32, f32),
    pub radius: f32,
}

impl ReferenceRegion {
    /// 有效半径 = 0.5 * max(w, h) * radius_scale
    pub fn from_detection(det: &Detection, radius_scale: f32) -> Self {
        let bbox = det.bbox;
        Self {
            bbox,
            confidence: det.confidence,
            center: bbox.center(),
            radius: 0.5 * bbox.width().max(bbox.height()) * radius_scale,
        }
    }

    /// 目标中心是否落在有效半径内
    pub fn contains_center(&self, bbox: &BBox) -> bool {
        let (cx, cy) = bbox.center();
        let dx = cx - self.center.0;
        let dy = cy - self.center.1;
        (dx * dx + dy * dy).sqrt() <= self.radius
    }
}

/// 一次定位的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocateOutcome {
    /// 锁定且与前一区域一致 (或首次锁定)
    Locked,
    /// 锁定, 但与前一区域 IOU 低于阈值, 下一帧需重新定位
    Unstable,
    /// 未找到区域
    Failed,
}

#[derive(Debug, Clone)]
pub struct RegionLock {
    region: Option<ReferenceRegion>,
    frames_since_locate: u32,
    refresh_every: u32,
    iou_thresh: f32,
    radius_scale: f32,
    stale: bool,
}

impl RegionLock {
    pub fn new(refresh_every: u32, iou_thresh: f32, radius_scale: f32) -> Self {
        Self {
            region: None,
            frames_since_locate: 0,
            refresh_every: refresh_every.max(1),
            iou_thresh,
            radius_scale,
            stale: false,
        }
    }

    pub fn region(&self) -> Option<&ReferenceRegion> {
        self.region.as_ref()
    }

    pub fn is_locked(&self) -> bool {
        self.region.is_some()
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn needs_refresh(&self) -> bool {
        self.region.is_none() || self.stale || self.frames_since_locate >= self.refresh_every
    }

    /// 每处理一帧调用一次
    pub fn advance(&mut self) {
        self.frames_since_locate = self.frames_since_locate.saturating_add(1);
    }

    /// 记录定位结果
    pub fn update(&mut self, found: Option<&Detection>) -> LocateOutcome {
        self.frames_since_locate = 0;
        let Some(det) = found else {
            // 保留旧区域, 但标记为待刷新
            self.stale = self.region.is_some();
            return LocateOutcome::Failed;
        };

        let next = ReferenceRegion::from_detection(det, self.radius_scale);
        let outcome = match &self.region {
            Some(prev) if prev.bbox.iou(&next.bbox) < self.iou_thresh => LocateOutcome::Unstable,
            _ => LocateOutcome::Locked,
        };
        self.stale = outcome == LocateOutcome::Unstable;
        self.region = Some(next);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipe(x: f32, y: f32, size: f32) -> Detection {
        Detection::new("pipe", 0.9, BBox::new(x, y, size, size))
    }

    #[test]
    fn test_gated_until_first_lock() {
        let mut lock = RegionLock::new(100, 0.95, 1.0);
        assert!(lock.needs_refresh());
        assert_eq!(lock.update(None), LocateOutcome::Failed);
        assert!(!lock.is_locked());
        assert!(lock.needs_refresh());

        assert_eq!(lock.update(Some(&pipe(10.0, 10.0, 20.0))), LocateOutcome::Locked);
        assert!(!lock.needs_refresh());
    }

    #[test]
    fn test_unstable_region_forces_relocate() {
        let mut lock = RegionLock::new(100, 0.95, 1.0);
        lock.update(Some(&pipe(10.0, 10.0, 20.0)));
        lock.advance();
        assert!(!lock.needs_refresh());

        assert_eq!(lock.update(Some(&pipe(15.0, 10.0, 20.0))), LocateOutcome::Unstable);
        lock.advance();
        assert!(lock.needs_refresh());

        assert_eq!(lock.update(Some(&pipe(15.0, 10.0, 20.0))), LocateOutcome::Locked);
        assert!(!lock.needs_refresh());
    }

    #[test]
    fn test_periodic_refresh() {
        let mut lock = RegionLock::new(3, 0.95, 1.0);
        lock.update(Some(&pipe(0.0, 0.0, 10.0)));
        for _ in 0..2 {
            lock.advance();
            assert!(!lock.needs_refresh());
        }
        lock.advance();
        assert!(lock.needs_refresh());
    }

    #[test]
    fn test_failed_locate_keeps_region_and_marks_stale() {
        let mut lock = RegionLock::new(100, 0.95, 1.0);
        lock.update(Some(&pipe(0.0, 0.0, 10.0)));
        assert_eq!(lock.update(None), LocateOutcome::Failed);
        assert!(lock.is_locked());
        assert!(lock.is_stale());
        assert!(lock.needs_refresh());
    }

    #[test]
    fn test_contains_center_uses_radius() {
        let region = ReferenceRegion::from_detection(&pipe(0.0, 0.0, 20.0), 1.0);
        assert_eq!(region.center, (10.0, 10.0));
        assert_eq!(region.radius, 10.0);
        assert!(region.contains_center(&BBox::new(12.0, 12.0, 4.0, 4.0)));
        assert!(!region.contains_center(&BBox::new(20.0, 20.0, 4.0, 4.0)));
    }
}
