//! 命中累加器
//!
//! 泄漏累加: 命中帧加 growth_rate, 其他帧减 decay_rate, 下限为 0.
//! 零散误检会衰减掉, 持续命中才会越过阈值.

#[derive(Debug, Clone, PartialEq)]
pub struct HitCounter {
    hits: f32,
    growth_rate: f32,
    decay_rate: f32,
}

impl Default for HitCounter {
    fn default() -> Self {
        Self::new(1.0, 0.5)
    }
}

impl HitCounter {
    pub fn new(growth_rate: f32, decay_rate: f32) -> Self {
        Self {
            hits: 0.0,
            growth_rate: growth_rate.max(0.0),
            decay_rate: decay_rate.max(0.0),
        }
    }

    pub fn hits(&self) -> f32 {
        self.hits
    }

    pub fn increment(&mut self) {
        self.hits += self.growth_rate;
    }

    pub fn decrement(&mut self) {
        self.hits = (self.hits - self.decay_rate).max(0.0);
    }

    /// 命中帧 increment, 否则 decrement
    pub fn update(&mut self, hit: bool) {
        if hit {
            self.increment();
        } else {
            self.decrement();
        }
    }

    pub fn reset(&mut self) {
        self.hits = 0.0;
    }

    pub fn reached(&self, threshold: u32) -> bool {
        self.hits >= threshold as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_never_negative() {
        let mut counter = HitCounter::default();
        let pattern = [false, true, false, false, false, true, true, false, false, false, false];
        for hit in pattern {
            counter.update(hit);
            assert!(counter.hits() >= 0.0);
        }
        assert_eq!(counter.hits(), 0.0);
    }

    #[test]
    fn test_sustained_hits_reach_threshold() {
        let mut counter = HitCounter::default();
        // 命中/非命中交替: 每两帧净增 0.5
        for _ in 0..5 {
            counter.update(true);
            counter.update(false);
        }
        assert_eq!(counter.hits(), 2.5);
        assert!(!counter.reached(3));
        counter.update(true);
        assert!(counter.reached(3));

        counter.reset();
        assert_eq!(counter.hits(), 0.0);
    }

    #[test]
    fn test_isolated_false_positive_decays() {
        let mut counter = HitCounter::new(1.0, 0.5);
        counter.increment();
        counter.decrement();
        counter.decrement();
        assert_eq!(counter.hits(), 0.0);
    }
}
