pub const WINDOW_LEN: usize = 5;

#[derive(Debug, Clone, Default)]
pub struct TrendTracker {
    samples: [f32; WINDOW_LEN],
    len: usize,
}

impl TrendTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, sample: f32) {
        if self.len < WINDOW_LEN {
            self.samples[self.len] = sample;
            self.len += 1;
            return;
        }

        self.samples.rotate_left(1);
        self.samples[WINDOW_LEN - 1] = sample;
    }

    // s0 - 8*s1 + 8*s3 - s4, zero until the window has filled.
    pub fn rate_of_change(&self) -> f32 {
        if !self.is_full() {
            return 0.0;
        }

        let [s0, s1, _, s3, s4] = self.samples;
        s0 - 8.0 * s1 + 8.0 * s3 - s4
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples[..self.len]
    }

    pub fn is_full(&self) -> bool {
        self.len == WINDOW_LEN
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_is_zero_until_window_fills() {
        let mut tracker = TrendTracker::new();
        assert_eq!(tracker.rate_of_change(), 0.0);

        for sample in [20.0, 25.0, 30.0, 40.0] {
            tracker.record(sample);
            assert_eq!(tracker.rate_of_change(), 0.0);
        }

        tracker.record(50.0);
        assert!(tracker.is_full());
        assert_ne!(tracker.rate_of_change(), 0.0);
    }

    #[test]
    fn full_window_uses_five_point_difference() {
        let mut tracker = TrendTracker::new();
        for sample in [20.0, 21.0, 22.0, 23.0, 24.0] {
            tracker.record(sample);
        }

        // 20 - 8*21 + 8*23 - 24
        assert_eq!(tracker.rate_of_change(), 12.0);
    }

    #[test]
    fn sixth_sample_evicts_oldest() {
        let mut tracker = TrendTracker::new();
        for sample in [10.0, 20.0, 21.0, 22.0, 23.0, 24.0] {
            tracker.record(sample);
        }

        assert_eq!(tracker.samples(), &[20.0, 21.0, 22.0, 23.0, 24.0]);
        assert_eq!(tracker.rate_of_change(), 12.0);
    }

    #[test]
    fn steady_temperature_has_zero_rate() {
        let mut tracker = TrendTracker::new();
        for _ in 0..8 {
            tracker.record(21.5);
        }

        assert_eq!(tracker.rate_of_change(), 0.0);
    }

    #[test]
    fn falling_temperature_is_negative() {
        let mut tracker = TrendTracker::new();
        for sample in [30.0, 29.0, 28.0, 27.0, 26.0] {
            tracker.record(sample);
        }

        assert!(tracker.rate_of_change() < 0.0);
    }
}
