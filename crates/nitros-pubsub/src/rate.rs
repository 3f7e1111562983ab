use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Default span of the rate estimate.
pub const DEFAULT_RATE_WINDOW: Duration = Duration::from_secs(5);

const MAX_SAMPLES: usize = 1024;

/// Sliding-window message rate.
///
/// The rate is `(n - 1) / (newest - oldest)` over the samples still inside
/// the window, so it reads `None` once a topic goes quiet.
#[derive(Debug, Clone)]
pub struct RateWindow {
    window: Duration,
    samples: VecDeque<Instant>,
}

impl Default for RateWindow {
    fn default() -> Self {
        Self::new(DEFAULT_RATE_WINDOW)
    }
}

impl RateWindow {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            samples: VecDeque::new(),
        }
    }

    pub fn record(&mut self, at: Instant) {
        if self.samples.len() == MAX_SAMPLES {
            self.samples.pop_front();
        }
        self.samples.push_back(at);
        self.prune(at);
    }

    pub fn rate(&mut self, now: Instant) -> Option<f64> {
        self.prune(now);
        let (first, last) = (self.samples.front()?, self.samples.back()?);
        let span = last.duration_since(*first).as_secs_f64();
        if self.samples.len() < 2 || span <= 0.0 {
            return None;
        }
        Some((self.samples.len() - 1) as f64 / span)
    }

    fn prune(&mut self, now: Instant) {
        while let Some(oldest) = self.samples.front() {
            if now.saturating_duration_since(*oldest) > self.window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steady_ten_hz() {
        let start = Instant::now();
        let mut rate = RateWindow::default();
        for i in 0..11 {
            rate.record(start + Duration::from_millis(i * 100));
        }
        let hz = rate.rate(start + Duration::from_millis(1000)).unwrap();
        assert!((hz - 10.0).abs() < 1e-6, "got {hz}");
    }

    #[test]
    fn single_sample_has_no_rate() {
        let start = Instant::now();
        let mut rate = RateWindow::default();
        rate.record(start);
        assert_eq!(rate.rate(start), None);
    }

    #[test]
    fn quiet_topic_goes_stale() {
        let start = Instant::now();
        let mut rate = RateWindow::new(Duration::from_secs(1));
        rate.record(start);
        rate.record(start + Duration::from_millis(100));
        assert!(rate.rate(start + Duration::from_millis(200)).is_some());
        assert_eq!(rate.rate(start + Duration::from_secs(5)), None);
    }
}
