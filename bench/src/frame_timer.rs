//! Per-frame timing for scenario runs.

use std::fmt;
use std::time::{Duration, Instant};

/// Summary of a run of frame times.
#[derive(Debug, Clone)]
pub struct FrameStats {
    pub frame_count: usize,
    pub total: Duration,
    sorted: Vec<Duration>,
}

impl FrameStats {
    pub fn from_times(mut times: Vec<Duration>) -> Self {
        times.sort();
        Self {
            frame_count: times.len(),
            total: times.iter().sum(),
            sorted: times,
        }
    }

    pub fn average(&self) -> Duration {
        match self.frame_count {
            0 => Duration::ZERO,
            n => self.total / n as u32,
        }
    }

    /// Frame time at percentile `p` (0-100).
    pub fn percentile(&self, p: usize) -> Duration {
        if self.sorted.is_empty() {
            return Duration::ZERO;
        }
        let index = (self.sorted.len() * p.min(100) / 100).min(self.sorted.len() - 1);
        self.sorted[index]
    }

    pub fn median(&self) -> Duration {
        self.percentile(50)
    }

    /// The slowest 1% of frames, where update spikes from a burst of tile production show up.
    pub fn p99(&self) -> Duration {
        self.percentile(99)
    }

    pub fn worst(&self) -> Duration {
        self.sorted.last().copied().unwrap_or(Duration::ZERO)
    }
}

impl fmt::Display for FrameStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ms = |d: Duration| d.as_secs_f64() * 1000.0;
        write!(
            f,
            "{} frames, avg: {:.3}ms, median: {:.3}ms, p99: {:.3}ms, worst: {:.3}ms",
            self.frame_count,
            ms(self.average()),
            ms(self.median()),
            ms(self.p99()),
            ms(self.worst()),
        )
    }
}

/// Run `frame_fn` once per frame and collect the wall time of each call.
pub fn measure_frames<F>(frame_count: usize, mut frame_fn: F) -> FrameStats
where
    F: FnMut(usize),
{
    let mut times = Vec::with_capacity(frame_count);
    for frame in 0..frame_count {
        let start = Instant::now();
        frame_fn(frame);
        times.push(start.elapsed());
    }
    FrameStats::from_times(times)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_from_known_times() {
        // Given
        let times = [10, 12, 11, 15, 10].map(Duration::from_millis).to_vec();

        // When
        let stats = FrameStats::from_times(times);

        // Then
        assert_eq!(stats.frame_count, 5);
        assert_eq!(stats.total, Duration::from_millis(58));
        assert_eq!(stats.median(), Duration::from_millis(11));
        assert_eq!(stats.worst(), Duration::from_millis(15));
        assert_eq!(stats.p99(), Duration::from_millis(15));
    }

    #[test]
    fn empty_stats_are_zero() {
        let stats = FrameStats::from_times(Vec::new());
        assert_eq!(stats.average(), Duration::ZERO);
        assert_eq!(stats.p99(), Duration::ZERO);
        assert_eq!(stats.worst(), Duration::ZERO);
    }

    #[test]
    fn measure_frames_calls_once_per_frame() {
        let mut seen = Vec::new();
        let stats = measure_frames(4, |frame| seen.push(frame));
        assert_eq!(seen, vec![0, 1, 2, 3]);
        assert_eq!(stats.frame_count, 4);
    }
}
