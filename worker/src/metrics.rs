use std::time::Duration;

/// Cumulative counters of one worker.
#[derive(Debug, Default, Clone)]
pub struct TrainMetrics {
    pub compute_time: Duration,
    pub sync_time: Duration,

    pub steps: u64,
    pub microbatches: u64,
    pub tokens: u64,
}

impl TrainMetrics {
    #[inline]
    pub fn bump_step(&mut self) {
        self.steps += 1;
    }

    #[inline]
    pub fn add_microbatches(&mut self, n: usize) {
        self.microbatches += n as u64;
    }

    #[inline]
    pub fn add_tokens(&mut self, n: usize) {
        self.tokens += n as u64;
    }
}

/// Global throughput of one step.
pub fn tokens_per_sec(tokens: usize, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 { tokens as f64 / secs } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throughput() {
        assert_eq!(tokens_per_sec(1000, Duration::from_millis(500)), 2000.0);
        assert_eq!(tokens_per_sec(1000, Duration::ZERO), 0.0);
    }
}
