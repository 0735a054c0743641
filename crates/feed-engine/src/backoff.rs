use std::time::Duration;

/// Reconnect delays indexed by consecutive failed attempts; the last entry is the cap.
pub const DEFAULT_BACKOFF_MS: [u64; 5] = [1_000, 2_000, 5_000, 10_000, 30_000];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffSchedule {
    steps: Vec<Duration>,
}

impl BackoffSchedule {
    /// Builds a schedule from `steps`. Entries are clamped so the table never decreases;
    /// an empty table falls back to the default.
    pub fn new(steps: impl IntoIterator<Item = Duration>) -> Self {
        let mut table: Vec<Duration> = Vec::new();
        for step in steps {
            let floor = table.last().copied().unwrap_or(Duration::ZERO);
            table.push(step.max(floor));
        }
        if table.is_empty() {
            return Self::default();
        }
        Self { steps: table }
    }

    pub fn from_millis(steps: &[u64]) -> Self {
        Self::new(steps.iter().copied().map(Duration::from_millis))
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let index = (attempt as usize).min(self.steps.len() - 1);
        self.steps[index]
    }

    pub fn steps(&self) -> &[Duration] {
        &self.steps
    }

    pub fn cap(&self) -> Duration {
        self.steps[self.steps.len() - 1]
    }
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        Self {
            steps: DEFAULT_BACKOFF_MS
                .iter()
                .copied()
                .map(Duration::from_millis)
                .collect(),
        }
    }
}

/// Delay before reconnect attempt `attempt` using the default table.
pub fn reconnect_delay(attempt: u32) -> Duration {
    let index = (attempt as usize).min(DEFAULT_BACKOFF_MS.len() - 1);
    Duration::from_millis(DEFAULT_BACKOFF_MS[index])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn follows_table_then_caps() {
        let delays: Vec<u64> = (0..8)
            .map(|attempt| reconnect_delay(attempt).as_millis() as u64)
            .collect();
        assert_eq!(
            delays,
            vec![1_000, 2_000, 5_000, 10_000, 30_000, 30_000, 30_000, 30_000]
        );
    }

    #[test]
    fn schedule_matches_free_function() {
        let schedule = BackoffSchedule::default();
        for attempt in 0..10 {
            assert_eq!(schedule.delay(attempt), reconnect_delay(attempt));
        }
        assert_eq!(schedule.delay(u32::MAX), schedule.cap());
    }

    #[test]
    fn custom_table_is_non_decreasing() {
        let schedule = BackoffSchedule::from_millis(&[500, 100, 2_000]);
        assert_eq!(
            schedule.steps(),
            &[
                Duration::from_millis(500),
                Duration::from_millis(500),
                Duration::from_millis(2_000)
            ]
        );
        let delays: Vec<Duration> = (0..6).map(|a| schedule.delay(a)).collect();
        assert!(delays.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    #[test]
    fn empty_table_uses_default() {
        assert_eq!(BackoffSchedule::new(Vec::<Duration>::new()), BackoffSchedule::default());
    }
}
