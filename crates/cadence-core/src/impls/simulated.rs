//! Executor that stands in for real work: sleeps a random duration and
//! optionally fails.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use crate::domain::Task;
use crate::ports::TaskExecutor;

#[derive(Debug, Clone)]
pub struct SimulatedExecutor {
    min: Duration,
    max: Duration,
    failure_rate: f64,
}

impl SimulatedExecutor {
    /// Sleep uniformly in `min..=max`. Bounds are swapped if reversed.
    pub fn new(min: Duration, max: Duration) -> Self {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        Self {
            min,
            max,
            failure_rate: 0.0,
        }
    }

    /// Finish immediately. Handy in tests.
    pub fn instant() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    /// Probability in `0.0..=1.0` that a run fails. Clamped.
    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        self.failure_rate = if rate.is_nan() { 0.0 } else { rate.clamp(0.0, 1.0) };
        self
    }

    fn roll(&self) -> (Duration, bool) {
        let mut rng = rand::thread_rng();
        let min = self.min.as_millis() as u64;
        let max = self.max.as_millis() as u64;
        let millis = if max > min { rng.gen_range(min..=max) } else { min };
        (Duration::from_millis(millis), rng.gen_bool(self.failure_rate))
    }
}

impl Default for SimulatedExecutor {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(5))
    }
}

#[async_trait]
impl TaskExecutor for SimulatedExecutor {
    async fn execute(&self, task: &Task) -> Result<(), String> {
        // ThreadRng is !Send, roll before awaiting.
        let (delay, fail) = self.roll();
        tracing::debug!(
            task_id = %task.id,
            delay_ms = delay.as_millis() as u64,
            "simulating task body"
        );
        tokio::time::sleep(delay).await;
        if fail {
            Err(format!("simulated failure after {} ms", delay.as_millis()))
        } else {
            Ok(())
        }
    }
}
