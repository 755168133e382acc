use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct OptimizerSettings {
    /// Width used when the indexer is near the tip.
    pub min_batch: u32,
    /// Hard cap: one cycle may never starve the shared client.
    pub max_batch: u32,
    /// Distance at or under which the indexer counts as near-tip.
    pub near_tip_hours: i64,
    /// Wall-clock budget one cycle should roughly fit in.
    pub target_cycle: Duration,
}

/// Shared backpressure policy consulted by every indexer. Small
/// batches near real-time, larger batches while catching up, always
/// capped, and shrunk when recent per-point latency says a full batch
/// would blow the cycle budget.
#[derive(Debug)]
pub struct SyncOptimizer {
    settings: OptimizerSettings,
    recent_point_latency: Mutex<Option<Duration>>,
}

impl SyncOptimizer {
    pub fn new(settings: OptimizerSettings) -> SyncOptimizer {
        SyncOptimizer {
            settings,
            recent_point_latency: Mutex::new(None),
        }
    }

    pub fn batch_width(&self, distance_hours: i64) -> u32 {
        let recent = *self.recent_point_latency.lock().unwrap();
        width_for(&self.settings, distance_hours, recent)
    }

    /// Feeds back one finished cycle. Latency is tracked per processed
    /// point as an exponential moving average.
    pub fn observe(&self, elapsed: Duration, processed: u32) {
        if processed == 0 {
            return;
        }

        let per_point = elapsed / processed;
        let mut recent = self.recent_point_latency.lock().unwrap();
        *recent = Some(match *recent {
            None => per_point,
            Some(previous) => {
                let blended = previous.as_secs_f64() * 0.7
                    + per_point.as_secs_f64() * 0.3;
                Duration::from_secs_f64(blended)
            },
        });
    }
}

fn width_for(
    settings: &OptimizerSettings,
    distance_hours: i64,
    recent_point_latency: Option<Duration>,
) -> u32 {
    if distance_hours <= 0 {
        return 0;
    }

    if distance_hours <= settings.near_tip_hours {
        return settings.min_batch.min(distance_hours as u32).max(1);
    }

    let by_distance = distance_hours
        .clamp(settings.min_batch as i64, settings.max_batch as i64)
        as u32;

    let by_latency = match recent_point_latency {
        Some(per_point) if !per_point.is_zero() => {
            let fits = settings.target_cycle.as_secs_f64()
                / per_point.as_secs_f64();
            (fits as u32).max(settings.min_batch)
        },
        _ => settings.max_batch,
    };

    by_distance.min(by_latency).min(settings.max_batch)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> OptimizerSettings {
        OptimizerSettings {
            min_batch: 2,
            max_batch: 50,
            near_tip_hours: 3,
            target_cycle: Duration::from_secs(30),
        }
    }

    #[test]
    fn test_no_work_means_zero_width() {
        assert_eq!(width_for(&settings(), 0, None), 0);
        assert_eq!(width_for(&settings(), -5, None), 0);
    }

    #[test]
    fn test_near_tip_uses_small_batches() {
        assert_eq!(width_for(&settings(), 1, None), 1);
        assert_eq!(width_for(&settings(), 3, None), 2);
    }

    #[test]
    fn test_catch_up_scales_with_distance_up_to_cap() {
        assert_eq!(width_for(&settings(), 10, None), 10);
        assert_eq!(width_for(&settings(), 5000, None), 50);
    }

    #[test]
    fn test_slow_points_shrink_the_batch() {
        // 3s per point against a 30s budget fits 10 points.
        let width =
            width_for(&settings(), 5000, Some(Duration::from_secs(3)));
        assert_eq!(width, 10);
    }

    #[test]
    fn test_observe_feeds_latency_back() {
        let optimizer = SyncOptimizer::new(settings());
        assert_eq!(optimizer.batch_width(5000), 50);

        optimizer.observe(Duration::from_secs(30), 10);
        assert_eq!(optimizer.batch_width(5000), 10);
    }
}
