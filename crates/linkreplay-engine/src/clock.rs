use std::time::Duration;
use tokio::time::Instant;

/// Elapsed virtual time since a session started, advancing with the wall
/// clock at `time_scale` virtual seconds per real second.
#[derive(Debug, Clone, Copy)]
pub struct VirtualClock {
    start: Instant,
    time_scale: f64,
}

/// Stand-in for deadlines too far away to represent.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Wall-clock span covering `virtual_span` at `time_scale`, if representable.
pub fn wall_span(virtual_span: Duration, time_scale: f64) -> Option<Duration> {
    if time_scale == 1.0 {
        Some(virtual_span)
    } else {
        Duration::try_from_secs_f64(virtual_span.as_secs_f64() / time_scale).ok()
    }
}

impl VirtualClock {
    pub fn start(time_scale: f64) -> Self {
        Self {
            start: Instant::now(),
            time_scale,
        }
    }

    pub fn now(&self) -> Duration {
        let elapsed = self.start.elapsed();
        if self.time_scale == 1.0 {
            elapsed
        } else {
            Duration::try_from_secs_f64(elapsed.as_secs_f64() * self.time_scale)
                .unwrap_or(Duration::MAX)
        }
    }

    /// Wall-clock instant at which virtual time reaches `at`. Saturates to a
    /// far-future instant instead of overflowing.
    pub fn deadline(&self, at: Duration) -> Instant {
        wall_span(at, self.time_scale)
            .and_then(|span| self.start.checked_add(span))
            .unwrap_or_else(|| self.start + FAR_FUTURE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn follows_wall_clock_at_unit_scale() {
        let clock = VirtualClock::start(1.0);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(clock.now(), Duration::from_millis(1500));
        assert_eq!(
            clock.deadline(Duration::from_secs(2)) - Instant::now(),
            Duration::from_millis(500)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn scaled_clock_runs_faster() {
        let clock = VirtualClock::start(4.0);
        tokio::time::sleep_until(clock.deadline(Duration::from_secs(8))).await;
        assert_eq!(clock.now(), Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn unrepresentable_deadlines_saturate() {
        let slow = VirtualClock::start(1e-300);
        let far = slow.deadline(Duration::from_secs(1_000_000_000));
        assert!(far > Instant::now() + Duration::from_secs(86400 * 365));
        assert!(wall_span(Duration::from_secs(1), 1e-300).is_none());

        let fast = VirtualClock::start(1e300);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(fast.now(), Duration::MAX);
    }
}
