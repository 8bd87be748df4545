use std::time::{Duration, Instant};

/// Paces the frame loop to a target rate and produces the time step for
/// each update. The step is clamped so a long hitch (window drag, GPU
/// stall) doesn't explode the integration.
pub struct FrameTimer {
    last: Instant,
    target: Option<Duration>,
    max_delta: f32,
    smoothed_delta: f32,
}

impl FrameTimer {
    pub fn new(target_fps: f64, max_delta: f32) -> Self {
        let target = if target_fps > 0.0 {
            Some(Duration::from_secs_f64(1.0 / target_fps))
        } else {
            None
        };
        FrameTimer {
            last: Instant::now(),
            target,
            max_delta,
            smoothed_delta: 0.0,
        }
    }

    /// Sleeps out the rest of the frame budget, then returns the
    /// clamped time step since the previous tick.
    pub fn tick(&mut self) -> f32 {
        if let Some(target) = self.target {
            let deadline = self.last + target;
            let now = Instant::now();
            if now < deadline {
                std::thread::sleep(deadline - now);
            }
        }
        let delta = self.last.elapsed().as_secs_f32();
        self.last = Instant::now();
        self.smoothed_delta = if self.smoothed_delta == 0.0 {
            delta
        } else {
            self.smoothed_delta * 0.9 + delta * 0.1
        };
        delta.min(self.max_delta)
    }

    pub fn fps(&self) -> f32 {
        if self.smoothed_delta > 0.0 {
            1.0 / self.smoothed_delta
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_is_clamped() {
        let mut timer = FrameTimer::new(0.0, 0.05);
        timer.last = Instant::now() - Duration::from_secs(2);
        let dt = timer.tick();
        assert!(dt <= 0.05);
        assert!(dt >= 0.0);
    }

    #[test]
    fn uncapped_timer_does_not_sleep() {
        let mut timer = FrameTimer::new(0.0, 1.0);
        let start = Instant::now();
        timer.tick();
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn fps_reflects_the_smoothed_delta() {
        let mut timer = FrameTimer::new(0.0, 1.0);
        assert_eq!(timer.fps(), 0.0);
        timer.smoothed_delta = 0.02;
        assert!((timer.fps() - 50.0).abs() < 1e-3);
    }
}
