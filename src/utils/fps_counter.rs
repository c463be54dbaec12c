use std::time::{Duration, Instant};

/// Frames per second averaged over one-second windows.
pub struct FpsCounter {
    window_start: Instant,
    frame_count: u32,
    window: Duration,
    pub current_fps: f32,
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl FpsCounter {
    #[must_use]
    pub fn new() -> Self {
        Self::with_window(Duration::from_secs(1))
    }

    #[must_use]
    pub fn with_window(window: Duration) -> Self {
        Self {
            window_start: Instant::now(),
            frame_count: 0,
            window,
            current_fps: 0.0,
        }
    }

    /// Counts one frame. Returns the new average when a window closes.
    pub fn update(&mut self) -> Option<f32> {
        self.tick(Instant::now())
    }

    fn tick(&mut self, now: Instant) -> Option<f32> {
        self.frame_count += 1;
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < self.window {
            return None;
        }
        self.current_fps = self.frame_count as f32 / elapsed.as_secs_f32();
        self.window_start = now;
        self.frame_count = 0;
        Some(self.current_fps)
    }
}
