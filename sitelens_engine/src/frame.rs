use std::time::{Duration, Instant};

use crate::config::{MAX_TARGET_FPS, MIN_TARGET_FPS};

/// Caps frame work to a target interval when the host calls back faster.
#[derive(Debug, Clone)]
pub struct FramePacer {
    interval: Duration,
    last_frame: Option<Instant>,
    rendered: u64,
    skipped: u64,
}

impl FramePacer {
    pub fn new(target_fps: u32) -> Self {
        FramePacer {
            interval: interval_for(target_fps),
            last_frame: None,
            rendered: 0,
            skipped: 0,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn set_target_fps(&mut self, target_fps: u32) {
        self.interval = interval_for(target_fps);
    }

    /// True when at least one interval has passed since the last rendered
    /// frame; records `now` as that frame when it is.
    pub fn should_render(&mut self, now: Instant) -> bool {
        match self.last_frame {
            Some(last) if now.saturating_duration_since(last) < self.interval => {
                self.skipped += 1;
                false
            }
            _ => {
                self.last_frame = Some(now);
                self.rendered += 1;
                true
            }
        }
    }

    /// Seconds since the previous rendered frame, for camera integration.
    pub fn delta_since_last(&self, now: Instant) -> f32 {
        self.last_frame
            .map(|last| now.saturating_duration_since(last).as_secs_f32())
            .unwrap_or(0.0)
    }

    /// Earliest instant the next frame may render.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.last_frame.map(|last| last + self.interval)
    }

    pub fn rendered(&self) -> u64 {
        self.rendered
    }

    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

fn interval_for(target_fps: u32) -> Duration {
    Duration::from_secs_f64(1.0 / f64::from(target_fps.clamp(MIN_TARGET_FPS, MAX_TARGET_FPS)))
}
