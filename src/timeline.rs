use std::time::Duration;

/// Easing curves for effect timelines.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Ease {
    Linear,
    InQuad,
    OutQuad,
    #[default]
    InOutQuad,
    InCubic,
    OutCubic,
    InOutCubic,
    InOutSine,
}

impl Ease {
    pub fn apply(self, t: f64) -> f64 {
        let t = t.clamp(0.0, 1.0);
        match self {
            Self::Linear => t,
            Self::InQuad => t * t,
            Self::OutQuad => 1.0 - (1.0 - t) * (1.0 - t),
            Self::InOutQuad => {
                if t < 0.5 {
                    2.0 * t * t
                } else {
                    1.0 - ((-2.0 * t + 2.0).powi(2) / 2.0)
                }
            }
            Self::InCubic => t * t * t,
            Self::OutCubic => 1.0 - (1.0 - t).powi(3),
            Self::InOutCubic => {
                if t < 0.5 {
                    4.0 * t * t * t
                } else {
                    1.0 - ((-2.0 * t + 2.0).powi(3) / 2.0)
                }
            }
            Self::InOutSine => (1.0 - (std::f64::consts::PI * t).cos()) / 2.0,
        }
    }
}

/// Converts elapsed wall time into an eased progress value in `[0, 1]`.
///
/// Every animated effect drives its state from one of these, advanced from
/// `pre_paint_screen` with the frame's presentation delta. There is no other
/// animation clock.
#[derive(Clone, Copy, Debug)]
pub struct TimeLine {
    duration: Duration,
    elapsed: Duration,
    ease: Ease,
}

impl TimeLine {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration: duration.max(Duration::from_millis(1)),
            elapsed: Duration::ZERO,
            ease: Ease::default(),
        }
    }

    pub fn with_ease(mut self, ease: Ease) -> Self {
        self.ease = ease;
        self
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn ease(&self) -> Ease {
        self.ease
    }

    /// Advances by `delta`; saturates at the duration.
    pub fn advance(&mut self, delta: Duration) {
        self.elapsed = (self.elapsed + delta).min(self.duration);
    }

    /// Linear progress in `[0, 1]`.
    pub fn progress(&self) -> f64 {
        self.elapsed.as_secs_f64() / self.duration.as_secs_f64()
    }

    /// Eased progress in `[0, 1]`.
    pub fn value(&self) -> f64 {
        self.ease.apply(self.progress())
    }

    pub fn done(&self) -> bool {
        self.elapsed >= self.duration
    }

    pub fn rewind(&mut self) {
        self.elapsed = Duration::ZERO;
    }
}
