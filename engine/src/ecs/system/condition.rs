/// When a system takes part in a frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Condition {
    /// Every frame.
    #[default]
    Always,
    /// Once every `n` frames of the owning group.
    EveryFrames(u64),
    /// Once every `seconds` of accumulated group time.
    EveryInterval(f64),
}

/// Tracks when a system last ran and decides whether it runs now.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Gate {
    condition: Condition,
    last_frame: u64,
    last_time: f64,
}

impl Gate {
    pub fn new(condition: Condition) -> Self {
        Self {
            condition,
            last_frame: 0,
            last_time: 0.0,
        }
    }

    #[inline]
    pub fn condition(&self) -> Condition {
        self.condition
    }

    /// Returns `true` if the system should run at `frame` / `time`, recording the run if so.
    pub fn open(&mut self, frame: u64, time: f64) -> bool {
        match self.condition {
            Condition::Always => true,
            Condition::EveryFrames(n) => {
                if frame.saturating_sub(self.last_frame) < n {
                    return false;
                }
                self.last_frame = frame;
                true
            }
            Condition::EveryInterval(seconds) => {
                if time - self.last_time < seconds {
                    return false;
                }
                self.last_time = time;
                true
            }
        }
    }
}
