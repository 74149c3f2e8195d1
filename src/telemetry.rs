//! Bounded history of the athlete's recent position and power

use serde::Serialize;
use std::collections::VecDeque;
use tracing::info;

use crate::models::{AthleteId, TelemetrySample};

/// Samples kept for the display trail
pub const DEFAULT_TRAIL_CAPACITY: usize = 100;

/// What a push did to the window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Sample appended (oldest evicted if at capacity)
    Appended,
    /// Watched athlete changed; history cleared and the sample dropped
    AthleteChanged {
        previous: AthleteId,
        current: AthleteId,
    },
}

/// Recent (distance, power) pairs in arrival order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trail {
    pub distance: Vec<f64>,
    pub power: Vec<f64>,
}

/// FIFO window over the watched athlete's telemetry
#[derive(Debug, Clone)]
pub struct TelemetryWindow {
    capacity: usize,
    athlete_id: Option<AthleteId>,
    recent_distance: VecDeque<f64>,
    recent_power: VecDeque<f64>,
}

impl Default for TelemetryWindow {
    fn default() -> Self {
        Self::new(DEFAULT_TRAIL_CAPACITY)
    }
}

impl TelemetryWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            athlete_id: None,
            recent_distance: VecDeque::with_capacity(capacity + 1),
            recent_power: VecDeque::with_capacity(capacity + 1),
        }
    }

    /// Record one tick
    ///
    /// The first sample of a session starts the history. A sample for a
    /// different athlete than the one being tracked clears the history
    /// instead of being recorded.
    pub fn push(&mut self, sample: &TelemetrySample) -> PushOutcome {
        match self.athlete_id {
            Some(previous) if previous != sample.athlete_id => {
                info!(
                    previous,
                    current = sample.athlete_id,
                    "Watched athlete changed, clearing telemetry window"
                );
                self.athlete_id = Some(sample.athlete_id);
                self.clear();
                return PushOutcome::AthleteChanged {
                    previous,
                    current: sample.athlete_id,
                };
            }
            Some(_) => {}
            None => self.athlete_id = Some(sample.athlete_id),
        }

        self.recent_distance.push_back(sample.distance);
        self.recent_power.push_back(sample.power);
        while self.recent_distance.len() > self.capacity {
            self.recent_distance.pop_front();
            self.recent_power.pop_front();
        }
        PushOutcome::Appended
    }

    /// Change the capacity, dropping the oldest samples if needed
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
        while self.recent_distance.len() > self.capacity {
            self.recent_distance.pop_front();
            self.recent_power.pop_front();
        }
    }

    pub fn clear(&mut self) {
        self.recent_distance.clear();
        self.recent_power.clear();
    }

    pub fn len(&self) -> usize {
        self.recent_distance.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recent_distance.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn athlete_id(&self) -> Option<AthleteId> {
        self.athlete_id
    }

    /// The last `min(capacity, len)` pairs, oldest first
    pub fn trail(&self) -> Trail {
        Trail {
            distance: self.recent_distance.iter().copied().collect(),
            power: self.recent_power.iter().copied().collect(),
        }
    }
}
