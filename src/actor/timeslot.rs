/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Wall-clock time and the timeslot it falls in.

use std::time::{Duration, SystemTime};

use crate::types::data_types::TimeSlot;

/// A source of the current time, as a duration since the Unix epoch.
///
/// The runner reads the clock once per tick. Tests substitute a clock they advance by hand.
pub trait Clock: Send + 'static {
    fn now(&self) -> Duration;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
    }
}

/// Tracks the current timeslot, `floor(now / timeslot_duration)`.
pub struct TimeSlotClock {
    timeslot_duration: Duration,
    current: Option<TimeSlot>,
}

impl TimeSlotClock {
    pub fn new(timeslot_duration: Duration) -> Self {
        Self {
            timeslot_duration,
            current: None,
        }
    }

    pub fn timeslot_at(&self, now: Duration) -> TimeSlot {
        let duration = self.timeslot_duration.as_nanos().max(1);
        TimeSlot::new((now.as_nanos() / duration) as u64)
    }

    /// Recompute the current timeslot at `now`. Returns the timeslot if a new one started.
    ///
    /// The clock never moves back: if `now` falls in an earlier timeslot than the current one (the
    /// system clock was adjusted), the current timeslot is kept.
    pub fn tick(&mut self, now: Duration) -> Option<TimeSlot> {
        let timeslot = self.timeslot_at(now);
        match self.current {
            Some(current) if timeslot <= current => None,
            _ => {
                self.current = Some(timeslot);
                Some(timeslot)
            }
        }
    }

    pub fn current(&self) -> Option<TimeSlot> {
        self.current
    }
}
