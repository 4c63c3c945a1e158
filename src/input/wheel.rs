//! Wheel event smoothing
//!
//! Discrete wheels emit well-spaced notches that should be forwarded
//! immediately; trackpads emit dense bursts of pixel deltas that would
//! flood the data channel if forwarded one-to-one. A small sliding window
//! over recent events classifies the device, and trackpad input is
//! coalesced and flushed at a fixed cadence.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Sliding window length used for device classification
const WINDOW_LEN: usize = 4;

/// Consecutive samples this close together (and of similar magnitude)
/// indicate a trackpad burst rather than discrete wheel notches.
const TRACKPAD_STREAK: usize = 3;
const TRACKPAD_MAX_GAP: Duration = Duration::from_millis(50);

/// Minimum interval between flushed trackpad steps
pub const TRACKPAD_FLUSH_INTERVAL: Duration = Duration::from_millis(100);

/// Cap on the normalized step magnitude
const MAX_MAGNITUDE: i32 = 10;

/// One synthesized scroll step: a press+release of the scroll button
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WheelStep {
    /// Scroll direction: true = up (button 4), false = down (button 3)
    pub up: bool,
    /// Step magnitude, normalized against the smallest observed delta
    pub magnitude: i32,
}

impl WheelStep {
    /// Button index synthesized for this step
    pub fn button(&self) -> u8 {
        if self.up {
            4
        } else {
            3
        }
    }
}

/// Stateful wheel smoothing filter
pub struct WheelFilter {
    window: VecDeque<(Instant, f64)>,
    smallest_delta: Option<f64>,
    pending: Option<(bool, f64)>,
    last_flush: Option<Instant>,
}

impl WheelFilter {
    pub fn new() -> Self {
        Self {
            window: VecDeque::with_capacity(WINDOW_LEN),
            smallest_delta: None,
            pending: None,
            last_flush: None,
        }
    }

    /// Feed a wheel event. Returns a step to forward now, or `None` when
    /// the event was coalesced for a later [`flush`](Self::flush).
    pub fn on_wheel(&mut self, delta_y: f64, now: Instant) -> Option<WheelStep> {
        if delta_y == 0.0 {
            return None;
        }

        let magnitude = delta_y.abs();
        if self.window.len() == WINDOW_LEN {
            self.window.pop_front();
        }
        self.window.push_back((now, magnitude));

        match self.smallest_delta {
            Some(smallest) if smallest <= magnitude => {}
            _ => self.smallest_delta = Some(magnitude),
        }

        let up = delta_y < 0.0;
        if self.is_trackpad() {
            let accumulated = match self.pending.take() {
                Some((_, acc)) => acc + magnitude,
                None => magnitude,
            };
            if self.flush_due(now) {
                self.last_flush = Some(now);
                Some(WheelStep {
                    up,
                    magnitude: self.normalize(accumulated),
                })
            } else {
                self.pending = Some((up, accumulated));
                None
            }
        } else {
            self.pending = None;
            self.last_flush = Some(now);
            Some(WheelStep {
                up,
                magnitude: self.normalize(magnitude),
            })
        }
    }

    /// Flush a coalesced trackpad step if the rate limit allows it.
    /// Called from the periodic flush timer while attached.
    pub fn flush(&mut self, now: Instant) -> Option<WheelStep> {
        if !self.flush_due(now) {
            return None;
        }
        let (up, accumulated) = self.pending.take()?;
        self.last_flush = Some(now);
        Some(WheelStep {
            up,
            magnitude: self.normalize(accumulated),
        })
    }

    /// Drop all history (detach, renegotiation)
    pub fn reset(&mut self) {
        self.window.clear();
        self.smallest_delta = None;
        self.pending = None;
        self.last_flush = None;
    }

    fn flush_due(&self, now: Instant) -> bool {
        match self.last_flush {
            Some(last) => now.duration_since(last) >= TRACKPAD_FLUSH_INTERVAL,
            None => true,
        }
    }

    /// Trackpad heuristic: a streak of `TRACKPAD_STREAK` consecutive window
    /// samples arriving within `TRACKPAD_MAX_GAP` of each other, with
    /// similar magnitudes. Discrete wheel notches are spaced much further
    /// apart even when spun quickly.
    fn is_trackpad(&self) -> bool {
        if self.window.len() < TRACKPAD_STREAK {
            return false;
        }
        let mut streak = 1;
        for pair in self.window.iter().collect::<Vec<_>>().windows(2) {
            let (prev_at, prev_mag) = *pair[0];
            let (at, mag) = *pair[1];
            let similar = mag >= prev_mag * 0.5 && mag <= prev_mag * 2.0;
            if at.duration_since(prev_at) <= TRACKPAD_MAX_GAP && similar {
                streak += 1;
                if streak >= TRACKPAD_STREAK {
                    return true;
                }
            } else {
                streak = 1;
            }
        }
        false
    }

    fn normalize(&self, magnitude: f64) -> i32 {
        let smallest = self.smallest_delta.unwrap_or(magnitude).max(f64::EPSILON);
        let steps = (magnitude / smallest).round() as i32;
        steps.clamp(1, MAX_MAGNITUDE)
    }
}

impl Default for WheelFilter {
    fn default() -> Self {
        Self::new()
    }
}
