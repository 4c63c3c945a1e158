//! Gamepad polling
//!
//! The platform gamepad API is poll-only, so a fixed-cadence tick snapshots
//! every pad and diffs it against the previous snapshot. Only changed
//! buttons/axes are reported to keep wire traffic down, and connect/
//! disconnect is inferred from presence in the snapshot.

use std::time::Duration;

/// Poll cadence
pub const GAMEPAD_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Maximum number of pads tracked
pub const MAX_GAMEPADS: usize = 4;

/// Axis values this close to rest are snapped to 0
const AXIS_DEAD_ZONE: f64 = 0.05;

/// One pad's state as read from the platform
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GamepadSnapshot {
    pub buttons: Vec<f64>,
    pub axes: Vec<f64>,
}

/// Poll-only source of gamepad snapshots.
///
/// Index in the returned vector is the pad slot; `None` means no device.
pub trait GamepadSource: Send + Sync {
    fn poll(&self) -> Vec<Option<GamepadSnapshot>>;
}

/// Per-pad change detected between two polls
#[derive(Debug, Clone, PartialEq)]
pub enum GamepadChange {
    Connected {
        pad: usize,
        buttons: usize,
        axes: usize,
    },
    Disconnected {
        pad: usize,
    },
    Button {
        pad: usize,
        button: usize,
        value: f64,
    },
    Axis {
        pad: usize,
        axis: usize,
        value: f64,
    },
}

/// Stateful differ over successive snapshots
pub struct GamepadPoller {
    state: Vec<Option<GamepadSnapshot>>,
}

impl GamepadPoller {
    pub fn new() -> Self {
        Self {
            state: vec![None; MAX_GAMEPADS],
        }
    }

    /// Drop tracked state (detach); the next poll re-reports everything.
    pub fn reset(&mut self) {
        self.state = vec![None; MAX_GAMEPADS];
    }

    /// Diff one poll snapshot against the previous one.
    pub fn poll(&mut self, source: &dyn GamepadSource) -> Vec<GamepadChange> {
        let mut changes = Vec::new();
        let snapshot = source.poll();

        for pad in 0..MAX_GAMEPADS {
            let current = snapshot.get(pad).cloned().flatten();

            match (self.state[pad].take(), current) {
                (None, None) => {}
                (None, Some(mut fresh)) => {
                    apply_dead_zone(&mut fresh);
                    changes.push(GamepadChange::Connected {
                        pad,
                        buttons: fresh.buttons.len(),
                        axes: fresh.axes.len(),
                    });
                    // Initial state counts as a delta from all-zero
                    diff_pad(pad, &GamepadSnapshot::default(), &fresh, &mut changes);
                    self.state[pad] = Some(fresh);
                }
                (Some(_), None) => {
                    changes.push(GamepadChange::Disconnected { pad });
                }
                (Some(previous), Some(mut fresh)) => {
                    apply_dead_zone(&mut fresh);
                    diff_pad(pad, &previous, &fresh, &mut changes);
                    self.state[pad] = Some(fresh);
                }
            }
        }

        changes
    }
}

impl Default for GamepadPoller {
    fn default() -> Self {
        Self::new()
    }
}

fn apply_dead_zone(snapshot: &mut GamepadSnapshot) {
    for axis in &mut snapshot.axes {
        if axis.abs() < AXIS_DEAD_ZONE {
            *axis = 0.0;
        }
    }
}

fn diff_pad(
    pad: usize,
    previous: &GamepadSnapshot,
    current: &GamepadSnapshot,
    changes: &mut Vec<GamepadChange>,
) {
    for (button, &value) in current.buttons.iter().enumerate() {
        if previous.buttons.get(button).copied().unwrap_or(0.0) != value {
            changes.push(GamepadChange::Button { pad, button, value });
        }
    }
    for (axis, &value) in current.axes.iter().enumerate() {
        if previous.axes.get(axis).copied().unwrap_or(0.0) != value {
            changes.push(GamepadChange::Axis { pad, axis, value });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct FakeSource {
        pads: Mutex<Vec<Option<GamepadSnapshot>>>,
    }

    impl FakeSource {
        fn new() -> Self {
            Self {
                pads: Mutex::new(vec![None; MAX_GAMEPADS]),
            }
        }

        fn set(&self, pad: usize, snapshot: Option<GamepadSnapshot>) {
            self.pads.lock()[pad] = snapshot;
        }
    }

    impl GamepadSource for FakeSource {
        fn poll(&self) -> Vec<Option<GamepadSnapshot>> {
            self.pads.lock().clone()
        }
    }

    fn pad(buttons: Vec<f64>, axes: Vec<f64>) -> Option<GamepadSnapshot> {
        Some(GamepadSnapshot { buttons, axes })
    }

    #[test]
    fn test_connect_and_disconnect() {
        let source = FakeSource::new();
        let mut poller = GamepadPoller::new();

        assert!(poller.poll(&source).is_empty());

        source.set(0, pad(vec![0.0; 4], vec![0.0; 2]));
        let changes = poller.poll(&source);
        assert!(matches!(
            changes[0],
            GamepadChange::Connected {
                pad: 0,
                buttons: 4,
                axes: 2
            }
        ));

        source.set(0, None);
        let changes = poller.poll(&source);
        assert_eq!(changes, vec![GamepadChange::Disconnected { pad: 0 }]);
    }

    #[test]
    fn test_only_deltas_reported() {
        let source = FakeSource::new();
        let mut poller = GamepadPoller::new();

        source.set(0, pad(vec![0.0, 0.0], vec![0.0]));
        poller.poll(&source);

        // Same state: nothing to report
        assert!(poller.poll(&source).is_empty());

        source.set(0, pad(vec![1.0, 0.0], vec![0.0]));
        let changes = poller.poll(&source);
        assert_eq!(
            changes,
            vec![GamepadChange::Button {
                pad: 0,
                button: 0,
                value: 1.0
            }]
        );
    }

    #[test]
    fn test_axis_dead_zone() {
        let source = FakeSource::new();
        let mut poller = GamepadPoller::new();

        source.set(0, pad(vec![], vec![0.0]));
        poller.poll(&source);

        // Sub-dead-zone wiggle snaps to 0 and produces no delta
        source.set(0, pad(vec![], vec![0.04]));
        assert!(poller.poll(&source).is_empty());

        source.set(0, pad(vec![], vec![-0.5]));
        let changes = poller.poll(&source);
        assert_eq!(
            changes,
            vec![GamepadChange::Axis {
                pad: 0,
                axis: 0,
                value: -0.5
            }]
        );
    }

    #[test]
    fn test_multiple_pads_independent() {
        let source = FakeSource::new();
        let mut poller = GamepadPoller::new();

        source.set(0, pad(vec![0.0], vec![]));
        source.set(2, pad(vec![0.0], vec![]));
        let changes = poller.poll(&source);
        let connects: Vec<_> = changes
            .iter()
            .filter(|c| matches!(c, GamepadChange::Connected { .. }))
            .collect();
        assert_eq!(connects.len(), 2);
    }
}
