//! Movement gate between consecutive positions.

use locotrack_daemon_protocol::Position;
use serde::{Deserialize, Serialize};

/// Default per-axis tolerance in degrees: below GPS jitter for a moving
/// train, above the noise of one idling in place.
pub const DEFAULT_EPSILON_DEGREES: f64 = 1e-4;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MovementPolicy {
    pub epsilon_degrees: f64,
}

impl Default for MovementPolicy {
    fn default() -> Self {
        Self {
            epsilon_degrees: DEFAULT_EPSILON_DEGREES,
        }
    }
}

impl MovementPolicy {
    pub fn new(epsilon_degrees: f64) -> Self {
        Self { epsilon_degrees }
    }

    pub fn has_moved(&self, last: Option<&Position>, current: &Position) -> bool {
        has_moved(last, current, self.epsilon_degrees)
    }
}

/// True when there is no previous position or either axis differs by strictly
/// more than `epsilon`.
pub fn has_moved(last: Option<&Position>, current: &Position, epsilon: f64) -> bool {
    match last {
        None => true,
        Some(last) => {
            (last.lat - current.lat).abs() > epsilon || (last.lng - current.lng).abs() > epsilon
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_previous_position_counts_as_moved() {
        let policy = MovementPolicy::default();
        assert!(policy.has_moved(None, &Position::new(28.61, 77.20)));
        assert!(policy.has_moved(None, &Position::new(0.0, 0.0)));
    }

    #[test]
    fn identical_positions_have_not_moved() {
        let policy = MovementPolicy::default();
        for position in [
            Position::new(28.61, 77.20),
            Position::new(-33.86, 151.21),
            Position::new(0.0, 0.0),
        ] {
            assert!(!policy.has_moved(Some(&position), &position));
        }
    }

    #[test]
    fn flips_at_the_tolerance_boundary() {
        let origin = Position::new(0.0, 0.0);
        let policy = MovementPolicy::default();

        assert!(!policy.has_moved(Some(&origin), &Position::new(0.99e-4, 0.0)));
        assert!(!policy.has_moved(Some(&origin), &Position::new(1e-4, 0.0)));
        assert!(policy.has_moved(Some(&origin), &Position::new(1.01e-4, 0.0)));

        assert!(!policy.has_moved(Some(&origin), &Position::new(0.0, -1e-4)));
        assert!(policy.has_moved(Some(&origin), &Position::new(0.0, -1.01e-4)));
    }

    #[test]
    fn either_axis_is_enough() {
        let last = Position::new(28.61, 77.20);
        assert!(has_moved(Some(&last), &Position::new(28.61, 77.21), 1e-4));
        assert!(has_moved(Some(&last), &Position::new(28.62, 77.20), 1e-4));
    }

    #[test]
    fn tolerance_is_configurable() {
        let last = Position::new(28.61, 77.20);
        let current = Position::new(28.6105, 77.20);
        assert!(MovementPolicy::default().has_moved(Some(&last), &current));
        assert!(!MovementPolicy::new(1e-3).has_moved(Some(&last), &current));
    }
}
