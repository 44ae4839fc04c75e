//! In-process simulated robot for CI and the CLI's headless mode.
//!
//! # Example
//!
//! ```rust
//! use handlink_hal::{Robot, SimRobot};
//!
//! let robot = SimRobot::new("barrett_wam", 11);
//! let mut values = robot.dof_values();
//! values[7] = 0.5;
//! robot.set_dof_values(&values);
//! assert_eq!(robot.dof_values()[7], 0.5);
//! ```

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{trace, warn};

use crate::robot::Robot;

/// A simulated robot holding its DOF vector in memory.
///
/// Counts every write so tests can tell whether a controller touched the
/// robot during a tick.
pub struct SimRobot {
    name: String,
    values: Mutex<Vec<f64>>,
    writes: AtomicUsize,
}

impl SimRobot {
    /// Create a robot with `dof_count` joints, all at zero.
    pub fn new(name: impl Into<String>, dof_count: usize) -> Self {
        Self::with_values(name, vec![0.0; dof_count])
    }

    /// Create a robot starting from the given joint values.
    pub fn with_values(name: impl Into<String>, values: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            values: Mutex::new(values),
            writes: AtomicUsize::new(0),
        }
    }

    /// Number of [`set_dof_values`][Robot::set_dof_values] calls so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<f64>> {
        // A poisoned lock only means a panicking writer; the vector is still
        // a valid snapshot.
        self.values.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Robot for SimRobot {
    fn name(&self) -> &str {
        &self.name
    }

    fn dof_values(&self) -> Vec<f64> {
        self.lock().clone()
    }

    fn set_dof_values(&self, values: &[f64]) {
        let mut current = self.lock();
        if values.len() != current.len() {
            warn!(
                robot = %self.name,
                expected = current.len(),
                actual = values.len(),
                "ignoring DOF vector of the wrong length"
            );
            return;
        }
        current.copy_from_slice(values);
        self.writes.fetch_add(1, Ordering::SeqCst);
        trace!(robot = %self.name, values = ?values, "dof values written");
    }

    fn dof_count(&self) -> usize {
        self.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_robot_starts_at_zero() {
        let robot = SimRobot::new("test", 4);
        assert_eq!(robot.dof_values(), vec![0.0; 4]);
        assert_eq!(robot.dof_count(), 4);
        assert_eq!(robot.name(), "test");
        assert_eq!(robot.write_count(), 0);
    }

    #[test]
    fn set_dof_values_records_write() {
        let robot = SimRobot::new("test", 3);
        robot.set_dof_values(&[0.1, 0.2, 0.3]);
        assert_eq!(robot.dof_values(), vec![0.1, 0.2, 0.3]);
        assert_eq!(robot.write_count(), 1);
    }

    #[test]
    fn wrong_length_write_is_ignored() {
        let robot = SimRobot::with_values("test", vec![1.0, 2.0]);
        robot.set_dof_values(&[9.0, 9.0, 9.0]);
        assert_eq!(robot.dof_values(), vec![1.0, 2.0]);
        assert_eq!(robot.write_count(), 0);
    }
}
