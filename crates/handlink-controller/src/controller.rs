//! The host controller contract.
//!
//! A simulation host owns a set of controllers, calls
//! [`Controller::simulation_step`] on each of them every frame and polls
//! [`Controller::is_done`] to decide when a commanded motion has finished.
//! Everything crosses this boundary as plain values, `bool`s and log output.

use std::sync::Arc;

use handlink_hal::Robot;

/// Rigid transform of a controlled link (position + unit quaternion `w, x, y, z`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub translation: [f64; 3],
    pub rotation: [f64; 4],
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            translation: [0.0; 3],
            rotation: [1.0, 0.0, 0.0, 0.0],
        }
    }
}

/// Multi-waypoint trajectory over a controller's DOFs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Trajectory {
    /// One DOF-value vector per waypoint.
    pub waypoints: Vec<Vec<f64>>,
    /// Seconds from the start of the trajectory, one per waypoint.
    pub times: Vec<f64>,
}

impl Trajectory {
    pub fn len(&self) -> usize {
        self.waypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }
}

/// What a simulation host expects from an actuator controller.
pub trait Controller {
    /// Attach to `robot`, controlling the DOFs at `dof_indices`.
    ///
    /// `control_transform` is non-zero when the host wants the controller to
    /// drive the robot's base transform as well.
    fn init(&mut self, robot: Arc<dyn Robot>, dof_indices: Vec<usize>, control_transform: i32)
    -> bool;

    /// Advance by `elapsed` seconds of simulated time.
    fn simulation_step(&mut self, elapsed: f64);

    /// Return to the initial state. `options` is host-defined.
    fn reset(&mut self, options: i32);

    /// `true` once the last command has finished (or there is nothing to wait on).
    fn is_done(&self) -> bool;

    /// Command the controlled DOFs (and optionally the base transform).
    fn set_desired(&mut self, values: &[f64], transform: Option<&Transform>) -> bool;

    /// Execute a trajectory.
    fn set_path(&mut self, trajectory: &Trajectory) -> bool;

    /// The attached robot, if any.
    fn robot(&self) -> Option<Arc<dyn Robot>>;

    /// The DOFs this controller drives, in command order.
    fn control_dof_indices(&self) -> &[usize];

    /// Non-zero when the controller drives the base transform.
    fn is_control_transformation(&self) -> i32;
}
