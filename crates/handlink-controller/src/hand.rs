//! [`HandController`] – drives a remote hand driver as a host controller.
//!
//! * **Feedback** – every [`simulation_step`][Controller::simulation_step]
//!   drains the driver's state feed without blocking, runs each notification
//!   through the [`StateCache`] rules and copies the cached positions into the
//!   controlled DOFs of the robot.
//!
//! * **Commands** – [`set_desired`][Controller::set_desired] and
//!   [`reset`][Controller::reset] are synchronous remote calls executed on a
//!   Tokio runtime handle. They block the calling thread, so the controller
//!   must be driven from a plain (non-async) simulation thread.
//!
//! Host contract violations (wrong DOF count, transforms) panic. Remote
//! failures are logged and reported as `false`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use handlink_hal::Robot;
use handlink_middleware::{HandService, HandStateReceiver};
use handlink_types::{
    HandError, HandResponse, HandState, MoveHandRequest, RemoteCall, ResetHandRequest,
};
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use crate::cache::{CacheUpdate, StateCache};
use crate::controller::{Controller, Trajectory, Transform};

/// Number of DOFs of the hand (three fingers plus spread).
pub const HAND_DOF_COUNT: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Number of DOF indices `init` must be given.
    pub dof_count: usize,
    /// Upper bound on every remote call. `None` waits for the driver
    /// indefinitely.
    pub call_timeout: Option<Duration>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            dof_count: HAND_DOF_COUNT,
            call_timeout: None,
        }
    }
}

/// Mirrors a remote hand driver into a robot and forwards commands to it.
pub struct HandController {
    service: Arc<dyn HandService>,
    runtime: Handle,
    config: ControllerConfig,
    robot: Option<Arc<dyn Robot>>,
    dof_indices: Vec<usize>,
    feed: Option<HandStateReceiver>,
    cache: StateCache,
}

impl HandController {
    /// Create an unattached controller. Remote calls run on `runtime`, which
    /// needs its time driver enabled when a call timeout is configured.
    pub fn new(service: Arc<dyn HandService>, runtime: Handle, config: ControllerConfig) -> Self {
        Self {
            service,
            runtime,
            config,
            robot: None,
            dof_indices: Vec::new(),
            feed: None,
            cache: StateCache::new(),
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// The most recently accepted hand state, if any.
    pub fn cached_state(&self) -> Option<&Arc<HandState>> {
        self.cache.get()
    }

    /// Command an absolute position for every controlled DOF.
    ///
    /// Same path as [`set_desired`][Controller::set_desired] without a
    /// transform, but returns the failure instead of logging it.
    ///
    /// # Panics
    ///
    /// If `values` does not have one entry per controlled DOF.
    pub fn command(&self, values: &[f64]) -> Result<(), HandError> {
        assert_eq!(
            values.len(),
            self.dof_indices.len(),
            "expected one value per controlled DOF"
        );
        let request = MoveHandRequest::position(values);
        debug!(positions = ?request.positions, "commanding hand");
        self.call(RemoteCall::MoveHand, self.service.move_hand(request))
    }

    /// Ask the driver to reset the hand. The cache is not touched.
    pub fn request_reset(&self) -> Result<(), HandError> {
        self.call(RemoteCall::ResetHand, self.service.reset_hand(ResetHandRequest {}))
    }

    /// Run a remote call to completion on the runtime, bounded by the
    /// configured timeout, and classify its response.
    fn call<F>(&self, call: RemoteCall, request: F) -> Result<(), HandError>
    where
        F: Future<Output = Result<HandResponse, HandError>>,
    {
        let response = match self.config.call_timeout {
            Some(after) => self
                .runtime
                .block_on(async { tokio::time::timeout(after, request).await })
                .map_err(|_| HandError::Timeout { call, after })??,
            None => self.runtime.block_on(request)?,
        };
        HandError::check(call, response)
    }

    /// Run one notification through the cache rules.
    fn handle_state(&mut self, incoming: Arc<HandState>) {
        match self.cache.apply(incoming, self.dof_indices.len()) {
            CacheUpdate::Accepted => {}
            CacheUpdate::OutOfOrder => {
                warn!("received hand state with an out-of-order timestamp; cleared cached state");
            }
            CacheUpdate::WrongLength { expected, actual } => {
                warn!(
                    expected,
                    actual, "received hand state with {actual} DOFs; expected {expected}"
                );
            }
        }
    }
}

impl Controller for HandController {
    /// # Panics
    ///
    /// If `control_transform != 0` or `dof_indices` does not hold exactly
    /// [`ControllerConfig::dof_count`] entries.
    fn init(
        &mut self,
        robot: Arc<dyn Robot>,
        dof_indices: Vec<usize>,
        control_transform: i32,
    ) -> bool {
        assert_eq!(
            control_transform, 0,
            "hand controller cannot control transformations"
        );
        assert_eq!(
            dof_indices.len(),
            self.config.dof_count,
            "hand controller needs exactly {} DOF indices",
            self.config.dof_count
        );

        info!(robot = robot.name(), dof_indices = ?dof_indices, "hand controller attached");
        self.robot = Some(robot);
        self.dof_indices = dof_indices;
        self.feed = Some(self.service.subscribe_state());
        true
    }

    fn simulation_step(&mut self, _elapsed: f64) {
        let pending = match self.feed.as_mut() {
            Some(feed) => feed.drain(),
            None => return,
        };
        for state in pending {
            self.handle_state(state);
        }

        let (Some(state), Some(robot)) = (self.cache.get(), self.robot.as_ref()) else {
            return;
        };
        let mut values = robot.dof_values();
        for (&dof, &position) in self.dof_indices.iter().zip(&state.positions) {
            assert!(
                dof < values.len(),
                "DOF index {dof} is out of range for a robot with {} DOFs",
                values.len()
            );
            values[dof] = position;
        }
        robot.set_dof_values(&values);
    }

    fn reset(&mut self, options: i32) {
        debug!(options, "resetting hand controller");
        self.cache.clear();

        if let Err(e) = self.request_reset() {
            match e.reason() {
                Some(reason) => error!(reason, "resetting hand failed: {reason}"),
                None => error!(error = %e, "resetting hand failed"),
            }
        }
    }

    fn is_done(&self) -> bool {
        self.cache.is_done()
    }

    /// # Panics
    ///
    /// If `transform` is given or `values` does not have one entry per
    /// controlled DOF. Both are checked before anything is sent.
    fn set_desired(&mut self, values: &[f64], transform: Option<&Transform>) -> bool {
        assert!(
            transform.is_none(),
            "hand controller cannot control transformations"
        );
        match self.command(values) {
            Ok(()) => true,
            Err(e) => {
                match e.reason() {
                    Some(reason) => error!(reason, "moving hand failed with error: {reason}"),
                    None => error!(error = %e, "moving hand failed with unknown error"),
                }
                false
            }
        }
    }

    fn set_path(&mut self, trajectory: &Trajectory) -> bool {
        // TODO: only warn when the trajectory actually covers the hand DOFs.
        warn!(
            waypoints = trajectory.len(),
            "hand controller does not support SetPath"
        );
        true
    }

    fn robot(&self) -> Option<Arc<dyn Robot>> {
        self.robot.clone()
    }

    fn control_dof_indices(&self) -> &[usize] {
        &self.dof_indices
    }

    fn is_control_transformation(&self) -> i32 {
        0
    }
}
