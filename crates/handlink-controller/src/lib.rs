//! `handlink-controller` – the simulation-host side of the link.
//!
//! # Modules
//!
//! - [`controller`] – [`Controller`][controller::Controller]: the contract a
//!   simulation host uses to drive and query an actuator every tick.
//! - [`cache`] – [`StateCache`][cache::StateCache]: the most recently
//!   accepted hand state and the rules that guard it.
//! - [`hand`] – [`HandController`][hand::HandController]: mirrors the remote
//!   hand driver into the robot's DOF vector and forwards commands to it.

pub mod cache;
pub mod controller;
pub mod hand;

pub use cache::{CacheUpdate, StateCache};
pub use controller::{Controller, Trajectory, Transform};
pub use hand::{ControllerConfig, HAND_DOF_COUNT, HandController};
