//! `handlink-hal` – the robot side of the link.
//!
//! # Modules
//!
//! - [`robot`] – [`Robot`][robot::Robot]: the DOF-vector contract a
//!   simulated (or real) robot exposes to controllers.
//! - [`sim`] – [`SimRobot`][sim::SimRobot]: an in-memory robot for headless
//!   tests and the CLI.

pub mod robot;
pub mod sim;

pub use robot::Robot;
pub use sim::SimRobot;
