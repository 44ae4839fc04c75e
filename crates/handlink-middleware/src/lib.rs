//! `handlink-middleware` – transport to the remote hand driver.
//!
//! Carries commands out to the hand driver and its state feed back in,
//! without interpreting either.
//!
//! # Modules
//!
//! - [`service`] – [`HandService`]: the request/response + feed contract
//!   every transport implements.
//! - [`feed`] – [`HandStateFeed`]: depth-1, newest-wins notification buffer
//!   built on a Tokio broadcast channel.
//! - [`sim`] – [`SimHandService`]: in-process hand driver for headless runs.
//! - [`rosbridge`] – [`RosbridgeHandService`]: talks to a ROS hand driver
//!   through a `rosbridge_server` WebSocket.

pub mod feed;
pub mod rosbridge;
pub mod service;
pub mod sim;

pub use feed::{HandStateFeed, HandStateReceiver};
pub use rosbridge::{HandNames, RosbridgeHandService};
pub use service::HandService;
pub use sim::SimHandService;
