//! The contract between the controller and whatever reaches the hand driver.
//!
//! The controller never speaks rosbridge, DDS or anything else directly. It
//! calls a [`HandService`] and drains the [`HandStateReceiver`] it hands out.

use async_trait::async_trait;
use handlink_types::{HandError, HandResponse, MoveHandRequest, ResetHandRequest};

use crate::feed::HandStateReceiver;

/// Remote hand-control endpoint: two request/response calls plus a pushed
/// state feed.
///
/// # Contract
///
/// * `move_hand` / `reset_hand` – resolve once the driver answers. A
///   response with `ok == false` is still `Ok(response)`; `Err` means the
///   call itself did not complete.
///
/// * `subscribe_state` – returns a receiver on the driver's state feed. Only
///   the newest unconsumed notification is retained.
#[async_trait]
pub trait HandService: Send + Sync {
    /// Ask the driver to move the fingers.
    async fn move_hand(&self, request: MoveHandRequest) -> Result<HandResponse, HandError>;

    /// Ask the driver to reset the hand.
    async fn reset_hand(&self, request: ResetHandRequest) -> Result<HandResponse, HandError>;

    /// Subscribe to asynchronous hand-state notifications.
    fn subscribe_state(&self) -> HandStateReceiver;
}
