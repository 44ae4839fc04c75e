//! In-process simulated hand driver for CI and headless runs.
//!
//! [`SimHandService`] answers `MoveHand` / `ResetHand` like the real driver
//! would and pushes the resulting hand states onto its feed, so the whole
//! controller stack can be exercised without ROS or hardware.
//!
//! # Example
//!
//! ```rust
//! use handlink_middleware::{HandService, SimHandService};
//! use handlink_types::MoveHandRequest;
//!
//! let rt = tokio::runtime::Runtime::new().unwrap();
//! let hand = SimHandService::new(4);
//! let mut feed = hand.subscribe_state();
//!
//! let response = rt
//!     .block_on(hand.move_hand(MoveHandRequest::position(vec![1.0, 1.0, 1.0, 0.5])))
//!     .unwrap();
//! assert!(response.ok);
//! assert!(feed.try_next().unwrap().state.is_done());
//! ```

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use handlink_types::{
    HandError, HandResponse, HandState, HandStatus, MoveHandRequest, MoveType, ResetHandRequest,
};
use tracing::{debug, info};

use crate::feed::{HandStateFeed, HandStateReceiver};
use crate::service::HandService;

/// How the next call will be answered.
#[derive(Debug, Clone, Default)]
enum Behaviour {
    #[default]
    Normal,
    /// Answer the next call with `ok == false` and this reason.
    FailNext(String),
    /// Never answer any call.
    Stalled,
}

#[derive(Debug)]
struct SimHand {
    positions: Vec<f64>,
    last_stamp: DateTime<Utc>,
    behaviour: Behaviour,
    moves: Vec<MoveHandRequest>,
    resets: usize,
}

/// A simulated hand driver. Moves complete instantly.
pub struct SimHandService {
    dof_count: usize,
    feed: HandStateFeed,
    hand: Mutex<SimHand>,
}

impl SimHandService {
    /// Create a simulated hand with `dof_count` fingers/spread joints at zero.
    pub fn new(dof_count: usize) -> Self {
        Self {
            dof_count,
            feed: HandStateFeed::new(),
            hand: Mutex::new(SimHand {
                positions: vec![0.0; dof_count],
                last_stamp: DateTime::<Utc>::MIN_UTC,
                behaviour: Behaviour::Normal,
                moves: Vec::new(),
                resets: 0,
            }),
        }
    }

    /// The feed this driver publishes on. Tests use it to inject arbitrary
    /// notifications.
    pub fn feed(&self) -> &HandStateFeed {
        &self.feed
    }

    /// Push an arbitrary notification onto the feed.
    pub fn publish(&self, state: HandState) -> usize {
        self.feed.publish(state)
    }

    /// Answer the next call with `ok == false` and `reason`.
    pub fn fail_next(&self, reason: impl Into<String>) {
        self.lock().behaviour = Behaviour::FailNext(reason.into());
    }

    /// Stop answering calls altogether.
    pub fn stall(&self) {
        self.lock().behaviour = Behaviour::Stalled;
    }

    /// Every `MoveHand` request received so far, including rejected ones.
    pub fn moves(&self) -> Vec<MoveHandRequest> {
        self.lock().moves.clone()
    }

    /// Number of `ResetHand` requests received so far.
    pub fn reset_count(&self) -> usize {
        self.lock().resets
    }

    /// Current simulated finger positions.
    pub fn positions(&self) -> Vec<f64> {
        self.lock().positions.clone()
    }

    fn lock(&self) -> MutexGuard<'_, SimHand> {
        self.hand.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Consume the one-shot failure, if any. `None` means "stall".
    fn take_behaviour(hand: &mut SimHand) -> Option<Result<(), String>> {
        match std::mem::take(&mut hand.behaviour) {
            Behaviour::Normal => Some(Ok(())),
            Behaviour::FailNext(reason) => Some(Err(reason)),
            Behaviour::Stalled => {
                hand.behaviour = Behaviour::Stalled;
                None
            }
        }
    }

    fn publish_current(&self, hand: &mut SimHand, state: HandStatus) {
        // Strictly increasing stamps even when the wall clock does not move.
        let now = Utc::now();
        let stamp = if now > hand.last_stamp {
            now
        } else {
            hand.last_stamp + TimeDelta::microseconds(1)
        };
        hand.last_stamp = stamp;
        self.feed.publish(HandState {
            stamp,
            positions: hand.positions.clone(),
            state,
        });
    }
}

#[async_trait]
impl HandService for SimHandService {
    async fn move_hand(&self, request: MoveHandRequest) -> Result<HandResponse, HandError> {
        let response = {
            let mut hand = self.lock();
            hand.moves.push(request.clone());
            match Self::take_behaviour(&mut hand) {
                None => None,
                Some(Err(reason)) => Some(HandResponse::rejected(reason)),
                Some(Ok(())) if request.move_type != MoveType::Position => {
                    Some(HandResponse::rejected("velocity moves are not supported"))
                }
                Some(Ok(())) if request.positions.len() != self.dof_count => {
                    Some(HandResponse::rejected(format!(
                        "expected {} positions, got {}",
                        self.dof_count,
                        request.positions.len()
                    )))
                }
                Some(Ok(())) => {
                    self.publish_current(&mut hand, HandStatus::Moving);
                    hand.positions = request.positions.clone();
                    self.publish_current(&mut hand, HandStatus::Done);
                    info!(positions = ?request.positions, "sim hand moved");
                    Some(HandResponse::accepted())
                }
            }
        };

        match response {
            Some(response) => Ok(response),
            None => {
                debug!("sim hand stalled; MoveHand will never be answered");
                std::future::pending().await
            }
        }
    }

    async fn reset_hand(&self, _request: ResetHandRequest) -> Result<HandResponse, HandError> {
        let response = {
            let mut hand = self.lock();
            hand.resets += 1;
            match Self::take_behaviour(&mut hand) {
                None => None,
                Some(Err(reason)) => Some(HandResponse::rejected(reason)),
                Some(Ok(())) => {
                    hand.positions = vec![0.0; self.dof_count];
                    self.publish_current(&mut hand, HandStatus::Done);
                    info!("sim hand reset");
                    Some(HandResponse::accepted())
                }
            }
        };

        match response {
            Some(response) => Ok(response),
            None => {
                debug!("sim hand stalled; ResetHand will never be answered");
                std::future::pending().await
            }
        }
    }

    fn subscribe_state(&self) -> HandStateReceiver {
        self.feed.subscribe()
    }
}
