//! Depth-1 hand-state feed.
//!
//! Uses a [`tokio::sync::broadcast`] channel of capacity one: publishing
//! never blocks, and a notification nobody consumed yet is overwritten by the
//! next one. Receivers see the overwrite as a lag, which they skip.

use std::sync::Arc;

use handlink_types::HandState;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::debug;

/// Number of unconsumed notifications retained per receiver.
pub const FEED_DEPTH: usize = 1;

/// Publishing side of the feed. Clone it cheaply; all clones share the same
/// channel.
#[derive(Clone, Debug)]
pub struct HandStateFeed {
    sender: broadcast::Sender<Arc<HandState>>,
}

impl HandStateFeed {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(FEED_DEPTH);
        Self { sender }
    }

    /// Publish a notification.
    ///
    /// Returns the number of receivers that were handed it; `0` when nobody
    /// is subscribed, which is a normal condition.
    pub fn publish(&self, state: HandState) -> usize {
        self.publish_shared(Arc::new(state))
    }

    /// Publish an already shared notification.
    pub fn publish_shared(&self, state: Arc<HandState>) -> usize {
        self.sender.send(state).unwrap_or(0)
    }

    /// Open a new receiver. It only sees notifications published after this
    /// call.
    pub fn subscribe(&self) -> HandStateReceiver {
        HandStateReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for HandStateFeed {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side of the feed.
pub struct HandStateReceiver {
    receiver: broadcast::Receiver<Arc<HandState>>,
}

impl HandStateReceiver {
    /// Take the next pending notification without blocking.
    ///
    /// Returns `None` when nothing is pending or the feed has shut down.
    pub fn try_next(&mut self) -> Option<Arc<HandState>> {
        loop {
            match self.receiver.try_recv() {
                Ok(state) => return Some(state),
                Err(TryRecvError::Lagged(n)) => {
                    debug!(dropped = n, "hand state feed overwrote unconsumed notifications");
                    continue;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Take every pending notification, oldest first, without blocking.
    pub fn drain(&mut self) -> Vec<Arc<HandState>> {
        std::iter::from_fn(|| self.try_next()).collect()
    }

    /// Wait for the next notification.
    ///
    /// Returns `None` once the feed has shut down.
    pub async fn recv(&mut self) -> Option<Arc<HandState>> {
        loop {
            match self.receiver.recv().await {
                Ok(state) => return Some(state),
                Err(RecvError::Lagged(n)) => {
                    debug!(dropped = n, "hand state feed overwrote unconsumed notifications");
                    continue;
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
