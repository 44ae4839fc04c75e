//! `handlink-types` – shared wire messages and the common error type.
//!
//! These mirror the hand driver's ROS message and service definitions
//! (`BHState`, `MoveHand`, `ResetHand`) closely enough that every transport in
//! `handlink-middleware` can translate them without loss.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Completion state reported by the hand driver with every state message.
///
/// Encoded on the wire as the driver's integer constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum HandStatus {
    Uninitialized,
    Moving,
    Done,
    Stalled,
    Fault,
}

impl HandStatus {
    /// `true` only for [`HandStatus::Done`].
    pub fn is_done(self) -> bool {
        self == HandStatus::Done
    }
}

impl TryFrom<i32> for HandStatus {
    type Error = HandError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(HandStatus::Uninitialized),
            1 => Ok(HandStatus::Moving),
            2 => Ok(HandStatus::Done),
            3 => Ok(HandStatus::Stalled),
            4 => Ok(HandStatus::Fault),
            other => Err(HandError::Decode(format!("unknown hand state {other}"))),
        }
    }
}

impl From<HandStatus> for i32 {
    fn from(status: HandStatus) -> Self {
        match status {
            HandStatus::Uninitialized => 0,
            HandStatus::Moving => 1,
            HandStatus::Done => 2,
            HandStatus::Stalled => 3,
            HandStatus::Fault => 4,
        }
    }
}

/// One asynchronous state notification pushed by the hand driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandState {
    /// Header stamp of the message.
    pub stamp: DateTime<Utc>,
    /// Joint positions, one per controlled DOF.
    pub positions: Vec<f64>,
    pub state: HandStatus,
}

/// Kind of motion requested from the hand driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum MoveType {
    /// Move every finger to an absolute position.
    Position,
    Velocity,
}

impl TryFrom<u8> for MoveType {
    type Error = HandError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(MoveType::Position),
            2 => Ok(MoveType::Velocity),
            other => Err(HandError::Decode(format!("unknown move type {other}"))),
        }
    }
}

impl From<MoveType> for u8 {
    fn from(kind: MoveType) -> Self {
        match kind {
            MoveType::Position => 1,
            MoveType::Velocity => 2,
        }
    }
}

/// Request payload of the `MoveHand` service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveHandRequest {
    #[serde(rename = "movetype")]
    pub move_type: MoveType,
    pub positions: Vec<f64>,
}

impl MoveHandRequest {
    /// Absolute-position move with one target per DOF.
    pub fn position(positions: impl Into<Vec<f64>>) -> Self {
        Self {
            move_type: MoveType::Position,
            positions: positions.into(),
        }
    }
}

/// Request payload of the `ResetHand` service. Always empty.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetHandRequest {}

/// Response shared by `MoveHand` and `ResetHand`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandResponse {
    pub ok: bool,
    /// Failure reason; empty when the driver supplied none.
    #[serde(default)]
    pub reason: String,
}

impl HandResponse {
    pub fn accepted() -> Self {
        Self {
            ok: true,
            reason: String::new(),
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            reason: reason.into(),
        }
    }
}

/// The remote calls the hand driver exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteCall {
    MoveHand,
    ResetHand,
}

impl fmt::Display for RemoteCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteCall::MoveHand => write!(f, "MoveHand"),
            RemoteCall::ResetHand => write!(f, "ResetHand"),
        }
    }
}

/// Operational failures of the hand link.
///
/// Contract violations (wrong DOF count, unsupported transforms) are not
/// represented here; they panic at the controller boundary.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HandError {
    #[error("{call} timed out after {after:?}")]
    Timeout { call: RemoteCall, after: Duration },

    #[error("{call} rejected: {}", reason.as_deref().unwrap_or("no reason given"))]
    Rejected {
        call: RemoteCall,
        reason: Option<String>,
    },

    #[error("Transport Error: {0}")]
    Transport(String),

    #[error("Decode Error: {0}")]
    Decode(String),

    #[error("Config Error: {0}")]
    Config(String),
}

impl HandError {
    /// Classify a completed call: `Ok(())` when the driver accepted it,
    /// [`HandError::Rejected`] otherwise.
    pub fn check(call: RemoteCall, response: HandResponse) -> Result<(), HandError> {
        if response.ok {
            return Ok(());
        }
        let reason = (!response.reason.is_empty()).then_some(response.reason);
        Err(HandError::Rejected { call, reason })
    }

    /// The driver-supplied reason, if this error carries one.
    pub fn reason(&self) -> Option<&str> {
        match self {
            HandError::Rejected { reason, .. } => reason.as_deref(),
            _ => None,
        }
    }
}
