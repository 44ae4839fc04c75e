//! rosbridge transport to a ROS hand driver.
//!
//! [`RosbridgeHandService`] speaks the `rosbridge_server` JSON protocol over
//! a WebSocket:
//!
//! * **Outbound (commands)** – `MoveHand` / `ResetHand` become `call_service`
//!   frames tagged with a unique id; the matching `service_response` frame
//!   completes the call.
//!
//! * **Inbound (state)** – the driver's `handstate` topic is subscribed with
//!   `queue_length: 1` and every `publish` frame on it is decoded into a
//!   [`HandState`] and pushed onto the [`HandStateFeed`].
//!
//! Frame building and parsing are free functions so they can be tested
//! without a socket.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use handlink_types::{
    HandError, HandResponse, HandState, HandStatus, MoveHandRequest, RemoteCall, ResetHandRequest,
};
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::feed::{HandStateFeed, HandStateReceiver};
use crate::service::HandService;

/// ROS message type of the driver's state topic.
pub const HAND_STATE_TYPE: &str = "owd_msgs/BHState";

type CallOutcome = Result<HandResponse, HandError>;
/// In-flight calls by id; `None` once the connection has closed.
type PendingCalls = Arc<Mutex<Option<HashMap<String, oneshot::Sender<CallOutcome>>>>>;

// ────────────────────────────────────────────────────────────────────────────
// Names
// ────────────────────────────────────────────────────────────────────────────

/// Fully qualified topic and service names of one hand driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandNames {
    pub state_topic: String,
    pub move_service: String,
    pub reset_service: String,
}

impl HandNames {
    /// Resolve the driver's names under `namespace` (e.g. `"bhd"` or
    /// `"/right/bhd/"`).
    pub fn new(namespace: &str) -> Self {
        let ns = namespace.trim_matches('/');
        let prefix = if ns.is_empty() {
            String::new()
        } else {
            format!("/{ns}")
        };
        Self {
            state_topic: format!("{prefix}/handstate"),
            move_service: format!("{prefix}/MoveHand"),
            reset_service: format!("{prefix}/ResetHand"),
        }
    }

    fn service(&self, call: RemoteCall) -> &str {
        match call {
            RemoteCall::MoveHand => &self.move_service,
            RemoteCall::ResetHand => &self.reset_service,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Frames
// ────────────────────────────────────────────────────────────────────────────

/// `subscribe` frame for the hand-state topic.
pub fn subscribe_frame(names: &HandNames) -> String {
    json!({
        "op": "subscribe",
        "topic": names.state_topic,
        "type": HAND_STATE_TYPE,
        "queue_length": 1
    })
    .to_string()
}

/// `call_service` frame carrying `args`.
pub fn call_service_frame(id: &str, service: &str, args: &Value) -> String {
    json!({
        "op": "call_service",
        "id": id,
        "service": service,
        "args": args
    })
    .to_string()
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    State(HandState),
    ServiceResponse { id: String, outcome: CallOutcome },
    /// Valid JSON that is not addressed to us.
    Ignored,
}

/// Decode one inbound text frame.
pub fn parse_frame(text: &str, names: &HandNames) -> Result<InboundFrame, HandError> {
    let frame: Value =
        serde_json::from_str(text).map_err(|e| HandError::Decode(format!("invalid JSON: {e}")))?;

    match frame.get("op").and_then(Value::as_str) {
        Some("publish") => {
            let topic = frame.get("topic").and_then(Value::as_str).unwrap_or("");
            if topic != names.state_topic {
                return Ok(InboundFrame::Ignored);
            }
            let msg = frame
                .get("msg")
                .ok_or_else(|| HandError::Decode("publish frame without msg".to_string()))?;
            decode_hand_state(msg).map(InboundFrame::State)
        }
        Some("service_response") => {
            let id = frame
                .get("id")
                .and_then(Value::as_str)
                .ok_or_else(|| HandError::Decode("service_response without id".to_string()))?
                .to_string();
            Ok(InboundFrame::ServiceResponse {
                id,
                outcome: decode_service_response(&frame),
            })
        }
        _ => Ok(InboundFrame::Ignored),
    }
}

fn decode_service_response(frame: &Value) -> CallOutcome {
    let values = frame.get("values").cloned().unwrap_or(Value::Null);
    // rosbridge reports a failed call (service missing, handler threw) as
    // `result: false` with an error string in `values`.
    if !frame.get("result").and_then(Value::as_bool).unwrap_or(true) {
        let detail = match values {
            Value::String(s) => s,
            other => other.to_string(),
        };
        return Err(HandError::Transport(format!("service call failed: {detail}")));
    }
    serde_json::from_value::<HandResponse>(values)
        .map_err(|e| HandError::Decode(format!("malformed service response: {e}")))
}

/// Decode a hand-state message body.
///
/// Accepts both ROS 1 (`secs`/`nsecs`) and ROS 2 (`sec`/`nanosec`) stamps.
pub fn decode_hand_state(msg: &Value) -> Result<HandState, HandError> {
    let stamp = msg
        .get("header")
        .and_then(|h| h.get("stamp"))
        .ok_or_else(|| HandError::Decode("hand state without header.stamp".to_string()))?;
    let secs = stamp
        .get("secs")
        .or_else(|| stamp.get("sec"))
        .and_then(Value::as_i64)
        .ok_or_else(|| HandError::Decode("stamp without seconds".to_string()))?;
    let nsecs = stamp
        .get("nsecs")
        .or_else(|| stamp.get("nanosec"))
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let stamp = u32::try_from(nsecs)
        .ok()
        .and_then(|nsecs| DateTime::<Utc>::from_timestamp(secs, nsecs))
        .ok_or_else(|| HandError::Decode(format!("stamp {secs}.{nsecs} out of range")))?;

    let positions = msg
        .get("positions")
        .and_then(Value::as_array)
        .ok_or_else(|| HandError::Decode("hand state without positions".to_string()))?
        .iter()
        .map(|p| {
            p.as_f64()
                .ok_or_else(|| HandError::Decode(format!("non-numeric position {p}")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let state = msg
        .get("state")
        .and_then(Value::as_i64)
        .and_then(|s| i32::try_from(s).ok())
        .ok_or_else(|| HandError::Decode("hand state without state".to_string()))
        .and_then(HandStatus::try_from)?;

    Ok(HandState {
        stamp,
        positions,
        state,
    })
}

// ────────────────────────────────────────────────────────────────────────────
// Service
// ────────────────────────────────────────────────────────────────────────────

/// Hand driver reached through a `rosbridge_server` WebSocket.
pub struct RosbridgeHandService {
    url: String,
    names: HandNames,
    outbound: mpsc::UnboundedSender<Message>,
    pending: PendingCalls,
    feed: HandStateFeed,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl RosbridgeHandService {
    /// Connect to `url` (e.g. `"ws://localhost:9090"`) and subscribe to the
    /// driver under `namespace`.
    ///
    /// Must be called from within a Tokio runtime; the socket tasks are
    /// spawned on it.
    ///
    /// # Errors
    ///
    /// Returns [`HandError::Transport`] if the WebSocket cannot be opened or
    /// the subscription cannot be sent.
    pub async fn connect(url: &str, namespace: &str) -> Result<Self, HandError> {
        let names = HandNames::new(namespace);
        let (ws_stream, _response) = connect_async(url)
            .await
            .map_err(|e| HandError::Transport(format!("rosbridge connect to {url} failed: {e}")))?;
        let (mut ws_tx, mut ws_rx) = ws_stream.split();

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let pending: PendingCalls = Arc::new(Mutex::new(Some(HashMap::new())));
        let feed = HandStateFeed::new();

        let writer_url = url.to_string();
        let writer = tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                if let Err(e) = ws_tx.send(msg).await {
                    warn!(url = %writer_url, error = %e, "rosbridge send failed");
                    break;
                }
            }
        });

        let reader_url = url.to_string();
        let reader_names = names.clone();
        let reader_pending = Arc::clone(&pending);
        let reader_feed = feed.clone();
        let reader = tokio::spawn(async move {
            while let Some(msg) = ws_rx.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        dispatch(text.as_str(), &reader_names, &reader_pending, &reader_feed);
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(url = %reader_url, error = %e, "rosbridge receive failed");
                        break;
                    }
                }
            }
            info!(url = %reader_url, "rosbridge connection closed");
            // Dropping the senders fails every call still waiting; later
            // calls see `None` and fail without waiting.
            lock_pending(&reader_pending).take();
        });

        let service = Self {
            url: url.to_string(),
            names,
            outbound,
            pending,
            feed,
            reader,
            writer,
        };
        service.send(subscribe_frame(&service.names))?;
        info!(
            url = %service.url,
            topic = %service.names.state_topic,
            "subscribed to hand state"
        );
        Ok(service)
    }

    pub fn names(&self) -> &HandNames {
        &self.names
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// `false` once the rosbridge connection has closed.
    pub fn is_connected(&self) -> bool {
        lock_pending(&self.pending).is_some()
    }

    fn send(&self, frame: String) -> Result<(), HandError> {
        self.outbound
            .send(Message::Text(frame.into()))
            .map_err(|_| connection_closed())
    }

    async fn call(&self, call: RemoteCall, args: Value) -> CallOutcome {
        let id = format!("{call}:{}", Uuid::new_v4());
        let (tx, rx) = oneshot::channel();
        lock_pending(&self.pending)
            .as_mut()
            .ok_or_else(connection_closed)?
            .insert(id.clone(), tx);
        // Removes the entry again if the caller gives up (e.g. a timeout).
        let _guard = PendingGuard {
            pending: &self.pending,
            id: &id,
        };

        let service = self.names.service(call);
        debug!(%id, %service, "calling hand service");
        self.send(call_service_frame(&id, service, &args))?;

        rx.await.map_err(|_| connection_closed())?
    }
}

fn connection_closed() -> HandError {
    HandError::Transport("rosbridge connection closed".to_string())
}

struct PendingGuard<'a> {
    pending: &'a PendingCalls,
    id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if let Some(calls) = lock_pending(self.pending).as_mut() {
            calls.remove(self.id);
        }
    }
}

fn lock_pending(
    pending: &PendingCalls,
) -> std::sync::MutexGuard<'_, Option<HashMap<String, oneshot::Sender<CallOutcome>>>> {
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn dispatch(text: &str, names: &HandNames, pending: &PendingCalls, feed: &HandStateFeed) {
    match parse_frame(text, names) {
        Ok(InboundFrame::State(state)) => {
            feed.publish(state);
        }
        Ok(InboundFrame::ServiceResponse { id, outcome }) => {
            let waiting = lock_pending(pending).as_mut().and_then(|calls| calls.remove(&id));
            match waiting {
                Some(tx) => {
                    let _ = tx.send(outcome);
                }
                None => debug!(%id, "service response for an abandoned call"),
            }
        }
        Ok(InboundFrame::Ignored) => {}
        Err(e) => warn!(error = %e, "dropping malformed rosbridge frame"),
    }
}

impl Drop for RosbridgeHandService {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

#[async_trait]
impl HandService for RosbridgeHandService {
    async fn move_hand(&self, request: MoveHandRequest) -> CallOutcome {
        let args = serde_json::to_value(&request)
            .map_err(|e| HandError::Decode(format!("cannot encode MoveHand: {e}")))?;
        self.call(RemoteCall::MoveHand, args).await
    }

    async fn reset_hand(&self, request: ResetHandRequest) -> CallOutcome {
        let args = serde_json::to_value(request)
            .map_err(|e| HandError::Decode(format!("cannot encode ResetHand: {e}")))?;
        self.call(RemoteCall::ResetHand, args).await
    }

    fn subscribe_state(&self) -> HandStateReceiver {
        self.feed.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    fn names() -> HandNames {
        HandNames::new("bhd")
    }

    #[test]
    fn names_are_normalised() {
        assert_eq!(HandNames::new("bhd"), HandNames::new("/bhd/"));
        let n = HandNames::new("/right/bhd");
        assert_eq!(n.state_topic, "/right/bhd/handstate");
        assert_eq!(n.move_service, "/right/bhd/MoveHand");
        assert_eq!(n.reset_service, "/right/bhd/ResetHand");
        assert_eq!(HandNames::new("").state_topic, "/handstate");
    }

    #[test]
    fn subscribe_frame_requests_depth_one() {
        let frame: Value = serde_json::from_str(&subscribe_frame(&names())).unwrap();
        assert_eq!(frame["op"], "subscribe");
        assert_eq!(frame["topic"], "/bhd/handstate");
        assert_eq!(frame["type"], HAND_STATE_TYPE);
        assert_eq!(frame["queue_length"], 1);
    }

    #[test]
    fn call_service_frame_carries_move_args() {
        let args = serde_json::to_value(MoveHandRequest::position(vec![0.1, 0.2, 0.3, 0.4])).unwrap();
        let frame: Value =
            serde_json::from_str(&call_service_frame("abc", "/bhd/MoveHand", &args)).unwrap();
        assert_eq!(frame["op"], "call_service");
        assert_eq!(frame["id"], "abc");
        assert_eq!(frame["service"], "/bhd/MoveHand");
        assert_eq!(frame["args"]["movetype"], 1);
        assert_eq!(frame["args"]["positions"][3], 0.4);
    }

    #[test]
    fn parse_publish_decodes_ros1_hand_state() {
        let text = r#"{"op":"publish","topic":"/bhd/handstate","msg":{
            "header":{"seq":3,"stamp":{"secs":10,"nsecs":500},"frame_id":""},
            "state":1,"positions":[0.1,0.2,0.3,0.4]}}"#;
        let frame = parse_frame(text, &names()).unwrap();
        let InboundFrame::State(state) = frame else {
            panic!("expected a hand state, got {frame:?}");
        };
        assert_eq!(state.stamp, Utc.timestamp_opt(10, 500).unwrap());
        assert_eq!(state.positions, vec![0.1, 0.2, 0.3, 0.4]);
        assert_eq!(state.state, HandStatus::Moving);
    }

    #[test]
    fn parse_publish_accepts_ros2_stamp() {
        let text = r#"{"op":"publish","topic":"/bhd/handstate","msg":{
            "header":{"stamp":{"sec":11,"nanosec":0}},"state":2,"positions":[1,2,3,4]}}"#;
        let InboundFrame::State(state) = parse_frame(text, &names()).unwrap() else {
            panic!("expected a hand state");
        };
        assert_eq!(state.stamp, Utc.timestamp_opt(11, 0).unwrap());
        assert_eq!(state.positions, vec![1.0, 2.0, 3.0, 4.0]);
        assert!(state.state.is_done());
    }

    #[test]
    fn publish_on_other_topic_is_ignored() {
        let text = r#"{"op":"publish","topic":"/owd/waminfo","msg":{}}"#;
        assert_eq!(parse_frame(text, &names()).unwrap(), InboundFrame::Ignored);
    }

    #[test]
    fn malformed_hand_state_is_a_decode_error() {
        let text = r#"{"op":"publish","topic":"/bhd/handstate","msg":{"state":1,"positions":[0.1]}}"#;
        assert!(matches!(
            parse_frame(text, &names()),
            Err(HandError::Decode(_))
        ));
        let text = r#"{"op":"publish","topic":"/bhd/handstate","msg":{
            "header":{"stamp":{"secs":1,"nsecs":0}},"state":42,"positions":[]}}"#;
        assert!(matches!(
            parse_frame(text, &names()),
            Err(HandError::Decode(_))
        ));
        assert!(matches!(parse_frame("not json", &names()), Err(HandError::Decode(_))));
    }

    #[test]
    fn parse_service_response_with_rejection() {
        let text = r#"{"op":"service_response","service":"/bhd/MoveHand","id":"MoveHand:1",
            "values":{"ok":false,"reason":"jam"},"result":true}"#;
        let frame = parse_frame(text, &names()).unwrap();
        assert_eq!(
            frame,
            InboundFrame::ServiceResponse {
                id: "MoveHand:1".to_string(),
                outcome: Ok(HandResponse::rejected("jam")),
            }
        );
    }

    #[test]
    fn failed_service_call_is_a_transport_error() {
        let text = r#"{"op":"service_response","id":"ResetHand:1",
            "values":"Service /bhd/ResetHand does not exist","result":false}"#;
        let InboundFrame::ServiceResponse { outcome, .. } = parse_frame(text, &names()).unwrap()
        else {
            panic!("expected a service response");
        };
        let err = outcome.unwrap_err();
        assert!(matches!(err, HandError::Transport(ref m) if m.contains("does not exist")));
    }

    /// Minimal rosbridge stand-in: answers every call with `ok: true` and
    /// then publishes one hand state on the subscribed topic.
    async fn spawn_fake_rosbridge() -> Result<String, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let Ok(ws) = accept_async(stream).await else {
                return;
            };
            let (mut tx, mut rx) = ws.split();
            let mut topic = Value::Null;
            while let Some(Ok(Message::Text(text))) = rx.next().await {
                let frame: Value = serde_json::from_str(text.as_str()).unwrap_or(Value::Null);
                let replies = match frame["op"].as_str() {
                    Some("subscribe") => {
                        topic = frame["topic"].clone();
                        continue;
                    }
                    Some("call_service") => [
                        json!({
                            "op": "service_response",
                            "service": frame["service"],
                            "id": frame["id"],
                            "values": {"ok": true, "reason": ""},
                            "result": true
                        }),
                        json!({
                            "op": "publish",
                            "topic": topic,
                            "msg": {
                                "header": {"stamp": {"secs": 42, "nsecs": 0}},
                                "state": 2,
                                "positions": [0.5, 0.6, 0.7, 0.8]
                            }
                        }),
                    ],
                    _ => continue,
                };
                for reply in replies {
                    if tx.send(Message::Text(reply.to_string().into())).await.is_err() {
                        return;
                    }
                }
            }
        });
        Ok(format!("ws://{addr}"))
    }

    #[tokio::test]
    async fn round_trip_against_fake_rosbridge() -> Result<(), Box<dyn std::error::Error>> {
        let url = spawn_fake_rosbridge().await?;
        let service = RosbridgeHandService::connect(&url, "bhd").await?;
        let mut feed = service.subscribe_state();

        let resp = service
            .move_hand(MoveHandRequest::position(vec![0.5, 0.6, 0.7, 0.8]))
            .await?;
        assert!(resp.ok);

        let state = tokio::time::timeout(std::time::Duration::from_secs(2), feed.recv())
            .await?
            .ok_or("feed closed")?;
        assert_eq!(state.stamp, Utc.timestamp_opt(42, 0).unwrap());
        assert_eq!(state.positions, vec![0.5, 0.6, 0.7, 0.8]);

        let resp = service.reset_hand(ResetHandRequest {}).await?;
        assert!(resp.ok);
        assert!(lock_pending(&service.pending).as_ref().is_some_and(HashMap::is_empty));
        Ok(())
    }

    /// rosbridge stand-in that closes the socket after the subscription
    /// (`on_call == false`) or instead of answering the first call.
    async fn spawn_closing_rosbridge(on_call: bool) -> Result<String, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let Ok(mut ws) = accept_async(stream).await else {
                return;
            };
            while let Some(Ok(Message::Text(text))) = ws.next().await {
                let frame: Value = serde_json::from_str(text.as_str()).unwrap_or(Value::Null);
                let op = frame["op"].as_str();
                if (on_call && op == Some("call_service")) || (!on_call && op == Some("subscribe")) {
                    let _ = ws.close(None).await;
                    break;
                }
            }
            // Drain until the client finishes the close handshake.
            while let Some(Ok(_)) = ws.next().await {}
        });
        Ok(format!("ws://{addr}"))
    }

    #[tokio::test]
    async fn pending_call_fails_when_connection_closes() -> Result<(), Box<dyn std::error::Error>> {
        let url = spawn_closing_rosbridge(true).await?;
        let service = RosbridgeHandService::connect(&url, "bhd").await?;

        let outcome = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            service.move_hand(MoveHandRequest::position(vec![0.0; 4])),
        )
        .await?;

        assert!(matches!(outcome, Err(HandError::Transport(_))), "got {outcome:?}");
        assert!(!service.is_connected());
        Ok(())
    }

    #[tokio::test]
    async fn call_after_close_fails_immediately() -> Result<(), Box<dyn std::error::Error>> {
        let url = spawn_closing_rosbridge(false).await?;
        let service = RosbridgeHandService::connect(&url, "bhd").await?;

        tokio::time::timeout(std::time::Duration::from_secs(2), async {
            while service.is_connected() {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await?;

        let outcome = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            service.move_hand(MoveHandRequest::position(vec![0.0; 4])),
        )
        .await?;
        assert!(matches!(outcome, Err(HandError::Transport(_))), "got {outcome:?}");

        let outcome = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            service.reset_hand(ResetHandRequest {}),
        )
        .await?;
        assert!(matches!(outcome, Err(HandError::Transport(_))), "got {outcome:?}");
        Ok(())
    }

    #[tokio::test]
    async fn connect_to_closed_port_is_a_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = RosbridgeHandService::connect(&format!("ws://{addr}"), "bhd").await;
        assert!(matches!(result, Err(HandError::Transport(_))));
    }
}
