//! Request/response correlation over a single adapter connection
//!
//! Every outgoing request gets the next sequence number and a waiter registered
//! *before* the frame is written, so a fast response can never miss it. A single
//! background task drains the connection: responses resolve their waiter, anything
//! else is published on a broadcast event stream. When the connection fails every
//! outstanding waiter is resolved with the terminal error.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::protocol::{
    Event, EventClass, ExitedEventBody, OutputEventBody, ProtocolMessage, Request, Response,
    StoppedEventBody,
};
use super::transport::{FrameReader, FrameWriter, TransportChannel};
use crate::error::{DebugError, Result, TransportError};

const EVENT_BUFFER: usize = 256;

/// Latest execution state reported by the adapter's events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionStatus {
    Unknown,
    Running,
    Stopped { thread_id: Option<i64>, reason: String },
    Exited { exit_code: i64 },
    Terminated { exit_code: Option<i64> },
}

type Waiter = oneshot::Sender<Result<Response>>;

struct RouterState {
    pending: HashMap<i64, Waiter>,
    events: Option<broadcast::Sender<Event>>,
    closed: Option<TransportError>,
}

pub(crate) struct RouterShared {
    state: Mutex<RouterState>,
    status: watch::Sender<ExecutionStatus>,
}

impl RouterShared {
    fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let (status, _) = watch::channel(ExecutionStatus::Unknown);
        Self {
            state: Mutex::new(RouterState {
                pending: HashMap::new(),
                events: Some(events),
                closed: None,
            }),
            status,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RouterState> {
        // A poisoned lock only means a panic elsewhere; the table itself is still consistent
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn register(&self, seq: i64) -> std::result::Result<oneshot::Receiver<Result<Response>>, TransportError> {
        let mut state = self.lock();
        if let Some(reason) = &state.closed {
            return Err(reason.clone());
        }
        let (tx, rx) = oneshot::channel();
        state.pending.insert(seq, tx);
        Ok(rx)
    }

    /// Demultiplex one inbound message. Never blocks.
    pub(crate) fn on_message(&self, message: ProtocolMessage) {
        match message {
            ProtocolMessage::Response(response) => self.resolve(response),
            ProtocolMessage::Event(event) => self.publish(event),
            ProtocolMessage::Request(request) => {
                // Reverse requests (runInTerminal, startDebugging) are not supported
                warn!("Ignoring reverse request '{}' from adapter", request.command);
            }
        }
    }

    fn resolve(&self, response: Response) {
        let waiter = self.lock().pending.remove(&response.request_seq);
        let Some(waiter) = waiter else {
            warn!(
                "Discarding response to '{}' with no pending request (request_seq {})",
                response.command, response.request_seq
            );
            return;
        };

        let outcome = if response.success {
            Ok(response)
        } else {
            Err(DebugError::Protocol {
                message: response.error_message(),
                command: response.command,
            })
        };
        // The caller may have given up waiting; that is not an error here
        let _ = waiter.send(outcome);
    }

    fn publish(&self, event: Event) {
        self.track_status(&event);

        if event.class() == EventClass::Output {
            if let Some(body) = event.body_as::<OutputEventBody>() {
                debug!(
                    "adapter output [{}]: {}",
                    body.category.as_deref().unwrap_or("console"),
                    body.output.trim_end()
                );
            }
        }

        let state = self.lock();
        if let Some(events) = &state.events {
            // No subscribers means nobody is waiting: the event is dropped
            let _ = events.send(event);
        }
    }

    fn track_status(&self, event: &Event) {
        match event.class() {
            EventClass::Stopped => {
                let body: StoppedEventBody = event.body_as().unwrap_or_default();
                self.status.send_replace(ExecutionStatus::Stopped {
                    thread_id: body.thread_id,
                    reason: body.reason,
                });
            }
            EventClass::Continued => {
                self.status.send_replace(ExecutionStatus::Running);
            }
            EventClass::Exited => {
                let body: ExitedEventBody = event.body_as().unwrap_or_default();
                self.status.send_replace(ExecutionStatus::Exited { exit_code: body.exit_code });
            }
            EventClass::Terminated => {
                self.status.send_modify(|status| {
                    let exit_code = match status {
                        ExecutionStatus::Exited { exit_code } => Some(*exit_code),
                        ExecutionStatus::Terminated { exit_code } => *exit_code,
                        _ => None,
                    };
                    *status = ExecutionStatus::Terminated { exit_code };
                });
            }
            _ => {}
        }
    }

    /// Resolve every outstanding waiter with `reason` and close the event stream.
    /// Idempotent: only the first terminal reason is kept.
    pub(crate) fn terminate(&self, reason: TransportError) {
        let drained: Vec<(i64, Waiter)> = {
            let mut state = self.lock();
            if state.closed.is_none() {
                state.closed = Some(reason.clone());
            }
            state.events = None;
            state.pending.drain().collect()
        };

        if !drained.is_empty() {
            debug!("Failing {} pending request(s): {}", drained.len(), reason);
        }
        for (_, waiter) in drained {
            let _ = waiter.send(Err(DebugError::Transport(reason.clone())));
        }
    }

    fn closed_reason(&self) -> Option<TransportError> {
        self.lock().closed.clone()
    }

    fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }
}

/// Handle for one in-flight request.
#[derive(Debug)]
pub struct PendingRequest {
    seq: i64,
    command: String,
    rx: oneshot::Receiver<Result<Response>>,
}

impl PendingRequest {
    pub fn seq(&self) -> i64 {
        self.seq
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Wait for the request to be resolved.
    pub async fn response(self) -> Result<Response> {
        match self.rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(TransportError::ConnectionClosed.into()),
        }
    }
}

/// A cursor into the event stream, positioned at the moment it was created.
pub struct EventSubscription {
    rx: broadcast::Receiver<Event>,
    shared: Arc<RouterShared>,
}

impl EventSubscription {
    /// Wait for the next event whose class is one of `classes`; others are skipped.
    pub async fn next_matching(&mut self, classes: &[EventClass]) -> Result<Event> {
        loop {
            match self.rx.recv().await {
                Ok(event) if classes.contains(&event.class()) => return Ok(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Event subscriber lagged, {} event(s) dropped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    let reason = self
                        .shared
                        .closed_reason()
                        .unwrap_or(TransportError::ConnectionClosed);
                    return Err(reason.into());
                }
            }
        }
    }

    /// Like [`next_matching`](Self::next_matching) but bounded.
    pub async fn next_matching_within(
        &mut self,
        classes: &[EventClass],
        limit: Option<Duration>,
    ) -> Result<Event> {
        match limit {
            Some(limit) => tokio::time::timeout(limit, self.next_matching(classes))
                .await
                .map_err(|_| DebugError::Timeout(limit))?,
            None => self.next_matching(classes).await,
        }
    }
}

/// Correlates requests with responses on one adapter connection.
pub struct CorrelationRouter {
    shared: Arc<RouterShared>,
    writer: FrameWriter,
    next_seq: AtomicI64,
    request_timeout: Duration,
    reader_task: JoinHandle<()>,
}

impl CorrelationRouter {
    /// Take ownership of a connection and start the reader loop.
    pub fn new(channel: TransportChannel, request_timeout: Duration) -> Self {
        let shared = Arc::new(RouterShared::new());
        let reader_task = tokio::spawn(reader_loop(channel.reader, shared.clone()));

        Self {
            shared,
            writer: channel.writer,
            next_seq: AtomicI64::new(1),
            request_timeout,
            reader_task,
        }
    }

    /// Allocate a sequence number, register its waiter, then write the request.
    pub async fn send_request(&self, command: &str, arguments: Option<Value>) -> Result<PendingRequest> {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let rx = self.shared.register(seq)?;

        let message = ProtocolMessage::Request(Request {
            seq,
            command: command.to_string(),
            arguments,
        });
        debug!("DAP request #{} {}", seq, command);

        if let Err(e) = self.writer.send(&message).await {
            warn!("Failed to send '{}': {}", command, e);
            self.shared.terminate(e.clone());
            return Err(e.into());
        }

        Ok(PendingRequest {
            seq,
            command: command.to_string(),
            rx,
        })
    }

    /// Send a request and wait (bounded by the request timeout) for its response.
    pub async fn request_ack<A: Serialize>(&self, command: &str, arguments: &A) -> Result<Response> {
        self.request_ack_within(command, arguments, self.request_timeout).await
    }

    /// Send a request and wait at most `limit` for its response.
    pub async fn request_ack_within<A: Serialize>(
        &self,
        command: &str,
        arguments: &A,
        limit: Duration,
    ) -> Result<Response> {
        let arguments = serde_json::to_value(arguments)?;
        let arguments = if arguments.is_null() { None } else { Some(arguments) };
        let pending = self.send_request(command, arguments).await?;

        tokio::time::timeout(limit, pending.response())
            .await
            .map_err(|_| {
                warn!("'{}' got no response within {:?}", command, limit);
                DebugError::Timeout(limit)
            })?
    }

    /// Send a request and decode its response body.
    pub async fn request<A: Serialize, T: DeserializeOwned>(&self, command: &str, arguments: &A) -> Result<T> {
        let response = self.request_ack(command, arguments).await?;
        let body = response.body.unwrap_or(Value::Null);
        serde_json::from_value(body).map_err(|e| DebugError::UnexpectedResponse {
            command: command.to_string(),
            reason: e.to_string(),
        })
    }

    /// Start observing events from this point on.
    pub fn subscribe(&self) -> Result<EventSubscription> {
        let state = self.shared.lock();
        match &state.events {
            Some(events) => Ok(EventSubscription {
                rx: events.subscribe(),
                shared: self.shared.clone(),
            }),
            None => Err(state
                .closed
                .clone()
                .unwrap_or(TransportError::ConnectionClosed)
                .into()),
        }
    }

    pub fn status(&self) -> ExecutionStatus {
        self.shared.status.borrow().clone()
    }

    /// Overwrite the tracked status after an operation that implies a new one.
    pub fn set_status(&self, status: ExecutionStatus) {
        self.shared.status.send_replace(status);
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed_reason().is_some()
    }

    pub fn pending_count(&self) -> usize {
        self.shared.pending_count()
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Close the connection and fail everything still waiting on it.
    pub async fn shutdown(&self) {
        self.writer.close().await;
        self.shared.terminate(TransportError::Shutdown);
        self.reader_task.abort();
    }
}

impl Drop for CorrelationRouter {
    fn drop(&mut self) {
        self.shared.terminate(TransportError::Shutdown);
        self.reader_task.abort();
    }
}

async fn reader_loop(mut reader: FrameReader, shared: Arc<RouterShared>) {
    loop {
        match reader.receive().await {
            Ok(message) => shared.on_message(message),
            Err(e) => {
                match &e {
                    TransportError::ConnectionClosed => info!("Debug adapter closed the connection"),
                    other => warn!("Adapter connection failed: {}", other),
                }
                shared.terminate(e);
                return;
            }
        }
    }
}
