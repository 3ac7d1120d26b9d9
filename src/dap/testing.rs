//! Scripted adapter for unit tests: every request is answered by a closure.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;

use super::protocol::{ProtocolMessage, Request, Response};
use super::{CorrelationRouter, TransportChannel};

pub(crate) enum Reply {
    Body(Value),
    Fail(String),
    Ignore,
}

pub(crate) struct MockAdapter {
    pub router: CorrelationRouter,
    requests: Arc<Mutex<Vec<Request>>>,
}

impl MockAdapter {
    pub fn commands(&self) -> Vec<String> {
        self.requests.lock().unwrap().iter().map(|r| r.command.clone()).collect()
    }

    pub fn requests_for(&self, command: &str) -> Vec<Request> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.command == command)
            .cloned()
            .collect()
    }
}

pub(crate) fn mock_adapter<F>(handler: F) -> MockAdapter
where
    F: FnMut(&Request) -> Reply + Send + 'static,
{
    mock_adapter_with_timeout(Duration::from_secs(5), handler)
}

/// `Reply::Ignore` leaves a request unanswered until `request_timeout` expires.
pub(crate) fn mock_adapter_with_timeout<F>(request_timeout: Duration, mut handler: F) -> MockAdapter
where
    F: FnMut(&Request) -> Reply + Send + 'static,
{
    let (ours, theirs) = tokio::io::duplex(64 * 1024);
    let router = CorrelationRouter::new(TransportChannel::from_stream(ours), request_timeout);
    let requests = Arc::new(Mutex::new(Vec::new()));
    let log = requests.clone();

    tokio::spawn(async move {
        let TransportChannel { mut reader, writer } = TransportChannel::from_stream(theirs);
        let mut seq = 0;
        while let Ok(message) = reader.receive().await {
            let ProtocolMessage::Request(request) = message else {
                continue;
            };
            log.lock().unwrap().push(request.clone());

            let (success, message, body) = match handler(&request) {
                Reply::Body(body) => (true, None, Some(body)),
                Reply::Fail(message) => (false, Some(message), None),
                Reply::Ignore => continue,
            };
            seq += 1;
            let response = ProtocolMessage::Response(Response {
                seq,
                request_seq: request.seq,
                command: request.command.clone(),
                success,
                message,
                body,
            });
            if writer.send(&response).await.is_err() {
                break;
            }
        }
    });

    MockAdapter { router, requests }
}
