//! Scripted transport for tests.
//!
//! Each call to [`StreamTransport::connect`] consumes the next scripted
//! outcome. Accepted connections are fed through a [`MockFeed`]; once the
//! script runs out, further attempts are refused.

use crate::error::Error;
use crate::sample::LocationSample;
use crate::transport::{Frame, FrameStream, StreamRequest, StreamTransport};
use crate::Result;
use futures_util::StreamExt;
use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::mpsc;
use tokio::time::Instant;

enum Outcome {
    Accept(mpsc::UnboundedReceiver<Result<Frame>>),
    Refuse(String),
    Hang,
}

/// A recorded connection attempt
#[derive(Debug, Clone)]
pub struct ConnectAttempt {
    pub request: StreamRequest,
    pub at: Instant,
}

/// Transport whose connection outcomes are scripted in advance
#[derive(Default)]
pub struct MockTransport {
    script: Mutex<VecDeque<Outcome>>,
    attempts: Mutex<Vec<ConnectAttempt>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script an accepted connection; push frames through the returned feed
    pub fn accept(&self) -> MockFeed {
        let (tx, rx) = mpsc::unbounded_channel();
        self.script.lock().push_back(Outcome::Accept(rx));
        MockFeed { tx }
    }

    /// Script a refused connection
    pub fn refuse(&self, reason: impl Into<String>) {
        self.script.lock().push_back(Outcome::Refuse(reason.into()));
    }

    /// Script a connection attempt that never completes
    pub fn hang(&self) {
        self.script.lock().push_back(Outcome::Hang);
    }

    /// All connection attempts so far
    pub fn attempts(&self) -> Vec<ConnectAttempt> {
        self.attempts.lock().clone()
    }

    /// Number of connection attempts so far
    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().len()
    }
}

impl StreamTransport for MockTransport {
    async fn connect(&self, request: &StreamRequest) -> Result<FrameStream> {
        self.attempts.lock().push(ConnectAttempt {
            request: request.clone(),
            at: Instant::now(),
        });

        let outcome = self.script.lock().pop_front();
        let refused = |reason: String| Error::ConnectionFailed {
            endpoint: request.url.to_string(),
            reason,
        };

        match outcome {
            Some(Outcome::Accept(rx)) => Ok(futures_util::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            })
            .boxed()),
            Some(Outcome::Refuse(reason)) => Err(refused(reason)),
            Some(Outcome::Hang) => {
                std::future::pending::<()>().await;
                Err(refused("unreachable".to_string()))
            }
            None => Err(refused("no scripted connection".to_string())),
        }
    }
}

/// Sending side of a scripted connection.
///
/// Dropping the feed ends the stream, like a server going away.
#[derive(Clone)]
pub struct MockFeed {
    tx: mpsc::UnboundedSender<Result<Frame>>,
}

impl MockFeed {
    /// Push a sample encoded with the short wire field names
    pub fn send_sample(&self, sample: &LocationSample) -> bool {
        let payload = serde_json::json!({
            "lat": sample.latitude,
            "long": sample.longitude,
            "t": sample.timestamp,
        });
        self.send_raw(payload.to_string())
    }

    /// Push a raw payload
    pub fn send_raw(&self, payload: impl Into<String>) -> bool {
        self.tx.send(Ok(Frame::Payload(payload.into()))).is_ok()
    }

    /// Push a keep-alive
    pub fn keep_alive(&self) -> bool {
        self.tx.send(Ok(Frame::KeepAlive)).is_ok()
    }

    /// Push a close frame
    pub fn close(&self) -> bool {
        self.tx.send(Ok(Frame::Close)).is_ok()
    }

    /// Fail the stream with a transport error
    pub fn fail(&self) -> bool {
        self.tx.send(Err(Error::StreamClosed)).is_ok()
    }

    /// Whether the receiving stream is gone
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
