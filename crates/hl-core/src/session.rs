//! Session lifecycle over one transport.
//!
//! A producer-side [`Session`] moves through
//!
//! ```text
//! Idle ──open──► Open ──send──► Streaming ──finish──► Closing ──summary──► Closed
//!                  │                │                    │
//!                  └────────────────┴─── transport error ┴──► Failed
//! ```
//!
//! A failed session never reconnects; the caller builds a new one. Sends are
//! written and flushed before `send` returns, so submission order is wire order.
//!
//! [`InboundSession`] is the consumer-side mirror: it starts `Open`, yields
//! batches until the producer's end-of-stream marker, and closes after
//! replying with the summary.

use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::HlError;
use crate::transport::{self, ConnectOptions, Endpoint, Transport};
use crate::types::{Batch, Summary};
use crate::wire::Frame;

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    Open,
    Streaming,
    Closing,
    Closed,
    Failed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Open => "open",
            Self::Streaming => "streaming",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Session (producer side)
// ---------------------------------------------------------------------------

/// Producer-side session owning exactly one transport.
pub struct Session {
    id: Uuid,
    endpoint: Endpoint,
    options: ConnectOptions,
    state: SessionState,
    transport: Option<Box<dyn Transport>>,
    batches_sent: u64,
    items_sent: u64,
}

impl Session {
    /// Create an idle session. No connection is made until [`open`](Self::open).
    pub fn new(endpoint: Endpoint, options: ConnectOptions) -> Self {
        Self {
            id: Uuid::new_v4(),
            endpoint,
            options,
            state: SessionState::Idle,
            transport: None,
            batches_sent: 0,
            items_sent: 0,
        }
    }

    /// Create and open a session in one step.
    pub async fn connect(endpoint: Endpoint, options: ConnectOptions) -> Result<Self, HlError> {
        let mut session = Self::new(endpoint, options);
        session.open().await?;
        Ok(session)
    }

    /// Establish the transport: `Idle → Open`.
    ///
    /// On failure the session stays `Idle` and the endpoint error is returned.
    pub async fn open(&mut self) -> Result<(), HlError> {
        if self.state != SessionState::Idle {
            return Err(HlError::InvalidState { op: "open", state: self.state });
        }
        let transport = transport::connect(&self.endpoint, &self.options).await?;
        info!("[session {}] open ({} via {})", self.short_id(), self.endpoint, transport.kind());
        self.transport = Some(transport);
        self.state = SessionState::Open;
        Ok(())
    }

    /// Transmit one batch: `Open | Streaming → Streaming`.
    ///
    /// The batch is consumed; nothing is retained after it is written. A
    /// connectivity error moves the session to `Failed`. A codec error (e.g.
    /// an oversized batch) is returned without touching the state since
    /// nothing was written.
    pub async fn send(&mut self, batch: Batch) -> Result<(), HlError> {
        if !matches!(self.state, SessionState::Open | SessionState::Streaming) {
            return Err(HlError::InvalidState { op: "send", state: self.state });
        }

        let item_count = batch.len();
        let frame = Frame::Batch(batch);
        let result = match self.transport.as_mut() {
            Some(t) => t.send(&frame).await,
            None => Err(HlError::TransportFailure("transport missing".into())),
        };
        drop(frame);

        match result {
            Ok(()) => {
                self.state = SessionState::Streaming;
                self.batches_sent += 1;
                self.items_sent += item_count as u64;
                debug!("[session {}] sent batch #{} ({item_count} items)", self.short_id(), self.batches_sent);
                Ok(())
            }
            Err(e) if e.is_transport() => Err(self.fail(e)),
            Err(e) => Err(e),
        }
    }

    /// Signal end-of-stream and wait for the peer's summary:
    /// `Open | Streaming → Closing → Closed`.
    ///
    /// Waiting is bounded by [`ConnectOptions::summary_timeout`].
    pub async fn finish(&mut self) -> Result<Summary, HlError> {
        if !matches!(self.state, SessionState::Open | SessionState::Streaming) {
            return Err(HlError::InvalidState { op: "finish", state: self.state });
        }
        self.state = SessionState::Closing;

        let summary_timeout = self.options.summary_timeout;
        let Some(transport) = self.transport.as_mut() else {
            return Err(self.fail(HlError::TransportFailure("transport missing".into())));
        };

        let result = exchange_end_of_stream(transport, summary_timeout).await;
        match result {
            Ok(summary) => {
                if let Some(mut t) = self.transport.take()
                    && let Err(e) = t.close().await
                {
                    debug!("[session {}] close after summary: {e}", self.short_id());
                }
                self.state = SessionState::Closed;
                info!(
                    "[session {}] closed after {} batch(es) / {} item(s), peer acknowledged {summary}",
                    self.short_id(),
                    self.batches_sent,
                    self.items_sent
                );
                Ok(summary)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Batches written so far (not necessarily acknowledged).
    pub fn batches_sent(&self) -> u64 {
        self.batches_sent
    }

    pub fn items_sent(&self) -> u64 {
        self.items_sent
    }

    pub fn is_usable(&self) -> bool {
        matches!(self.state, SessionState::Open | SessionState::Streaming)
    }

    fn fail(&mut self, err: HlError) -> HlError {
        warn!("[session {}] failed in state {}: {err}", self.short_id(), self.state);
        self.state = SessionState::Failed;
        self.transport = None;
        err
    }

    fn short_id(&self) -> String {
        short_id(&self.id)
    }
}

// ---------------------------------------------------------------------------
// InboundSession (consumer side)
// ---------------------------------------------------------------------------

/// Consumer-side session wrapping one accepted transport.
pub struct InboundSession {
    id: Uuid,
    peer: String,
    state: SessionState,
    transport: Option<Box<dyn Transport>>,
}

impl InboundSession {
    /// Wrap a freshly accepted transport. Starts in `Open`.
    pub fn accept(transport: Box<dyn Transport>) -> Self {
        let id = Uuid::new_v4();
        let peer = transport.peer();
        info!("[session {}] accepted from {peer} ({})", short_id(&id), transport.kind());
        Self { id, peer, state: SessionState::Open, transport: Some(transport) }
    }

    /// Next batch in arrival order, or `None` once the producer signalled
    /// end-of-stream (`→ Closing`).
    ///
    /// EOF or any frame other than a batch / end-of-stream fails the session.
    pub async fn next_batch(&mut self) -> Result<Option<Batch>, HlError> {
        if !matches!(self.state, SessionState::Open | SessionState::Streaming) {
            return Err(HlError::InvalidState { op: "receive", state: self.state });
        }

        let received = match self.transport.as_mut() {
            Some(t) => t.recv().await,
            None => Err(HlError::TransportFailure("transport missing".into())),
        };

        match received {
            Ok(Some(Frame::Batch(batch))) => {
                self.state = SessionState::Streaming;
                Ok(Some(batch))
            }
            Ok(Some(Frame::EndOfStream)) => {
                self.state = SessionState::Closing;
                debug!("[session {}] end of stream", short_id(&self.id));
                Ok(None)
            }
            Ok(Some(Frame::Summary(_))) => {
                Err(self.fail(HlError::TransportFailure("producer sent a summary frame".into())))
            }
            Ok(None) => Err(self.fail(HlError::TransportFailure("producer disconnected before end of stream".into()))),
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Reply with the summary and release the transport: `Closing → Closed`.
    pub async fn complete(&mut self, summary: Summary) -> Result<(), HlError> {
        if self.state != SessionState::Closing {
            return Err(HlError::InvalidState { op: "complete", state: self.state });
        }
        let Some(mut transport) = self.transport.take() else {
            return Err(self.fail(HlError::TransportFailure("transport missing".into())));
        };
        if let Err(e) = transport.send(&Frame::Summary(summary)).await {
            return Err(self.fail(e));
        }
        if let Err(e) = transport.close().await {
            debug!("[session {}] close after summary: {e}", short_id(&self.id));
        }
        self.state = SessionState::Closed;
        Ok(())
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn fail(&mut self, err: HlError) -> HlError {
        warn!("[session {}] failed in state {}: {err}", short_id(&self.id), self.state);
        self.state = SessionState::Failed;
        self.transport = None;
        err
    }
}

/// Send end-of-stream and wait (bounded) for the peer's summary frame.
async fn exchange_end_of_stream(
    transport: &mut Box<dyn Transport>,
    summary_timeout: std::time::Duration,
) -> Result<Summary, HlError> {
    transport.send(&Frame::EndOfStream).await?;
    match timeout(summary_timeout, transport.recv()).await {
        Err(_) => Err(HlError::TransportFailure(format!("no summary within {summary_timeout:?}"))),
        Ok(Err(e)) => Err(e),
        Ok(Ok(None)) => Err(HlError::TransportFailure("peer closed before sending summary".into())),
        Ok(Ok(Some(Frame::Summary(summary)))) => Ok(summary),
        Ok(Ok(Some(other))) => {
            Err(HlError::TransportFailure(format!("expected summary, got {:?}", other.message_type())))
        }
    }
}

/// First 8 hex digits of a session id, enough to correlate log lines.
fn short_id(id: &Uuid) -> String {
    let mut s = id.simple().to_string();
    s.truncate(8);
    s
}
