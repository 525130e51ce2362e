//! Consumer dispatcher: one task per producer session.
//!
//! ```text
//! Listener.accept() ──► [permit] ──► run_session ──► Processor.process (batch 1)
//!                                         │          Processor.process (batch 2) ...
//!                                         └─► Summary reply ──► SessionReport channel
//! ```
//!
//! Within a session, batch k+1 is not read until batch k's processing has
//! resolved. Sessions run concurrently up to `max_sessions`; further
//! connections wait in the listen backlog until a slot frees up.
//!
//! A processing failure is recorded in the session's [`SessionReport`] and the
//! batch still counts toward the summary. Only transport failures abort a
//! session. The report counts every failure but keeps details for the most
//! recent [`RETAINED_FAILURES`] only.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use hl_core::session::InboundSession;
use hl_core::transport::{Listener, Transport};
use hl_core::{HlError, Summary};
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::Processor;

/// Progress is logged every this many batches per session.
const PROGRESS_EVERY: u64 = 10;

/// Failure details kept per session; older ones are only counted.
pub const RETAINED_FAILURES: usize = 32;

/// Pause after a failed `accept` so a persistent error does not spin.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// A batch whose processing failed. It is still counted in the summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFailure {
    /// Zero-based position of the batch within its session.
    pub batch_index: u64,
    pub item_count: usize,
    pub reason: String,
}

/// Outcome of one completed session.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub peer: String,
    pub summary: Summary,
    /// Batches whose processing failed, over the whole session.
    pub failed_batches: u64,
    /// The most recent failures, oldest first, at most [`RETAINED_FAILURES`].
    pub failures: VecDeque<BatchFailure>,
}

pub type SessionReportSender = mpsc::UnboundedSender<SessionReport>;
pub type SessionReportReceiver = mpsc::UnboundedReceiver<SessionReport>;

/// Accepts sessions and dispatches their batches to a shared processor.
pub struct Dispatcher {
    processor: Arc<dyn Processor>,
    max_sessions: usize,
    report_tx: SessionReportSender,
}

impl Dispatcher {
    /// Create a dispatcher.
    ///
    /// Returns the dispatcher and a receiver for a [`SessionReport`] per
    /// completed session. Dropping the receiver is fine; reports are then
    /// only logged.
    pub fn new(processor: Arc<dyn Processor>, max_sessions: usize) -> (Self, SessionReportReceiver) {
        let (report_tx, report_rx) = mpsc::unbounded_channel();
        (Self { processor, max_sessions: max_sessions.max(1), report_tx }, report_rx)
    }

    /// Accept and serve sessions until `shutdown` changes or its sender drops.
    ///
    /// Sessions still running at shutdown are aborted.
    pub async fn serve(&self, listener: Box<dyn Listener>, mut shutdown: watch::Receiver<bool>) {
        let limiter = Arc::new(Semaphore::new(self.max_sessions));
        let mut sessions = JoinSet::new();

        info!(
            "[dispatcher] serving {} with processor '{}' (max {} concurrent sessions)",
            listener.local_endpoint(),
            self.processor.name(),
            self.max_sessions,
        );

        loop {
            let permit = tokio::select! {
                _ = shutdown.changed() => break,
                permit = limiter.clone().acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => break,
                },
            };

            let transport = tokio::select! {
                _ = shutdown.changed() => break,
                accepted = listener.accept() => match accepted {
                    Ok(t) => t,
                    Err(e) => {
                        warn!("[dispatcher] {e}");
                        tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                        continue;
                    }
                },
                Some(joined) = sessions.join_next() => {
                    if let Err(e) = joined {
                        error!("[dispatcher] session task failed: {e}");
                    }
                    continue;
                }
            };

            let processor = self.processor.clone();
            let report_tx = self.report_tx.clone();
            sessions.spawn(async move {
                let _permit = permit;
                match run_session(processor.as_ref(), transport).await {
                    Ok(report) => {
                        if report_tx.send(report).is_err() {
                            debug!("[dispatcher] report receiver dropped");
                        }
                    }
                    Err(e) => warn!("[dispatcher] session aborted: {e}"),
                }
            });
        }

        info!("[dispatcher] shutting down ({} session(s) in flight)", sessions.len());
        sessions.shutdown().await;
    }
}

/// Serve one session to completion.
///
/// Returns the report once the summary has been sent, or the transport error
/// that aborted the session.
pub async fn run_session(processor: &dyn Processor, transport: Box<dyn Transport>) -> Result<SessionReport, HlError> {
    let mut session = InboundSession::accept(transport);
    let mut summary = Summary::default();
    let mut failed_batches = 0u64;
    let mut failures = VecDeque::with_capacity(RETAINED_FAILURES);

    while let Some(batch) = session.next_batch().await? {
        let batch_index = summary.batch_count;
        let item_count = batch.len();
        info!(
            "[dispatcher] received batch {} with {item_count} headline(s) (timestamp: {})",
            batch_index + 1,
            batch.created_at_ms
        );

        match processor.process(&batch).await {
            Ok(outcome) => debug!("[dispatcher] batch {} produced {} inference(s)", batch_index + 1, outcome.inferences.len()),
            Err(e) => {
                warn!("[dispatcher] batch {} failed processing: {e}", batch_index + 1);
                failed_batches += 1;
                if failures.len() == RETAINED_FAILURES {
                    failures.pop_front();
                }
                failures.push_back(BatchFailure { batch_index, item_count, reason: e.to_string() });
            }
        }

        summary.record(item_count);
        if summary.batch_count % PROGRESS_EVERY == 0 {
            info!("[dispatcher] progress: {} batches, {} headlines processed", summary.batch_count, summary.processed_count);
        }
    }

    session.complete(summary).await?;
    info!("[dispatcher] stream complete: processed {summary} ({failed_batches} failed)");

    Ok(SessionReport { session_id: session.id(), peer: session.peer().to_string(), summary, failed_batches, failures })
}
