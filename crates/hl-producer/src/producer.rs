//! Producer loop: poll, deduplicate, batch, stream.
//!
//! Each cycle:
//! 1. Make sure a usable [`Session`] exists, reconnecting if the previous one
//!    failed. The first attempt after a failure is immediate; consecutive
//!    failed attempts back off exponentially up to a cap.
//! 2. Fetch every configured symbol in order. A failing symbol is logged and
//!    skipped; the others still go through.
//! 3. Assemble the round into at most one batch and send it.
//! 4. Sleep for whatever is left of the poll interval (never negative).
//!
//! Transport and fetch errors never stop the loop. While no session is
//! available the cycle skips polling altogether, so no headline is marked as
//! seen before it has had a send attempt. A batch whose send fails because the
//! session dropped is held and goes out first on the next session; at most one
//! batch is ever held.

use std::time::Duration;

use ahash::AHashMap;
use hl_core::backoff::Backoff;
use hl_core::config::AppConfig;
use hl_core::session::{Session, SessionState};
use hl_core::transport::{ConnectOptions, Endpoint};
use hl_core::{Batch, HlError, Item, Summary};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::Fetcher;
use crate::assembler::BatchAssembler;

/// Everything the producer loop needs besides the fetcher.
#[derive(Debug, Clone)]
pub struct ProducerSettings {
    pub symbols: Vec<String>,
    pub poll_interval: Duration,
    pub window_size: usize,
    pub endpoint: Endpoint,
    pub connect: ConnectOptions,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
}

impl ProducerSettings {
    pub fn from_config(config: &AppConfig) -> Result<Self, HlError> {
        let p = &config.producer;
        Ok(Self {
            symbols: p.symbols.clone(),
            poll_interval: p.poll_interval(),
            window_size: p.window_size,
            endpoint: config.transport.endpoint()?,
            connect: config.transport.connect_options(),
            backoff_initial: Duration::from_millis(p.backoff_initial_ms),
            backoff_max: Duration::from_millis(p.backoff_max_ms),
        })
    }
}

/// Running counters, logged on shutdown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProducerStats {
    pub cycles: u64,
    pub batches_sent: u64,
    pub items_sent: u64,
    pub fetch_failures: u64,
    /// Batches the session rejected outright (e.g. oversized).
    pub batches_dropped: u64,
    /// Batches held back after a lost session, to be resent.
    pub batches_deferred: u64,
    pub sessions_opened: u64,
    pub sessions_failed: u64,
    pub connect_failures: u64,
}

/// What one cycle did with its round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// A batch of `items` items was written to the session.
    Sent { items: usize },
    /// Nothing new this round; no batch was built.
    NothingNew,
    /// No session could be opened; the round was not polled.
    Disconnected,
    /// The session dropped during the send; the batch is held for the next one.
    Deferred { items: usize },
    /// The session rejected the batch and it was discarded.
    Dropped { items: usize },
}

/// The long-running producer control loop.
pub struct ProducerLoop {
    settings: ProducerSettings,
    fetcher: Box<dyn Fetcher>,
    assembler: BatchAssembler,
    session: Option<Session>,
    /// Batch whose send failed with the session, resent before anything else.
    pending: Option<Batch>,
    backoff: Backoff,
    /// Earliest time for the next connect attempt after a failed one.
    retry_at: Option<Instant>,
    stats: ProducerStats,
}

impl ProducerLoop {
    pub fn new(settings: ProducerSettings, fetcher: Box<dyn Fetcher>) -> Self {
        let assembler = BatchAssembler::new(settings.symbols.clone(), settings.window_size);
        let backoff = Backoff::new(settings.backoff_initial, settings.backoff_max);
        Self {
            settings,
            fetcher,
            assembler,
            session: None,
            pending: None,
            backoff,
            retry_at: None,
            stats: ProducerStats::default(),
        }
    }

    /// Run cycles until `shutdown` flips to `true` (or its sender is dropped),
    /// then finish the session and return its summary, if one was open.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Option<Summary> {
        info!(
            "[producer] streaming {:?} from {} to {} every {:?}",
            self.settings.symbols,
            self.fetcher.name(),
            self.settings.endpoint,
            self.settings.poll_interval,
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            let started = Instant::now();
            self.run_cycle().await;

            let pause = remaining_sleep(self.settings.poll_interval, started.elapsed());
            if pause.is_zero() {
                debug!("[producer] cycle overran the poll interval, continuing immediately");
                continue;
            }
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("[producer] shutting down after {} cycle(s): {:?}", self.stats.cycles, self.stats);
        self.close().await
    }

    /// One poll / assemble / send cycle.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        self.stats.cycles += 1;
        self.ensure_session().await;
        if self.session.is_none() {
            debug!("[producer] no session, skipping this poll");
            return CycleOutcome::Disconnected;
        }

        let mut resent = 0;
        if let Some(batch) = self.pending.take() {
            info!("[producer] resending held batch of {} headline(s)", batch.len());
            match self.deliver(batch).await {
                CycleOutcome::Sent { items } => resent = items,
                outcome => return outcome,
            }
        }

        let round = self.fetch_round().await;
        match self.assembler.assemble(&round) {
            Some(batch) => match self.deliver(batch).await {
                CycleOutcome::Sent { items } => CycleOutcome::Sent { items: items + resent },
                outcome => outcome,
            },
            None if resent > 0 => CycleOutcome::Sent { items: resent },
            None => {
                debug!("[producer] no new headlines in this poll");
                CycleOutcome::NothingNew
            }
        }
    }

    /// Finish the current session, if usable, and return the peer's summary.
    pub async fn close(&mut self) -> Option<Summary> {
        if let Some(batch) = self.pending.take() {
            warn!("[producer] discarding held batch of {} headline(s) at shutdown", batch.len());
        }
        let mut session = self.session.take()?;
        if !session.is_usable() {
            return None;
        }
        match session.finish().await {
            Ok(summary) => {
                info!("[producer] streaming complete: processed {summary}");
                Some(summary)
            }
            Err(e) => {
                warn!("[producer] could not close session cleanly: {e}");
                None
            }
        }
    }

    pub fn stats(&self) -> &ProducerStats {
        &self.stats
    }

    pub fn session_state(&self) -> Option<SessionState> {
        self.session.as_ref().map(Session::state)
    }

    async fn ensure_session(&mut self) {
        if self.session.as_ref().is_some_and(Session::is_usable) {
            return;
        }
        self.session = None;

        if let Some(at) = self.retry_at
            && Instant::now() < at
        {
            return;
        }

        match Session::connect(self.settings.endpoint.clone(), self.settings.connect.clone()).await {
            Ok(session) => {
                self.stats.sessions_opened += 1;
                self.backoff.reset();
                self.retry_at = None;
                self.session = Some(session);
            }
            Err(e) => {
                self.stats.connect_failures += 1;
                let delay = self.backoff.next_delay();
                self.retry_at = Some(Instant::now() + delay);
                warn!("[producer] cannot open session to {}: {e}; next attempt in {delay:?}", self.settings.endpoint);
            }
        }
    }

    async fn fetch_round(&mut self) -> AHashMap<String, Vec<Item>> {
        let mut round = AHashMap::with_capacity(self.settings.symbols.len());
        for symbol in &self.settings.symbols {
            match self.fetcher.fetch(symbol).await {
                Ok(items) => {
                    debug!("[producer] retrieved {} headline(s) for {symbol}", items.len());
                    round.insert(symbol.clone(), items);
                }
                Err(e) => {
                    self.stats.fetch_failures += 1;
                    warn!("[producer] error fetching headlines for {symbol}: {e}");
                }
            }
        }
        round
    }

    async fn deliver(&mut self, batch: Batch) -> CycleOutcome {
        let items = batch.len();
        let Some(session) = self.session.as_mut() else {
            self.stats.batches_deferred += 1;
            self.pending = Some(batch);
            return CycleOutcome::Deferred { items };
        };

        let result = session.send(batch.clone()).await;
        let failed = session.state() == SessionState::Failed;
        match result {
            Ok(()) => {
                self.stats.batches_sent += 1;
                self.stats.items_sent += items as u64;
                info!("[producer] sent batch with {items} new headline(s)");
                CycleOutcome::Sent { items }
            }
            Err(e) if failed => {
                self.stats.sessions_failed += 1;
                self.stats.batches_deferred += 1;
                self.session = None;
                self.pending = Some(batch);
                warn!("[producer] session lost ({e}); holding {items} headline(s) for the next session");
                CycleOutcome::Deferred { items }
            }
            Err(e) => {
                self.stats.batches_dropped += 1;
                warn!("[producer] batch of {items} headline(s) rejected: {e}");
                CycleOutcome::Dropped { items }
            }
        }
    }
}

/// Time left in the poll interval after `elapsed` of work, floored at zero.
pub fn remaining_sleep(interval: Duration, elapsed: Duration) -> Duration {
    interval.saturating_sub(elapsed)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use hl_core::session::InboundSession;
    use hl_core::transport::{Listener, bind};
    use hl_core::wire::DEFAULT_MAX_FRAME_LEN;

    use super::*;

    /// Per-symbol queues of canned responses; an exhausted queue returns no items.
    #[derive(Default)]
    struct ScriptedFetcher {
        script: Mutex<AHashMap<String, VecDeque<Result<Vec<Item>, String>>>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedFetcher {
        fn push(&self, symbol: &str, response: Result<&[(&str, i64)], &str>) {
            let response: Result<Vec<Item>, String> = response
                .map(|items| items.iter().map(|(t, ts)| Item::new(symbol, *t, *ts)).collect())
                .map_err(str::to_string);
            self.script.lock().unwrap().entry(symbol.to_string()).or_default().push_back(response);
        }
    }

    #[async_trait]
    impl Fetcher for std::sync::Arc<ScriptedFetcher> {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn fetch(&self, symbol: &str) -> Result<Vec<Item>, HlError> {
            self.calls.lock().unwrap().push(symbol.to_string());
            let next = self.script.lock().unwrap().get_mut(symbol).and_then(VecDeque::pop_front);
            match next {
                None => Ok(Vec::new()),
                Some(Ok(items)) => Ok(items),
                Some(Err(reason)) => Err(HlError::FetchFailure { symbol: symbol.to_string(), reason }),
            }
        }
    }

    fn settings(endpoint: Endpoint, symbols: &[&str]) -> ProducerSettings {
        ProducerSettings {
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
            poll_interval: Duration::from_millis(20),
            window_size: 100,
            endpoint,
            connect: ConnectOptions { connect_timeout: Duration::from_millis(500), ..ConnectOptions::default() },
            backoff_initial: Duration::from_millis(100),
            backoff_max: Duration::from_secs(1),
        }
    }

    /// Accept one session and record every batch's headline texts.
    fn spawn_recording_peer(listener: Box<dyn Listener>) -> tokio::task::JoinHandle<(Vec<Vec<String>>, Summary)> {
        tokio::spawn(async move {
            let mut inbound = InboundSession::accept(listener.accept().await.unwrap());
            let mut batches = Vec::new();
            let mut summary = Summary::default();
            while let Some(b) = inbound.next_batch().await.unwrap() {
                summary.record(b.len());
                batches.push(b.items.into_iter().map(|i| i.text).collect());
            }
            inbound.complete(summary).await.unwrap();
            (batches, summary)
        })
    }

    async fn tcp_listener() -> Box<dyn Listener> {
        bind(&Endpoint::Remote { host: "127.0.0.1".into(), port: 0 }, DEFAULT_MAX_FRAME_LEN).await.unwrap()
    }

    #[tokio::test]
    async fn dedups_across_cycles_and_reports_summary() {
        let listener = tcp_listener().await;
        let endpoint = listener.local_endpoint();
        let peer = spawn_recording_peer(listener);

        let fetcher = std::sync::Arc::new(ScriptedFetcher::default());
        fetcher.push("S1", Ok(&[("I1", 1), ("I2", 2)]));
        fetcher.push("S2", Ok(&[("I3", 3)]));
        fetcher.push("S1", Ok(&[("I1", 1), ("I4", 4)]));

        let mut producer = ProducerLoop::new(settings(endpoint, &["S1", "S2"]), Box::new(fetcher.clone()));
        assert_eq!(producer.run_cycle().await, CycleOutcome::Sent { items: 3 });
        assert_eq!(producer.run_cycle().await, CycleOutcome::Sent { items: 1 });
        assert_eq!(producer.run_cycle().await, CycleOutcome::NothingNew);

        let summary = producer.close().await.unwrap();
        assert_eq!(summary, Summary { processed_count: 4, batch_count: 2 });

        let (batches, peer_summary) = peer.await.unwrap();
        assert_eq!(batches, vec![vec!["I1", "I2", "I3"], vec!["I4"]]);
        assert_eq!(peer_summary, summary);
        assert_eq!(*fetcher.calls.lock().unwrap(), ["S1", "S2", "S1", "S2", "S1", "S2"]);
    }

    #[tokio::test]
    async fn failing_symbol_does_not_stall_others() {
        let listener = tcp_listener().await;
        let endpoint = listener.local_endpoint();
        let peer = spawn_recording_peer(listener);

        let fetcher = std::sync::Arc::new(ScriptedFetcher::default());
        fetcher.push("S1", Err("HTTP 429"));
        fetcher.push("S2", Ok(&[("b", 1)]));

        let mut producer = ProducerLoop::new(settings(endpoint, &["S1", "S2"]), Box::new(fetcher));
        assert_eq!(producer.run_cycle().await, CycleOutcome::Sent { items: 1 });
        assert_eq!(producer.stats().fetch_failures, 1);

        producer.close().await.unwrap();
        let (batches, _) = peer.await.unwrap();
        assert_eq!(batches, vec![vec!["b"]]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn outage_skips_polling_until_reconnected() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = Endpoint::Local(dir.path().join("consumer.sock"));

        // Upstream keeps offering the same headlines throughout.
        let fetcher = std::sync::Arc::new(ScriptedFetcher::default());
        for _ in 0..4 {
            fetcher.push("S1", Ok(&[("a", 1), ("b", 2)]));
        }

        let mut producer = ProducerLoop::new(settings(endpoint.clone(), &["S1"]), Box::new(fetcher.clone()));

        assert_eq!(producer.run_cycle().await, CycleOutcome::Disconnected);
        assert_eq!(producer.stats().connect_failures, 1);

        // Still inside the backoff window: no new attempt.
        assert_eq!(producer.run_cycle().await, CycleOutcome::Disconnected);
        assert_eq!(producer.stats().connect_failures, 1);
        assert_eq!(producer.session_state(), None);
        assert!(fetcher.calls.lock().unwrap().is_empty());

        let listener = bind(&endpoint, DEFAULT_MAX_FRAME_LEN).await.unwrap();
        let peer = spawn_recording_peer(listener);
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(producer.run_cycle().await, CycleOutcome::Sent { items: 2 });
        assert_eq!(producer.session_state(), Some(SessionState::Streaming));
        assert_eq!(producer.run_cycle().await, CycleOutcome::NothingNew);
        assert_eq!(producer.stats().sessions_opened, 1);

        let summary = producer.close().await.unwrap();
        assert_eq!(summary, Summary { processed_count: 2, batch_count: 1 });
        let (batches, _) = peer.await.unwrap();
        assert_eq!(batches, vec![vec!["a", "b"]]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn batch_from_lost_session_goes_out_on_the_next() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = Endpoint::Local(dir.path().join("consumer.sock"));
        let listener = bind(&endpoint, DEFAULT_MAX_FRAME_LEN).await.unwrap();

        let (hung_up_tx, hung_up_rx) = tokio::sync::oneshot::channel();
        let peer = tokio::spawn(async move {
            // First consumer takes one batch and vanishes.
            let mut first = InboundSession::accept(listener.accept().await.unwrap());
            first.next_batch().await.unwrap().unwrap();
            drop(first);
            hung_up_tx.send(()).unwrap();

            let mut second = InboundSession::accept(listener.accept().await.unwrap());
            let mut batches: Vec<Vec<String>> = Vec::new();
            let mut summary = Summary::default();
            while let Some(b) = second.next_batch().await.unwrap() {
                summary.record(b.len());
                batches.push(b.items.into_iter().map(|i| i.text).collect());
            }
            second.complete(summary).await.unwrap();
            batches
        });

        let fetcher = std::sync::Arc::new(ScriptedFetcher::default());
        fetcher.push("S1", Ok(&[("a", 1)]));
        fetcher.push("S1", Ok(&[("b", 2)]));
        fetcher.push("S1", Ok(&[("c", 3)]));

        let mut producer = ProducerLoop::new(settings(endpoint, &["S1"]), Box::new(fetcher));
        assert_eq!(producer.run_cycle().await, CycleOutcome::Sent { items: 1 });
        hung_up_rx.await.unwrap();

        assert_eq!(producer.run_cycle().await, CycleOutcome::Deferred { items: 1 });
        assert_eq!(producer.session_state(), None);
        assert_eq!(producer.stats().sessions_failed, 1);

        // Reconnects immediately; the held batch precedes the new round.
        assert_eq!(producer.run_cycle().await, CycleOutcome::Sent { items: 2 });
        assert_eq!(producer.stats().sessions_opened, 2);

        let summary = producer.close().await.unwrap();
        assert_eq!(summary, Summary { processed_count: 2, batch_count: 2 });
        assert_eq!(peer.await.unwrap(), vec![vec!["b"], vec!["c"]]);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown_and_returns_summary() {
        let listener = tcp_listener().await;
        let endpoint = listener.local_endpoint();
        let peer = spawn_recording_peer(listener);

        let fetcher = std::sync::Arc::new(ScriptedFetcher::default());
        fetcher.push("S1", Ok(&[("x", 1), ("y", 2)]));

        let mut producer = ProducerLoop::new(settings(endpoint, &["S1"]), Box::new(fetcher));
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let summary = producer.run(rx).await;
            (summary, producer.stats().clone())
        });

        tokio::time::sleep(Duration::from_millis(150)).await;
        tx.send(true).unwrap();

        let (summary, stats) = task.await.unwrap();
        assert_eq!(summary, Some(Summary { processed_count: 2, batch_count: 1 }));
        assert!(stats.cycles >= 2);
        assert_eq!(stats.batches_sent, 1);
        peer.await.unwrap();
    }

    #[test]
    fn sleep_is_floored_at_zero() {
        let interval = Duration::from_secs(2);
        assert_eq!(remaining_sleep(interval, Duration::from_millis(500)), Duration::from_millis(1_500));
        assert_eq!(remaining_sleep(interval, Duration::from_secs(3)), Duration::ZERO);
    }
}
