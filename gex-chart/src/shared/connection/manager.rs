//! Connection manager: drives the push, poll and history transports through the
//! degradation state machine and feeds the chart engine.
//!
//! Every transport fault is converted into a [`Transition`] or a log entry; nothing
//! is returned to the caller. All engine mutations happen inside [`ConnectionManager::step`],
//! one handler at a time, and the engine is told about a transition before any data
//! that arrives under the new state is applied.

use crate::shared::{
    chart::ChartEngine,
    config::{ConnectionConfig, EngineConfig},
    connection::{
        machine::{ConnectionMachine, ConnectionState, Transition},
        transport::{
            HistorySource, HttpHistorySource, HttpPollTransport, PollTransport, PushStream,
            PushTransport, WsPushTransport,
        },
    },
    error::FeedError,
    time::Timestamp,
    types::{FeedUpdate, LevelSet, Quote, SessionInfo, StrikeGamma},
    wire::{ParsedPayload, parse_history, parse_live_message, parse_poll_snapshot},
};
use chrono::NaiveDate;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::{future::Future, time::Duration};
use tokio::{
    sync::watch,
    time::{Instant, sleep_until, timeout},
};
use tracing::{debug, info, warn};

/// Last successfully received out-of-band data, shown while degraded
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct LastKnownGood {
    pub levels: Option<LevelSet>,
    pub strikes: Vec<StrikeGamma>,
    pub quote: Option<Quote>,
    pub session: Option<SessionInfo>,
    pub received_at: Option<Timestamp>,
}

impl LastKnownGood {
    pub fn record(&mut self, update: &FeedUpdate) {
        match update {
            FeedUpdate::Levels(levels) => self.levels = Some(*levels),
            FeedUpdate::StrikeGamma(strikes) => self.strikes = strikes.clone(),
            FeedUpdate::Quote(quote) => self.quote = Some(*quote),
            FeedUpdate::Session(session) => self.session = Some(*session),
            FeedUpdate::Tick(_) | FeedUpdate::FormingBar(_) | FeedUpdate::History(_) => return,
        }
        self.received_at = Some(Timestamp::now());
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_none()
            && self.strikes.is_empty()
            && self.quote.is_none()
            && self.session.is_none()
    }

    fn updates(&self) -> Vec<FeedUpdate> {
        let mut updates = Vec::new();
        if let Some(session) = self.session {
            updates.push(FeedUpdate::Session(session));
        }
        if let Some(levels) = self.levels {
            updates.push(FeedUpdate::Levels(levels));
        }
        if !self.strikes.is_empty() {
            updates.push(FeedUpdate::StrikeGamma(self.strikes.clone()));
        }
        updates
    }
}

enum Action {
    Shutdown,
    Message(Option<Result<String, FeedError>>),
    Push,
    Poll,
}

pub struct ConnectionManager {
    symbol: String,
    config: ConnectionConfig,
    machine: ConnectionMachine,
    engine: ChartEngine,
    push: Box<dyn PushTransport>,
    poll: Option<Box<dyn PollTransport>>,
    history: Box<dyn HistorySource>,
    stream: Option<PushStream>,
    next_push: Option<Instant>,
    next_poll: Option<Instant>,
    last_good: LastKnownGood,
    error: Option<String>,
    history_stale: bool,
    torn_down: bool,
}

impl ConnectionManager {
    pub fn new(
        engine: ChartEngine,
        config: ConnectionConfig,
        push: Box<dyn PushTransport>,
        poll: Option<Box<dyn PollTransport>>,
        history: Box<dyn HistorySource>,
    ) -> Self {
        Self {
            symbol: engine.view().symbol.to_string(),
            machine: ConnectionMachine::new(config.retry, poll.is_some()),
            config,
            engine,
            push,
            poll,
            history,
            stream: None,
            next_push: None,
            next_poll: None,
            last_good: LastKnownGood::default(),
            error: None,
            history_stale: false,
            torn_down: false,
        }
    }

    /// Manager with the WebSocket push transport and HTTP poll and history sources
    pub fn from_config(engine: &EngineConfig, config: ConnectionConfig) -> Self {
        let push = Box::new(WsPushTransport::new(&config));
        let poll = config
            .poll_url
            .clone()
            .map(|url| Box::new(HttpPollTransport::new(url)) as Box<dyn PollTransport>);
        let history = Box::new(HttpHistorySource::new(&config));
        Self::new(ChartEngine::new(engine), config, push, poll, history)
    }

    /// Seed the engine with a previously saved snapshot, shown as stale until fresh data arrives
    pub fn with_last_known_good(mut self, snapshot: LastKnownGood) -> Self {
        self.last_good = snapshot;
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.machine.state()
    }

    /// Last trading session date, for framing a closed market
    pub fn reference_date(&self) -> Option<NaiveDate> {
        self.engine.view().session.and_then(|session| session.reference_date)
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn last_known_good(&self) -> &LastKnownGood {
        &self.last_good
    }

    pub fn engine(&self) -> &ChartEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut ChartEngine {
        &mut self.engine
    }

    /// Armed reconnect and poll timers
    pub fn pending_timers(&self) -> usize {
        usize::from(self.next_push.is_some()) + usize::from(self.next_poll.is_some())
    }

    pub fn is_transport_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Seed from last-known-good, load history and arm the first push attempt.
    ///
    /// The cached quote is restored for display only; bars come from history.
    pub async fn start(&mut self, shutdown: &mut watch::Receiver<bool>) {
        if !self.last_good.is_empty() {
            info!(symbol = %self.symbol, "seeding engine from last known good snapshot");
            for update in self.last_good.updates() {
                self.engine.apply(update);
            }
            if let Some(quote) = self.last_good.quote {
                self.engine.set_quote(quote);
            }
            self.engine.set_stale(true);
        }

        self.load_history(shutdown).await;
        if !self.torn_down {
            self.next_push = Some(Instant::now());
        }
    }

    /// Run until `shutdown` is signalled or its sender dropped.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        self.start(&mut shutdown).await;
        while self.step(&mut shutdown).await {}
    }

    /// Wait for the next message, timer or shutdown signal and handle it.
    ///
    /// Returns false once the manager has been torn down.
    pub async fn step(&mut self, shutdown: &mut watch::Receiver<bool>) -> bool {
        if self.torn_down {
            return false;
        }

        let action = tokio::select! {
            biased;
            _ = shutdown.changed() => Action::Shutdown,
            message = next_message(&mut self.stream) => Action::Message(message),
            _ = sleep_until_opt(self.next_push) => Action::Push,
            _ = sleep_until_opt(self.next_poll) => Action::Poll,
        };

        match action {
            Action::Shutdown => self.shutdown(),
            Action::Message(Some(Ok(text))) => self.handle_push_message(&text),
            Action::Message(Some(Err(error))) if !error.is_transport() => {
                warn!(%error, "dropping push message")
            }
            Action::Message(Some(Err(error))) => self.handle_push_drop(error.to_string()),
            Action::Message(None) => self.handle_push_drop("push stream ended".to_string()),
            Action::Push => self.attempt_push(shutdown).await,
            Action::Poll => self.poll_once(shutdown).await,
        }

        !self.torn_down
    }

    /// Cancel timers, close the transport and release subscribers. Idempotent.
    pub fn shutdown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.next_push = None;
        self.next_poll = None;
        self.stream = None;
        self.error = None;

        if let Some(transition) = self.machine.shutdown() {
            self.engine.on_transition(&transition, None);
        }
        self.engine.teardown();
        info!(symbol = %self.symbol, "connection manager shut down");
    }

    async fn attempt_push(&mut self, shutdown: &mut watch::Receiver<bool>) {
        self.next_push = None;
        let connect_timeout = self.config.connect_timeout;
        debug!(
            symbol = %self.symbol,
            state = %self.machine.state(),
            attempt = self.machine.attempt(),
            "attempting push connection"
        );

        let attempt = timeout(connect_timeout, self.push.connect(&self.symbol));
        let result = match unless_shutdown(shutdown, attempt).await {
            None => return self.shutdown(),
            Some(Ok(result)) => result,
            Some(Err(_)) => Err(FeedError::ConnectTimeout(connect_timeout)),
        };

        match result {
            Ok(stream) => {
                self.stream = Some(stream);
                self.error = None;
                if let Some(transition) = self.machine.push_connected() {
                    self.enter(transition);
                }
                if self.history_stale {
                    self.load_history(shutdown).await;
                }
            }
            Err(error) => self.handle_push_failure(error),
        }
    }

    fn handle_push_failure(&mut self, error: FeedError) {
        warn!(%error, attempt = self.machine.attempt(), "push attempt failed");
        self.error = Some(error.to_string());

        match self.machine.push_attempt_failed() {
            Some(transition) => self.enter(transition),
            None => {
                // Background probe while polling or disconnected
                self.next_push = Some(Instant::now() + self.config.retry.max_delay);
                self.engine.set_message(self.error.clone());
            }
        }
    }

    fn handle_push_drop(&mut self, reason: String) {
        self.stream = None;
        warn!(%reason, "push transport dropped");
        self.error = Some(reason);
        if let Some(transition) = self.machine.push_dropped() {
            self.enter(transition);
        }
    }

    fn handle_push_message(&mut self, text: &str) {
        match parse_live_message(text) {
            Ok(parsed) => self.apply_payload(parsed),
            Err(error) => warn!(%error, "dropping push message"),
        }
    }

    async fn poll_once(&mut self, shutdown: &mut watch::Receiver<bool>) {
        let poll_timeout = self.config.poll_timeout;
        // Missed cycles are not retried; the next poll is already scheduled
        self.next_poll = Some(Instant::now() + self.config.poll_interval);
        let Some(poll) = self.poll.as_ref() else {
            self.next_poll = None;
            return;
        };

        let request = timeout(poll_timeout, poll.poll(&self.symbol));
        let result = match unless_shutdown(shutdown, request).await {
            None => return self.shutdown(),
            Some(Ok(result)) => result,
            Some(Err(_)) => Err(FeedError::RequestTimeout(poll_timeout)),
        };

        match result.and_then(|text| parse_poll_snapshot(&text)) {
            Ok(parsed) => {
                self.machine.poll_succeeded();
                self.error = None;
                self.engine.set_message(None);
                self.apply_payload(parsed);
            }
            Err(error) if !error.is_transport() => warn!(%error, "dropping poll response"),
            Err(error) => {
                warn!(%error, failures = self.machine.poll_failures() + 1, "poll failed");
                self.error = Some(error.to_string());
                match self.machine.poll_failed() {
                    Some(transition) => self.enter(transition),
                    None => self.engine.set_message(self.error.clone()),
                }
            }
        }
    }

    async fn load_history(&mut self, shutdown: &mut watch::Receiver<bool>) {
        let request_timeout = self.config.request_timeout;
        let request = timeout(request_timeout, self.history.fetch(&self.symbol));
        let result = match unless_shutdown(shutdown, request).await {
            None => return self.shutdown(),
            Some(Ok(result)) => result,
            Some(Err(_)) => Err(FeedError::RequestTimeout(request_timeout)),
        };

        match result.and_then(|text| parse_history(&text)) {
            Ok(parsed) => {
                if parsed.dropped > 0 {
                    warn!(dropped = parsed.dropped, "history contained malformed bars");
                }
                if parsed.bars.is_empty() {
                    info!(symbol = %self.symbol, "no historical bars available");
                    self.engine.mark_history_attempted();
                } else {
                    self.engine.load_history(parsed.bars);
                }
                self.history_stale = false;
            }
            Err(error) => {
                warn!(%error, symbol = %self.symbol, "history fetch failed");
                self.engine.mark_history_attempted();
            }
        }
    }

    fn apply_payload(&mut self, parsed: ParsedPayload) {
        if parsed.dropped > 0 {
            debug!(dropped = parsed.dropped, "payload contained malformed entries");
        }
        if parsed.updates.is_empty() {
            return;
        }
        for update in parsed.updates {
            self.last_good.record(&update);
            self.engine.apply(update);
        }
        self.engine.set_stale(false);
    }

    /// Notify the engine, then arm timers for the new state
    fn enter(&mut self, transition: Transition) {
        self.engine.on_transition(&transition, self.error.clone());

        let now = Instant::now();
        let retry_at = transition.retry_in.map(|delay: Duration| now + delay);
        match transition.to {
            ConnectionState::Connected => {
                self.next_push = None;
                self.next_poll = None;
            }
            ConnectionState::Reconnecting => {
                self.next_push = retry_at;
                self.next_poll = None;
            }
            ConnectionState::Polling => {
                self.next_push = retry_at;
                self.next_poll = Some(now);
            }
            ConnectionState::Disconnected => {
                self.next_push = retry_at;
                self.next_poll = None;
            }
        }

        if transition.from == ConnectionState::Connected
            || matches!(transition.to, ConnectionState::Polling | ConnectionState::Disconnected)
        {
            self.history_stale = true;
        }
    }
}

async fn next_message(stream: &mut Option<PushStream>) -> Option<Result<String, FeedError>> {
    match stream {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

/// Await `future` unless teardown is signalled first
async fn unless_shutdown<F: Future>(
    shutdown: &mut watch::Receiver<bool>,
    future: F,
) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = shutdown.changed() => None,
        output = future => Some(output),
    }
}

fn sleep_until_opt(deadline: Option<Instant>) -> impl Future<Output = ()> {
    async move {
        match deadline {
            Some(deadline) => sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }
}
