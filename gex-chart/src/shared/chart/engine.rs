//! Chart engine: the single owner of the render-ready model
//!
//! Combines the bar aggregator, the level synchronizer, the latest quote and
//! session metadata with a view of the connection state. Every mutation runs to
//! completion and then notifies subscribers with the event and a read-only view.

use crate::shared::{
    chart::{
        aggregator::{BarAggregator, BarUpdate, HistoryOutcome},
        levels::LevelSynchronizer,
    },
    config::EngineConfig,
    connection::{ConnectionState, Transition},
    observer::{Observers, SubscriptionId},
    render::{RenderSnapshot, RenderStatus},
    types::{Bar, FeedUpdate, LevelKind, LevelSet, Quote, SessionInfo, StrikeGamma, Tick},
};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Change notifications delivered to subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Connection(Transition),
    History(HistoryOutcome),
    FormingUpdated(Bar),
    BarSealed { sealed: Bar, forming: Bar },
    LevelsChanged { changed: Vec<LevelKind> },
    StrikesReplaced { count: usize },
    Quote(Quote),
    Session(SessionInfo),
    Staleness(bool),
    Message(Option<String>),
}

/// Connection status as shown to the operator
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ConnectionView {
    pub state: ConnectionState,
    /// Human-readable diagnostic for the current degraded state
    pub message: Option<String>,
    /// Displayed data is last-known-good, not fresh
    pub stale: bool,
    pub attempt: u32,
}

impl Default for ConnectionView {
    fn default() -> Self {
        Self {
            state: ConnectionState::Reconnecting,
            message: None,
            stale: false,
            attempt: 0,
        }
    }
}

/// Read-only borrowed view of the model handed to subscribers
#[derive(Debug, Clone, Copy)]
pub struct ChartView<'a> {
    pub symbol: &'a str,
    pub bars: &'a BarAggregator,
    pub levels: &'a LevelSynchronizer,
    pub quote: Option<&'a Quote>,
    pub session: Option<&'a SessionInfo>,
    pub connection: &'a ConnectionView,
    pub history_attempted: bool,
}

impl ChartView<'_> {
    pub fn status(&self) -> RenderStatus {
        if !self.bars.is_empty() {
            return RenderStatus::Ready;
        }
        match (&self.connection.state, &self.connection.message) {
            (ConnectionState::Disconnected, Some(message)) => RenderStatus::Error(message.clone()),
            _ if !self.history_attempted => RenderStatus::Loading,
            _ => RenderStatus::NoData,
        }
    }

    /// Owned snapshot for a render pass. Bar and level storage is shared, not copied.
    pub fn snapshot(&self) -> RenderSnapshot {
        RenderSnapshot {
            symbol: self.symbol.to_string(),
            completed: self.bars.completed().clone(),
            forming: self.bars.forming().copied(),
            levels: self.levels.levels().clone(),
            strikes: self.levels.strikes().clone(),
            quote: self.quote.copied(),
            session: self.session.copied(),
            connection: self.connection.clone(),
            status: self.status(),
        }
    }
}

pub type EngineObserver = dyn FnMut(&EngineEvent, &ChartView<'_>) + Send;

#[derive(Debug)]
pub struct ChartEngine {
    symbol: String,
    bars: BarAggregator,
    levels: LevelSynchronizer,
    quote: Option<Quote>,
    session: Option<SessionInfo>,
    connection: ConnectionView,
    history_attempted: bool,
    observers: Observers<EngineObserver>,
}

impl ChartEngine {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            symbol: config.symbol.clone(),
            bars: BarAggregator::new(config.bar_interval, config.history_capacity),
            levels: LevelSynchronizer::new(),
            quote: None,
            session: None,
            connection: ConnectionView::default(),
            history_attempted: false,
            observers: Observers::default(),
        }
    }

    pub fn subscribe<F>(&mut self, observer: F) -> SubscriptionId
    where
        F: FnMut(&EngineEvent, &ChartView<'_>) + Send + 'static,
    {
        self.observers.subscribe(Box::new(observer))
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.observers.unsubscribe(id)
    }

    pub fn view(&self) -> ChartView<'_> {
        ChartView {
            symbol: &self.symbol,
            bars: &self.bars,
            levels: &self.levels,
            quote: self.quote.as_ref(),
            session: self.session.as_ref(),
            connection: &self.connection,
            history_attempted: self.history_attempted,
        }
    }

    pub fn snapshot(&self) -> RenderSnapshot {
        self.view().snapshot()
    }

    pub fn connection(&self) -> &ConnectionView {
        &self.connection
    }

    pub fn load_history(&mut self, bars: Vec<Bar>) -> HistoryOutcome {
        let outcome = self.bars.load_history(bars);
        self.history_attempted = true;
        self.emit(EngineEvent::History(outcome));
        outcome
    }

    /// Record a history fetch that produced nothing, so the model leaves `Loading`
    pub fn mark_history_attempted(&mut self) {
        if !self.history_attempted {
            self.history_attempted = true;
            self.emit(EngineEvent::History(HistoryOutcome::Empty));
        }
    }

    pub fn apply_tick(&mut self, tick: Tick) -> BarUpdate {
        let update = self.bars.apply_tick(tick);
        self.emit_bar(update);
        update
    }

    /// Store the quote for display only
    pub fn set_quote(&mut self, quote: Quote) {
        self.quote = Some(quote);
        self.emit(EngineEvent::Quote(quote));
    }

    /// Store the quote and fold its price into the current bar. Never adds a bar.
    pub fn apply_quote(&mut self, quote: Quote) -> BarUpdate {
        self.set_quote(quote);
        let update = self.bars.apply_quote(quote.time, quote.price);
        self.emit_bar(update);
        update
    }

    pub fn update_forming(&mut self, bar: Bar) -> BarUpdate {
        let update = self.bars.update_forming(bar);
        self.emit_bar(update);
        update
    }

    /// Returns whether anything drawable changed
    pub fn set_levels(&mut self, levels: LevelSet) -> bool {
        match self.levels.set_levels(levels) {
            Some(diff) => {
                self.emit(EngineEvent::LevelsChanged {
                    changed: diff.changed,
                });
                true
            }
            None => false,
        }
    }

    pub fn set_strike_gamma(&mut self, strikes: Vec<StrikeGamma>) -> usize {
        let count = self.levels.set_strike_gamma(strikes);
        self.emit(EngineEvent::StrikesReplaced { count });
        count
    }

    pub fn set_session(&mut self, session: SessionInfo) {
        if self.session == Some(session) {
            return;
        }
        self.session = Some(session);
        self.emit(EngineEvent::Session(session));
    }

    /// Apply one canonical update from any source
    pub fn apply(&mut self, update: FeedUpdate) {
        match update {
            FeedUpdate::Tick(tick) => {
                self.apply_tick(tick);
            }
            FeedUpdate::Quote(quote) => {
                self.apply_quote(quote);
            }
            FeedUpdate::FormingBar(bar) => {
                self.update_forming(bar);
            }
            FeedUpdate::History(bars) => {
                self.load_history(bars);
            }
            FeedUpdate::Levels(levels) => {
                self.set_levels(levels);
            }
            FeedUpdate::StrikeGamma(strikes) => {
                self.set_strike_gamma(strikes);
            }
            FeedUpdate::Session(session) => self.set_session(session),
        }
    }

    /// Mirror a connection transition. Entering `Disconnected` marks the data stale.
    pub fn on_transition(&mut self, transition: &Transition, message: Option<String>) {
        self.connection.state = transition.to;
        self.connection.attempt = transition.attempt;
        self.connection.message = message;
        if transition.to == ConnectionState::Disconnected {
            self.connection.stale = true;
        }
        self.emit(EngineEvent::Connection(*transition));
    }

    pub fn set_stale(&mut self, stale: bool) {
        if self.connection.stale != stale {
            self.connection.stale = stale;
            self.emit(EngineEvent::Staleness(stale));
        }
    }

    pub fn set_message(&mut self, message: Option<String>) {
        if self.connection.message != message {
            self.connection.message = message.clone();
            self.emit(EngineEvent::Message(message));
        }
    }

    /// Release every subscription. Safe to call repeatedly.
    pub fn teardown(&mut self) {
        if !self.observers.is_empty() {
            debug!(subscribers = self.observers.len(), "releasing engine subscriptions");
            self.observers.clear();
        }
    }

    fn emit_bar(&mut self, update: BarUpdate) {
        match update {
            BarUpdate::Updated(bar) | BarUpdate::Opened(bar) => {
                self.emit(EngineEvent::FormingUpdated(bar))
            }
            BarUpdate::Sealed { sealed, forming } => {
                self.emit(EngineEvent::BarSealed { sealed, forming })
            }
            BarUpdate::Discarded(_) => {}
        }
    }

    fn emit(&mut self, event: EngineEvent) {
        let Self {
            symbol,
            bars,
            levels,
            quote,
            session,
            connection,
            history_attempted,
            observers,
        } = self;

        let view = ChartView {
            symbol: symbol.as_str(),
            bars: &*bars,
            levels: &*levels,
            quote: quote.as_ref(),
            session: session.as_ref(),
            connection: &*connection,
            history_attempted: *history_attempted,
        };
        observers.for_each(|observer| observer(&event, &view));
    }
}
