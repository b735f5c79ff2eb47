/// GEX Chart - Streaming Chart Engine
///
/// This library provides the engine behind the `gex-chart` terminal binary:
/// - Normalization of heterogeneous feed payloads and timestamps
/// - Bar aggregation with a live forming bar updated tick by tick
/// - Dealer gamma level overlays replaced as atomic snapshots
/// - A connection manager degrading from live push to polling to last-known-good
/// - A stateless ratatui render surface fed through a watch channel
pub mod shared;

// Re-export commonly used types for convenience
pub use shared::types::{
    Bar, FeedUpdate, LevelKind, LevelSet, Quote, SessionInfo, StrikeFlags, StrikeGamma, Tick,
};

pub use shared::config::{ConnectionConfig, EngineConfig, RetryPolicy};
pub use shared::error::{FeedError, SampleError};
pub use shared::time::{RawTime, Timestamp, normalize_bars};

pub use shared::chart::{
    BarAggregator, BarUpdate, ChartEngine, ChartView, ConnectionView, EngineEvent, HistoryOutcome,
    LevelSynchronizer,
};
pub use shared::connection::{
    ConnectionManager, ConnectionState, InvalidTransition, LastKnownGood, Transition,
};
pub use shared::render::{PriceScale, RenderSnapshot, RenderStatus, render_chart};
pub use shared::session::{SessionHandle, spawn_session};
