/// Chart model: bar aggregation, level synchronization and the engine that owns both
pub mod aggregator;
pub mod engine;
pub mod levels;

pub use aggregator::{BarAggregator, BarUpdate, DiscardReason, HistoryOutcome};
pub use engine::{ChartEngine, ChartView, ConnectionView, EngineEvent, EngineObserver};
pub use levels::{LevelDiff, LevelSynchronizer, max_abs_gamma};
