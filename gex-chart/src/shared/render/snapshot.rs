use crate::shared::{
    chart::ConnectionView,
    types::{Bar, LevelSet, Quote, SessionInfo, StrikeGamma},
};
use derive_more::Display;
use std::sync::Arc;

/// What the surface should show when there is nothing, or something, to draw
#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum RenderStatus {
    #[display("loading")]
    Loading,
    #[display("no data")]
    NoData,
    #[display("ready")]
    Ready,
    #[display("error: {_0}")]
    Error(String),
}

/// Owned input for one render pass
///
/// Cheap to clone: bar, level and strike storage is shared with the engine.
#[derive(Debug, Clone)]
pub struct RenderSnapshot {
    pub symbol: String,
    pub completed: Arc<Vec<Bar>>,
    pub forming: Option<Bar>,
    pub levels: Arc<LevelSet>,
    pub strikes: Arc<Vec<StrikeGamma>>,
    pub quote: Option<Quote>,
    pub session: Option<SessionInfo>,
    pub connection: ConnectionView,
    pub status: RenderStatus,
}

impl RenderSnapshot {
    /// Empty snapshot shown before the engine publishes anything
    pub fn loading(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            completed: Arc::new(Vec::new()),
            forming: None,
            levels: Arc::new(LevelSet::default()),
            strikes: Arc::new(Vec::new()),
            quote: None,
            session: None,
            connection: ConnectionView::default(),
            status: RenderStatus::Loading,
        }
    }

    /// Completed bars followed by the forming bar, oldest first
    pub fn bars(&self) -> impl Iterator<Item = &Bar> + '_ {
        self.completed.iter().chain(self.forming.as_ref())
    }

    pub fn bar_count(&self) -> usize {
        self.completed.len() + usize::from(self.forming.is_some())
    }

    /// Latest traded price: quote first, then the newest bar's close
    pub fn last_price(&self) -> Option<f64> {
        self.quote
            .map(|q| q.price)
            .or_else(|| self.forming.map(|b| b.close))
            .or_else(|| self.completed.last().map(|b| b.close))
    }
}
