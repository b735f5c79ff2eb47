/// Render surface: owned per-pass snapshots, price scaling and the terminal widget
pub mod scale;
pub mod snapshot;
pub mod widget;

pub use scale::{PriceScale, gamma_bar_width};
pub use snapshot::{RenderSnapshot, RenderStatus};
pub use widget::render_chart;
