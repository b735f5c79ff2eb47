//! Price → row mapping for the terminal surface

/// Relative padding added above and below the visible price range
const MARGIN: f64 = 0.02;

/// Linear price axis over `rows` terminal rows, row 0 at the top (highest price)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceScale {
    min: f64,
    max: f64,
    rows: u16,
}

impl PriceScale {
    pub fn new(min: f64, max: f64, rows: u16) -> Self {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        Self {
            min,
            max,
            rows: rows.max(1),
        }
    }

    /// Fit the range of every finite price with a small margin.
    ///
    /// Returns `None` if there is nothing to fit.
    pub fn fit(prices: impl IntoIterator<Item = f64>, rows: u16) -> Option<Self> {
        let (low, high) = prices
            .into_iter()
            .filter(|price| price.is_finite())
            .fold(None, |range: Option<(f64, f64)>, price| match range {
                Some((low, high)) => Some((low.min(price), high.max(price))),
                None => Some((price, price)),
            })?;

        let pad = if high > low {
            (high - low) * MARGIN
        } else {
            (high.abs() * 0.005).max(0.01)
        };
        Some(Self::new(low - pad, high + pad, rows))
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn rows(&self) -> u16 {
        self.rows
    }

    pub fn contains(&self, price: f64) -> bool {
        price >= self.min && price <= self.max
    }

    /// Row for `price`, `None` when it lies outside the visible range
    pub fn row_of(&self, price: f64) -> Option<u16> {
        self.contains(price).then(|| self.row_clamped(price))
    }

    /// Row for `price`, pinned to the top or bottom edge when out of range
    pub fn row_clamped(&self, price: f64) -> u16 {
        let span = self.max - self.min;
        if span <= 0.0 || self.rows == 1 {
            return 0;
        }
        let last = f64::from(self.rows - 1);
        let row = ((self.max - price) / span * last).round();
        row.clamp(0.0, last) as u16
    }

    /// Price at the centre of `row`
    pub fn price_at(&self, row: u16) -> f64 {
        if self.rows == 1 {
            return (self.min + self.max) / 2.0;
        }
        let row = f64::from(row.min(self.rows - 1));
        self.max - row / f64::from(self.rows - 1) * (self.max - self.min)
    }
}

/// Bar length for one strike, proportional to |net gamma| against the largest magnitude.
///
/// Any non-zero exposure gets at least one cell.
pub fn gamma_bar_width(net_gamma: f64, max_abs_gamma: f64, width: u16) -> u16 {
    if !net_gamma.is_finite() || max_abs_gamma <= 0.0 || net_gamma == 0.0 || width == 0 {
        return 0;
    }
    let ratio = (net_gamma.abs() / max_abs_gamma).min(1.0);
    ((ratio * f64::from(width)).round() as u16).clamp(1, width)
}
