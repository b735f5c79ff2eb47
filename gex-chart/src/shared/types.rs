/// Core data types for the chart engine
///
/// Every feed payload is mapped into these canonical types by the parsing
/// functions in [`wire`](crate::shared::wire) before anything else touches it.
use crate::shared::{error::SampleError, time::Timestamp};
use chrono::NaiveDate;
use derive_more::Display;
use serde::{Deserialize, Serialize};

/// One OHLCV interval of price history
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct Bar {
    /// Start of the interval this bar covers
    pub start_time: Timestamp,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// Open a new bar from the first trade of an interval
    pub fn from_tick(start_time: Timestamp, price: f64, size: f64) -> Self {
        Self {
            start_time,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: size,
        }
    }

    /// Fold one more trade into this bar
    pub fn absorb(&mut self, price: f64, size: f64) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
        self.volume += size;
    }

    /// Reject unusable bars and repair inconsistent high/low.
    pub fn validated(self) -> Result<Self, SampleError> {
        for price in [self.open, self.high, self.low, self.close] {
            check_price(price)?;
        }
        if !self.volume.is_finite() || self.volume < 0.0 {
            return Err(SampleError::InvalidVolume(self.volume));
        }

        Ok(Self {
            high: self.open.max(self.high).max(self.low).max(self.close),
            low: self.open.min(self.high).min(self.low).min(self.close),
            ..self
        })
    }

    pub fn is_bullish(&self) -> bool {
        self.close >= self.open
    }
}

/// A single real-time trade or price print
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct Tick {
    pub time: Timestamp,
    pub price: f64,
    /// Traded size, zero for price-only updates
    pub size: f64,
}

impl Tick {
    pub fn validated(self) -> Result<Self, SampleError> {
        check_price(self.price)?;
        if !self.size.is_finite() || self.size < 0.0 {
            return Err(SampleError::InvalidVolume(self.size));
        }
        Ok(self)
    }
}

/// Latest quote for display; never persisted into the bar sequence
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct Quote {
    pub price: f64,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub time: Timestamp,
}

/// Overlay price level kinds, in drawing order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Deserialize, Serialize)]
pub enum LevelKind {
    FlipPoint,
    CallWall,
    PutWall,
    UpperBand,
    LowerBand,
}

impl LevelKind {
    pub const ALL: [LevelKind; 5] = [
        LevelKind::FlipPoint,
        LevelKind::CallWall,
        LevelKind::PutWall,
        LevelKind::UpperBand,
        LevelKind::LowerBand,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            LevelKind::FlipPoint => "FLIP",
            LevelKind::CallWall => "CALL WALL",
            LevelKind::PutWall => "PUT WALL",
            LevelKind::UpperBand => "+1σ",
            LevelKind::LowerBand => "-1σ",
        }
    }
}

/// Snapshot of overlay price levels. Absent levels are not drawn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize, Serialize)]
pub struct LevelSet {
    pub flip_point: Option<f64>,
    pub call_wall: Option<f64>,
    pub put_wall: Option<f64>,
    pub upper_band: Option<f64>,
    pub lower_band: Option<f64>,
}

impl LevelSet {
    pub fn get(&self, kind: LevelKind) -> Option<f64> {
        match kind {
            LevelKind::FlipPoint => self.flip_point,
            LevelKind::CallWall => self.call_wall,
            LevelKind::PutWall => self.put_wall,
            LevelKind::UpperBand => self.upper_band,
            LevelKind::LowerBand => self.lower_band,
        }
    }

    /// Zero, negative and non-finite values mean "do not draw"; zero is not a price.
    pub fn sanitized(self) -> Self {
        let keep = |value: Option<f64>| value.filter(|v| v.is_finite() && *v > 0.0);
        Self {
            flip_point: keep(self.flip_point),
            call_wall: keep(self.call_wall),
            put_wall: keep(self.put_wall),
            upper_band: keep(self.upper_band),
            lower_band: keep(self.lower_band),
        }
    }

    /// Drawable levels in drawing order
    pub fn iter(&self) -> impl Iterator<Item = (LevelKind, f64)> + '_ {
        LevelKind::ALL
            .into_iter()
            .filter_map(|kind| self.get(kind).map(|price| (kind, price)))
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }
}

/// Strike classification flags, consumed as-is from the analytics feed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct StrikeFlags {
    pub magnet: bool,
    pub pin: bool,
    pub danger: bool,
}

/// Net gamma exposure at one strike
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct StrikeGamma {
    pub strike: f64,
    pub net_gamma: f64,
    pub flags: StrikeFlags,
}

/// Session metadata delivered alongside the feed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct SessionInfo {
    pub market_open: bool,
    /// Last trading session date, used to frame a closed market
    pub reference_date: Option<NaiveDate>,
}

/// Canonical update produced by the normalization boundary
#[derive(Debug, Clone, PartialEq)]
pub enum FeedUpdate {
    Tick(Tick),
    Quote(Quote),
    /// Full forming-bar snapshot computed by the source
    FormingBar(Bar),
    /// Full historical reload delivered in-band
    History(Vec<Bar>),
    Levels(LevelSet),
    StrikeGamma(Vec<StrikeGamma>),
    Session(SessionInfo),
}

fn check_price(price: f64) -> Result<(), SampleError> {
    if price.is_finite() && price > 0.0 {
        Ok(())
    } else {
        Err(SampleError::InvalidPrice(price))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(open: f64, high: f64, low: f64, close: f64, volume: f64) -> Bar {
        Bar {
            start_time: Timestamp::from_secs(0),
            open,
            high,
            low,
            close,
            volume,
        }
    }

    #[test]
    fn test_bar_validated_repairs_high_low() {
        let repaired = bar(10.0, 9.0, 11.0, 10.5, 1.0).validated().unwrap();
        assert_eq!(repaired.high, 11.0);
        assert_eq!(repaired.low, 9.0);
    }

    #[test]
    fn test_bar_validated_rejects() {
        assert_eq!(
            bar(0.0, 1.0, 1.0, 1.0, 1.0).validated(),
            Err(SampleError::InvalidPrice(0.0))
        );
        assert_eq!(
            bar(1.0, 1.0, 1.0, 1.0, -1.0).validated(),
            Err(SampleError::InvalidVolume(-1.0))
        );
        assert!(bar(1.0, f64::INFINITY, 1.0, 1.0, 1.0).validated().is_err());
    }

    #[test]
    fn test_bar_absorb() {
        let mut bar = Bar::from_tick(Timestamp::from_secs(0), 10.0, 1.0);
        bar.absorb(10.8, 2.0);
        bar.absorb(9.7, 0.0);
        assert_eq!(bar.open, 10.0);
        assert_eq!(bar.high, 10.8);
        assert_eq!(bar.low, 9.7);
        assert_eq!(bar.close, 9.7);
        assert_eq!(bar.volume, 3.0);
        assert!(!bar.is_bullish());
    }

    #[test]
    fn test_level_set_sanitized() {
        let levels = LevelSet {
            flip_point: Some(580.0),
            call_wall: Some(0.0),
            put_wall: Some(-3.0),
            upper_band: Some(f64::NAN),
            lower_band: None,
        }
        .sanitized();

        assert_eq!(levels.flip_point, Some(580.0));
        assert_eq!(levels.call_wall, None);
        assert_eq!(levels.put_wall, None);
        assert_eq!(levels.upper_band, None);
        assert_eq!(levels.iter().collect::<Vec<_>>(), vec![(LevelKind::FlipPoint, 580.0)]);
        assert!(!levels.is_empty());
        assert!(LevelSet::default().is_empty());
    }
}
