//! Bar aggregation from historical loads, live ticks and forming-bar snapshots
//!
//! Bars are keyed by interval start, aligned with [`Timestamp::floor_to`]. The
//! completed sequence is shared behind an [`Arc`] so renderers can hold a
//! read-only snapshot while the aggregator keeps mutating (copy on write).

use crate::shared::{
    time::{Timestamp, normalize_bars},
    types::{Bar, Tick},
};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};

/// Result of feeding one tick or forming-bar snapshot
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BarUpdate {
    /// Forming bar updated in place
    Updated(Bar),
    /// First forming bar created, nothing sealed
    Opened(Bar),
    /// Previous forming bar appended to the completed sequence and a new one opened
    Sealed { sealed: Bar, forming: Bar },
    Discarded(DiscardReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// Belongs to an interval older than the forming (or last completed) bar
    Late,
    Malformed,
    /// Quote outside the current bar's interval; quotes never open bars
    NoCurrentBar,
}

/// Result of a historical load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryOutcome {
    /// Nothing usable was delivered; the previous state is kept
    Empty,
    Loaded {
        bars: usize,
        rejected: usize,
        /// Forming bar dropped because the reload already covers its interval
        forming_dropped: bool,
    },
}

/// Where a sample with a given interval start belongs
enum Slot {
    Forming,
    /// Same interval as the last completed bar while nothing is forming
    ReopenLast,
    Next,
    Late(Timestamp),
}

#[derive(Debug, Clone)]
pub struct BarAggregator {
    interval: Duration,
    capacity: usize,
    completed: Arc<Vec<Bar>>,
    forming: Option<Bar>,
}

impl BarAggregator {
    pub fn new(interval: Duration, capacity: usize) -> Self {
        Self {
            interval,
            capacity: capacity.max(1),
            completed: Arc::new(Vec::new()),
            forming: None,
        }
    }

    /// Completed bars, oldest first
    pub fn completed(&self) -> &Arc<Vec<Bar>> {
        &self.completed
    }

    pub fn forming(&self) -> Option<&Bar> {
        self.forming.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.forming.is_none() && self.completed.is_empty()
    }

    /// Replace the completed sequence with a historical load.
    ///
    /// Input order is not trusted; see [`normalize_bars`]. Start times are aligned to
    /// the bar interval before bars are merged. An empty load is a no-op.
    pub fn load_history(&mut self, bars: Vec<Bar>) -> HistoryOutcome {
        if bars.is_empty() {
            debug!("empty historical load, keeping current bars");
            return HistoryOutcome::Empty;
        }

        let bars = bars.into_iter().map(|bar| self.aligned(bar)).collect();
        let (mut bars, rejected) = normalize_bars(bars);
        let Some(last_start) = bars.last().map(|bar| bar.start_time) else {
            warn!(rejected, "historical load contained no valid bars");
            return HistoryOutcome::Empty;
        };

        let forming_dropped = match self.forming {
            Some(forming) if forming.start_time <= last_start => {
                debug!(start_time = %forming.start_time, "dropping forming bar covered by reload");
                self.forming = None;
                true
            }
            _ => false,
        };

        if bars.len() > self.capacity {
            bars.drain(..bars.len() - self.capacity);
        }
        let loaded = bars.len();
        self.completed = Arc::new(bars);

        info!(bars = loaded, rejected, forming_dropped, "loaded history");
        HistoryOutcome::Loaded {
            bars: loaded,
            rejected,
            forming_dropped,
        }
    }

    /// Route a tick into the forming bar, sealing it first if a newer interval began.
    pub fn apply_tick(&mut self, tick: Tick) -> BarUpdate {
        let tick = match tick.validated() {
            Ok(tick) => tick,
            Err(error) => {
                warn!(%error, "dropping malformed tick");
                return BarUpdate::Discarded(DiscardReason::Malformed);
            }
        };

        let start = tick.time.floor_to(self.interval);
        self.route(start, |existing| match existing {
            Some(mut bar) => {
                bar.absorb(tick.price, tick.size);
                bar
            }
            None => Bar::from_tick(start, tick.price, tick.size),
        })
    }

    /// Fold a quote price into the bar covering `time` as a zero-volume trade.
    ///
    /// Only the current bar (forming, or the last completed bar while nothing is
    /// forming) is touched; a quote never opens or seals a bar.
    pub fn apply_quote(&mut self, time: Timestamp, price: f64) -> BarUpdate {
        let sample = Tick {
            time,
            price,
            size: 0.0,
        };
        if let Err(error) = sample.validated() {
            warn!(%error, "dropping malformed quote price");
            return BarUpdate::Discarded(DiscardReason::Malformed);
        }

        let start = time.floor_to(self.interval);
        if let Slot::Next = self.slot(start) {
            debug!(%start, "no current bar for quote");
            return BarUpdate::Discarded(DiscardReason::NoCurrentBar);
        }
        self.route(start, |existing| match existing {
            Some(mut bar) => {
                bar.absorb(price, 0.0);
                bar
            }
            None => Bar::from_tick(start, price, 0.0),
        })
    }

    /// Replace the forming bar wholesale with a snapshot computed by the source.
    pub fn update_forming(&mut self, bar: Bar) -> BarUpdate {
        let bar = match bar.validated() {
            Ok(bar) => self.aligned(bar),
            Err(error) => {
                warn!(%error, "dropping malformed forming bar");
                return BarUpdate::Discarded(DiscardReason::Malformed);
            }
        };

        self.route(bar.start_time, |_| bar)
    }

    /// Snap a bar's start onto the interval grid ticks are keyed by
    fn aligned(&self, bar: Bar) -> Bar {
        Bar {
            start_time: bar.start_time.floor_to(self.interval),
            ..bar
        }
    }

    fn slot(&self, start: Timestamp) -> Slot {
        match (&self.forming, self.completed.last()) {
            (Some(forming), _) if start == forming.start_time => Slot::Forming,
            (Some(forming), _) if start < forming.start_time => Slot::Late(forming.start_time),
            (Some(_), _) => Slot::Next,
            (None, Some(last)) if start == last.start_time => Slot::ReopenLast,
            (None, Some(last)) if start < last.start_time => Slot::Late(last.start_time),
            (None, _) => Slot::Next,
        }
    }

    fn route(&mut self, start: Timestamp, build: impl FnOnce(Option<Bar>) -> Bar) -> BarUpdate {
        match self.slot(start) {
            Slot::Late(current) => {
                debug!(%start, %current, "discarding late sample");
                BarUpdate::Discarded(DiscardReason::Late)
            }
            Slot::Forming => {
                let bar = build(self.forming);
                self.forming = Some(bar);
                BarUpdate::Updated(bar)
            }
            Slot::ReopenLast => {
                let last = Arc::make_mut(&mut self.completed).pop();
                let bar = build(last);
                self.forming = Some(bar);
                BarUpdate::Updated(bar)
            }
            Slot::Next => {
                let bar = build(None);
                match self.forming.replace(bar) {
                    Some(sealed) => {
                        self.seal(sealed);
                        BarUpdate::Sealed {
                            sealed,
                            forming: bar,
                        }
                    }
                    None => BarUpdate::Opened(bar),
                }
            }
        }
    }

    fn seal(&mut self, bar: Bar) {
        let completed = Arc::make_mut(&mut self.completed);
        completed.push(bar);
        if completed.len() > self.capacity {
            let excess = completed.len() - self.capacity;
            completed.drain(..excess);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    fn bar(secs: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Bar {
        Bar {
            start_time: Timestamp::from_secs(secs),
            open,
            high,
            low,
            close,
            volume,
        }
    }

    fn tick(millis: i64, price: f64, size: f64) -> Tick {
        Tick {
            time: Timestamp::from_millis(millis),
            price,
            size,
        }
    }

    fn starts(aggregator: &BarAggregator) -> Vec<i64> {
        aggregator
            .completed()
            .iter()
            .map(|bar| bar.start_time.as_millis() / 1000)
            .collect()
    }

    #[test]
    fn test_tick_in_same_interval_as_history_keeps_high_and_moves_close() {
        let mut aggregator = BarAggregator::new(MINUTE, 100);
        aggregator.load_history(vec![bar(0, 10.0, 11.0, 9.0, 10.5, 100.0)]);

        let update = aggregator.apply_tick(tick(500, 10.8, 0.0));

        let BarUpdate::Updated(forming) = update else {
            panic!("expected in-place update, got {:?}", update);
        };
        assert_eq!(forming.start_time, Timestamp::from_secs(0));
        assert_eq!(forming.close, 10.8);
        // High is a running max: 10.8 is below the bar's existing 11.0, so 11.0 stands
        assert_eq!(forming.high, 11.0);
        assert_eq!(forming.low, 9.0);
        assert_eq!(forming.volume, 100.0);
        assert!(aggregator.completed().is_empty());
        assert_eq!(aggregator.forming(), Some(&forming));
    }

    #[test]
    fn test_tick_routing() {
        let mut aggregator = BarAggregator::new(MINUTE, 100);

        // First tick ever creates the first forming bar
        assert!(matches!(aggregator.apply_tick(tick(1_000, 10.0, 1.0)), BarUpdate::Opened(_)));
        assert!(matches!(aggregator.apply_tick(tick(59_999, 10.4, 2.0)), BarUpdate::Updated(_)));

        let update = aggregator.apply_tick(tick(61_000, 10.2, 1.0));
        let BarUpdate::Sealed { sealed, forming } = update else {
            panic!("expected seal, got {:?}", update);
        };
        assert_eq!(sealed, bar(0, 10.0, 10.4, 10.0, 10.4, 3.0));
        assert_eq!(forming, bar(60, 10.2, 10.2, 10.2, 10.2, 1.0));

        // Late delivery for the sealed interval
        assert_eq!(
            aggregator.apply_tick(tick(30_000, 9.0, 1.0)),
            BarUpdate::Discarded(DiscardReason::Late)
        );
        assert_eq!(
            aggregator.apply_tick(tick(70_000, -1.0, 1.0)),
            BarUpdate::Discarded(DiscardReason::Malformed)
        );

        // A burst that skips intervals seals immediately; the gap is preserved
        assert!(matches!(aggregator.apply_tick(tick(300_000, 10.0, 1.0)), BarUpdate::Sealed { .. }));
        assert_eq!(starts(&aggregator), vec![0, 60]);
        assert_eq!(aggregator.forming().map(|b| b.start_time), Some(Timestamp::from_secs(300)));
    }

    #[test]
    fn test_late_tick_before_history_is_discarded() {
        let mut aggregator = BarAggregator::new(MINUTE, 100);
        aggregator.load_history(vec![bar(0, 1.0, 1.0, 1.0, 1.0, 1.0), bar(60, 1.0, 1.0, 1.0, 1.0, 1.0)]);

        assert_eq!(
            aggregator.apply_tick(tick(10_000, 1.0, 1.0)),
            BarUpdate::Discarded(DiscardReason::Late)
        );
        assert_eq!(aggregator.completed().len(), 2);
    }

    #[test]
    fn test_update_forming_replaces_wholesale() {
        let mut aggregator = BarAggregator::new(MINUTE, 100);
        aggregator.apply_tick(tick(0, 10.0, 5.0));

        let snapshot = bar(0, 10.0, 10.9, 9.9, 10.1, 42.0);
        assert_eq!(aggregator.update_forming(snapshot), BarUpdate::Updated(snapshot));
        assert_eq!(aggregator.forming(), Some(&snapshot));

        let next = bar(60, 10.1, 10.1, 10.1, 10.1, 1.0);
        assert_eq!(
            aggregator.update_forming(next),
            BarUpdate::Sealed {
                sealed: snapshot,
                forming: next
            }
        );
        assert_eq!(
            aggregator.update_forming(bar(0, 1.0, 1.0, 1.0, 1.0, 1.0)),
            BarUpdate::Discarded(DiscardReason::Late)
        );
    }

    #[test]
    fn test_quotes_never_open_or_seal_bars() {
        let mut aggregator = BarAggregator::new(MINUTE, 100);
        assert_eq!(
            aggregator.apply_quote(Timestamp::from_secs(5), 10.5),
            BarUpdate::Discarded(DiscardReason::NoCurrentBar)
        );
        assert!(aggregator.is_empty());

        aggregator.load_history(vec![bar(0, 10.0, 11.0, 9.0, 10.5, 100.0)]);
        for minute in 10..15 {
            assert_eq!(
                aggregator.apply_quote(Timestamp::from_secs(minute * 60), 10.5),
                BarUpdate::Discarded(DiscardReason::NoCurrentBar)
            );
        }
        assert_eq!(starts(&aggregator), vec![0]);
        assert!(aggregator.forming().is_none());

        // Inside the current interval the quote moves the close without adding volume
        aggregator.apply_tick(tick(600_000, 10.0, 4.0));
        let update = aggregator.apply_quote(Timestamp::from_secs(630), 10.9);
        assert_eq!(update, BarUpdate::Updated(bar(600, 10.0, 10.9, 10.0, 10.9, 4.0)));
        assert_eq!(
            aggregator.apply_quote(Timestamp::from_secs(700), 10.9),
            BarUpdate::Discarded(DiscardReason::NoCurrentBar)
        );
        assert_eq!(
            aggregator.apply_quote(Timestamp::from_secs(630), f64::NAN),
            BarUpdate::Discarded(DiscardReason::Malformed)
        );
        assert_eq!(starts(&aggregator), vec![0]);
    }

    #[test]
    fn test_unaligned_bars_snap_to_interval() {
        let mut aggregator = BarAggregator::new(MINUTE, 100);

        // Forming snapshot stamped mid-interval joins the tick grid
        let update = aggregator.update_forming(bar(30, 10.0, 10.0, 10.0, 10.0, 1.0));
        assert_eq!(update, BarUpdate::Opened(bar(0, 10.0, 10.0, 10.0, 10.0, 1.0)));
        assert_eq!(
            aggregator.apply_tick(tick(45_000, 10.4, 1.0)),
            BarUpdate::Updated(bar(0, 10.0, 10.4, 10.0, 10.4, 2.0))
        );
        let update = aggregator.apply_tick(tick(70_000, 10.2, 1.0));
        assert!(matches!(update, BarUpdate::Sealed { sealed, .. } if sealed.start_time == Timestamp::from_secs(0)));

        // History keyed off the interval start; the two 90s and 100s rows share one interval
        aggregator.load_history(vec![
            bar(90, 1.0, 1.0, 1.0, 1.0, 1.0),
            bar(100, 1.0, 1.0, 1.0, 1.0, 5.0),
            bar(150, 1.0, 1.0, 1.0, 1.0, 1.0),
        ]);
        assert_eq!(starts(&aggregator), vec![60, 120]);
        assert_eq!(aggregator.completed()[0].volume, 5.0);
        assert_eq!(
            aggregator.apply_tick(tick(125_000, 1.2, 1.0)),
            BarUpdate::Updated(bar(120, 1.0, 1.2, 1.0, 1.2, 2.0))
        );
    }

    #[test]
    fn test_load_history_empty_is_noop() {
        let mut aggregator = BarAggregator::new(MINUTE, 100);
        aggregator.load_history(vec![bar(0, 1.0, 1.0, 1.0, 1.0, 1.0)]);
        aggregator.apply_tick(tick(60_000, 2.0, 1.0));

        assert_eq!(aggregator.load_history(Vec::new()), HistoryOutcome::Empty);
        assert_eq!(starts(&aggregator), vec![0]);
        assert!(aggregator.forming().is_some());
    }

    #[test]
    fn test_reload_reconciles_forming_bar() {
        let mut aggregator = BarAggregator::new(MINUTE, 100);
        aggregator.apply_tick(tick(60_000, 2.0, 1.0));

        // Reload that does not yet cover the forming interval keeps it
        let outcome = aggregator.load_history(vec![bar(0, 1.0, 1.0, 1.0, 1.0, 1.0)]);
        assert_eq!(
            outcome,
            HistoryOutcome::Loaded {
                bars: 1,
                rejected: 0,
                forming_dropped: false
            }
        );
        assert!(aggregator.forming().is_some());

        // Reload that covers it replaces the orphaned forming bar
        let outcome = aggregator.load_history(vec![
            bar(120, 3.0, 3.0, 3.0, 3.0, 1.0),
            bar(60, 2.0, 2.5, 2.0, 2.5, 9.0),
        ]);
        assert_eq!(
            outcome,
            HistoryOutcome::Loaded {
                bars: 2,
                rejected: 0,
                forming_dropped: true
            }
        );
        assert!(aggregator.forming().is_none());
        assert_eq!(starts(&aggregator), vec![60, 120]);
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let mut aggregator = BarAggregator::new(MINUTE, 2);
        aggregator.load_history((0..5).map(|i| bar(i * 60, 1.0, 1.0, 1.0, 1.0, 1.0)).collect());
        assert_eq!(starts(&aggregator), vec![180, 240]);

        aggregator.apply_tick(tick(300_000, 1.0, 1.0));
        aggregator.apply_tick(tick(360_000, 1.0, 1.0));
        assert_eq!(starts(&aggregator), vec![240, 300]);
    }

    #[test]
    fn test_snapshot_is_not_mutated_by_later_ticks() {
        let mut aggregator = BarAggregator::new(MINUTE, 100);
        aggregator.load_history(vec![bar(0, 1.0, 1.0, 1.0, 1.0, 1.0)]);
        let snapshot = Arc::clone(aggregator.completed());

        aggregator.apply_tick(tick(60_000, 2.0, 1.0));
        aggregator.apply_tick(tick(120_000, 3.0, 1.0));

        assert_eq!(snapshot.len(), 1);
        assert_eq!(aggregator.completed().len(), 2);
    }

    #[test]
    fn test_arbitrary_arrival_order_keeps_sequence_strictly_increasing() {
        // Linear congruential generator keeps the sequence reproducible
        let mut state: u64 = 0x2545_f491_4f6c_dd1d;
        let mut next = move || {
            state = state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            state >> 33
        };

        let mut aggregator = BarAggregator::new(MINUTE, 50);
        let mut clock: i64 = 0;

        for _ in 0..5_000 {
            // Mostly forward, sometimes regressing by up to three intervals
            let jump = (next() % 40_000) as i64;
            let time = if next() % 7 == 0 {
                (clock - (next() % 180_000) as i64).max(0)
            } else {
                clock += jump;
                clock
            };
            let price = 100.0 + (next() % 100) as f64 / 10.0;

            if next() % 11 == 0 {
                let start = Timestamp::from_millis(time).floor_to(MINUTE);
                aggregator.update_forming(Bar::from_tick(start, price, 1.0));
            } else {
                aggregator.apply_tick(tick(time, price, 1.0));
            }

            let completed = aggregator.completed();
            assert!(completed.len() <= 50);
            assert!(completed.windows(2).all(|w| w[0].start_time < w[1].start_time));
            if let (Some(forming), Some(last)) = (aggregator.forming(), completed.last()) {
                assert!(forming.start_time > last.start_time);
            }
        }
    }
}
