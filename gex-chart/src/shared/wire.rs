//! Normalization boundary for feed payloads.
//!
//! The historical, live and polling sources each send their own variant shapes with
//! absent or renamed fields. One parse function per source maps every variant into
//! the canonical [`FeedUpdate`] types. Individual malformed entries are dropped and
//! counted; a payload that is not JSON at all is a [`FeedError`].

use crate::shared::{
    error::{FeedError, SampleError},
    time::{RawTime, Timestamp, parse_reference_date},
    types::{Bar, FeedUpdate, LevelSet, Quote, SessionInfo, StrikeFlags, StrikeGamma, Tick},
};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

/// Canonical updates parsed from one payload
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ParsedPayload {
    pub updates: Vec<FeedUpdate>,
    /// Entries dropped as malformed
    pub dropped: usize,
}

/// Canonical bars parsed from a historical response
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ParsedBars {
    pub bars: Vec<Bar>,
    pub dropped: usize,
}

/// Number that may arrive as a JSON number or a numeric string
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum WireNumber {
    Num(f64),
    Text(String),
}

impl WireNumber {
    fn value(&self) -> Option<f64> {
        match self {
            WireNumber::Num(value) => Some(*value),
            WireNumber::Text(text) => text.trim().parse().ok(),
        }
    }
}

fn number(value: &WireNumber) -> Result<f64, SampleError> {
    value.value().ok_or(SampleError::InvalidPrice(f64::NAN))
}

fn optional_number(value: &Option<WireNumber>) -> Option<f64> {
    value.as_ref().and_then(WireNumber::value)
}

#[derive(Debug, Deserialize)]
struct WireBar {
    #[serde(alias = "t", alias = "ts", alias = "timestamp", alias = "start_time", alias = "startTime")]
    time: RawTime,
    #[serde(alias = "o")]
    open: WireNumber,
    #[serde(alias = "h")]
    high: WireNumber,
    #[serde(alias = "l")]
    low: WireNumber,
    #[serde(alias = "c")]
    close: WireNumber,
    #[serde(alias = "v", default)]
    volume: Option<WireNumber>,
}

impl WireBar {
    fn into_bar(self) -> Result<Bar, SampleError> {
        Bar {
            start_time: self.time.normalize()?,
            open: number(&self.open)?,
            high: number(&self.high)?,
            low: number(&self.low)?,
            close: number(&self.close)?,
            volume: optional_number(&self.volume).unwrap_or(0.0),
        }
        .validated()
    }
}

/// Kline-style `[t, o, h, l, c, v, ...]` row, numbers or numeric strings
fn bar_from_row(row: &[Value]) -> Result<Bar, SampleError> {
    if row.len() < 5 {
        return Err(SampleError::InvalidTimestamp);
    }
    let time: RawTime =
        serde_json::from_value(row[0].clone()).map_err(|_| SampleError::InvalidTimestamp)?;
    let field = |index: usize| -> Result<f64, SampleError> {
        row.get(index)
            .cloned()
            .and_then(|v| serde_json::from_value::<WireNumber>(v).ok())
            .and_then(|n| n.value())
            .ok_or(SampleError::InvalidPrice(f64::NAN))
    };

    Bar {
        start_time: time.normalize()?,
        open: field(1)?,
        high: field(2)?,
        low: field(3)?,
        close: field(4)?,
        volume: if row.len() > 5 { field(5)? } else { 0.0 },
    }
    .validated()
}

fn bar_from_value(value: Value) -> Result<Bar, SampleError> {
    match value {
        Value::Array(row) => bar_from_row(&row),
        other => serde_json::from_value::<WireBar>(other)
            .map_err(|_| SampleError::InvalidTimestamp)?
            .into_bar(),
    }
}

#[derive(Debug, Deserialize)]
struct WireTick {
    #[serde(alias = "t", alias = "ts", alias = "timestamp")]
    time: RawTime,
    #[serde(alias = "px", alias = "p", alias = "last")]
    price: WireNumber,
    #[serde(alias = "sz", alias = "qty", alias = "volume", alias = "v", default)]
    size: Option<WireNumber>,
}

impl WireTick {
    fn into_tick(self) -> Result<Tick, SampleError> {
        Tick {
            time: self.time.normalize()?,
            price: number(&self.price)?,
            size: optional_number(&self.size).unwrap_or(0.0),
        }
        .validated()
    }
}

#[derive(Debug, Deserialize)]
struct WireQuote {
    #[serde(alias = "t", alias = "ts", alias = "timestamp", default)]
    time: Option<RawTime>,
    #[serde(alias = "last", alias = "px", alias = "mark")]
    price: WireNumber,
    #[serde(alias = "bid_price", alias = "bidPrice", default)]
    bid: Option<WireNumber>,
    #[serde(alias = "ask_price", alias = "askPrice", default)]
    ask: Option<WireNumber>,
}

impl WireQuote {
    fn into_quote(self) -> Result<Quote, SampleError> {
        let price = number(&self.price)?;
        if !price.is_finite() || price <= 0.0 {
            return Err(SampleError::InvalidPrice(price));
        }
        let side = |value: &Option<WireNumber>| optional_number(value).filter(|v| v.is_finite() && *v > 0.0);
        let time = match &self.time {
            Some(raw) => raw.normalize()?,
            None => Timestamp::now(),
        };
        Ok(Quote {
            price,
            bid: side(&self.bid),
            ask: side(&self.ask),
            time,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct WireLevels {
    #[serde(alias = "flipPoint", alias = "zero_gamma", alias = "zeroGamma", alias = "flip", default)]
    flip_point: Option<WireNumber>,
    #[serde(alias = "callWall", default)]
    call_wall: Option<WireNumber>,
    #[serde(alias = "putWall", default)]
    put_wall: Option<WireNumber>,
    #[serde(alias = "upperBand", alias = "upper_1sd", alias = "upper1sd", default)]
    upper_band: Option<WireNumber>,
    #[serde(alias = "lowerBand", alias = "lower_1sd", alias = "lower1sd", default)]
    lower_band: Option<WireNumber>,
}

impl WireLevels {
    fn into_levels(self) -> LevelSet {
        LevelSet {
            flip_point: optional_number(&self.flip_point),
            call_wall: optional_number(&self.call_wall),
            put_wall: optional_number(&self.put_wall),
            upper_band: optional_number(&self.upper_band),
            lower_band: optional_number(&self.lower_band),
        }
        .sanitized()
    }
}

#[derive(Debug, Deserialize)]
struct WireStrike {
    strike: WireNumber,
    #[serde(alias = "netGamma", alias = "gex", alias = "gamma")]
    net_gamma: WireNumber,
    #[serde(alias = "is_magnet", alias = "isMagnet", default)]
    magnet: bool,
    #[serde(alias = "is_pin", alias = "isPin", default)]
    pin: bool,
    #[serde(alias = "is_danger", alias = "isDanger", default)]
    danger: bool,
}

fn strike_from_value(value: Value) -> Result<StrikeGamma, SampleError> {
    let wire: WireStrike =
        serde_json::from_value(value).map_err(|_| SampleError::InvalidPrice(f64::NAN))?;
    let strike = number(&wire.strike)?;
    let net_gamma = number(&wire.net_gamma)?;
    if !strike.is_finite() || strike <= 0.0 {
        return Err(SampleError::InvalidPrice(strike));
    }
    if !net_gamma.is_finite() {
        return Err(SampleError::InvalidVolume(net_gamma));
    }
    Ok(StrikeGamma {
        strike,
        net_gamma,
        flags: StrikeFlags {
            magnet: wire.magnet,
            pin: wire.pin,
            danger: wire.danger,
        },
    })
}

#[derive(Debug, Default, Deserialize)]
struct WireSession {
    #[serde(alias = "is_market_open", alias = "isMarketOpen", alias = "marketOpen", default)]
    market_open: Option<bool>,
    #[serde(
        alias = "last_session_date",
        alias = "lastSessionDate",
        alias = "session_date",
        alias = "referenceDate",
        default
    )]
    reference_date: Option<String>,
}

impl WireSession {
    fn into_session(self) -> Option<SessionInfo> {
        let market_open = self.market_open?;
        Some(SessionInfo {
            market_open,
            reference_date: self.reference_date.as_deref().and_then(parse_reference_date),
        })
    }
}

/// Live push messages, tagged by `type`
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum LiveMessage {
    #[serde(alias = "trade")]
    Tick(Value),
    Quote(Value),
    #[serde(alias = "candle", alias = "forming")]
    Bar(Value),
    #[serde(alias = "bars")]
    History {
        #[serde(alias = "candles", default)]
        bars: Vec<Value>,
    },
    #[serde(alias = "gex")]
    Levels(Value),
    #[serde(alias = "gamma")]
    Strikes {
        #[serde(alias = "data", default)]
        strikes: Vec<Value>,
    },
    Session(Value),
    #[serde(alias = "heartbeat", alias = "pong", alias = "status")]
    Welcome {},
}

impl ParsedPayload {
    fn push<T>(&mut self, what: &str, result: Result<T, SampleError>, wrap: impl FnOnce(T) -> FeedUpdate) {
        match result {
            Ok(value) => self.updates.push(wrap(value)),
            Err(error) => {
                warn!(what, %error, "dropping malformed sample");
                self.dropped += 1;
            }
        }
    }

    fn push_bars(&mut self, values: Vec<Value>) {
        let parsed = collect_bars(values);
        self.dropped += parsed.dropped;
        self.updates.push(FeedUpdate::History(parsed.bars));
    }

    fn push_strikes(&mut self, values: Vec<Value>) {
        let mut strikes = Vec::with_capacity(values.len());
        for value in values {
            match strike_from_value(value) {
                Ok(strike) => strikes.push(strike),
                Err(error) => {
                    warn!(%error, "dropping malformed strike");
                    self.dropped += 1;
                }
            }
        }
        self.updates.push(FeedUpdate::StrikeGamma(strikes));
    }

    fn push_session(&mut self, value: Value) {
        match serde_json::from_value::<WireSession>(value).ok().and_then(WireSession::into_session) {
            Some(session) => self.updates.push(FeedUpdate::Session(session)),
            None => {
                warn!("dropping session update without market_open flag");
                self.dropped += 1;
            }
        }
    }
}

fn from_value<T: for<'de> Deserialize<'de>>(value: Value) -> Result<T, SampleError> {
    serde_json::from_value(value).map_err(|_| SampleError::InvalidTimestamp)
}

fn collect_bars(values: Vec<Value>) -> ParsedBars {
    let mut parsed = ParsedBars::default();
    for value in values {
        match bar_from_value(value) {
            Ok(bar) => parsed.bars.push(bar),
            Err(error) => {
                warn!(%error, "dropping malformed historical bar");
                parsed.dropped += 1;
            }
        }
    }
    parsed
}

/// Parse one live push message.
pub fn parse_live_message(text: &str) -> Result<ParsedPayload, FeedError> {
    let value: Value = serde_json::from_str(text)?;
    let message: LiveMessage =
        serde_json::from_value(value).map_err(|error| FeedError::Malformed(error.to_string()))?;

    let mut parsed = ParsedPayload::default();
    match message {
        LiveMessage::Tick(value) => parsed.push(
            "tick",
            from_value::<WireTick>(value).and_then(WireTick::into_tick),
            FeedUpdate::Tick,
        ),
        LiveMessage::Quote(value) => parsed.push(
            "quote",
            from_value::<WireQuote>(value).and_then(WireQuote::into_quote),
            FeedUpdate::Quote,
        ),
        LiveMessage::Bar(value) => parsed.push("bar", bar_from_value(value), FeedUpdate::FormingBar),
        LiveMessage::History { bars } => parsed.push_bars(bars),
        LiveMessage::Levels(value) => parsed.push(
            "levels",
            from_value::<WireLevels>(value).map(WireLevels::into_levels),
            FeedUpdate::Levels,
        ),
        LiveMessage::Strikes { strikes } => parsed.push_strikes(strikes),
        LiveMessage::Session(value) => parsed.push_session(value),
        LiveMessage::Welcome {} => debug!("ignoring control message"),
    }

    Ok(parsed)
}

#[derive(Debug, Default, Deserialize)]
struct PollSnapshot {
    #[serde(default)]
    quote: Option<Value>,
    #[serde(alias = "forming", alias = "forming_bar", alias = "candle", default)]
    bar: Option<Value>,
    #[serde(alias = "gex", default)]
    levels: Option<Value>,
    #[serde(alias = "gamma", default)]
    strikes: Option<Vec<Value>>,
    #[serde(default)]
    session: Option<Value>,
    #[serde(alias = "is_market_open", alias = "isMarketOpen", alias = "marketOpen", default)]
    market_open: Option<bool>,
    #[serde(alias = "last_session_date", alias = "lastSessionDate", default)]
    reference_date: Option<String>,
}

/// Parse one polling response. Every section is optional and parsed independently.
pub fn parse_poll_snapshot(text: &str) -> Result<ParsedPayload, FeedError> {
    let value: Value = serde_json::from_str(text)?;
    let snapshot: PollSnapshot =
        serde_json::from_value(value).map_err(|error| FeedError::Malformed(error.to_string()))?;

    let mut parsed = ParsedPayload::default();

    if let Some(value) = snapshot.session {
        parsed.push_session(value);
    } else if let Some(market_open) = snapshot.market_open {
        parsed.updates.push(FeedUpdate::Session(SessionInfo {
            market_open,
            reference_date: snapshot.reference_date.as_deref().and_then(parse_reference_date),
        }));
    }
    if let Some(value) = snapshot.bar {
        parsed.push("bar", bar_from_value(value), FeedUpdate::FormingBar);
    }
    if let Some(value) = snapshot.quote {
        parsed.push(
            "quote",
            from_value::<WireQuote>(value).and_then(WireQuote::into_quote),
            FeedUpdate::Quote,
        );
    }
    if let Some(value) = snapshot.levels {
        parsed.push(
            "levels",
            from_value::<WireLevels>(value).map(WireLevels::into_levels),
            FeedUpdate::Levels,
        );
    }
    if let Some(values) = snapshot.strikes {
        parsed.push_strikes(values);
    }

    Ok(parsed)
}

/// Parse a historical bars response: a bare array, or an object with `bars`/`candles`.
/// An empty list is a valid response.
pub fn parse_history(text: &str) -> Result<ParsedBars, FeedError> {
    let value: Value = serde_json::from_str(text)?;
    let rows = match value {
        Value::Array(rows) => rows,
        Value::Object(mut object) => match object.remove("bars").or_else(|| object.remove("candles")) {
            Some(Value::Array(rows)) => rows,
            Some(Value::Null) | None => Vec::new(),
            Some(_) => return Err(FeedError::Malformed("bars is not a list".to_string())),
        },
        Value::Null => Vec::new(),
        _ => return Err(FeedError::Malformed("unexpected history payload".to_string())),
    };

    Ok(collect_bars(rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_parse_tick_variants() {
        let parsed = parse_live_message(r#"{"type":"tick","t":0.5,"price":10.8,"size":3}"#).unwrap();
        assert_eq!(
            parsed.updates,
            vec![FeedUpdate::Tick(Tick {
                time: Timestamp::from_millis(500),
                price: 10.8,
                size: 3.0
            })]
        );

        let parsed =
            parse_live_message(r#"{"type":"trade","ts":1700000000123,"px":"581.25"}"#).unwrap();
        assert_eq!(
            parsed.updates,
            vec![FeedUpdate::Tick(Tick {
                time: Timestamp::from_millis(1_700_000_000_123),
                price: 581.25,
                size: 0.0
            })]
        );
    }

    #[test]
    fn test_parse_malformed_tick_is_dropped() {
        let parsed = parse_live_message(r#"{"type":"tick","t":1,"price":-4}"#).unwrap();
        assert!(parsed.updates.is_empty());
        assert_eq!(parsed.dropped, 1);

        let parsed = parse_live_message(r#"{"type":"tick","price":4}"#).unwrap();
        assert!(parsed.updates.is_empty());
        assert_eq!(parsed.dropped, 1);
    }

    #[test]
    fn test_parse_invalid_payloads_are_errors() {
        assert!(matches!(parse_live_message("not json"), Err(FeedError::Decode(_))));
        assert!(matches!(
            parse_live_message(r#"{"type":"orderbook"}"#),
            Err(FeedError::Malformed(_))
        ));
        assert!(matches!(parse_live_message(r#"{"price":1}"#), Err(FeedError::Malformed(_))));
    }

    #[test]
    fn test_parse_control_messages_yield_nothing() {
        for text in [
            r#"{"type":"welcome","message":"hello"}"#,
            r#"{"type":"heartbeat"}"#,
            r#"{"type":"status","connected":true}"#,
        ] {
            let parsed = parse_live_message(text).unwrap();
            assert_eq!(parsed, ParsedPayload::default(), "{}", text);
        }
    }

    #[test]
    fn test_parse_levels_aliases_and_zero() {
        let parsed = parse_live_message(
            r#"{"type":"gex","flipPoint":580,"callWall":"585.5","putWall":0,"upper_1sd":null}"#,
        )
        .unwrap();
        assert_eq!(
            parsed.updates,
            vec![FeedUpdate::Levels(LevelSet {
                flip_point: Some(580.0),
                call_wall: Some(585.5),
                put_wall: None,
                upper_band: None,
                lower_band: None,
            })]
        );
    }

    #[test]
    fn test_parse_strikes_drops_bad_entries() {
        let parsed = parse_live_message(
            r#"{"type":"strikes","strikes":[
                {"strike":585,"netGamma":-1.5e9,"isDanger":true},
                {"strike":"bad","gex":1},
                {"strike":580,"gex":2.0e9,"magnet":true,"pin":true}
            ]}"#,
        )
        .unwrap();
        assert_eq!(parsed.dropped, 1);
        let FeedUpdate::StrikeGamma(strikes) = &parsed.updates[0] else {
            panic!("expected strikes update");
        };
        assert_eq!(strikes.len(), 2);
        assert!(strikes[0].flags.danger);
        assert_eq!(strikes[1].strike, 580.0);
        assert!(strikes[1].flags.magnet && strikes[1].flags.pin);
    }

    #[test]
    fn test_parse_forming_bar_and_session() {
        let parsed = parse_live_message(
            r#"{"type":"candle","time":"2024-03-01T14:30:00Z","o":1,"h":2,"l":0.5,"c":1.5,"v":10}"#,
        )
        .unwrap();
        let FeedUpdate::FormingBar(bar) = parsed.updates[0] else {
            panic!("expected forming bar");
        };
        assert_eq!(bar.start_time, Timestamp::from_millis(1_709_303_400_000));
        assert_eq!(bar.volume, 10.0);

        let parsed = parse_live_message(
            r#"{"type":"session","isMarketOpen":false,"lastSessionDate":"2024-03-01"}"#,
        )
        .unwrap();
        assert_eq!(
            parsed.updates,
            vec![FeedUpdate::Session(SessionInfo {
                market_open: false,
                reference_date: NaiveDate::from_ymd_opt(2024, 3, 1),
            })]
        );
    }

    #[test]
    fn test_parse_poll_snapshot_sections_independent() {
        let parsed = parse_poll_snapshot(
            r#"{
                "quote": {"last": 581.2, "bid": 581.1, "ask": 581.3, "t": 1700000000},
                "forming_bar": {"t": 1700000000, "o": 580, "h": 582, "l": 579, "c": 581.2, "v": 1200},
                "levels": {"flip_point": 578},
                "strikes": [{"strike": 580, "net_gamma": 1}],
                "market_open": true
            }"#,
        )
        .unwrap();

        assert_eq!(parsed.dropped, 0);
        assert_eq!(parsed.updates.len(), 5);
        assert!(matches!(parsed.updates[0], FeedUpdate::Session(SessionInfo { market_open: true, .. })));
        assert!(matches!(parsed.updates[1], FeedUpdate::FormingBar(_)));
        assert!(matches!(parsed.updates[2], FeedUpdate::Quote(Quote { bid: Some(_), .. })));

        let parsed = parse_poll_snapshot(r#"{"quote": {"bid": 1}, "levels": {"flip": 10}}"#).unwrap();
        assert_eq!(parsed.dropped, 1);
        assert_eq!(parsed.updates.len(), 1);
    }

    #[test]
    fn test_parse_history_shapes() {
        let parsed = parse_history(
            r#"[[1700000060000,"2","3","1","2.5","100"],[1700000000000,"1","2","0.5","1.5"]]"#,
        )
        .unwrap();
        assert_eq!(parsed.bars.len(), 2);
        assert_eq!(parsed.bars[0].volume, 100.0);
        assert_eq!(parsed.bars[1].volume, 0.0);

        let parsed = parse_history(
            r#"{"candles":[{"time":0,"open":10,"high":11,"low":9,"close":10.5,"volume":100},{"time":60}]}"#,
        )
        .unwrap();
        assert_eq!(parsed.bars.len(), 1);
        assert_eq!(parsed.dropped, 1);

        assert_eq!(parse_history("[]").unwrap(), ParsedBars::default());
        assert_eq!(parse_history(r#"{"bars":null}"#).unwrap(), ParsedBars::default());
        assert!(parse_history(r#""nope""#).is_err());
    }
}
