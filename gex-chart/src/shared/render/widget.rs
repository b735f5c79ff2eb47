//! Ratatui render surface: candles, volume, level lines, per-strike gamma and status
//!
//! Stateless. Every draw re-derives the full picture from one [`RenderSnapshot`].

use super::{
    scale::{PriceScale, gamma_bar_width},
    snapshot::{RenderSnapshot, RenderStatus},
};
use crate::shared::{
    chart::max_abs_gamma,
    connection::ConnectionState,
    types::{Bar, LevelKind, LevelSet, StrikeGamma},
};
use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
};

const C_BUY: Color = Color::Rgb(52, 208, 88);
const C_SELL: Color = Color::Rgb(234, 74, 90);
const C_NEUTRAL: Color = Color::Rgb(180, 180, 100);
const C_DIM: Color = Color::Rgb(120, 120, 120);
const C_BRIGHT: Color = Color::Rgb(220, 220, 220);
const C_ACCENT: Color = Color::Rgb(100, 180, 220);
const C_WARN: Color = Color::Rgb(230, 160, 60);

const BODY: &str = "┃";
const WICK: &str = "│";
const LEVEL_LINE: &str = "─";
const VOLUME_CELL: &str = "▇";
const GAMMA_CELL: &str = "█";

const GAMMA_PANEL_WIDTH: u16 = 28;
const VOLUME_ROWS: u16 = 4;
/// Price axis on the left of the candle pane
const AXIS_WIDTH: usize = 9;
/// Level labels on the right of the candle pane
const LABEL_WIDTH: usize = 18;
/// Strike label plus marker columns in the gamma panel
const STRIKE_LABEL_WIDTH: u16 = 12;

/// Draw the full chart into `area`
pub fn render_chart(f: &mut Frame, area: Rect, snapshot: &RenderSnapshot) {
    let [status_area, body] =
        Layout::vertical([Constraint::Length(1), Constraint::Min(0)]).areas(area);
    render_status_line(f, status_area, snapshot);

    let [chart_area, gamma_area] =
        Layout::horizontal([Constraint::Min(30), Constraint::Length(GAMMA_PANEL_WIDTH)]).areas(body);

    let block = Block::default()
        .title(format!(" {} ", snapshot.symbol))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(state_color(snapshot.connection.state)));
    let inner = block.inner(chart_area);
    f.render_widget(block, chart_area);

    let gamma_block = Block::default()
        .title(" GEX ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(C_DIM));
    let gamma_inner = gamma_block.inner(gamma_area);
    f.render_widget(gamma_block, gamma_area);

    let volume_rows = if inner.height > VOLUME_ROWS * 3 { VOLUME_ROWS } else { 0 };
    let [price_area, volume_area] =
        Layout::vertical([Constraint::Min(1), Constraint::Length(volume_rows)]).areas(inner);

    // Without bars the status message takes the top row; cached overlays still draw below it
    let plot_area = if snapshot.status == RenderStatus::Ready {
        price_area
    } else {
        let [message_area, plot_area] =
            Layout::vertical([Constraint::Length(1), Constraint::Min(0)]).areas(price_area);
        render_placeholder(f, message_area, snapshot);
        plot_area
    };

    let columns = (plot_area.width as usize).saturating_sub(AXIS_WIDTH + LABEL_WIDTH);
    let bars = visible_bars(snapshot, columns);
    let prices = bars
        .iter()
        .flat_map(|bar| [bar.high, bar.low])
        .chain(snapshot.levels.iter().map(|(_, price)| price));
    let Some(scale) = PriceScale::fit(prices, plot_area.height).or_else(|| {
        PriceScale::fit(snapshot.strikes.iter().map(|s| s.strike), plot_area.height)
    }) else {
        return;
    };

    f.render_widget(Paragraph::new(price_lines(&bars, &snapshot.levels, &scale, columns)), plot_area);
    if volume_rows > 0 && !bars.is_empty() {
        f.render_widget(Paragraph::new(volume_lines(&bars, volume_area.height)), volume_area);
    }

    // Gamma rows line up with price rows
    let offset = plot_area.y - inner.y;
    let gamma_rows = Rect {
        y: gamma_inner.y + offset,
        height: gamma_inner.height.saturating_sub(offset),
        ..gamma_inner
    };
    f.render_widget(
        Paragraph::new(gamma_lines(&snapshot.strikes, &scale, gamma_rows.width)),
        gamma_rows,
    );
}

/// Newest bars that fit in `columns`, oldest first, forming bar last
fn visible_bars(snapshot: &RenderSnapshot, columns: usize) -> Vec<&Bar> {
    let skip = snapshot.bar_count().saturating_sub(columns);
    snapshot.bars().skip(skip).collect()
}

fn candle_glyph(bar: &Bar, scale: &PriceScale, row: u16) -> &'static str {
    let body_top = scale.row_clamped(bar.open.max(bar.close));
    let body_bottom = scale.row_clamped(bar.open.min(bar.close));
    if (body_top..=body_bottom).contains(&row) {
        return BODY;
    }
    let high = scale.row_clamped(bar.high);
    let low = scale.row_clamped(bar.low);
    if (high..=low).contains(&row) { WICK } else { " " }
}

fn candle_color(bar: &Bar) -> Color {
    if bar.is_bullish() { C_BUY } else { C_SELL }
}

fn level_color(kind: LevelKind) -> Color {
    match kind {
        LevelKind::FlipPoint => C_NEUTRAL,
        LevelKind::CallWall => C_SELL,
        LevelKind::PutWall => C_BUY,
        LevelKind::UpperBand | LevelKind::LowerBand => C_ACCENT,
    }
}

fn state_color(state: ConnectionState) -> Color {
    match state {
        ConnectionState::Connected => C_ACCENT,
        ConnectionState::Polling => C_NEUTRAL,
        ConnectionState::Reconnecting => C_WARN,
        ConnectionState::Disconnected => C_SELL,
    }
}

fn price_lines(bars: &[&Bar], levels: &LevelSet, scale: &PriceScale, columns: usize) -> Vec<Line<'static>> {
    let level_rows: Vec<(u16, LevelKind, f64)> = levels
        .iter()
        .filter_map(|(kind, price)| scale.row_of(price).map(|row| (row, kind, price)))
        .collect();

    (0..scale.rows())
        .map(|row| {
            let level = level_rows.iter().find(|(level_row, ..)| *level_row == row);
            let mut spans = Vec::with_capacity(columns + 2);

            let axis = if row % 4 == 0 {
                format!("{:>8.2} ", scale.price_at(row))
            } else {
                " ".repeat(AXIS_WIDTH)
            };
            spans.push(Span::styled(axis, Style::default().fg(C_DIM)));

            for column in 0..columns {
                let glyph = bars.get(column).map_or(" ", |bar| candle_glyph(bar, scale, row));
                match (glyph, level) {
                    (" ", Some((_, kind, _))) => {
                        spans.push(Span::styled(LEVEL_LINE, Style::default().fg(level_color(*kind))))
                    }
                    (" ", None) => spans.push(Span::raw(" ")),
                    (glyph, _) => {
                        let color = bars.get(column).map_or(C_DIM, |bar| candle_color(bar));
                        spans.push(Span::styled(glyph, Style::default().fg(color)))
                    }
                }
            }

            if let Some((_, kind, price)) = level {
                let label: String = format!(" {} {:.2}", kind.label(), price)
                    .chars()
                    .take(LABEL_WIDTH)
                    .collect();
                spans.push(Span::styled(
                    label,
                    Style::default().fg(level_color(*kind)).add_modifier(Modifier::BOLD),
                ));
            }
            Line::from(spans)
        })
        .collect()
}

fn volume_lines(bars: &[&Bar], rows: u16) -> Vec<Line<'static>> {
    let max_volume = bars.iter().map(|bar| bar.volume).fold(0.0, f64::max);
    let heights: Vec<u16> = bars
        .iter()
        .map(|bar| {
            if max_volume <= 0.0 || bar.volume <= 0.0 {
                return 0;
            }
            ((bar.volume / max_volume * f64::from(rows)).round() as u16).clamp(1, rows)
        })
        .collect();

    (0..rows)
        .map(|row| {
            let level = rows - row;
            let mut spans = vec![Span::raw(" ".repeat(AXIS_WIDTH))];
            spans.extend(bars.iter().zip(&heights).map(|(bar, height)| {
                if *height >= level {
                    Span::styled(VOLUME_CELL, Style::default().fg(candle_color(bar)).add_modifier(Modifier::DIM))
                } else {
                    Span::raw(" ")
                }
            }));
            Line::from(spans)
        })
        .collect()
}

fn gamma_lines(strikes: &[StrikeGamma], scale: &PriceScale, width: u16) -> Vec<Line<'static>> {
    let max_abs = max_abs_gamma(strikes);
    let bar_width = width.saturating_sub(STRIKE_LABEL_WIDTH);

    (0..scale.rows())
        .map(|row| {
            // Several strikes can share a row; the largest exposure wins
            let strike = strikes
                .iter()
                .filter(|s| scale.row_of(s.strike) == Some(row))
                .max_by(|a, b| a.net_gamma.abs().total_cmp(&b.net_gamma.abs()));
            let Some(strike) = strike else {
                return Line::from("");
            };

            let markers = [
                (strike.flags.magnet, "M", C_ACCENT),
                (strike.flags.pin, "P", C_NEUTRAL),
                (strike.flags.danger, "D", C_WARN),
            ];
            let color = if strike.net_gamma >= 0.0 { C_BUY } else { C_SELL };
            let cells = gamma_bar_width(strike.net_gamma, max_abs, bar_width) as usize;

            let mut spans = vec![Span::styled(format!("{:>7.1} ", strike.strike), Style::default().fg(C_DIM))];
            spans.extend(markers.into_iter().map(|(set, marker, marker_color)| {
                if set {
                    Span::styled(marker, Style::default().fg(marker_color).add_modifier(Modifier::BOLD))
                } else {
                    Span::raw(" ")
                }
            }));
            spans.push(Span::raw(" "));
            spans.push(Span::styled(GAMMA_CELL.repeat(cells), Style::default().fg(color)));
            Line::from(spans)
        })
        .collect()
}

fn render_status_line(f: &mut Frame, area: Rect, snapshot: &RenderSnapshot) {
    let connection = &snapshot.connection;
    let state = match connection.state {
        ConnectionState::Connected => "● LIVE".to_string(),
        ConnectionState::Polling => "◐ POLLING".to_string(),
        ConnectionState::Reconnecting if connection.attempt > 0 => {
            format!("○ RECONNECTING (retry {})", connection.attempt)
        }
        ConnectionState::Reconnecting => "○ RECONNECTING".to_string(),
        ConnectionState::Disconnected => "✕ DISCONNECTED".to_string(),
    };

    let price = snapshot
        .last_price()
        .map_or_else(|| "--".to_string(), |price| format!("{:.2}", price));

    let mut spans = vec![
        Span::styled(
            format!(" {} ", snapshot.symbol),
            Style::default().fg(C_BRIGHT).add_modifier(Modifier::BOLD),
        ),
        Span::styled(format!("{}  ", price), Style::default().fg(C_BRIGHT)),
        Span::styled(state, Style::default().fg(state_color(connection.state))),
    ];

    if connection.stale {
        spans.push(Span::styled(
            "  [STALE]",
            Style::default().fg(C_WARN).add_modifier(Modifier::BOLD),
        ));
    }
    if let Some(session) = snapshot.session.filter(|session| !session.market_open) {
        let closed = match session.reference_date {
            Some(date) => format!("  MARKET CLOSED · last session {}", date),
            None => "  MARKET CLOSED".to_string(),
        };
        spans.push(Span::styled(closed, Style::default().fg(C_NEUTRAL)));
    }
    if let Some(message) = &connection.message {
        spans.push(Span::styled(format!("  {}", message), Style::default().fg(C_DIM)));
    }

    f.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn render_placeholder(f: &mut Frame, area: Rect, snapshot: &RenderSnapshot) {
    let (text, color) = match &snapshot.status {
        RenderStatus::Loading => ("Loading history...".to_string(), C_DIM),
        RenderStatus::NoData => (format!("No data for {}", snapshot.symbol), C_DIM),
        RenderStatus::Error(message) => (format!("Error: {}", message), C_SELL),
        RenderStatus::Ready => (String::new(), C_DIM),
    };
    f.render_widget(
        Paragraph::new(Line::from(Span::styled(text, Style::default().fg(color)))),
        area,
    );
}
