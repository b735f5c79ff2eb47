/// GEX Chart - Terminal front end
///
/// Live candles with a forming bar, dealer gamma levels and per-strike exposure:
/// - Live push feed with polling and last-known-good fallback
/// - Status line with connection state, staleness and market-closed framing
/// - `q` / `Esc` to quit
use std::{
    error::Error,
    fs::File,
    io,
    path::PathBuf,
    sync::Mutex,
    time::{Duration, Instant},
};

use crossterm::{
    event::{self, Event, KeyCode},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use gex_chart::{
    ConnectionConfig, EngineConfig, LastKnownGood, RenderSnapshot, render_chart, spawn_session,
};
use ratatui::{Terminal, backend::CrosstermBackend};
use rustls::crypto::ring::default_provider;
use tokio::sync::watch;
use tracing::{info, warn};

const DRAW_INTERVAL: Duration = Duration::from_millis(100);

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let _ = default_provider().install_default();
    init_logging()?;

    let engine = EngineConfig::from_env();
    let connection = ConnectionConfig::from_env();
    info!(symbol = %engine.symbol, ws_url = %connection.ws_url, "starting gex-chart");

    let cache = cache_path();
    let seed = cache.as_ref().map(load_last_known_good).unwrap_or_default();

    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
        original_hook(info);
    }));

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let (snapshot_tx, snapshot_rx) = watch::channel(RenderSnapshot::loading(engine.symbol.clone()));
    let mut session = spawn_session(engine, connection, seed, snapshot_tx);

    let mut last_draw = Instant::now() - DRAW_INTERVAL;
    let result: Result<(), Box<dyn Error>> = loop {
        if event::poll(Duration::from_millis(5))? {
            if let Event::Key(key) = event::read()? {
                if matches!(key.code, KeyCode::Char('q') | KeyCode::Esc) {
                    break Ok(());
                }
            }
        }

        if last_draw.elapsed() >= DRAW_INTERVAL {
            let snapshot = snapshot_rx.borrow().clone();
            terminal.draw(|f| render_chart(f, f.area(), &snapshot))?;
            last_draw = Instant::now();
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    };

    session.shutdown();
    if let (Some(snapshot), Some(path)) = (session.join().await, cache) {
        save_last_known_good(&path, &snapshot);
    }

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    result
}

/// Initialize logging to a file; the terminal belongs to the UI
fn init_logging() -> Result<(), Box<dyn Error>> {
    let path = std::env::var("GEX_CHART_LOG").unwrap_or_else(|_| "gex-chart.log".to_string());
    let file = File::create(path)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

/// Optional last-known-good cache file, from `GEX_CHART_CACHE`
fn cache_path() -> Option<PathBuf> {
    std::env::var("GEX_CHART_CACHE")
        .ok()
        .filter(|path| !path.trim().is_empty())
        .map(PathBuf::from)
}

fn load_last_known_good(path: &PathBuf) -> LastKnownGood {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(error) => {
            info!(path = %path.display(), %error, "no last known good snapshot");
            return LastKnownGood::default();
        }
    };
    serde_json::from_str(&text).unwrap_or_else(|error| {
        warn!(path = %path.display(), %error, "ignoring unreadable last known good snapshot");
        LastKnownGood::default()
    })
}

fn save_last_known_good(path: &PathBuf, snapshot: &LastKnownGood) {
    let result = serde_json::to_string(snapshot)
        .map_err(|error| error.to_string())
        .and_then(|json| std::fs::write(path, json).map_err(|error| error.to_string()));
    if let Err(error) = result {
        warn!(path = %path.display(), %error, "failed to save last known good snapshot");
    }
}
