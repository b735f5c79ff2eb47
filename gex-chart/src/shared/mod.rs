/// Shared modules for the GEX chart engine
pub mod chart;
pub mod config;
pub mod connection;
pub mod error;
pub mod observer;
pub mod render;
pub mod session;
pub mod time;
pub mod types;
pub mod wire;
