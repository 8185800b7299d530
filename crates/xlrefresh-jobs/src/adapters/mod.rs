//! Spreadsheet engine adapter implementations.

pub mod bridge;

pub use bridge::{BridgeConfig, BridgeEngine, BridgeSession};
