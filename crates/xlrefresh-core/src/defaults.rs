//! Centralized default constants for xlrefresh.
//!
//! **This module is the single source of truth** for shared default values.
//! Crates and front ends reference these constants instead of defining their
//! own magic numbers.

// =============================================================================
// REFRESH TIMING
// =============================================================================

/// Seconds to wait after triggering recalculation before saving (API surface).
///
/// The external engine recalculates asynchronously and offers no completion
/// signal, so this is a heuristic, not a guarantee.
pub const REFRESH_DELAY_SECS: u64 = 10;

/// Seconds to pause between files (API surface).
pub const INTER_FILE_DELAY_SECS: u64 = 5;

/// Refresh delay used by the terminal run mode.
pub const TERMINAL_REFRESH_DELAY_SECS: u64 = 5;

/// Inter-file delay used by the terminal run mode.
pub const TERMINAL_INTER_FILE_DELAY_SECS: u64 = 2;

/// Fixed settle wait between the main pass and the master-file post-pass.
///
/// Not derived from the refresh settings.
pub const SETTLE_DELAY_SECS: u64 = 30;

/// Macro invoked on the master file during the post-pass.
pub const MASTER_MACRO_NAME: &str = "CombineWithTableAndSource";

// =============================================================================
// ENGINE
// =============================================================================

/// Upper bound for any single engine step (launch, open, save, ...).
pub const ENGINE_STEP_TIMEOUT_SECS: u64 = 300;

/// Seconds to wait for the engine process to exit after `quit`.
pub const ENGINE_EXIT_GRACE_SECS: u64 = 10;

/// Default bridge program (Excel COM through PowerShell).
pub const ENGINE_COMMAND: &str = "powershell";

/// Default bridge arguments.
pub const ENGINE_ARGS: &str = "-NoProfile -ExecutionPolicy Bypass -File scripts/excel-bridge.ps1";

// =============================================================================
// RUNS & EVENTS
// =============================================================================

/// Number of finished runs kept in memory.
pub const RUN_HISTORY_LIMIT: usize = 20;

/// Broadcast capacity for the refresh event bus.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// SERVER & STORAGE
// =============================================================================

/// Default HTTP server host.
pub const SERVER_HOST: &str = "127.0.0.1";

/// Default HTTP server port.
pub const SERVER_PORT: u16 = 8000;

/// Default registry database URL.
pub const DATABASE_URL: &str = "sqlite://excel_paths.db";

/// Default API base URL used by the CLI.
pub const API_URL: &str = "http://127.0.0.1:8000";

/// Default CORS allow-list.
pub const ALLOWED_ORIGINS: &str = "http://127.0.0.1:8000,http://localhost:8000";

/// Registry table name.
pub const PATHS_TABLE: &str = "paths";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_surface_defaults_differ() {
        assert_eq!((REFRESH_DELAY_SECS, INTER_FILE_DELAY_SECS), (10, 5));
        assert_eq!(
            (TERMINAL_REFRESH_DELAY_SECS, TERMINAL_INTER_FILE_DELAY_SECS),
            (5, 2)
        );
    }

    #[test]
    fn test_settle_delay_is_thirty_seconds() {
        assert_eq!(SETTLE_DELAY_SECS, 30);
    }
}
