/*
 * Classification engine that turns selected filesystem subtrees into package
 * previews. `core` holds the platform-agnostic engine; `app_logic` wires it into a
 * session that a browser or a command-line driver can operate.
 */
pub mod app_logic;
pub mod core;

use simplelog::{Config, LevelFilter};
use std::sync::Once;

static LOGGER_INIT: Once = Once::new();

/*
 * Installs the global logger. Safe to call more than once; only the first call has
 * an effect. Unit tests route output through `TestLogger` so it is captured per test.
 */
pub fn initialize_logging() {
    LOGGER_INIT.call_once(|| {
        let level = if cfg!(debug_assertions) {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        };
        #[cfg(test)]
        let result = simplelog::TestLogger::init(level, Config::default());
        #[cfg(not(test))]
        let result = simplelog::TermLogger::init(
            level,
            Config::default(),
            simplelog::TerminalMode::Mixed,
            simplelog::ColorChoice::Auto,
        );
        if let Err(e) = result {
            eprintln!("Failed to initialize logger: {e}");
        }
    });
}
