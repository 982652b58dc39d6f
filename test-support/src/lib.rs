pub mod fake_smtp;

use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};
use std::sync::Once;

/// Routes `log` records (and `tracing` events of crates built with its `log` feature) to the
/// terminal so that failing tests show what the service under test was doing.
pub fn setup_logging() {
    static LOGGING: Once = Once::new();
    LOGGING.call_once(|| {
        let _ = TermLogger::init(
            LevelFilter::Debug,
            Config::default(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        );
    });
}
