use std::sync::Once;

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

static INIT: Once = Once::new();

/// Install the stderr subscriber.
///
/// Levels come from `FATTURA_LOG` (e.g. `FATTURA_LOG=fattura_core=debug`),
/// falling back to `fattura=info`. Output goes to stderr; stdout carries results.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env("FATTURA_LOG")
            .unwrap_or_else(|_| EnvFilter::new("fattura=info"));

        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_line_number(true),
            )
            .with(filter)
            .init();
    });
}
