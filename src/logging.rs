//! Logging setup for the watcher and the CLI.
//!
//! Compact timestamped output on stderr with per-target level configuration,
//! so stdout stays free for command output.
//!
//! # Configuration
//!
//! ```toml
//! [logging]
//! default = "warn"
//!
//! [logging.modules]
//! "syncwatch::analysis" = "debug"   # correlation and ordering decisions
//! ```
//!
//! # Environment Variable
//!
//! `RUST_LOG` takes precedence over config:
//! ```bash
//! RUST_LOG=debug syncwatch analyse --events batch.json
//! RUST_LOG=syncwatch::watcher=trace syncwatch analyse --events batch.json
//! ```

use std::sync::Once;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LoggingConfig;

static INIT: Once = Once::new();

/// HH:MM:SS.mmm
struct CompactTime;

impl FormatTime for CompactTime {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%H:%M:%S%.3f"))
    }
}

/// Filter directives for `config`, e.g. `warn,syncwatch::analysis=debug`.
pub fn filter_directives(config: &LoggingConfig) -> String {
    let mut directives = config.default.clone();
    for (target, level) in &config.modules {
        directives.push_str(&format!(",{target}={level}"));
    }
    directives
}

/// Install the global subscriber. Only the first call has an effect.
///
/// `RUST_LOG` wins over `config` when set.
pub fn init_with_config(config: &LoggingConfig) {
    INIT.call_once(|| {
        let filter = if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            EnvFilter::new(filter_directives(config))
        };

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_timer(CompactTime)
            .with_level(true)
            .with_filter(filter);

        tracing_subscriber::registry().with(fmt_layer).init();
    });
}

/// Log an event with component context.
///
/// # Examples
/// ```ignore
/// log_event!("watcher", "submit", "{change}");
/// log_event!("watcher", "stopped");
/// ```
#[macro_export]
macro_rules! log_event {
    ($component:expr, $event:expr) => {
        tracing::info!("[{}] {}", $component, $event)
    };
    ($component:expr, $event:expr, $($arg:tt)*) => {
        tracing::info!("[{}] {}: {}", $component, $event, format!($($arg)*))
    };
}

/// Debug-only event logging.
///
/// # Examples
/// ```ignore
/// debug_event!("correlator", "move", "{} -> {}", from.display(), to.display());
/// ```
#[macro_export]
macro_rules! debug_event {
    ($component:expr, $event:expr) => {
        tracing::debug!("[{}] {}", $component, $event)
    };
    ($component:expr, $event:expr, $($arg:tt)*) => {
        tracing::debug!("[{}] {}: {}", $component, $event, format!($($arg)*))
    };
}
