//! Tracing setup for cppshell binaries.
//!
//! Logs always go to stderr: stdout belongs to the snippet being run (or to
//! the JSON event stream in `--json` mode).

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Filter override checked before `RUST_LOG`.
pub const LOG_ENV: &str = "CPPSHELL_LOG";

/// `level` for cppshell's own crates, `warn` for everything else.
pub fn default_directives(level: Level) -> String {
    let level = level.as_str().to_ascii_lowercase();
    format!("warn,cppshell_core={level},cppshell={level}")
}

fn env_filter(level: Level) -> EnvFilter {
    [LOG_ENV, EnvFilter::DEFAULT_ENV]
        .into_iter()
        .find_map(|var| EnvFilter::try_from_env(var).ok())
        .unwrap_or_else(|| EnvFilter::new(default_directives(level)))
}

/// Install the global subscriber. Returns `false` if one was already set.
///
/// * `json` - one JSON object per log line.
/// * `level` - verbosity when neither `CPPSHELL_LOG` nor `RUST_LOG` is set.
pub fn init_tracing(json: bool, level: Level) -> bool {
    let format = fmt::layer().with_target(false).with_writer(std::io::stderr);
    let format = if json {
        format.json().boxed()
    } else {
        format.boxed()
    };

    tracing_subscriber::registry()
        .with(format)
        .with(env_filter(level))
        .try_init()
        .is_ok()
}
