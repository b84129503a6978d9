use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, fmt};

/// Install the global subscriber: human-readable lines on stderr, `info` and
/// up unless `RUST_LOG` says otherwise. `verbose` lowers the default to `debug`.
///
/// Calling it twice is harmless; the second call is ignored.
pub fn init(verbose: bool) {
    let default = if verbose { LevelFilter::DEBUG } else { LevelFilter::INFO };
    let filter = EnvFilter::builder()
        .with_default_directive(default.into())
        .from_env_lossy();

    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init();
}

#[cfg(test)]
mod tests {
    #[test]
    fn init_is_idempotent() {
        super::init(false);
        super::init(true);
        tracing::info!("still logging");
    }
}
