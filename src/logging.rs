use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise the crate logs at `info`, or `debug`
/// when `verbose` is on. `json` switches console output to one JSON object
/// per event.
pub fn init_logging(verbose: bool, json: bool) {
    let default_level = if verbose { "salesforge=debug" } else { "salesforge=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
    };

    // A subscriber may already be installed by an embedding application.
    if result.is_err() {
        tracing::debug!("tracing subscriber already initialised");
    }
}
